use std::env;
use std::fs;
use std::path::{Path, PathBuf};

use nurture_core::config::{AppConfig, LoadOptions};
use secrecy::ExposeSecret;
use toml::Value;

pub fn run() -> String {
    let config = match AppConfig::load(LoadOptions::default()) {
        Ok(config) => config,
        Err(error) => return format!("config validation failed: {error}"),
    };

    let config_file_path = detect_config_path();
    let config_file_doc = load_config_file_doc(config_file_path.as_deref());

    let mut lines = vec!["effective config (source precedence: env > file > default):".to_string()];
    for (key, value, env_key) in effective_values(&config) {
        let source =
            field_source(key, env_key, config_file_doc.as_ref(), config_file_path.as_deref());
        lines.push(render_line(key, &value, source));
    }
    lines.join("\n")
}

/// Every reported key with its rendered value and environment variable.
fn effective_values(config: &AppConfig) -> Vec<(&'static str, String, &'static str)> {
    let agent = &config.agent;
    vec![
        ("database.url", config.database.url.clone(), "NURTURE_DATABASE_URL"),
        (
            "database.max_connections",
            config.database.max_connections.to_string(),
            "NURTURE_DATABASE_MAX_CONNECTIONS",
        ),
        (
            "database.timeout_secs",
            config.database.timeout_secs.to_string(),
            "NURTURE_DATABASE_TIMEOUT_SECS",
        ),
        ("llm.provider", config.llm.provider.as_str().to_string(), "NURTURE_LLM_PROVIDER"),
        ("llm.model", config.llm.model.clone(), "NURTURE_LLM_MODEL"),
        ("llm.router_model", config.router_model().to_string(), "NURTURE_LLM_ROUTER_MODEL"),
        (
            "llm.base_url",
            config.llm.base_url.clone().unwrap_or_else(|| "<unset>".to_string()),
            "NURTURE_LLM_BASE_URL",
        ),
        ("llm.api_key", redact_secret(config), "NURTURE_LLM_API_KEY"),
        ("llm.timeout_secs", config.llm.timeout_secs.to_string(), "NURTURE_LLM_TIMEOUT_SECS"),
        ("llm.max_retries", config.llm.max_retries.to_string(), "NURTURE_LLM_MAX_RETRIES"),
        ("server.bind_address", config.server.bind_address.clone(), "NURTURE_SERVER_BIND_ADDRESS"),
        ("server.port", config.server.port.to_string(), "NURTURE_SERVER_PORT"),
        (
            "server.graceful_shutdown_secs",
            config.server.graceful_shutdown_secs.to_string(),
            "NURTURE_SERVER_GRACEFUL_SHUTDOWN_SECS",
        ),
        (
            "agent.retrieval_top_k",
            agent.retrieval_top_k.to_string(),
            "NURTURE_AGENT_RETRIEVAL_TOP_K",
        ),
        ("agent.context_window", agent.context_window.to_string(), "NURTURE_AGENT_CONTEXT_WINDOW"),
        (
            "agent.classifier_timeout_ms",
            agent.classifier_timeout_ms.to_string(),
            "NURTURE_AGENT_CLASSIFIER_TIMEOUT_MS",
        ),
        (
            "agent.lock_timeout_ms",
            agent.lock_timeout_ms.to_string(),
            "NURTURE_AGENT_LOCK_TIMEOUT_MS",
        ),
        (
            "agent.goal_slot_policy",
            agent.goal_slot_policy.as_str().to_string(),
            "NURTURE_AGENT_GOAL_SLOT_POLICY",
        ),
        (
            "agent.default_slot_hour",
            agent.default_slot_hour.to_string(),
            "NURTURE_AGENT_DEFAULT_SLOT_HOUR",
        ),
        ("logging.level", config.logging.level.clone(), "NURTURE_LOGGING_LEVEL"),
        (
            "logging.format",
            format!("{:?}", config.logging.format).to_lowercase(),
            "NURTURE_LOGGING_FORMAT",
        ),
    ]
}

fn detect_config_path() -> Option<PathBuf> {
    [PathBuf::from("nurture.toml"), PathBuf::from("config/nurture.toml")]
        .into_iter()
        .find(|path| path.exists())
}

fn load_config_file_doc(path: Option<&Path>) -> Option<Value> {
    let path = path?;
    let raw = fs::read_to_string(path).ok()?;
    raw.parse::<Value>().ok()
}

fn field_source(
    key_path: &str,
    env_key: &str,
    config_file_doc: Option<&Value>,
    config_file_path: Option<&Path>,
) -> String {
    if env::var_os(env_key).is_some() {
        return format!("env ({env_key})");
    }

    if let Some(doc) = config_file_doc {
        if contains_path(doc, key_path) {
            let file_path = config_file_path
                .map(|path| path.display().to_string())
                .unwrap_or_else(|| "config file".to_string());
            return format!("file ({file_path})");
        }
    }

    "default".to_string()
}

fn contains_path(root: &Value, key_path: &str) -> bool {
    let mut current = root;
    for key in key_path.split('.') {
        let Some(next) = current.get(key) else {
            return false;
        };
        current = next;
    }
    true
}

fn render_line(key: &str, value: &str, source: String) -> String {
    format!("- {key} = {value} (source: {source})")
}

fn redact_secret(config: &AppConfig) -> String {
    match &config.llm.api_key {
        None => "<unset>".to_string(),
        Some(key) if key.expose_secret().trim().is_empty() => "<empty>".to_string(),
        Some(_) => "<redacted>".to_string(),
    }
}

#[cfg(test)]
mod tests {
    use toml::Value;

    use super::{contains_path, effective_values, field_source};
    use nurture_core::config::AppConfig;

    #[test]
    fn dotted_keys_are_resolved_in_the_file_document() {
        let doc =
            "[agent]\ngoal_slot_policy = \"hold_until_slot\"\n".parse::<Value>().expect("toml");

        assert!(contains_path(&doc, "agent.goal_slot_policy"));
        assert!(!contains_path(&doc, "agent.lock_timeout_ms"));
        assert_eq!(
            field_source("agent.goal_slot_policy", "NURTURE_TEST_UNSET_KEY", Some(&doc), None),
            "file (config file)"
        );
        assert_eq!(
            field_source("llm.model", "NURTURE_TEST_UNSET_KEY", Some(&doc), None),
            "default"
        );
    }

    #[test]
    fn every_section_is_reported_and_defaults_hide_nothing_secret() {
        let values = effective_values(&AppConfig::default());
        for key in [
            "database.url",
            "llm.api_key",
            "server.port",
            "agent.goal_slot_policy",
            "logging.format",
        ] {
            assert!(values.iter().any(|(name, _, _)| *name == key), "{key}");
        }
        let api_key = values
            .iter()
            .find(|(name, _, _)| *name == "llm.api_key")
            .map(|(_, value, _)| value.as_str());
        assert_eq!(api_key, Some("<unset>"));
    }
}
