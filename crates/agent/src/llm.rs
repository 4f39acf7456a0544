use std::time::Duration;

use async_trait::async_trait;
use secrecy::{ExposeSecret, SecretString};
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::warn;

use nurture_core::config::{LlmConfig, LlmProvider};
use nurture_core::errors::CapabilityError;

/// Which configured model a prompt should go to.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ModelHint {
    /// Short classification prompts.
    Router,
    /// Replies, summaries, SQL and outreach.
    Responder,
}

#[async_trait]
pub trait LlmClient: Send + Sync {
    async fn complete(&self, prompt: &str, hint: ModelHint) -> Result<String, CapabilityError>;
}

/// Calls `complete` once plus up to `max_retries` more times.
pub async fn complete_with_retry<L>(
    llm: &L,
    prompt: &str,
    hint: ModelHint,
    max_retries: u32,
) -> Result<String, CapabilityError>
where
    L: LlmClient + ?Sized,
{
    let mut attempt = 0;
    loop {
        match llm.complete(prompt, hint).await {
            Ok(text) if !text.trim().is_empty() => return Ok(text.trim().to_string()),
            Ok(_) => {
                let error = CapabilityError::Generation("empty completion".to_string());
                if attempt >= max_retries {
                    return Err(error);
                }
                warn!(
                    event_name = "agent.llm.retry",
                    attempt,
                    error = %error,
                    "retrying generation"
                );
            }
            Err(error) => {
                if attempt >= max_retries {
                    return Err(error);
                }
                warn!(
                    event_name = "agent.llm.retry",
                    attempt,
                    error = %error,
                    "retrying generation"
                );
            }
        }
        attempt += 1;
    }
}

#[derive(Debug, Error)]
pub enum LlmClientError {
    #[error("llm provider `{provider}` requires an api key")]
    MissingApiKey { provider: &'static str },
    #[error("could not build http client: {0}")]
    Build(#[from] reqwest::Error),
}

/// HTTP transport for the configured provider.
pub struct HttpLlmClient {
    provider: LlmProvider,
    base_url: String,
    api_key: Option<SecretString>,
    model: String,
    router_model: String,
    client: reqwest::Client,
}

impl HttpLlmClient {
    pub fn from_config(config: &LlmConfig) -> Result<Self, LlmClientError> {
        let api_key = config.api_key.clone();
        if api_key.is_none() && config.provider != LlmProvider::Ollama {
            return Err(LlmClientError::MissingApiKey { provider: config.provider.as_str() });
        }

        let base_url = config
            .base_url
            .clone()
            .unwrap_or_else(|| default_base_url(config.provider).to_string())
            .trim_end_matches('/')
            .to_string();
        let client =
            reqwest::Client::builder().timeout(Duration::from_secs(config.timeout_secs)).build()?;

        Ok(Self {
            provider: config.provider,
            base_url,
            api_key,
            model: config.model.clone(),
            router_model: config.router_model.clone().unwrap_or_else(|| config.model.clone()),
            client,
        })
    }

    fn model_for(&self, hint: ModelHint) -> &str {
        match hint {
            ModelHint::Router => &self.router_model,
            ModelHint::Responder => &self.model,
        }
    }

    fn api_key(&self) -> &str {
        self.api_key.as_ref().map(|key| key.expose_secret()).unwrap_or_default()
    }

    async fn send_json<B, R>(
        &self,
        request: reqwest::RequestBuilder,
        body: &B,
    ) -> Result<R, CapabilityError>
    where
        B: Serialize + ?Sized,
        R: for<'de> Deserialize<'de>,
    {
        let response = request
            .json(body)
            .send()
            .await
            .map_err(|error| CapabilityError::Generation(format!("request failed: {error}")))?;

        if !response.status().is_success() {
            let status = response.status();
            let body = response.text().await.unwrap_or_else(|_| "unable to read body".to_string());
            return Err(CapabilityError::Generation(format!("provider returned {status}: {body}")));
        }

        response
            .json::<R>()
            .await
            .map_err(|error| CapabilityError::Generation(format!("malformed response: {error}")))
    }

    async fn complete_openai(&self, prompt: &str, model: &str) -> Result<String, CapabilityError> {
        let request = ChatCompletionRequest {
            model,
            messages: vec![ChatMessage { role: "user", content: prompt }],
            temperature: 0.2,
        };
        let builder = self
            .client
            .post(format!("{}/chat/completions", self.base_url))
            .bearer_auth(self.api_key());
        let completion: ChatCompletionResponse = self.send_json(builder, &request).await?;

        completion
            .choices
            .into_iter()
            .next()
            .map(|choice| choice.message.content)
            .ok_or_else(|| CapabilityError::Generation("no choices returned".to_string()))
    }

    async fn complete_anthropic(
        &self,
        prompt: &str,
        model: &str,
    ) -> Result<String, CapabilityError> {
        let request = AnthropicRequest {
            model,
            max_tokens: 1024,
            messages: vec![ChatMessage { role: "user", content: prompt }],
        };
        let builder = self
            .client
            .post(format!("{}/v1/messages", self.base_url))
            .header("x-api-key", self.api_key())
            .header("anthropic-version", "2023-06-01");
        let response: AnthropicResponse = self.send_json(builder, &request).await?;

        let text = response
            .content
            .into_iter()
            .filter_map(|block| block.text)
            .collect::<Vec<_>>()
            .join("");
        Ok(text)
    }

    async fn complete_ollama(&self, prompt: &str, model: &str) -> Result<String, CapabilityError> {
        let request = OllamaRequest { model, prompt, stream: false };
        let builder = self.client.post(format!("{}/api/generate", self.base_url));
        let response: OllamaResponse = self.send_json(builder, &request).await?;
        Ok(response.response)
    }
}

#[async_trait]
impl LlmClient for HttpLlmClient {
    async fn complete(&self, prompt: &str, hint: ModelHint) -> Result<String, CapabilityError> {
        let model = self.model_for(hint);
        match self.provider {
            LlmProvider::OpenAi => self.complete_openai(prompt, model).await,
            LlmProvider::Anthropic => self.complete_anthropic(prompt, model).await,
            LlmProvider::Ollama => self.complete_ollama(prompt, model).await,
        }
    }
}

fn default_base_url(provider: LlmProvider) -> &'static str {
    match provider {
        LlmProvider::OpenAi => "https://api.openai.com/v1",
        LlmProvider::Anthropic => "https://api.anthropic.com",
        LlmProvider::Ollama => "http://localhost:11434",
    }
}

#[derive(Serialize)]
struct ChatMessage<'a> {
    role: &'a str,
    content: &'a str,
}

#[derive(Serialize)]
struct ChatCompletionRequest<'a> {
    model: &'a str,
    messages: Vec<ChatMessage<'a>>,
    temperature: f32,
}

#[derive(Deserialize)]
struct ChatCompletionResponse {
    choices: Vec<ChatChoice>,
}

#[derive(Deserialize)]
struct ChatChoice {
    message: ChatChoiceMessage,
}

#[derive(Deserialize)]
struct ChatChoiceMessage {
    content: String,
}

#[derive(Serialize)]
struct AnthropicRequest<'a> {
    model: &'a str,
    max_tokens: u32,
    messages: Vec<ChatMessage<'a>>,
}

#[derive(Deserialize)]
struct AnthropicResponse {
    content: Vec<AnthropicBlock>,
}

#[derive(Deserialize)]
struct AnthropicBlock {
    #[serde(default)]
    text: Option<String>,
}

#[derive(Serialize)]
struct OllamaRequest<'a> {
    model: &'a str,
    prompt: &'a str,
    stream: bool,
}

#[derive(Deserialize)]
struct OllamaResponse {
    response: String,
}
