use tera::{Context, Tera};
use tracing::warn;

use nurture_core::errors::CapabilityError;

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Prompt {
    Router,
    RagAnswer,
    SqlGenerate,
    SqlSummary,
    Outreach,
}

impl Prompt {
    pub fn template_name(&self) -> &'static str {
        match self {
            Self::Router => "router.txt",
            Self::RagAnswer => "rag_answer.txt",
            Self::SqlGenerate => "t2sql_generate.txt",
            Self::SqlSummary => "t2sql_summary.txt",
            Self::Outreach => "outreach.txt",
        }
    }
}

const TEMPLATES: &[(&str, &str)] = &[
    ("router.txt", include_str!("../../../templates/prompts/router.txt")),
    ("rag_answer.txt", include_str!("../../../templates/prompts/rag_answer.txt")),
    ("t2sql_generate.txt", include_str!("../../../templates/prompts/t2sql_generate.txt")),
    ("t2sql_summary.txt", include_str!("../../../templates/prompts/t2sql_summary.txt")),
    ("outreach.txt", include_str!("../../../templates/prompts/outreach.txt")),
];

/// Prompt templates compiled once and shared by every capability adapter.
#[derive(Clone, Debug)]
pub struct PromptLibrary {
    tera: Tera,
}

impl Default for PromptLibrary {
    fn default() -> Self {
        Self::new()
    }
}

impl PromptLibrary {
    pub fn new() -> Self {
        let mut tera = Tera::default();
        for (name, source) in TEMPLATES {
            if let Err(error) = tera.add_raw_template(name, source) {
                warn!(
                    event_name = "agent.prompts.template_invalid",
                    template = name,
                    error = %error,
                    "skipping prompt template"
                );
            }
        }
        Self { tera }
    }

    /// A missing variable or template surfaces as a generation failure so the
    /// caller falls back to its templated reply.
    pub fn render(&self, prompt: Prompt, context: &Context) -> Result<String, CapabilityError> {
        self.tera.render(prompt.template_name(), context).map_err(|error| {
            CapabilityError::Generation(format!(
                "prompt `{}` failed to render: {error}",
                prompt.template_name()
            ))
        })
    }
}

#[cfg(test)]
mod tests {
    use tera::Context;

    use super::{Prompt, PromptLibrary};

    #[test]
    fn router_prompt_lists_history_and_question() {
        let library = PromptLibrary::new();
        let mut context = Context::new();
        context.insert("question", "How many 2 bed units are left?");
        context.insert("history", &vec!["Agent: Would you like a viewing?".to_string()]);

        let rendered = library.render(Prompt::Router, &context).expect("render");
        assert!(rendered.contains("Question: How many 2 bed units are left?"));
        assert!(rendered.contains("- Agent: Would you like a viewing?"));
        assert!(rendered.trim_end().ends_with("Answer (T2SQL or RAG):"));
    }

    #[test]
    fn missing_variables_are_generation_failures() {
        let library = PromptLibrary::new();
        let error = library.render(Prompt::SqlGenerate, &Context::new()).expect_err("missing vars");
        assert_eq!(error.kind(), "generation_error");
    }
}
