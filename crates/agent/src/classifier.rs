use std::sync::Arc;

use async_trait::async_trait;
use tera::Context;

use nurture_core::domain::conversation::{Branch, Message, MessageRole};

use crate::capabilities::{Classifier, ClassifierResult};
use crate::llm::{LlmClient, ModelHint};
use crate::prompts::{Prompt, PromptLibrary};

const LABEL_CONFIDENCE: f32 = 0.9;

/// Asks the router model to answer `T2SQL` or `RAG`.
pub struct LlmClassifier<L: ?Sized> {
    llm: Arc<L>,
    prompts: Arc<PromptLibrary>,
}

impl<L> LlmClassifier<L>
where
    L: LlmClient + ?Sized,
{
    pub fn new(llm: Arc<L>, prompts: Arc<PromptLibrary>) -> Self {
        Self { llm, prompts }
    }
}

#[async_trait]
impl<L> Classifier for LlmClassifier<L>
where
    L: LlmClient + ?Sized,
{
    async fn classify(&self, text: &str, context: &[Message]) -> ClassifierResult {
        let mut prompt_context = Context::new();
        prompt_context.insert("question", text);
        prompt_context.insert("history", &history_lines(context));

        let prompt = match self.prompts.render(Prompt::Router, &prompt_context) {
            Ok(prompt) => prompt,
            Err(error) => return ClassifierResult::unavailable(error.to_string()),
        };

        match self.llm.complete(&prompt, ModelHint::Router).await {
            Ok(answer) => parse_label(&answer).map_or_else(
                || {
                    ClassifierResult::unavailable(format!(
                        "malformed classifier answer `{}`",
                        answer.trim()
                    ))
                },
                |label| ClassifierResult::Classified { label, confidence: LABEL_CONFIDENCE },
            ),
            Err(error) => ClassifierResult::unavailable(error.to_string()),
        }
    }
}

/// Only a bare `T2SQL` or `RAG` answer counts, ignoring case, quotes and
/// trailing punctuation.
pub fn parse_label(answer: &str) -> Option<Branch> {
    let cleaned = answer
        .trim()
        .trim_matches(|ch: char| {
            ch == '`' || ch == '"' || ch == '\'' || ch == '.' || ch.is_whitespace()
        })
        .to_ascii_uppercase();
    match cleaned.as_str() {
        "T2SQL" => Some(Branch::DataQuestion),
        "RAG" => Some(Branch::DocumentQuestion),
        _ => None,
    }
}

pub(crate) fn history_lines(messages: &[Message]) -> Vec<String> {
    messages
        .iter()
        .map(|message| {
            let speaker = match message.role {
                MessageRole::Lead => "Lead",
                MessageRole::Agent => "Agent",
            };
            format!("{speaker}: {}", message.text)
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use async_trait::async_trait;

    use nurture_core::domain::conversation::Branch;
    use nurture_core::errors::CapabilityError;

    use super::{parse_label, LlmClassifier};
    use crate::capabilities::{Classifier, ClassifierResult};
    use crate::llm::{LlmClient, ModelHint};
    use crate::prompts::PromptLibrary;

    struct Fixed(Result<String, CapabilityError>);

    #[async_trait]
    impl LlmClient for Fixed {
        async fn complete(&self, prompt: &str, hint: ModelHint) -> Result<String, CapabilityError> {
            assert_eq!(hint, ModelHint::Router);
            assert!(prompt.contains("Question: Is there a pool?"));
            self.0.clone()
        }
    }

    #[test]
    fn labels_are_parsed_strictly() {
        assert_eq!(parse_label("T2SQL"), Some(Branch::DataQuestion));
        assert_eq!(parse_label(" `rag`.\n"), Some(Branch::DocumentQuestion));
        assert_eq!(parse_label("I think RAG"), None);
        assert_eq!(parse_label(""), None);
    }

    #[tokio::test]
    async fn malformed_or_failed_answers_are_unavailable() {
        let prompts = Arc::new(PromptLibrary::new());

        let ok = LlmClassifier::new(Arc::new(Fixed(Ok("RAG".into()))), prompts.clone());
        assert_eq!(
            ok.classify("Is there a pool?", &[]).await,
            ClassifierResult::Classified { label: Branch::DocumentQuestion, confidence: 0.9 }
        );

        let chatty =
            LlmClassifier::new(Arc::new(Fixed(Ok("Probably SQL".into()))), prompts.clone());
        assert!(matches!(
            chatty.classify("Is there a pool?", &[]).await,
            ClassifierResult::Unavailable { .. }
        ));

        let down = LlmClassifier::new(
            Arc::new(Fixed(Err(CapabilityError::Generation("connection refused".into())))),
            prompts,
        );
        assert!(matches!(
            down.classify("Is there a pool?", &[]).await,
            ClassifierResult::Unavailable { .. }
        ));
    }
}
