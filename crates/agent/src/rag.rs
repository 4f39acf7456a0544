use std::sync::Arc;

use tera::Context;
use tracing::{info, warn};

use nurture_core::domain::conversation::{MessageMetadata, RouteTaken};
use nurture_core::domain::knowledge::{Passage, ProjectScope};
use nurture_core::errors::CapabilityError;

use crate::capabilities::Retriever;
use crate::classifier::history_lines;
use crate::llm::{complete_with_retry, LlmClient, ModelHint};
use crate::prompts::{Prompt, PromptLibrary};
use crate::reply::{ReplyContext, ReplyDraft};

/// Present in every reply given when no brochure material matched.
pub const NO_RETRIEVAL_MARKER: &str = "I couldn't find specific details on that";

const CONTEXT_CHAR_LIMIT: usize = 2_000;
const QUOTED_PASSAGES: usize = 2;

pub struct RagExecutor<R: ?Sized, L: ?Sized> {
    retriever: Arc<R>,
    llm: Arc<L>,
    prompts: Arc<PromptLibrary>,
    top_k: usize,
    max_retries: u32,
}

impl<R, L> RagExecutor<R, L>
where
    R: Retriever + ?Sized,
    L: LlmClient + ?Sized,
{
    pub fn new(
        retriever: Arc<R>,
        llm: Arc<L>,
        prompts: Arc<PromptLibrary>,
        top_k: usize,
        max_retries: u32,
    ) -> Self {
        Self { retriever, llm, prompts, top_k, max_retries }
    }

    pub async fn answer_with_retrieval(
        &self,
        query: &str,
        scope: &ProjectScope,
        context: ReplyContext<'_>,
    ) -> ReplyDraft {
        let mut metadata = MessageMetadata::default();

        let passages = match self.retrieve_with_variants(query, scope).await {
            Ok(passages) => passages,
            Err(error) => {
                warn!(
                    event_name = "agent.rag.retrieval_unavailable",
                    error = %error,
                    "retrieval failed"
                );
                metadata.record_failure(error.note());
                metadata.template_fallback = true;
                return draft(retrieval_apology(context), metadata);
            }
        };

        if passages.is_empty() {
            info!(
                event_name = "agent.rag.no_passages",
                project = %scope.project_name,
                "no brochure material matched"
            );
            metadata.template_fallback = true;
            return draft(no_material_reply(context), metadata);
        }
        metadata.passage_ids = passages.iter().map(|passage| passage.source_id.clone()).collect();

        let generated = match self.render_prompt(query, &passages, context) {
            Ok(prompt) => {
                complete_with_retry(&*self.llm, &prompt, ModelHint::Responder, self.max_retries)
                    .await
            }
            Err(error) => Err(error),
        };

        match generated {
            Ok(text) => draft(text, metadata),
            Err(error) => {
                warn!(
                    event_name = "agent.rag.generation_failed",
                    error = %error,
                    "quoting passages instead"
                );
                metadata.record_failure(error.note());
                metadata.template_fallback = true;
                draft(quoted_passages_reply(&passages, context), metadata)
            }
        }
    }

    /// Tries the raw question first, then broader project queries, stopping at
    /// the first non-empty result.
    async fn retrieve_with_variants(
        &self,
        query: &str,
        scope: &ProjectScope,
    ) -> Result<Vec<Passage>, CapabilityError> {
        for variant in query_variants(query, &scope.project_name) {
            let passages = self.retriever.retrieve(&variant, scope, self.top_k).await?;
            if !passages.is_empty() {
                info!(
                    event_name = "agent.rag.retrieved",
                    project = %scope.project_name,
                    query = %variant,
                    chunks = passages.len(),
                    "retrieval succeeded"
                );
                return Ok(passages);
            }
        }
        Ok(Vec::new())
    }

    fn render_prompt(
        &self,
        query: &str,
        passages: &[Passage],
        context: ReplyContext<'_>,
    ) -> Result<String, CapabilityError> {
        let mut prompt_context = Context::new();
        prompt_context.insert("project_name", &context.campaign.project_name);
        prompt_context.insert("lead_name", &context.lead.first_name);
        prompt_context.insert("lead_preferences", &context.lead_preferences());
        prompt_context.insert(
            "last_conversation_summary",
            context.lead.last_conversation_summary.as_deref().unwrap_or("Unavailable"),
        );
        prompt_context.insert("offer", &context.campaign.offer());
        prompt_context.insert("history", &history_lines(context.history));
        prompt_context.insert("question", query);
        prompt_context.insert("context", &context_block(passages));
        self.prompts.render(Prompt::RagAnswer, &prompt_context)
    }
}

pub fn query_variants(query: &str, project_name: &str) -> Vec<String> {
    vec![
        query.trim().to_string(),
        format!("{project_name} project brochure highlights amenities features"),
        format!("{project_name} brochure amenities location pricing"),
        "project highlights amenities floorplans pricing location".to_string(),
    ]
}

/// Passages joined by blank lines, cut to the model context budget.
pub fn context_block(passages: &[Passage]) -> String {
    let joined =
        passages.iter().map(|passage| passage.text.as_str()).collect::<Vec<_>>().join("\n\n");
    joined.chars().take(CONTEXT_CHAR_LIMIT).collect()
}

fn draft(text: String, metadata: MessageMetadata) -> ReplyDraft {
    ReplyDraft { text, route: RouteTaken::DocumentQuestion, metadata }
}

fn no_material_reply(context: ReplyContext<'_>) -> String {
    format!(
        "{NO_RETRIEVAL_MARKER} in the {} materials I have, {}. I'll check with the sales team and \
         follow up, or we can go through it together on a call or a viewing.",
        context.campaign.project_name, context.lead.first_name
    )
}

fn retrieval_apology(context: ReplyContext<'_>) -> String {
    format!(
        "Sorry {}, I can't reach the {} brochure right now. I'll follow up with the details \
         shortly, or a sales advisor can walk you through them on a quick call.",
        context.lead.first_name, context.campaign.project_name
    )
}

fn quoted_passages_reply(passages: &[Passage], context: ReplyContext<'_>) -> String {
    let quoted = passages
        .iter()
        .take(QUOTED_PASSAGES)
        .map(|passage| format!("\"{}\"", passage.text.trim()))
        .collect::<Vec<_>>()
        .join("\n\n");
    format!(
        "Here is what the {} brochure says:\n\n{quoted}\n\nWould you like to book a viewing or a \
         call to go through the details?",
        context.campaign.project_name
    )
}
