use std::sync::Arc;

use async_trait::async_trait;
use serde_json::Value;
use tera::Context;
use tracing::{info, warn};

use nurture_core::domain::conversation::{MessageMetadata, RouteTaken};
use nurture_core::domain::knowledge::TabularResult;
use nurture_core::errors::CapabilityError;
use nurture_db::SqlDataStore;

use crate::capabilities::SqlCapability;
use crate::llm::{complete_with_retry, LlmClient, ModelHint};
use crate::prompts::{Prompt, PromptLibrary};
use crate::reply::{ReplyContext, ReplyDraft};

const FORMATTED_ROWS: usize = 5;
const SUMMARY_ROWS: usize = 10;

/// SQL generation through the LLM, execution against the SQLite listings.
pub struct LlmSqlCapability<L: ?Sized> {
    llm: Arc<L>,
    prompts: Arc<PromptLibrary>,
    store: SqlDataStore,
    max_retries: u32,
}

impl<L> LlmSqlCapability<L>
where
    L: LlmClient + ?Sized,
{
    pub fn new(
        llm: Arc<L>,
        prompts: Arc<PromptLibrary>,
        store: SqlDataStore,
        max_retries: u32,
    ) -> Self {
        Self { llm, prompts, store, max_retries }
    }
}

#[async_trait]
impl<L> SqlCapability for LlmSqlCapability<L>
where
    L: LlmClient + ?Sized,
{
    fn schema_description(&self) -> String {
        self.store.schema_description().to_string()
    }

    async fn generate_sql(&self, question: &str, schema: &str) -> Result<String, CapabilityError> {
        let mut context = Context::new();
        context.insert("schema", schema);
        context.insert("question", question);
        let prompt = self.prompts.render(Prompt::SqlGenerate, &context)?;

        let raw =
            complete_with_retry(&*self.llm, &prompt, ModelHint::Responder, self.max_retries)
                .await?;
        let sql = strip_sql_fences(&raw);
        if sql.is_empty() {
            return Err(CapabilityError::Generation("model returned no SQL".to_string()));
        }
        Ok(sql)
    }

    async fn execute(&self, sql: &str) -> Result<TabularResult, CapabilityError> {
        self.store
            .run_read_only(sql)
            .await
            .map_err(|error| CapabilityError::SqlExecution(error.to_string()))
    }
}

/// Removes markdown code fences and a leading `sql` language tag.
pub fn strip_sql_fences(raw: &str) -> String {
    let trimmed = raw.trim();
    let inner = match trimmed.strip_prefix("```") {
        Some(rest) => {
            let rest =
                rest.strip_prefix("sqlite").or_else(|| rest.strip_prefix("sql")).unwrap_or(rest);
            rest.rsplit_once("```").map(|(body, _)| body).unwrap_or(rest)
        }
        None => trimmed,
    };
    inner.trim().to_string()
}

pub struct T2SqlExecutor<S: ?Sized, L: ?Sized> {
    sql: Arc<S>,
    llm: Arc<L>,
    prompts: Arc<PromptLibrary>,
    max_retries: u32,
}

impl<S, L> T2SqlExecutor<S, L>
where
    S: SqlCapability + ?Sized,
    L: LlmClient + ?Sized,
{
    pub fn new(sql: Arc<S>, llm: Arc<L>, prompts: Arc<PromptLibrary>, max_retries: u32) -> Self {
        Self { sql, llm, prompts, max_retries }
    }

    pub fn schema_context(&self) -> String {
        self.sql.schema_description()
    }

    pub async fn answer_with_sql(
        &self,
        query: &str,
        schema_context: &str,
        context: ReplyContext<'_>,
    ) -> ReplyDraft {
        let mut metadata = MessageMetadata::default();

        let sql = match self.sql.generate_sql(query, schema_context).await {
            Ok(sql) => sql,
            Err(error) => {
                warn!(
                    event_name = "agent.t2sql.generation_failed",
                    error = %error,
                    "could not generate sql"
                );
                metadata.record_failure(error.note());
                metadata.template_fallback = true;
                return draft(data_unavailable_reply(context), metadata);
            }
        };
        metadata.sql = Some(sql.clone());

        let result = match self.sql.execute(&sql).await {
            Ok(result) => result,
            Err(error) => {
                warn!(
                    event_name = "agent.t2sql.execution_failed",
                    error = %error,
                    sql = %sql,
                    "sql execution failed"
                );
                metadata.record_failure(error.note());
                metadata.template_fallback = true;
                return draft(data_unavailable_reply(context), metadata);
            }
        };
        metadata.row_count = Some(result.row_count());
        info!(event_name = "agent.t2sql.executed", row_count = result.row_count(), "sql executed");

        if result.is_empty() {
            info!(event_name = "agent.t2sql.empty_result", sql = %sql, "query matched no rows");
            metadata.record_failure("sql_empty_result");
            metadata.template_fallback = true;
            return draft(format_result(query, &result), metadata);
        }

        let summary = match self.render_summary(query, &result, context) {
            Ok(prompt) => {
                complete_with_retry(&*self.llm, &prompt, ModelHint::Responder, self.max_retries)
                    .await
            }
            Err(error) => Err(error),
        };
        match summary {
            Ok(text) => draft(text, metadata),
            Err(error) => {
                warn!(
                    event_name = "agent.t2sql.summary_failed",
                    error = %error,
                    "using result formatter"
                );
                metadata.record_failure(error.note());
                metadata.template_fallback = true;
                draft(format_result(query, &result), metadata)
            }
        }
    }

    fn render_summary(
        &self,
        query: &str,
        result: &TabularResult,
        context: ReplyContext<'_>,
    ) -> Result<String, CapabilityError> {
        let rows = (0..result.row_count().min(SUMMARY_ROWS))
            .map(|index| row_line(result, index))
            .collect::<Vec<_>>();

        let mut prompt_context = Context::new();
        prompt_context.insert("project_name", &context.campaign.project_name);
        prompt_context.insert("lead_name", &context.lead.first_name);
        prompt_context.insert("question", query);
        prompt_context.insert("columns", &result.columns.join(", "));
        prompt_context.insert("row_count", &result.row_count());
        prompt_context.insert("rows", &rows);
        self.prompts.render(Prompt::SqlSummary, &prompt_context)
    }
}

/// Deterministic rendering used when no summary could be generated.
pub fn format_result(question: &str, result: &TabularResult) -> String {
    if result.is_empty() {
        return format!("I could not find results for '{}'.", question.trim());
    }

    if let Some((column, value)) = result.scalar() {
        return format!("The {} is {}.", column.replace('_', " "), display_value(value));
    }

    let mut summary = (0..result.row_count().min(FORMATTED_ROWS))
        .map(|index| format!(" • {}", row_line(result, index)))
        .collect::<Vec<_>>()
        .join("\n");
    if result.row_count() > FORMATTED_ROWS {
        summary.push_str(&format!(
            "\nShowing first {FORMATTED_ROWS} of {} records.",
            result.row_count()
        ));
    }
    summary
}

fn row_line(result: &TabularResult, index: usize) -> String {
    result
        .row_pairs(index)
        .into_iter()
        .map(|(column, value)| format!("{}: {}", column.replace('_', " "), display_value(value)))
        .collect::<Vec<_>>()
        .join(", ")
}

fn display_value(value: &Value) -> String {
    match value {
        Value::String(text) => text.clone(),
        Value::Null => "not available".to_string(),
        other => other.to_string(),
    }
}

fn draft(text: String, metadata: MessageMetadata) -> ReplyDraft {
    ReplyDraft { text, route: RouteTaken::DataQuestion, metadata }
}

fn data_unavailable_reply(context: ReplyContext<'_>) -> String {
    format!(
        "Sorry {}, I couldn't retrieve that data from the {} listings just now. A sales advisor \
         can confirm the exact figures, or we can go through them together on a call.",
        context.lead.first_name, context.campaign.project_name
    )
}
