//! Narrow contracts for the external services a reply depends on.
//!
//! Implementations carry no branching logic of their own; the router and the
//! branch executors decide what to do with each result.

use async_trait::async_trait;

use nurture_core::domain::conversation::{Branch, Message};
use nurture_core::domain::knowledge::{Passage, ProjectScope, TabularResult};
use nurture_core::errors::CapabilityError;

/// Outcome of one classification attempt.
#[derive(Clone, Debug, PartialEq)]
pub enum ClassifierResult {
    Classified { label: Branch, confidence: f32 },
    Unavailable { reason: String },
}

impl ClassifierResult {
    pub fn unavailable(reason: impl Into<String>) -> Self {
        Self::Unavailable { reason: reason.into() }
    }
}

#[async_trait]
pub trait Classifier: Send + Sync {
    /// `context` holds the most recent messages, oldest first.
    async fn classify(&self, text: &str, context: &[Message]) -> ClassifierResult;
}

#[async_trait]
pub trait Retriever: Send + Sync {
    /// Ordered best first. An empty result is not a failure.
    async fn retrieve(
        &self,
        query: &str,
        scope: &ProjectScope,
        k: usize,
    ) -> Result<Vec<Passage>, CapabilityError>;
}

#[async_trait]
pub trait SqlCapability: Send + Sync {
    fn schema_description(&self) -> String;

    async fn generate_sql(&self, question: &str, schema: &str) -> Result<String, CapabilityError>;

    async fn execute(&self, sql: &str) -> Result<TabularResult, CapabilityError>;
}
