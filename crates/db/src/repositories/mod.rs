use async_trait::async_trait;
use chrono::{DateTime, Utc};
use thiserror::Error;

use nurture_core::documents::DocumentChunk;
use nurture_core::domain::campaign::{Campaign, CampaignId, CampaignMetrics};
use nurture_core::domain::conversation::{Conversation, ConversationId, Message, NewMessage};
use nurture_core::domain::goal::Goal;
use nurture_core::domain::knowledge::{ProjectScope, StoredPassage};
use nurture_core::domain::lead::{Lead, LeadFilter, LeadId};
use nurture_core::errors::ApplicationError;

pub mod campaign;
pub mod conversation;
pub mod lead;
pub mod memory;
pub mod passage;

pub use campaign::SqlCampaignRepository;
pub use conversation::SqlConversationRepository;
pub use lead::SqlLeadRepository;
pub use memory::{
    InMemoryCampaignRepository, InMemoryConversationRepository, InMemoryLeadRepository,
    InMemoryPassageRepository,
};
pub use passage::SqlPassageRepository;

#[derive(Debug, Error)]
pub enum RepositoryError {
    #[error("database error: {0}")]
    Database(#[from] sqlx::Error),
    #[error("decode error: {0}")]
    Decode(String),
    #[error("not found: {0}")]
    NotFound(String),
    #[error("conflict: {0}")]
    Conflict(String),
}

impl From<RepositoryError> for ApplicationError {
    fn from(value: RepositoryError) -> Self {
        match value {
            RepositoryError::NotFound(id) => ApplicationError::UnknownConversation(id),
            other => ApplicationError::Persistence(other.to_string()),
        }
    }
}

/// Everything one handled reply writes, committed atomically.
#[derive(Clone, Debug, PartialEq)]
pub struct TurnCommit {
    pub conversation_id: ConversationId,
    pub messages: Vec<NewMessage>,
    /// Seals the conversation; rejected with `Conflict` if it is no longer active.
    pub seal: Option<Goal>,
    pub committed_at: DateTime<Utc>,
}

#[async_trait]
pub trait ConversationRepository: Send + Sync {
    async fn find_by_id(&self, id: &ConversationId)
        -> Result<Option<Conversation>, RepositoryError>;

    async fn find_by_participants(
        &self,
        lead_id: &LeadId,
        campaign_id: &CampaignId,
    ) -> Result<Option<Conversation>, RepositoryError>;

    /// Returns the conversation for the pair, creating an empty active one if needed.
    async fn open(
        &self,
        lead_id: &LeadId,
        campaign_id: &CampaignId,
        now: DateTime<Utc>,
    ) -> Result<Conversation, RepositoryError>;

    async fn list_for_campaign(
        &self,
        campaign_id: &CampaignId,
    ) -> Result<Vec<Conversation>, RepositoryError>;

    /// Appends one message with the next sequence number. `NotFound` if the
    /// conversation does not exist.
    async fn append_message(
        &self,
        conversation_id: &ConversationId,
        message: NewMessage,
    ) -> Result<Message, RepositoryError>;

    async fn commit_turn(&self, turn: TurnCommit) -> Result<Vec<Message>, RepositoryError>;
}

#[async_trait]
pub trait LeadRepository: Send + Sync {
    async fn find_by_id(&self, id: &LeadId) -> Result<Option<Lead>, RepositoryError>;
    async fn save(&self, lead: Lead) -> Result<(), RepositoryError>;
    /// Leads matching every set field of `filter`, ordered by id.
    async fn shortlist(&self, filter: &LeadFilter) -> Result<Vec<Lead>, RepositoryError>;
}

#[async_trait]
pub trait CampaignRepository: Send + Sync {
    async fn find_by_id(&self, id: &CampaignId) -> Result<Option<Campaign>, RepositoryError>;
    async fn save(&self, campaign: Campaign) -> Result<(), RepositoryError>;
    async fn metrics(&self, id: &CampaignId) -> Result<CampaignMetrics, RepositoryError>;
}

#[async_trait]
pub trait PassageRepository: Send + Sync {
    async fn list_for_project(
        &self,
        scope: &ProjectScope,
    ) -> Result<Vec<StoredPassage>, RepositoryError>;

    /// Drops earlier chunks of `source_id` and stores `chunks` in their place.
    async fn replace_source(
        &self,
        scope: &ProjectScope,
        source_id: &str,
        chunks: &[DocumentChunk],
    ) -> Result<usize, RepositoryError>;
}

pub(crate) fn map_unique_violation(error: sqlx::Error, what: &str) -> RepositoryError {
    match &error {
        sqlx::Error::Database(db) if db.is_unique_violation() => {
            RepositoryError::Conflict(format!("{what}: {}", db.message()))
        }
        _ => RepositoryError::Database(error),
    }
}

#[cfg(test)]
mod tests {
    use nurture_core::errors::ApplicationError;

    use super::RepositoryError;

    #[test]
    fn repository_errors_map_into_application_errors() {
        assert_eq!(
            ApplicationError::from(RepositoryError::NotFound("conv-x".to_string())),
            ApplicationError::UnknownConversation("conv-x".to_string())
        );
        assert!(matches!(
            ApplicationError::from(RepositoryError::Conflict("sealed".to_string())),
            ApplicationError::Persistence(_)
        ));
    }
}
