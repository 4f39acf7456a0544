use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::domain::campaign::CampaignId;
use crate::domain::goal::{Goal, GoalType};
use crate::domain::lead::LeadId;
use crate::errors::DomainError;

#[derive(Clone, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct ConversationId(pub String);

#[derive(Clone, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct MessageId(pub String);

/// Identity of one inbound lead message, used to drop redelivered replies.
#[derive(Clone, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct InboundKey(pub String);

impl InboundKey {
    pub fn derive(
        conversation_id: &ConversationId,
        text: &str,
        received_at: DateTime<Utc>,
    ) -> Self {
        let mut hasher = blake3::Hasher::new();
        hasher.update(conversation_id.0.as_bytes());
        hasher.update(&[0]);
        hasher.update(text.trim().as_bytes());
        hasher.update(&[0]);
        hasher.update(&received_at.timestamp_micros().to_le_bytes());
        Self(hasher.finalize().to_hex().to_string())
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ConversationStatus {
    Active,
    GoalSealed,
}

impl ConversationStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Active => "active",
            Self::GoalSealed => "goal_sealed",
        }
    }

    pub fn parse(value: &str) -> Option<Self> {
        match value.trim().to_ascii_lowercase().as_str() {
            "active" => Some(Self::Active),
            "goal_sealed" => Some(Self::GoalSealed),
            _ => None,
        }
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MessageRole {
    Lead,
    Agent,
}

impl MessageRole {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Lead => "lead",
            Self::Agent => "agent",
        }
    }

    pub fn parse(value: &str) -> Option<Self> {
        match value.trim() {
            "lead" => Some(Self::Lead),
            "agent" => Some(Self::Agent),
            _ => None,
        }
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RouteTaken {
    DataQuestion,
    DocumentQuestion,
    None,
}

impl RouteTaken {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::DataQuestion => "data_question",
            Self::DocumentQuestion => "document_question",
            Self::None => "none",
        }
    }

    pub fn parse(value: &str) -> Option<Self> {
        match value.trim() {
            "data_question" => Some(Self::DataQuestion),
            "document_question" => Some(Self::DocumentQuestion),
            "none" => Some(Self::None),
            _ => None,
        }
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Branch {
    DataQuestion,
    DocumentQuestion,
}

impl Branch {
    pub fn as_str(&self) -> &'static str {
        RouteTaken::from(*self).as_str()
    }
}

impl From<Branch> for RouteTaken {
    fn from(value: Branch) -> Self {
        match value {
            Branch::DataQuestion => RouteTaken::DataQuestion,
            Branch::DocumentQuestion => RouteTaken::DocumentQuestion,
        }
    }
}

/// Decision notes stored beside a message. Empty fields are omitted on disk.
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct MessageMetadata {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub classifier_label: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub classifier_confidence: Option<f32>,
    #[serde(skip_serializing_if = "std::ops::Not::not")]
    pub router_fallback: bool,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub passage_ids: Vec<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub sql: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub row_count: Option<usize>,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub failures: Vec<String>,
    #[serde(skip_serializing_if = "std::ops::Not::not")]
    pub template_fallback: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub goal_type: Option<GoalType>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub proposed_slot: Option<DateTime<Utc>>,
    /// Set on lead messages logged after the conversation was sealed.
    #[serde(skip_serializing_if = "std::ops::Not::not")]
    pub informational: bool,
}

impl MessageMetadata {
    pub fn record_failure(&mut self, failure: impl Into<String>) {
        self.failures.push(failure.into());
    }
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct Message {
    pub id: MessageId,
    pub conversation_id: ConversationId,
    pub seq: u32,
    pub role: MessageRole,
    pub text: String,
    pub route: RouteTaken,
    pub inbound_key: Option<InboundKey>,
    pub metadata: MessageMetadata,
    pub created_at: DateTime<Utc>,
}

/// A message before the store assigns its id and sequence number.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct NewMessage {
    pub role: MessageRole,
    pub text: String,
    pub route: RouteTaken,
    pub inbound_key: Option<InboundKey>,
    pub metadata: MessageMetadata,
    pub created_at: DateTime<Utc>,
}

impl NewMessage {
    pub fn lead(
        text: impl Into<String>,
        inbound_key: InboundKey,
        received_at: DateTime<Utc>,
    ) -> Self {
        Self {
            role: MessageRole::Lead,
            text: text.into(),
            route: RouteTaken::None,
            inbound_key: Some(inbound_key),
            metadata: MessageMetadata::default(),
            created_at: received_at,
        }
    }

    pub fn agent(
        text: impl Into<String>,
        route: RouteTaken,
        metadata: MessageMetadata,
        created_at: DateTime<Utc>,
    ) -> Self {
        Self {
            role: MessageRole::Agent,
            text: text.into(),
            route,
            inbound_key: None,
            metadata,
            created_at,
        }
    }

    pub fn with_metadata(mut self, metadata: MessageMetadata) -> Self {
        self.metadata = metadata;
        self
    }
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct Conversation {
    pub id: ConversationId,
    pub lead_id: LeadId,
    pub campaign_id: CampaignId,
    pub status: ConversationStatus,
    pub goal: Option<Goal>,
    pub messages: Vec<Message>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Conversation {
    pub fn is_sealed(&self) -> bool {
        self.status == ConversationStatus::GoalSealed
    }

    pub fn find_inbound(&self, key: &InboundKey) -> Option<&Message> {
        self.messages
            .iter()
            .find(|message| {
                message.role == MessageRole::Lead && message.inbound_key.as_ref() == Some(key)
            })
    }

    /// First agent message committed after `seq`, i.e. the answer to that lead message.
    pub fn reply_after(&self, seq: u32) -> Option<&Message> {
        self.messages
            .iter()
            .skip_while(|message| message.seq <= seq)
            .take_while(|message| message.role == MessageRole::Agent)
            .next()
    }

    pub fn last_agent_message(&self) -> Option<&Message> {
        self.messages.iter().rev().find(|message| message.role == MessageRole::Agent)
    }

    pub fn recent_messages(&self, count: usize) -> &[Message] {
        let start = self.messages.len().saturating_sub(count);
        &self.messages[start..]
    }

    pub fn next_seq(&self) -> u32 {
        self.messages.last().map(|message| message.seq + 1).unwrap_or(1)
    }

    pub fn seal(&mut self, goal: Goal) -> Result<(), DomainError> {
        if self.is_sealed() || self.goal.is_some() {
            return Err(DomainError::GoalAlreadySealed { conversation_id: self.id.clone() });
        }
        self.updated_at = goal.created_at;
        self.goal = Some(goal);
        self.status = ConversationStatus::GoalSealed;
        Ok(())
    }
}
