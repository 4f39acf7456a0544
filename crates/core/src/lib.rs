pub mod audit;
pub mod config;
pub mod documents;
pub mod domain;
pub mod errors;
pub mod flows;

pub use domain::campaign::{Campaign, CampaignId, CampaignMetrics, MessageChannel};
pub use domain::conversation::{
    Branch, Conversation, ConversationId, ConversationStatus, InboundKey, Message, MessageId,
    MessageMetadata, MessageRole, NewMessage, RouteTaken,
};
pub use domain::goal::{Goal, GoalSignal, GoalType, ProposedSlot};
pub use domain::knowledge::{Passage, ProjectScope, StoredPassage, TabularResult};
pub use domain::lead::{Lead, LeadId, LeadStatus};
pub use errors::{ApplicationError, CapabilityError, DomainError, InterfaceError};
pub use flows::{ConversationFlow, FlowAction, FlowEvent, FlowState, TransitionOutcome};
