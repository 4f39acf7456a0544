use serde::Serialize;

use nurture_core::domain::campaign::Campaign;
use nurture_core::domain::conversation::{ConversationStatus, Message, MessageMetadata, RouteTaken};
use nurture_core::domain::goal::Goal;
use nurture_core::domain::lead::Lead;

/// What a branch executor hands back to the state machine.
#[derive(Clone, Debug, PartialEq)]
pub struct ReplyDraft {
    pub text: String,
    pub route: RouteTaken,
    pub metadata: MessageMetadata,
}

impl ReplyDraft {
    /// True when a template or fallback path produced the reply.
    pub fn used_fallback(&self) -> bool {
        ReplyKind::for_metadata(&self.metadata) == ReplyKind::AnsweredViaFallback
    }
}

/// Lead and campaign details plus recent history, shared by the executors.
#[derive(Clone, Copy, Debug)]
pub struct ReplyContext<'a> {
    pub lead: &'a Lead,
    pub campaign: &'a Campaign,
    pub history: &'a [Message],
}

impl ReplyContext<'_> {
    pub fn lead_preferences(&self) -> String {
        format!(
            "Unit type: {}, Budget: {}, Location: {}",
            self.lead.unit_type,
            self.lead.budget_range(),
            self.lead.location_preference.as_deref().unwrap_or("Not specified")
        )
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ReplyKind {
    Answered,
    AnsweredViaFallback,
    GoalSealed,
    LoggedOnly,
}

impl ReplyKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Answered => "answered",
            Self::AnsweredViaFallback => "answered_via_fallback",
            Self::GoalSealed => "goal_sealed",
            Self::LoggedOnly => "logged_only",
        }
    }

    /// Kind of an ordinary agent answer, judged from its stored notes.
    pub fn for_metadata(metadata: &MessageMetadata) -> Self {
        if metadata.router_fallback || metadata.template_fallback || !metadata.failures.is_empty() {
            Self::AnsweredViaFallback
        } else {
            Self::Answered
        }
    }
}

/// Result of handling one inbound reply.
#[derive(Clone, Debug, PartialEq, Serialize)]
pub struct ReplyOutcome {
    pub reply_text: String,
    pub route_taken: RouteTaken,
    pub goal: Option<Goal>,
    pub conversation_status: ConversationStatus,
    pub kind: ReplyKind,
    /// The inbound message was already committed; nothing new was written.
    pub replayed: bool,
}
