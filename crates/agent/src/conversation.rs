//! Applies goal and branch outcomes to a conversation through the flow table
//! and commits each handled reply as one turn.

use std::sync::Arc;

use chrono::{DateTime, Utc};
use tracing::{error, info};

use nurture_core::audit::{AuditCategory, AuditContext, AuditEvent, AuditOutcome, AuditSink};
use nurture_core::config::GoalSlotPolicy;
use nurture_core::domain::campaign::Campaign;
use nurture_core::domain::conversation::{
    Conversation, InboundKey, Message, MessageMetadata, RouteTaken,
};
use nurture_core::domain::goal::{Goal, GoalSignal, GoalType};
use nurture_core::domain::lead::Lead;
use nurture_core::errors::{ApplicationError, DomainError};
use nurture_core::flows::{ConversationFlow, FlowEvent, FlowState, TransitionOutcome};
use nurture_db::repositories::{ConversationRepository, TurnCommit};

use crate::reply::{ReplyKind, ReplyOutcome};

const SLOT_FORMAT: &str = "%A, %d %B at %H:%M";

pub struct ConversationMachine<R: ?Sized> {
    conversations: Arc<R>,
    flow: ConversationFlow,
    audit: Arc<dyn AuditSink>,
    policy: GoalSlotPolicy,
}

impl<R> ConversationMachine<R>
where
    R: ConversationRepository + ?Sized,
{
    pub fn new(conversations: Arc<R>, audit: Arc<dyn AuditSink>, policy: GoalSlotPolicy) -> Self {
        Self { conversations, flow: ConversationFlow::new(), audit, policy }
    }

    pub fn policy(&self) -> GoalSlotPolicy {
        self.policy
    }

    /// Flow event for an inbound reply. Sealed conversations only ever log.
    pub fn event_for(&self, conversation: &Conversation, signal: &GoalSignal) -> FlowEvent {
        if conversation.is_sealed() || !signal.detected {
            return FlowEvent::InboundReply;
        }
        match (self.policy, signal.has_slot()) {
            (GoalSlotPolicy::HoldUntilSlot, false) => FlowEvent::GoalAwaitingSlot,
            _ => FlowEvent::GoalDetected,
        }
    }

    pub fn transition(
        &self,
        conversation: &Conversation,
        event: FlowEvent,
        audit: &AuditContext,
    ) -> Result<TransitionOutcome, ApplicationError> {
        let state = FlowState::from(conversation.status);
        self.flow
            .apply_with_audit(&state, &event, self.audit.as_ref(), audit)
            .map_err(|error| ApplicationError::Domain(DomainError::from(error)))
    }

    /// Writes the turn atomically. A seal on a conversation that is no longer
    /// active fails the whole turn.
    pub async fn commit(
        &self,
        turn: TurnCommit,
        audit: &AuditContext,
    ) -> Result<Vec<Message>, ApplicationError> {
        let goal_type = turn.seal.as_ref().map(|goal| goal.goal_type);
        let staged = turn.messages.len();

        match self.conversations.commit_turn(turn).await {
            Ok(messages) => {
                info!(
                    event_name = "agent.conversation.turn_committed",
                    correlation_id = %audit.correlation_id,
                    conversation_id =
                        audit.conversation_id.as_ref().map(|id| id.0.as_str()).unwrap_or(""),
                    messages = messages.len(),
                    sealed = goal_type.is_some(),
                    "turn committed"
                );
                if let Some(goal_type) = goal_type {
                    self.audit.emit(
                        AuditEvent::from_context(
                            audit,
                            "goal.sealed",
                            AuditCategory::Goal,
                            AuditOutcome::Success,
                        )
                        .with_metadata("goal_type", goal_type.as_str()),
                    );
                }
                Ok(messages)
            }
            Err(repository_error) => {
                error!(
                    event_name = "agent.conversation.commit_failed",
                    correlation_id = %audit.correlation_id,
                    error = %repository_error,
                    "turn was not committed"
                );
                self.audit.emit(
                    AuditEvent::from_context(
                        audit,
                        "conversation.commit_failed",
                        AuditCategory::Persistence,
                        AuditOutcome::Failed,
                    )
                    .with_metadata("staged_messages", staged.to_string())
                    .with_metadata("error", repository_error.to_string()),
                );
                Err(ApplicationError::from(repository_error))
            }
        }
    }
}

/// Agent message confirming a freshly sealed goal.
pub fn goal_confirmation(goal: &Goal, lead: &Lead, campaign: &Campaign) -> String {
    let schedule = goal
        .scheduled_slot
        .map(|slot| slot.format(SLOT_FORMAT).to_string())
        .unwrap_or_else(|| "the earliest available slot".to_string());

    let mut text = match goal.goal_type {
        GoalType::Visit => format!(
            "Wonderful news, {}! I've reserved a property viewing for {schedule} at {}. Our sales \
             team will confirm the details over email shortly.",
            lead.first_name, campaign.project_name
        ),
        GoalType::Call => format!(
            "Great, {}! I've scheduled a call for {schedule} to walk you through {}. A sales \
             advisor will reach out from the official line.",
            lead.first_name, campaign.project_name
        ),
    };
    if goal.scheduled_slot.is_none() {
        text.push_str(" Which day and time would suit you best?");
    }
    text
}

/// Asked when intent arrives without a time and the policy holds the seal.
pub fn slot_request(goal_type: GoalType, lead: &Lead, campaign: &Campaign) -> String {
    match goal_type {
        GoalType::Visit => format!(
            "I'd be glad to arrange a property viewing at {}, {}. Which day and time suit you \
             best?",
            campaign.project_name, lead.first_name
        ),
        GoalType::Call => format!(
            "I'd be glad to set up a call about {}, {}. Which day and time suit you best?",
            campaign.project_name, lead.first_name
        ),
    }
}

/// Returned for replies on a sealed conversation. Never stored.
pub fn sealed_acknowledgement(lead: &Lead, goal: Option<&Goal>) -> String {
    let booking = match goal.map(|goal| (goal.goal_type, goal.scheduled_slot)) {
        Some((GoalType::Visit, slot)) => format!("property viewing{}", slot_suffix(slot)),
        Some((GoalType::Call, slot)) => format!("call{}", slot_suffix(slot)),
        None => "booking".to_string(),
    };
    format!(
        "Thanks for your message, {}. Your {booking} is confirmed and our sales team will \
         follow up with you directly.",
        lead.first_name
    )
}

fn slot_suffix(slot: Option<DateTime<Utc>>) -> String {
    slot.map(|slot| format!(" for {}", slot.format(SLOT_FORMAT))).unwrap_or_default()
}

/// Metadata for goal confirmations and slot requests.
pub fn goal_metadata(goal_type: GoalType, slot: Option<DateTime<Utc>>) -> MessageMetadata {
    MessageMetadata {
        goal_type: Some(goal_type),
        proposed_slot: slot,
        ..MessageMetadata::default()
    }
}

/// The committed outcome for an inbound message seen before, if any.
pub fn replay_outcome(
    conversation: &Conversation,
    key: &InboundKey,
    lead: &Lead,
) -> Option<ReplyOutcome> {
    let inbound = conversation.find_inbound(key)?;
    let outcome = match conversation.reply_after(inbound.seq) {
        Some(answer) => {
            let sealed_here = conversation.is_sealed()
                && conversation.last_agent_message().map(|message| message.seq) == Some(answer.seq);
            let kind = if sealed_here {
                ReplyKind::GoalSealed
            } else if answer.metadata.goal_type.is_some() {
                ReplyKind::Answered
            } else {
                ReplyKind::for_metadata(&answer.metadata)
            };
            ReplyOutcome {
                reply_text: answer.text.clone(),
                route_taken: answer.route,
                goal: conversation.goal.clone(),
                conversation_status: conversation.status,
                kind,
                replayed: true,
            }
        }
        None => ReplyOutcome {
            reply_text: sealed_acknowledgement(lead, conversation.goal.as_ref()),
            route_taken: RouteTaken::None,
            goal: conversation.goal.clone(),
            conversation_status: conversation.status,
            kind: ReplyKind::LoggedOnly,
            replayed: true,
        },
    };
    Some(outcome)
}
