use thiserror::Error;

use crate::audit::{AuditCategory, AuditContext, AuditEvent, AuditOutcome, AuditSink};
use crate::flows::states::{FlowAction, FlowEvent, FlowState, TransitionOutcome};

#[derive(Clone, Debug, Default)]
pub struct ConversationFlow;

impl ConversationFlow {
    pub fn new() -> Self {
        Self
    }

    pub fn initial_state(&self) -> FlowState {
        FlowState::Active
    }

    pub fn apply(
        &self,
        current: &FlowState,
        event: &FlowEvent,
    ) -> Result<TransitionOutcome, FlowTransitionError> {
        transition(current, event)
    }

    pub fn apply_with_audit<S>(
        &self,
        current: &FlowState,
        event: &FlowEvent,
        sink: &S,
        audit: &AuditContext,
    ) -> Result<TransitionOutcome, FlowTransitionError>
    where
        S: AuditSink + ?Sized,
    {
        let result = self.apply(current, event);
        match &result {
            Ok(outcome) => {
                sink.emit(
                    AuditEvent::new(
                        audit.conversation_id.clone(),
                        audit.correlation_id.clone(),
                        "flow.transition_applied",
                        AuditCategory::Flow,
                        audit.actor.clone(),
                        AuditOutcome::Success,
                    )
                    .with_metadata("from", format!("{:?}", outcome.from))
                    .with_metadata("to", format!("{:?}", outcome.to))
                    .with_metadata("event", format!("{:?}", outcome.event)),
                );
            }
            Err(error) => {
                sink.emit(
                    AuditEvent::new(
                        audit.conversation_id.clone(),
                        audit.correlation_id.clone(),
                        "flow.transition_rejected",
                        AuditCategory::Flow,
                        audit.actor.clone(),
                        AuditOutcome::Rejected,
                    )
                    .with_metadata("error", error.to_string()),
                );
            }
        }
        result
    }
}

#[derive(Clone, Debug, Error, PartialEq, Eq)]
pub enum FlowTransitionError {
    #[error("invalid transition from {state:?} using event {event:?}")]
    InvalidTransition { state: FlowState, event: FlowEvent },
}

fn transition(
    current: &FlowState,
    event: &FlowEvent,
) -> Result<TransitionOutcome, FlowTransitionError> {
    use FlowAction::{
        AppendAgentReply, AppendGoalConfirmation, AppendLeadMessage, CreateGoal, ExecuteBranch,
        RequestSlot, RouteQuery,
    };
    use FlowEvent::{GoalAwaitingSlot, GoalDetected, InboundReply};
    use FlowState::{Active, GoalSealed};

    let (to, actions) = match (current, event) {
        (Active, InboundReply) => {
            (Active, vec![AppendLeadMessage, RouteQuery, ExecuteBranch, AppendAgentReply])
        }
        (Active, GoalDetected) => {
            (GoalSealed, vec![AppendLeadMessage, CreateGoal, AppendGoalConfirmation])
        }
        (Active, GoalAwaitingSlot) => (Active, vec![AppendLeadMessage, RequestSlot]),
        (GoalSealed, InboundReply) => (GoalSealed, vec![AppendLeadMessage]),
        _ => {
            return Err(FlowTransitionError::InvalidTransition { state: *current, event: *event });
        }
    };

    Ok(TransitionOutcome { from: *current, to, event: *event, actions })
}
