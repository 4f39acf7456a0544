use serde::{Deserialize, Serialize};

use crate::domain::conversation::ConversationStatus;

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub enum FlowState {
    Active,
    GoalSealed,
}

impl From<ConversationStatus> for FlowState {
    fn from(value: ConversationStatus) -> Self {
        match value {
            ConversationStatus::Active => Self::Active,
            ConversationStatus::GoalSealed => Self::GoalSealed,
        }
    }
}

impl From<FlowState> for ConversationStatus {
    fn from(value: FlowState) -> Self {
        match value {
            FlowState::Active => Self::Active,
            FlowState::GoalSealed => Self::GoalSealed,
        }
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub enum FlowEvent {
    /// Inbound reply with no goal intent.
    InboundReply,
    /// Inbound reply carrying goal intent that can be sealed now.
    GoalDetected,
    /// Goal intent without a slot while the policy holds the seal.
    GoalAwaitingSlot,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub enum FlowAction {
    AppendLeadMessage,
    RouteQuery,
    ExecuteBranch,
    AppendAgentReply,
    CreateGoal,
    AppendGoalConfirmation,
    RequestSlot,
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct TransitionOutcome {
    pub from: FlowState,
    pub to: FlowState,
    pub event: FlowEvent,
    pub actions: Vec<FlowAction>,
}

impl TransitionOutcome {
    pub fn requires(&self, action: FlowAction) -> bool {
        self.actions.contains(&action)
    }
}
