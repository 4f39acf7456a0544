use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum GoalType {
    Visit,
    Call,
}

impl GoalType {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Visit => "visit",
            Self::Call => "call",
        }
    }

    pub fn parse(value: &str) -> Option<Self> {
        match value.trim().to_ascii_lowercase().as_str() {
            "visit" => Some(Self::Visit),
            "call" => Some(Self::Call),
            _ => None,
        }
    }
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProposedSlot {
    pub starts_at: DateTime<Utc>,
    /// Matched text, lowercased, e.g. `saturday at 3pm`.
    pub phrase: String,
}

/// Output of goal detection for one inbound message. Consumed once.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct GoalSignal {
    pub detected: bool,
    pub goal_type: Option<GoalType>,
    pub proposed_slot: Option<ProposedSlot>,
}

impl GoalSignal {
    pub fn none() -> Self {
        Self { detected: false, goal_type: None, proposed_slot: None }
    }

    pub fn detected(goal_type: GoalType, proposed_slot: Option<ProposedSlot>) -> Self {
        Self { detected: true, goal_type: Some(goal_type), proposed_slot }
    }

    pub fn has_slot(&self) -> bool {
        self.proposed_slot.is_some()
    }
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Goal {
    pub goal_type: GoalType,
    pub scheduled_slot: Option<DateTime<Utc>>,
    pub slot_phrase: Option<String>,
    pub created_at: DateTime<Utc>,
}

impl Goal {
    /// Builds the goal from a detected signal, `None` when nothing was detected.
    pub fn from_signal(signal: &GoalSignal, created_at: DateTime<Utc>) -> Option<Self> {
        if !signal.detected {
            return None;
        }
        let goal_type = signal.goal_type?;
        Some(Self {
            goal_type,
            scheduled_slot: signal.proposed_slot.as_ref().map(|slot| slot.starts_at),
            slot_phrase: signal.proposed_slot.as_ref().map(|slot| slot.phrase.clone()),
            created_at,
        })
    }
}

#[cfg(test)]
mod tests {
    use chrono::{TimeZone, Utc};

    use super::{Goal, GoalSignal, GoalType, ProposedSlot};

    #[test]
    fn goal_is_only_built_from_detected_signals() {
        let now = Utc.with_ymd_and_hms(2026, 10, 14, 9, 0, 0).single().unwrap_or_default();
        assert!(Goal::from_signal(&GoalSignal::none(), now).is_none());

        let slot = ProposedSlot {
            starts_at: Utc.with_ymd_and_hms(2026, 10, 17, 15, 0, 0).single().unwrap_or_default(),
            phrase: "saturday at 3pm".to_string(),
        };
        let signal = GoalSignal::detected(GoalType::Visit, Some(slot.clone()));
        let goal = Goal::from_signal(&signal, now).expect("goal");
        assert_eq!(goal.goal_type, GoalType::Visit);
        assert_eq!(goal.scheduled_slot, Some(slot.starts_at));
        assert_eq!(goal.slot_phrase.as_deref(), Some("saturday at 3pm"));
    }

    #[test]
    fn slotless_signal_still_yields_goal() {
        let now = Utc::now();
        let goal =
            Goal::from_signal(&GoalSignal::detected(GoalType::Call, None), now).expect("goal");
        assert_eq!(goal.scheduled_slot, None);
        assert_eq!(GoalType::parse(goal.goal_type.as_str()), Some(GoalType::Call));
    }
}
