use std::sync::LazyLock;

use chrono::{DateTime, Utc};
use regex::Regex;

use nurture_core::domain::goal::{GoalSignal, GoalType};

use crate::slot::SlotParser;

/// How many words before a marker are searched for a negation.
const NEGATION_WINDOW: usize = 5;

struct GoalPatterns {
    visit: Regex,
    call: Regex,
    cue: Regex,
    negation: Regex,
    question_word: Regex,
    leading_affirmative: Regex,
    whole_affirmative: Regex,
    slot_request: Regex,
}

static GOAL_PATTERNS: LazyLock<GoalPatterns> = LazyLock::new(|| GoalPatterns {
    visit: Regex::new(
        concat!(
            r"(?i)\b(?:site\s+visit|visit(?:ing)?|tour|viewing",
            r"|see\s+the\s+(?:property|apartment|unit|place)",
            r"|come\s+(?:by|over)|drop\s+by|show\s+me\s+around)\b",
        ),
    )
    .expect("visit marker regex"),
    call: Regex::new(
        r"(?i)\b(?:call|phone|ring|speak\s+(?:to|with)|talk\s+(?:to|with)|discuss|chat)\b",
    )
    .expect("call marker regex"),
    cue: Regex::new(
        concat!(
            r"(?i)\b(?:book|schedule|arrange|reserve|set\s+up|like\s+to|want\s+to",
            r"|can\s+(?:we|i)|could\s+we|shall\s+(?:we|i)|let['’]?s|would\s+love\s+to",
            r"|available\s+for|plan\s+a|confirm)\b",
        ),
    )
    .expect("scheduling cue regex"),
    negation: Regex::new(r"(?i)\b(?:not|don['’]?t|can['’]?t|cannot|won['’]?t|never)\b")
        .expect("negation regex"),
    question_word: Regex::new(r"(?i)\b(?:what|which|where|when|why|how|who|whose)\b")
        .expect("question word regex"),
    leading_affirmative: Regex::new(
        concat!(
            r"(?i)^\W*(?:yes|yeah|yep|sure|sounds\s+good|that\s+works|works\s+for\s+me",
            r"|perfect|confirmed|absolutely|definitely)\b",
        ),
    )
    .expect("leading affirmative regex"),
    whole_affirmative: Regex::new(r"(?i)^\W*(?:ok(?:ay)?|great|alright)\W*$")
        .expect("whole affirmative regex"),
    slot_request: Regex::new(
        r"(?i)\b(?:which|what)\s+(?:day|date|time)\b[^.?!]*\b(?:suits?|works?)\b",
    )
    .expect("slot request regex"),
});

/// Deterministic visit or call intent detection over inbound text.
#[derive(Clone, Copy, Debug, Default)]
pub struct GoalDetector {
    slots: SlotParser,
}

impl GoalDetector {
    pub fn new(slots: SlotParser) -> Self {
        Self { slots }
    }

    /// Scans `query` for goal intent. `candidate_reply` is the agent message
    /// the lead is answering; it supplies the goal when the lead simply agrees.
    pub fn detect(
        &self,
        query: &str,
        candidate_reply: Option<&str>,
        received_at: DateTime<Utc>,
    ) -> GoalSignal {
        let patterns = &*GOAL_PATTERNS;
        let slot = self.slots.parse(query, received_at);

        if let Some((goal_type, start)) = marker(query) {
            if negated_before(&query[..start]) {
                return GoalSignal::none();
            }
            if slot.is_some() || patterns.cue.is_match(query) {
                return GoalSignal::detected(goal_type, slot);
            }
            return GoalSignal::none();
        }

        let Some(proposal) = candidate_reply else {
            return GoalSignal::none();
        };
        if asks_question(query) || patterns.negation.is_match(query) {
            return GoalSignal::none();
        }
        let goal_type = match marker(proposal) {
            Some((goal_type, _)) if patterns.cue.is_match(proposal) => goal_type,
            _ => return GoalSignal::none(),
        };
        let proposed = self.slots.parse(proposal, received_at);

        if is_affirmative(query) {
            return GoalSignal::detected(goal_type, slot.or(proposed));
        }
        // A bare time only answers a proposal that named or asked for one.
        match slot {
            Some(slot) if proposed.is_some() || patterns.slot_request.is_match(proposal) => {
                GoalSignal::detected(goal_type, Some(slot))
            }
            _ => GoalSignal::none(),
        }
    }
}

/// First goal marker found, visit markers taking precedence over call markers.
fn marker(text: &str) -> Option<(GoalType, usize)> {
    let patterns = &*GOAL_PATTERNS;
    patterns
        .visit
        .find(text)
        .map(|found| (GoalType::Visit, found.start()))
        .or_else(|| patterns.call.find(text).map(|found| (GoalType::Call, found.start())))
}

fn negated_before(prefix: &str) -> bool {
    prefix
        .split_whitespace()
        .rev()
        .take(NEGATION_WINDOW)
        .any(|word| GOAL_PATTERNS.negation.is_match(word))
}

fn asks_question(text: &str) -> bool {
    text.contains('?') || GOAL_PATTERNS.question_word.is_match(text)
}

fn is_affirmative(text: &str) -> bool {
    let patterns = &*GOAL_PATTERNS;
    patterns.leading_affirmative.is_match(text) || patterns.whole_affirmative.is_match(text)
}

#[cfg(test)]
mod tests {
    use chrono::{DateTime, TimeZone, Utc};

    use nurture_core::domain::goal::{GoalSignal, GoalType};

    use super::GoalDetector;

    fn received() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2026, 10, 14, 9, 30, 0).single().expect("timestamp")
    }

    #[test]
    fn booking_request_with_slot_is_a_visit() {
        let signal = GoalDetector::default().detect(
            "Can we book a visit this Saturday at 3pm?",
            None,
            received(),
        );
        assert!(signal.detected);
        assert_eq!(signal.goal_type, Some(GoalType::Visit));
        let slot = signal.proposed_slot.expect("slot");
        assert_eq!(
            slot.starts_at,
            Utc.with_ymd_and_hms(2026, 10, 17, 15, 0, 0).single().expect("slot time")
        );
    }

    #[test]
    fn intent_without_time_is_partial_success() {
        let signal = GoalDetector::default().detect("I'd like to visit sometime", None, received());
        assert_eq!(signal, GoalSignal::detected(GoalType::Visit, None));
    }

    #[test]
    fn call_requests_are_recognised() {
        let detector = GoalDetector::default();
        let signal = detector.detect("Could we set up a call tomorrow morning?", None, received());
        assert_eq!(signal.goal_type, Some(GoalType::Call));
        assert!(signal.has_slot());

        let both =
            detector.detect("Let's talk to an advisor, then arrange a tour", None, received());
        assert_eq!(both.goal_type, Some(GoalType::Visit));
    }

    #[test]
    fn questions_and_negations_do_not_count() {
        let detector = GoalDetector::default();
        for text in [
            "How far is the site from the airport?",
            "What floor plans are available?",
            "How many 2-bed units are under $500k?",
            "Is the tour video online?",
            "I don't want to schedule a visit yet",
            "I don’t want to schedule a visit yet",
            "Please do not call me",
        ] {
            assert_eq!(detector.detect(text, None, received()), GoalSignal::none(), "{text}");
        }
    }

    #[test]
    fn agreement_to_a_proposed_slot_confirms_it() {
        let detector = GoalDetector::default();
        let proposal = "Would you like to book a viewing on Friday at 11am?";

        let signal = detector.detect("Yes, that works!", Some(proposal), received());
        assert_eq!(signal.goal_type, Some(GoalType::Visit));
        assert_eq!(
            signal.proposed_slot.map(|slot| slot.starts_at),
            Utc.with_ymd_and_hms(2026, 10, 16, 11, 0, 0).single()
        );

        let own_time = detector.detect("Sure, but Sunday at 2pm", Some(proposal), received());
        assert_eq!(
            own_time.proposed_slot.map(|slot| slot.phrase),
            Some("sunday at 2pm".to_string())
        );

        let notice = "The gym opens at 6am.";
        assert!(!detector.detect("Yes, thanks", Some(notice), received()).detected);
        assert!(!detector.detect("Ok, not now", Some(proposal), received()).detected);
        assert!(!detector.detect("Yes", None, received()).detected);
    }

    #[test]
    fn follow_up_questions_after_a_proposal_are_not_agreement() {
        let detector = GoalDetector::default();
        let proposal = "Would you like to book a viewing or a call to go through the details?";

        for text in [
            "Great, how many 3-bed units are still available?",
            "Ok, and is parking included?",
            "Sure. Also what schools are nearby?",
            "Yes, which floors have sea views",
            "Thanks, I'm travelling until 18 October so send me the brochure",
        ] {
            assert_eq!(
                detector.detect(text, Some(proposal), received()),
                GoalSignal::none(),
                "{text}"
            );
        }
    }

    #[test]
    fn short_acknowledgements_confirm_only_as_the_whole_message() {
        let detector = GoalDetector::default();
        let proposal = "Would you like to book a viewing or a call to go through the details?";

        for text in ["Ok", "okay!", "Great."] {
            assert_eq!(
                detector.detect(text, Some(proposal), received()),
                GoalSignal::detected(GoalType::Visit, None),
                "{text}"
            );
        }
        assert!(!detector.detect("Great brochure, thanks", Some(proposal), received()).detected);
    }

    #[test]
    fn offered_time_answers_an_open_slot_request() {
        let detector = GoalDetector::default();
        let request = "I'd be glad to set up a call about Altura Residences, Priya. \
                       Which day and time suit you best?";

        let signal = detector.detect("Thursday at 6pm", Some(request), received());
        assert_eq!(signal.goal_type, Some(GoalType::Call));
        assert_eq!(
            signal.proposed_slot.map(|slot| slot.starts_at),
            Utc.with_ymd_and_hms(2026, 10, 15, 18, 0, 0).single()
        );
        assert!(!detector.detect("Thursday at 6pm", None, received()).detected);
        assert!(
            !detector.detect("Is the pool open on Thursday?", Some(request), received()).detected
        );
    }

    #[test]
    fn offered_time_needs_a_proposal_that_named_or_asked_for_one() {
        let detector = GoalDetector::default();
        let open_offer = "Shall I reserve a viewing for you?";
        let timed_offer = "Shall I reserve a viewing for you on Friday at 11am?";

        assert!(!detector.detect("Saturday at 10am", Some(open_offer), received()).detected);
        let counter = detector.detect("Saturday at 10am", Some(timed_offer), received());
        assert_eq!(counter.goal_type, Some(GoalType::Visit));
        assert_eq!(
            counter.proposed_slot.map(|slot| slot.starts_at),
            Utc.with_ymd_and_hms(2026, 10, 17, 10, 0, 0).single()
        );
    }

    #[test]
    fn detection_is_deterministic() {
        let detector = GoalDetector::default();
        let first = detector.detect("Can I come by next Tuesday?", None, received());
        let second = detector.detect("Can I come by next Tuesday?", None, received());
        assert_eq!(first, second);
        assert!(first.detected);
    }
}
