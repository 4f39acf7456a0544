use std::sync::{Arc, LazyLock};
use std::time::Duration;

use regex::Regex;
use tracing::{info, warn};

use nurture_core::domain::conversation::{Branch, Message, MessageMetadata};

use crate::capabilities::{Classifier, ClassifierResult};

const DATA_TERMS: &[&str] = &[
    "how many",
    "how much",
    "count",
    "number of",
    "total",
    "average",
    "avg",
    "cheapest",
    "most expensive",
    "lowest",
    "highest",
    "minimum",
    "maximum",
    "price range",
    "prices",
    "under",
    "below",
    "over",
    "above",
    "less than",
    "more than",
    "between",
    "compare",
    "cheaper",
    "bigger",
    "larger",
    "smaller",
    "sqft",
    "sq ft",
    "square feet",
    "list all",
    "which units",
    "still available",
];

const DOCUMENT_TERMS: &[&str] = &[
    "amenities",
    "amenity",
    "floor plan",
    "floor plans",
    "brochure",
    "describe",
    "tell me about",
    "features",
    "location",
    "nearby",
    "school",
    "schools",
    "parking",
    "gym",
    "pool",
    "completion",
    "handover",
    "developer",
    "neighbourhood",
    "neighborhood",
    "facilities",
    "design",
    "finishes",
    "view",
    "views",
];

struct RoutePatterns {
    data: Regex,
    document: Regex,
    /// `$500k`, `$450,000` or `500k`.
    money: Regex,
}

static ROUTE_PATTERNS: LazyLock<RoutePatterns> = LazyLock::new(|| RoutePatterns {
    data: term_set(DATA_TERMS),
    document: term_set(DOCUMENT_TERMS),
    money: Regex::new(r"(?i)(?:\$\s?[0-9][0-9,]*(?:\.[0-9]+)?k?|\b[0-9]+k\b)")
        .expect("money regex"),
});

/// Ephemeral routing outcome; only its notes are kept on the agent message.
#[derive(Clone, Debug, PartialEq)]
pub struct RouteDecision {
    pub branch: Branch,
    pub confidence: f32,
    pub fallback_used: bool,
    pub fallback_reason: Option<String>,
}

impl RouteDecision {
    pub fn annotate(&self, metadata: &mut MessageMetadata) {
        metadata.classifier_label = Some(self.branch.as_str().to_string());
        metadata.classifier_confidence = Some(self.confidence);
        metadata.router_fallback = self.fallback_used;
        if let Some(reason) = &self.fallback_reason {
            metadata.record_failure(format!("classifier_unavailable: {reason}"));
        }
    }
}

pub struct IntentRouter<C: ?Sized> {
    classifier: Arc<C>,
    classifier_timeout: Duration,
}

impl<C> IntentRouter<C>
where
    C: Classifier + ?Sized,
{
    pub fn new(classifier: Arc<C>, classifier_timeout: Duration) -> Self {
        Self { classifier, classifier_timeout }
    }

    /// Classifier first, keyword heuristic on any classifier failure. Never fails.
    pub async fn route(&self, query: &str, context: &[Message]) -> RouteDecision {
        let result =
            tokio::time::timeout(self.classifier_timeout, self.classifier.classify(query, context))
                .await
                .unwrap_or_else(|_| {
                    ClassifierResult::unavailable(format!(
                        "timed out after {}ms",
                        self.classifier_timeout.as_millis()
                    ))
                });

        match result {
            ClassifierResult::Classified { label, confidence } => {
                info!(
                    event_name = "agent.router.classified",
                    branch = label.as_str(),
                    confidence,
                    "routed inbound reply"
                );
                RouteDecision {
                    branch: label,
                    confidence,
                    fallback_used: false,
                    fallback_reason: None,
                }
            }
            ClassifierResult::Unavailable { reason } => {
                let (branch, confidence) = keyword_route(query);
                warn!(
                    event_name = "agent.router.fallback",
                    branch = branch.as_str(),
                    confidence,
                    reason = %reason,
                    "classifier unavailable; using keyword routing"
                );
                RouteDecision {
                    branch,
                    confidence,
                    fallback_used: true,
                    fallback_reason: Some(reason),
                }
            }
        }
    }
}

/// Deterministic routing. Ties and no-match go to the document branch.
pub fn keyword_route(query: &str) -> (Branch, f32) {
    let patterns = &*ROUTE_PATTERNS;
    let data = patterns.money.is_match(query) || patterns.data.is_match(query);
    let document = patterns.document.is_match(query);

    match (data, document) {
        (true, false) => (Branch::DataQuestion, 0.6),
        (false, true) => (Branch::DocumentQuestion, 0.6),
        (true, true) => (Branch::DocumentQuestion, 0.4),
        (false, false) => (Branch::DocumentQuestion, 0.3),
    }
}

/// Case-insensitive whole-word alternation; spaces in a term match any whitespace.
fn term_set(terms: &[&str]) -> Regex {
    let alternation = terms
        .iter()
        .map(|term| regex::escape(term).replace(' ', r"\s+"))
        .collect::<Vec<_>>()
        .join("|");
    Regex::new(&format!(r"(?i)\b(?:{alternation})\b")).expect("term set regex")
}
