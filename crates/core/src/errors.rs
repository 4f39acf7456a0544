use thiserror::Error;

use crate::{domain::conversation::ConversationId, flows::FlowTransitionError};

/// Failures of an external capability. Absorbed inside the router and branch
/// executors; never surfaced to the caller of `handle_reply`.
#[derive(Clone, Debug, Error, PartialEq, Eq)]
pub enum CapabilityError {
    #[error("classifier unavailable: {0}")]
    ClassifierUnavailable(String),
    #[error("retrieval unavailable: {0}")]
    RetrievalUnavailable(String),
    #[error("sql execution failed: {0}")]
    SqlExecution(String),
    #[error("generation failed: {0}")]
    Generation(String),
}

impl CapabilityError {
    /// Short stable tag stored in message metadata.
    pub fn kind(&self) -> &'static str {
        match self {
            Self::ClassifierUnavailable(_) => "classifier_unavailable",
            Self::RetrievalUnavailable(_) => "retrieval_unavailable",
            Self::SqlExecution(_) => "sql_execution_error",
            Self::Generation(_) => "generation_error",
        }
    }

    pub fn note(&self) -> String {
        format!("{}: {}", self.kind(), self.detail())
    }

    fn detail(&self) -> &str {
        match self {
            Self::ClassifierUnavailable(detail)
            | Self::RetrievalUnavailable(detail)
            | Self::SqlExecution(detail)
            | Self::Generation(detail) => detail,
        }
    }
}

#[derive(Clone, Debug, Error, PartialEq, Eq)]
pub enum DomainError {
    #[error(transparent)]
    FlowTransition(#[from] FlowTransitionError),
    #[error("conversation {} already has a sealed goal", conversation_id.0)]
    GoalAlreadySealed { conversation_id: ConversationId },
    #[error("domain invariant violation: {0}")]
    InvariantViolation(String),
}

#[derive(Clone, Debug, Error, PartialEq, Eq)]
pub enum ApplicationError {
    #[error(transparent)]
    Domain(#[from] DomainError),
    #[error("persistence failure: {0}")]
    Persistence(String),
    #[error("conversation {conversation_id} is busy; gave up after {waited_ms}ms")]
    ConcurrencyConflict { conversation_id: String, waited_ms: u64 },
    #[error("unknown conversation: {0}")]
    UnknownConversation(String),
    #[error("unknown campaign: {0}")]
    UnknownCampaign(String),
    #[error("configuration failure: {0}")]
    Configuration(String),
}

impl ApplicationError {
    pub fn is_retryable(&self) -> bool {
        matches!(self, Self::ConcurrencyConflict { .. } | Self::Persistence(_))
    }
}

#[derive(Clone, Debug, Error, PartialEq, Eq)]
pub enum InterfaceError {
    #[error("bad request: {message}")]
    BadRequest { message: String, correlation_id: String },
    #[error("not found: {message}")]
    NotFound { message: String, correlation_id: String },
    #[error("conflict: {message}")]
    Conflict { message: String, correlation_id: String },
    #[error("service unavailable: {message}")]
    ServiceUnavailable { message: String, correlation_id: String },
    #[error("internal error: {message}")]
    Internal { message: String, correlation_id: String },
}

impl InterfaceError {
    pub fn user_message(&self) -> &'static str {
        match self {
            Self::BadRequest { .. } => {
                "The request could not be processed. Check inputs and try again."
            }
            Self::NotFound { .. } => "The requested resource does not exist.",
            Self::Conflict { .. } => {
                "Another reply for this conversation is being processed. Retry shortly."
            }
            Self::ServiceUnavailable { .. } => {
                "The service is temporarily unavailable. Please retry shortly."
            }
            Self::Internal { .. } => "An unexpected internal error occurred.",
        }
    }

    pub fn correlation_id(&self) -> &str {
        match self {
            Self::BadRequest { correlation_id, .. }
            | Self::NotFound { correlation_id, .. }
            | Self::Conflict { correlation_id, .. }
            | Self::ServiceUnavailable { correlation_id, .. }
            | Self::Internal { correlation_id, .. } => correlation_id,
        }
    }

    pub fn error_class(&self) -> &'static str {
        match self {
            Self::BadRequest { .. } => "bad_request",
            Self::NotFound { .. } => "not_found",
            Self::Conflict { .. } => "conflict",
            Self::ServiceUnavailable { .. } => "service_unavailable",
            Self::Internal { .. } => "internal",
        }
    }
}

impl ApplicationError {
    pub fn into_interface(self, correlation_id: impl Into<String>) -> InterfaceError {
        let correlation_id = correlation_id.into();
        let mut mapped = InterfaceError::from(self);
        match &mut mapped {
            InterfaceError::BadRequest { correlation_id: id, .. }
            | InterfaceError::NotFound { correlation_id: id, .. }
            | InterfaceError::Conflict { correlation_id: id, .. }
            | InterfaceError::ServiceUnavailable { correlation_id: id, .. }
            | InterfaceError::Internal { correlation_id: id, .. } => *id = correlation_id,
        }
        mapped
    }
}

impl From<ApplicationError> for InterfaceError {
    fn from(value: ApplicationError) -> Self {
        let correlation_id = "unassigned".to_owned();
        match value {
            ApplicationError::Domain(DomainError::GoalAlreadySealed { conversation_id }) => {
                Self::Conflict {
                    message: format!("conversation {} is already sealed", conversation_id.0),
                    correlation_id,
                }
            }
            ApplicationError::Domain(DomainError::FlowTransition(_))
            | ApplicationError::Domain(DomainError::InvariantViolation(_)) => {
                Self::BadRequest { message: "domain validation failed".to_owned(), correlation_id }
            }
            ApplicationError::UnknownConversation(id) => {
                Self::NotFound { message: format!("conversation {id} not found"), correlation_id }
            }
            ApplicationError::UnknownCampaign(id) => {
                Self::NotFound { message: format!("campaign {id} not found"), correlation_id }
            }
            error @ ApplicationError::ConcurrencyConflict { .. } => {
                Self::Conflict { message: error.to_string(), correlation_id }
            }
            ApplicationError::Persistence(message) => {
                Self::ServiceUnavailable { message, correlation_id }
            }
            ApplicationError::Configuration(message) => Self::Internal { message, correlation_id },
        }
    }
}

#[cfg(test)]
mod tests {
    use crate::domain::conversation::ConversationId;
    use crate::errors::{ApplicationError, CapabilityError, DomainError, InterfaceError};

    #[test]
    fn domain_error_maps_to_bad_request_interface_error() {
        let interface = ApplicationError::from(DomainError::InvariantViolation(
            "lead message missing inbound key".to_owned(),
        ))
        .into_interface("req-1");

        assert!(matches!(
            interface,
            InterfaceError::BadRequest {
                ref correlation_id,
                ..
            } if correlation_id == "req-1"
        ));
        assert_eq!(
            interface.user_message(),
            "The request could not be processed. Check inputs and try again."
        );
    }

    #[test]
    fn unknown_conversation_maps_to_not_found() {
        let interface =
            ApplicationError::UnknownConversation("conv-404".to_owned()).into_interface("req-2");

        assert!(matches!(interface, InterfaceError::NotFound { .. }));
        assert_eq!(interface.error_class(), "not_found");
        assert_eq!(interface.correlation_id(), "req-2");
    }

    #[test]
    fn unknown_campaign_maps_to_not_found() {
        let error = ApplicationError::UnknownCampaign("camp-404".to_owned());
        assert!(!error.is_retryable());

        let interface = error.into_interface("req-7");
        assert!(matches!(
            interface,
            InterfaceError::NotFound { ref message, .. } if message == "campaign camp-404 not found"
        ));
        assert_eq!(interface.user_message(), "The requested resource does not exist.");
    }

    #[test]
    fn concurrency_conflict_is_retryable_and_maps_to_conflict() {
        let error = ApplicationError::ConcurrencyConflict {
            conversation_id: "conv-1".to_owned(),
            waited_ms: 5000,
        };
        assert!(error.is_retryable());

        let interface = error.into_interface("req-3");
        assert!(matches!(
            interface,
            InterfaceError::Conflict { ref message, .. } if message.contains("5000ms")
        ));
    }

    #[test]
    fn double_seal_maps_to_conflict() {
        let interface = ApplicationError::from(DomainError::GoalAlreadySealed {
            conversation_id: ConversationId("conv-9".to_owned()),
        })
        .into_interface("req-4");

        assert!(matches!(interface, InterfaceError::Conflict { .. }));
    }

    #[test]
    fn persistence_error_maps_to_service_unavailable() {
        let interface = ApplicationError::Persistence("database lock timeout".to_owned())
            .into_interface("req-5");

        assert!(matches!(interface, InterfaceError::ServiceUnavailable { .. }));
        assert_eq!(
            interface.user_message(),
            "The service is temporarily unavailable. Please retry shortly."
        );
    }

    #[test]
    fn configuration_error_maps_to_internal() {
        let interface = ApplicationError::Configuration("missing llm api key".to_owned())
            .into_interface("req-6");

        assert!(matches!(interface, InterfaceError::Internal { .. }));
        assert!(!ApplicationError::Configuration("x".to_owned()).is_retryable());
    }

    #[test]
    fn capability_errors_render_metadata_notes() {
        let error = CapabilityError::RetrievalUnavailable("connection refused".to_owned());
        assert_eq!(error.kind(), "retrieval_unavailable");
        assert_eq!(error.note(), "retrieval_unavailable: connection refused");
    }
}
