use std::sync::Arc;

use axum::{
    extract::{Path, State},
    http::StatusCode,
    response::{IntoResponse, Response},
    routing::{get, post},
    Json, Router,
};
use chrono::{DateTime, Utc};
use nurture_agent::reply::ReplyOutcome;
use nurture_agent::{AgentRuntime, CampaignLaunch, OutreachOutcome};
use nurture_core::domain::campaign::{CampaignId, CampaignMetrics, NewCampaign};
use nurture_core::domain::conversation::{Conversation, ConversationId};
use nurture_core::domain::lead::{Lead, LeadFilter};
use nurture_core::errors::{ApplicationError, InterfaceError};
use serde::{Deserialize, Serialize};
use tracing::{info, warn};
use uuid::Uuid;

#[derive(Clone)]
pub struct ApiState {
    runtime: Arc<AgentRuntime>,
}

impl ApiState {
    pub fn new(runtime: Arc<AgentRuntime>) -> Self {
        Self { runtime }
    }
}

pub fn router(runtime: Arc<AgentRuntime>) -> Router {
    Router::new()
        .route("/api/v1/conversations/{conversation_id}", get(get_conversation))
        .route("/api/v1/conversations/{conversation_id}/replies", post(post_reply))
        .route("/api/v1/conversations/{conversation_id}/outreach", post(post_outreach))
        .route("/api/v1/campaigns", post(post_campaign))
        .route("/api/v1/campaigns/{campaign_id}/metrics", get(get_campaign_metrics))
        .route("/api/v1/leads/shortlist", post(post_lead_shortlist))
        .with_state(ApiState::new(runtime))
}

#[derive(Clone, Debug, Deserialize)]
pub struct ReplyRequest {
    pub text: String,
    /// Defaults to the time the request arrived.
    #[serde(default)]
    pub received_at: Option<DateTime<Utc>>,
}

#[derive(Clone, Debug, PartialEq, Serialize)]
pub struct ShortlistResponse {
    pub count: usize,
    pub leads: Vec<Lead>,
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
pub struct ErrorBody {
    pub error_class: &'static str,
    pub message: &'static str,
    pub retryable: bool,
    pub correlation_id: String,
}

/// An `InterfaceError` rendered as a JSON response.
#[derive(Debug)]
pub struct ApiError(pub InterfaceError);

impl ApiError {
    pub fn status(&self) -> StatusCode {
        match self.0 {
            InterfaceError::BadRequest { .. } => StatusCode::BAD_REQUEST,
            InterfaceError::NotFound { .. } => StatusCode::NOT_FOUND,
            InterfaceError::Conflict { .. } => StatusCode::CONFLICT,
            InterfaceError::ServiceUnavailable { .. } => StatusCode::SERVICE_UNAVAILABLE,
            InterfaceError::Internal { .. } => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }

    pub fn body(&self) -> ErrorBody {
        ErrorBody {
            error_class: self.0.error_class(),
            message: self.0.user_message(),
            retryable: matches!(
                self.0,
                InterfaceError::Conflict { .. } | InterfaceError::ServiceUnavailable { .. }
            ),
            correlation_id: self.0.correlation_id().to_string(),
        }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        (self.status(), Json(self.body())).into_response()
    }
}

fn reject(error: ApplicationError, correlation_id: &str, event_name: &'static str) -> ApiError {
    let mapped = error.clone().into_interface(correlation_id);
    warn!(
        event_name,
        correlation_id,
        error_class = mapped.error_class(),
        error = %error,
        "request failed"
    );
    ApiError(mapped)
}

pub async fn post_reply(
    State(state): State<ApiState>,
    Path(conversation_id): Path<String>,
    Json(body): Json<ReplyRequest>,
) -> Result<Json<ReplyOutcome>, ApiError> {
    let correlation_id = Uuid::new_v4().to_string();
    let conversation_id = ConversationId(conversation_id);
    let received_at = body.received_at.unwrap_or_else(Utc::now);

    let outcome = state
        .runtime
        .handle_reply_traced(&conversation_id, &body.text, received_at, &correlation_id)
        .await
        .map_err(|error| reject(error, &correlation_id, "api.reply.failed"))?;

    info!(
        event_name = "api.reply.handled",
        correlation_id = %correlation_id,
        conversation_id = %conversation_id.0,
        kind = outcome.kind.as_str(),
        replayed = outcome.replayed,
        "reply request served"
    );
    Ok(Json(outcome))
}

pub async fn get_conversation(
    State(state): State<ApiState>,
    Path(conversation_id): Path<String>,
) -> Result<Json<Conversation>, ApiError> {
    let correlation_id = Uuid::new_v4().to_string();
    state
        .runtime
        .conversation(&ConversationId(conversation_id))
        .await
        .map(Json)
        .map_err(|error| reject(error, &correlation_id, "api.conversation.failed"))
}

/// 201 when a message was generated, 200 when the conversation already had one.
pub async fn post_outreach(
    State(state): State<ApiState>,
    Path(conversation_id): Path<String>,
) -> Result<(StatusCode, Json<OutreachOutcome>), ApiError> {
    let correlation_id = Uuid::new_v4().to_string();
    let outcome = state
        .runtime
        .send_outreach(&ConversationId(conversation_id))
        .await
        .map_err(|error| reject(error, &correlation_id, "api.outreach.failed"))?;

    let status = if outcome.created { StatusCode::CREATED } else { StatusCode::OK };
    Ok((status, Json(outcome)))
}

pub async fn get_campaign_metrics(
    State(state): State<ApiState>,
    Path(campaign_id): Path<String>,
) -> Result<Json<CampaignMetrics>, ApiError> {
    let correlation_id = Uuid::new_v4().to_string();
    state
        .runtime
        .campaign_metrics(&CampaignId(campaign_id))
        .await
        .map(Json)
        .map_err(|error| reject(error, &correlation_id, "api.metrics.failed"))
}

pub async fn post_campaign(
    State(state): State<ApiState>,
    Json(body): Json<NewCampaign>,
) -> Result<(StatusCode, Json<CampaignLaunch>), ApiError> {
    let correlation_id = Uuid::new_v4().to_string();
    let launch = state
        .runtime
        .create_campaign(body)
        .await
        .map_err(|error| reject(error, &correlation_id, "api.campaign.failed"))?;

    info!(
        event_name = "api.campaign.created",
        correlation_id = %correlation_id,
        campaign_id = %launch.campaign.id.0,
        outreach = launch.outreach.len(),
        "campaign request served"
    );
    Ok((StatusCode::CREATED, Json(launch)))
}

pub async fn post_lead_shortlist(
    State(state): State<ApiState>,
    Json(filter): Json<LeadFilter>,
) -> Result<Json<ShortlistResponse>, ApiError> {
    let correlation_id = Uuid::new_v4().to_string();
    let leads = state
        .runtime
        .shortlist_leads(&filter)
        .await
        .map_err(|error| reject(error, &correlation_id, "api.shortlist.failed"))?;
    Ok(Json(ShortlistResponse { count: leads.len(), leads }))
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use async_trait::async_trait;
    use axum::{
        body::Body,
        extract::{Path, State},
        http::{Request, StatusCode},
        Json,
    };
    use chrono::{TimeZone, Utc};
    use nurture_agent::capabilities::{Classifier, ClassifierResult, Retriever, SqlCapability};
    use nurture_agent::llm::{LlmClient, ModelHint};
    use nurture_agent::reply::ReplyKind;
    use nurture_agent::{AgentRuntime, Capabilities, RuntimeSettings, Stores};
    use nurture_core::audit::InMemoryAuditSink;
    use nurture_core::domain::conversation::{Branch, ConversationStatus, Message, RouteTaken};
    use nurture_core::domain::campaign::NewCampaign;
    use nurture_core::domain::goal::GoalType;
    use nurture_core::domain::knowledge::{Passage, ProjectScope, TabularResult};
    use nurture_core::domain::lead::{LeadFilter, LeadStatus};
    use nurture_core::errors::{ApplicationError, CapabilityError};
    use nurture_db::repositories::{
        SqlCampaignRepository, SqlConversationRepository, SqlLeadRepository,
    };
    use nurture_db::{connect_with_settings, migrations, DbPool, NurtureSeedDataset};
    use tower::ServiceExt;

    use super::{
        get_campaign_metrics, get_conversation, post_campaign, post_lead_shortlist, post_outreach,
        post_reply, reject, router, ApiState, ReplyRequest,
    };

    struct DocumentsOnly;

    #[async_trait]
    impl Classifier for DocumentsOnly {
        async fn classify(&self, _text: &str, _context: &[Message]) -> ClassifierResult {
            ClassifierResult::Classified { label: Branch::DocumentQuestion, confidence: 0.8 }
        }
    }

    struct OnePassage;

    #[async_trait]
    impl Retriever for OnePassage {
        async fn retrieve(
            &self,
            _query: &str,
            _scope: &ProjectScope,
            _k: usize,
        ) -> Result<Vec<Passage>, CapabilityError> {
            Ok(vec![Passage {
                text: "Two bed floor plans span 820 to 910 sq ft.".to_string(),
                score: 0.7,
                source_id: "pp-altura-brochure-1".to_string(),
            }])
        }
    }

    struct NoSql;

    #[async_trait]
    impl SqlCapability for NoSql {
        fn schema_description(&self) -> String {
            String::new()
        }

        async fn generate_sql(
            &self,
            _question: &str,
            _schema: &str,
        ) -> Result<String, CapabilityError> {
            Err(CapabilityError::Generation("not wired".to_string()))
        }

        async fn execute(&self, _sql: &str) -> Result<TabularResult, CapabilityError> {
            Err(CapabilityError::SqlExecution("not wired".to_string()))
        }
    }

    struct Canned;

    #[async_trait]
    impl LlmClient for Canned {
        async fn complete(
            &self,
            _prompt: &str,
            _hint: ModelHint,
        ) -> Result<String, CapabilityError> {
            Ok("Two bed floor plans span 820 to 910 sq ft at Altura Residences.".to_string())
        }
    }

    async fn seeded_pool() -> DbPool {
        let pool = connect_with_settings("sqlite::memory:", 1, 30).await.expect("connect");
        migrations::run_pending(&pool).await.expect("migrations");
        NurtureSeedDataset::load(&pool).await.expect("seed");
        pool
    }

    async fn state() -> (ApiState, DbPool) {
        let pool = seeded_pool().await;
        let runtime = AgentRuntime::new(
            Stores {
                conversations: Arc::new(SqlConversationRepository::new(pool.clone())),
                leads: Arc::new(SqlLeadRepository::new(pool.clone())),
                campaigns: Arc::new(SqlCampaignRepository::new(pool.clone())),
            },
            Capabilities {
                classifier: Arc::new(DocumentsOnly),
                retriever: Arc::new(OnePassage),
                sql: Arc::new(NoSql),
                llm: Arc::new(Canned),
            },
            Arc::new(InMemoryAuditSink::default()),
            RuntimeSettings::default(),
        );
        (ApiState::new(Arc::new(runtime)), pool)
    }

    fn reply(text: &str) -> Json<ReplyRequest> {
        Json(ReplyRequest {
            text: text.to_string(),
            received_at: Utc.with_ymd_and_hms(2026, 10, 14, 9, 30, 0).single(),
        })
    }

    #[tokio::test]
    async fn reply_is_answered_and_appended_to_history() {
        let (state, pool) = state().await;

        let Json(outcome) = post_reply(
            State(state.clone()),
            Path("conv-001".to_string()),
            reply("What floor plans are available?"),
        )
        .await
        .expect("answered");
        assert_eq!(outcome.route_taken, RouteTaken::DocumentQuestion);
        assert_eq!(outcome.kind, ReplyKind::Answered);
        assert_eq!(outcome.conversation_status, ConversationStatus::Active);

        let Json(conversation) =
            get_conversation(State(state), Path("conv-001".to_string())).await.expect("history");
        assert_eq!(conversation.messages.len(), 3);
        assert_eq!(conversation.messages[2].text, outcome.reply_text);

        pool.close().await;
    }

    #[tokio::test]
    async fn agreeing_to_a_proposed_call_seals_and_shows_in_metrics() {
        let (state, pool) = state().await;

        let Json(outcome) = post_reply(
            State(state.clone()),
            Path("conv-002".to_string()),
            reply("Yes, Friday at 11am works"),
        )
        .await
        .expect("sealed");
        assert_eq!(outcome.kind, ReplyKind::GoalSealed);
        let goal = outcome.goal.expect("goal");
        assert_eq!(goal.goal_type, GoalType::Call);
        assert_eq!(goal.scheduled_slot, Utc.with_ymd_and_hms(2026, 10, 16, 11, 0, 0).single());

        let Json(metrics) = get_campaign_metrics(State(state), Path("camp-altura-001".to_string()))
            .await
            .expect("metrics");
        assert_eq!(metrics.total_leads, 3);
        assert_eq!(metrics.contacted, 2);
        assert_eq!(metrics.responded, 1);
        assert_eq!((metrics.goals_sealed, metrics.calls_sealed, metrics.visits_sealed), (1, 1, 0));

        pool.close().await;
    }

    #[tokio::test]
    async fn unknown_conversation_and_blank_text_map_to_client_errors() {
        let (state, pool) = state().await;

        let missing = post_reply(State(state.clone()), Path("conv-404".to_string()), reply("Hello"))
            .await
            .expect_err("unknown");
        assert_eq!(missing.status(), StatusCode::NOT_FOUND);
        assert_eq!(missing.body().error_class, "not_found");
        assert!(!missing.body().correlation_id.is_empty());

        let blank = post_reply(State(state), Path("conv-001".to_string()), reply("   "))
            .await
            .expect_err("blank");
        assert_eq!(blank.status(), StatusCode::BAD_REQUEST);

        pool.close().await;
    }

    #[test]
    fn busy_and_storage_failures_are_retryable() {
        let busy = reject(
            ApplicationError::ConcurrencyConflict {
                conversation_id: "conv-1".into(),
                waited_ms: 5000,
            },
            "req-1",
            "api.reply.failed",
        );
        assert_eq!(busy.status(), StatusCode::CONFLICT);
        assert!(busy.body().retryable);
        assert_eq!(busy.body().correlation_id, "req-1");

        let storage =
            reject(ApplicationError::Persistence("disk full".into()), "req-2", "api.reply.failed");
        assert_eq!(storage.status(), StatusCode::SERVICE_UNAVAILABLE);
        assert!(storage.body().retryable);

        let config =
            reject(ApplicationError::Configuration("bad".into()), "req-3", "api.reply.failed");
        assert_eq!(config.status(), StatusCode::INTERNAL_SERVER_ERROR);
        assert!(!config.body().retryable);
    }

    #[tokio::test]
    async fn outreach_is_only_created_for_fresh_conversations() {
        let (state, pool) = state().await;

        let (status, Json(existing)) = post_outreach(State(state.clone()), Path("conv-001".into()))
            .await
            .expect("existing");
        assert_eq!(status, StatusCode::OK);
        assert!(!existing.created);
        assert_eq!(existing.message.id.0, "msg-001-1");

        let (status, Json(created)) =
            post_outreach(State(state), Path("conv-003".to_string())).await.expect("created");
        assert_eq!(status, StatusCode::CREATED);
        assert!(created.created);
        assert_eq!(created.message.seq, 1);
        assert_eq!(created.message.metadata.passage_ids, vec!["pp-altura-brochure-1".to_string()]);

        pool.close().await;
    }

    #[tokio::test]
    async fn routes_are_mounted_under_api_v1() {
        let (state, pool) = state().await;
        let app = router(state.runtime.clone());

        let response = app
            .oneshot(
                Request::builder()
                    .uri("/api/v1/campaigns/camp-altura-001/metrics")
                    .body(Body::empty())
                    .expect("request"),
            )
            .await
            .expect("response");
        assert_eq!(response.status(), StatusCode::OK);

        let bytes = axum::body::to_bytes(response.into_body(), usize::MAX).await.expect("body");
        let payload: serde_json::Value = serde_json::from_slice(&bytes).expect("json");
        assert_eq!(payload["total_leads"], 3);

        pool.close().await;
    }

    #[tokio::test]
    async fn metrics_for_an_unknown_campaign_are_not_found() {
        let (state, pool) = state().await;

        let missing = get_campaign_metrics(State(state), Path("camp-404".to_string()))
            .await
            .expect_err("unknown campaign");
        assert_eq!(missing.status(), StatusCode::NOT_FOUND);
        assert_eq!(missing.body().message, "The requested resource does not exist.");

        pool.close().await;
    }

    #[tokio::test]
    async fn campaign_creation_sends_outreach_to_every_selected_lead() {
        let (state, pool) = state().await;
        let body: NewCampaign = serde_json::from_value(serde_json::json!({
            "name": "Altura Winter Preview",
            "project_name": "Altura Residences",
            "message_channel": "email",
            "lead_ids": ["lead-001", "lead-003"]
        }))
        .expect("campaign body");

        let (status, Json(launch)) =
            post_campaign(State(state.clone()), Json(body)).await.expect("created");
        assert_eq!(status, StatusCode::CREATED);
        assert_eq!(launch.outreach.len(), 2);
        assert!(launch.outreach.iter().all(|outreach| outreach.created));

        let Json(metrics) = get_campaign_metrics(State(state.clone()), Path(launch.campaign.id.0))
            .await
            .expect("metrics");
        assert_eq!((metrics.total_leads, metrics.contacted), (2, 2));

        let unknown: NewCampaign = serde_json::from_value(serde_json::json!({
            "name": "Ghost",
            "project_name": "Altura Residences",
            "message_channel": "whatsapp",
            "lead_ids": ["lead-404"]
        }))
        .expect("campaign body");
        let rejected = post_campaign(State(state), Json(unknown)).await.expect_err("unknown lead");
        assert_eq!(rejected.status(), StatusCode::BAD_REQUEST);

        pool.close().await;
    }

    #[tokio::test]
    async fn lead_shortlist_is_served_over_http() {
        let (state, pool) = state().await;
        let app = router(state.runtime.clone());

        let response = app
            .clone()
            .oneshot(
                Request::builder()
                    .method("POST")
                    .uri("/api/v1/leads/shortlist")
                    .header("content-type", "application/json")
                    .body(Body::from(
                        r#"{"project_names":["Altura Residences"],"budget_max":"550000"}"#,
                    ))
                    .expect("request"),
            )
            .await
            .expect("response");
        assert_eq!(response.status(), StatusCode::OK);
        let bytes = axum::body::to_bytes(response.into_body(), usize::MAX).await.expect("body");
        let payload: serde_json::Value = serde_json::from_slice(&bytes).expect("json");
        assert_eq!(payload["count"], 1);
        assert_eq!(payload["leads"][0]["id"], "lead-001");

        let too_broad = app
            .oneshot(
                Request::builder()
                    .method("POST")
                    .uri("/api/v1/leads/shortlist")
                    .header("content-type", "application/json")
                    .body(Body::from(r#"{"status":"connected"}"#))
                    .expect("request"),
            )
            .await
            .expect("response");
        assert_eq!(too_broad.status(), StatusCode::BAD_REQUEST);

        let Json(direct) = post_lead_shortlist(
            State(state),
            Json(LeadFilter {
                unit_types: vec!["3 bed".to_string()],
                status: Some(LeadStatus::Connected),
                ..LeadFilter::default()
            }),
        )
        .await
        .expect("shortlist");
        assert_eq!(direct.count, 1);
        assert_eq!(direct.leads[0].first_name, "Priya");

        pool.close().await;
    }
}
