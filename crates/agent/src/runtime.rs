use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::Serialize;
use tracing::info;
use uuid::Uuid;

use nurture_core::audit::{AuditContext, AuditSink, TracingAuditSink};
use nurture_core::config::{AgentConfig, AppConfig, GoalSlotPolicy};
use nurture_core::domain::campaign::{Campaign, CampaignId, CampaignMetrics, NewCampaign};
use nurture_core::domain::conversation::{
    Branch, Conversation, ConversationId, InboundKey, Message, MessageMetadata, MessageRole,
    NewMessage, RouteTaken,
};
use nurture_core::domain::goal::{Goal, GoalSignal};
use nurture_core::domain::knowledge::ProjectScope;
use nurture_core::domain::lead::{Lead, LeadFilter, LeadId};
use nurture_core::errors::{ApplicationError, DomainError};
use nurture_core::flows::FlowAction;
use nurture_db::repositories::{
    CampaignRepository, ConversationRepository, LeadRepository, SqlCampaignRepository,
    SqlConversationRepository, SqlLeadRepository, SqlPassageRepository, TurnCommit,
};
use nurture_db::{DbPool, SqlDataStore};

use crate::capabilities::{Classifier, Retriever, SqlCapability};
use crate::classifier::LlmClassifier;
use crate::conversation::{
    goal_confirmation, goal_metadata, replay_outcome, sealed_acknowledgement, slot_request,
    ConversationMachine,
};
use crate::goal::GoalDetector;
use crate::llm::{HttpLlmClient, LlmClient, LlmClientError};
use crate::locks::ConversationLocks;
use crate::outreach::OutreachComposer;
use crate::prompts::PromptLibrary;
use crate::rag::RagExecutor;
use crate::reply::{ReplyContext, ReplyKind, ReplyOutcome};
use crate::retrieval::StoredPassageRetriever;
use crate::router::IntentRouter;
use crate::slot::SlotParser;
use crate::t2sql::{LlmSqlCapability, T2SqlExecutor};

const ACTOR: &str = "conversation-machine";

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct RuntimeSettings {
    pub context_window: usize,
    pub retrieval_top_k: usize,
    pub classifier_timeout: Duration,
    pub lock_timeout: Duration,
    pub goal_slot_policy: GoalSlotPolicy,
    pub default_slot_hour: u32,
    pub max_retries: u32,
}

impl RuntimeSettings {
    pub fn from_config(agent: &AgentConfig, max_retries: u32) -> Self {
        Self {
            context_window: agent.context_window,
            retrieval_top_k: agent.retrieval_top_k,
            classifier_timeout: Duration::from_millis(agent.classifier_timeout_ms),
            lock_timeout: Duration::from_millis(agent.lock_timeout_ms),
            goal_slot_policy: agent.goal_slot_policy,
            default_slot_hour: agent.default_slot_hour,
            max_retries,
        }
    }
}

impl Default for RuntimeSettings {
    fn default() -> Self {
        let config = AppConfig::default();
        Self::from_config(&config.agent, config.llm.max_retries)
    }
}

pub struct Stores {
    pub conversations: Arc<dyn ConversationRepository>,
    pub leads: Arc<dyn LeadRepository>,
    pub campaigns: Arc<dyn CampaignRepository>,
}

pub struct Capabilities {
    pub classifier: Arc<dyn Classifier>,
    pub retriever: Arc<dyn Retriever>,
    pub sql: Arc<dyn SqlCapability>,
    pub llm: Arc<dyn LlmClient>,
}

/// Result of an outreach request.
#[derive(Clone, Debug, PartialEq, Serialize)]
pub struct OutreachOutcome {
    pub message: Message,
    /// False when the conversation already had an opening message.
    pub created: bool,
}

/// A stored campaign and the opening message sent to each of its leads.
#[derive(Clone, Debug, PartialEq, Serialize)]
pub struct CampaignLaunch {
    pub campaign: Campaign,
    pub outreach: Vec<OutreachOutcome>,
}

/// The single entry point for inbound replies and outreach.
pub struct AgentRuntime {
    stores: Stores,
    router: IntentRouter<dyn Classifier>,
    rag: RagExecutor<dyn Retriever, dyn LlmClient>,
    t2sql: T2SqlExecutor<dyn SqlCapability, dyn LlmClient>,
    outreach: OutreachComposer<dyn Retriever, dyn LlmClient>,
    goals: GoalDetector,
    machine: ConversationMachine<dyn ConversationRepository>,
    locks: ConversationLocks,
    settings: RuntimeSettings,
}

impl AgentRuntime {
    pub fn new(
        stores: Stores,
        capabilities: Capabilities,
        audit: Arc<dyn AuditSink>,
        settings: RuntimeSettings,
    ) -> Self {
        let prompts = Arc::new(PromptLibrary::new());
        let Capabilities { classifier, retriever, sql, llm } = capabilities;

        Self {
            router: IntentRouter::new(classifier, settings.classifier_timeout),
            rag: RagExecutor::new(
                retriever.clone(),
                llm.clone(),
                prompts.clone(),
                settings.retrieval_top_k,
                settings.max_retries,
            ),
            t2sql: T2SqlExecutor::new(sql, llm.clone(), prompts.clone(), settings.max_retries),
            outreach: OutreachComposer::new(
                retriever,
                llm,
                prompts,
                settings.retrieval_top_k,
                settings.max_retries,
            ),
            goals: GoalDetector::new(SlotParser::new(settings.default_slot_hour)),
            machine: ConversationMachine::new(
                stores.conversations.clone(),
                audit,
                settings.goal_slot_policy,
            ),
            locks: ConversationLocks::new(),
            stores,
            settings,
        }
    }

    /// Wires the SQLite stores and the configured LLM provider.
    pub fn from_config(config: &AppConfig, pool: DbPool) -> Result<Self, LlmClientError> {
        let llm: Arc<dyn LlmClient> = Arc::new(HttpLlmClient::from_config(&config.llm)?);
        let prompts = Arc::new(PromptLibrary::new());
        let settings = RuntimeSettings::from_config(&config.agent, config.llm.max_retries);

        let stores = Stores {
            conversations: Arc::new(SqlConversationRepository::new(pool.clone())),
            leads: Arc::new(SqlLeadRepository::new(pool.clone())),
            campaigns: Arc::new(SqlCampaignRepository::new(pool.clone())),
        };
        let capabilities = Capabilities {
            classifier: Arc::new(LlmClassifier::new(llm.clone(), prompts.clone())),
            retriever: Arc::new(StoredPassageRetriever::new(Arc::new(SqlPassageRepository::new(
                pool.clone(),
            )))),
            sql: Arc::new(LlmSqlCapability::new(
                llm.clone(),
                prompts,
                SqlDataStore::new(pool),
                settings.max_retries,
            )),
            llm,
        };
        Ok(Self::new(stores, capabilities, Arc::new(TracingAuditSink), settings))
    }

    pub fn settings(&self) -> &RuntimeSettings {
        &self.settings
    }

    pub async fn handle_reply(
        &self,
        conversation_id: &ConversationId,
        inbound_text: &str,
        received_at: DateTime<Utc>,
    ) -> Result<ReplyOutcome, ApplicationError> {
        let correlation_id = Uuid::new_v4().to_string();
        self.handle_reply_traced(conversation_id, inbound_text, received_at, &correlation_id).await
    }

    /// Reads history, decides, and commits one inbound reply while holding the
    /// conversation's lock.
    pub async fn handle_reply_traced(
        &self,
        conversation_id: &ConversationId,
        inbound_text: &str,
        received_at: DateTime<Utc>,
        correlation_id: &str,
    ) -> Result<ReplyOutcome, ApplicationError> {
        let text = inbound_text.trim();
        if text.is_empty() {
            return Err(
                DomainError::InvariantViolation("inbound reply text is empty".to_string()).into()
            );
        }

        let _guard = self.locks.acquire(conversation_id, self.settings.lock_timeout).await?;
        let conversation = self.load(conversation_id).await?;
        let (lead, campaign) = self.participants(&conversation).await?;

        let key = InboundKey::derive(conversation_id, text, received_at);
        if let Some(outcome) = replay_outcome(&conversation, &key, &lead) {
            info!(
                event_name = "agent.reply.replayed",
                correlation_id,
                conversation_id = %conversation_id.0,
                kind = outcome.kind.as_str(),
                "inbound reply already handled"
            );
            return Ok(outcome);
        }

        let audit = AuditContext::new(Some(conversation_id.clone()), correlation_id, ACTOR);
        let signal = if conversation.is_sealed() {
            GoalSignal::none()
        } else {
            let proposal = conversation.last_agent_message().map(|message| message.text.as_str());
            self.goals.detect(text, proposal, received_at)
        };
        let event = self.machine.event_for(&conversation, &signal);
        let transition = self.machine.transition(&conversation, event, &audit)?;

        let committed_at = Utc::now().max(received_at);
        let lead_message = NewMessage::lead(text, key, received_at);
        let status = transition.to.into();

        let outcome = if transition.requires(FlowAction::CreateGoal) {
            let goal = Goal::from_signal(&signal, committed_at).ok_or_else(|| {
                DomainError::InvariantViolation(
                    "goal transition without a detected goal".to_string(),
                )
            })?;
            let reply = goal_confirmation(&goal, &lead, &campaign);
            let confirmation = NewMessage::agent(
                reply.clone(),
                RouteTaken::None,
                goal_metadata(goal.goal_type, goal.scheduled_slot),
                committed_at,
            );
            self.commit(
                &conversation,
                vec![lead_message, confirmation],
                Some(goal.clone()),
                committed_at,
                &audit,
            )
            .await?;
            ReplyOutcome {
                reply_text: reply,
                route_taken: RouteTaken::None,
                goal: Some(goal),
                conversation_status: status,
                kind: ReplyKind::GoalSealed,
                replayed: false,
            }
        } else if transition.requires(FlowAction::RequestSlot) {
            let goal_type = signal.goal_type.ok_or_else(|| {
                DomainError::InvariantViolation("slot request without a goal type".to_string())
            })?;
            let reply = slot_request(goal_type, &lead, &campaign);
            let request = NewMessage::agent(
                reply.clone(),
                RouteTaken::None,
                goal_metadata(goal_type, None),
                committed_at,
            );
            self.commit(&conversation, vec![lead_message, request], None, committed_at, &audit)
                .await?;
            ReplyOutcome {
                reply_text: reply,
                route_taken: RouteTaken::None,
                goal: None,
                conversation_status: status,
                kind: ReplyKind::Answered,
                replayed: false,
            }
        } else if transition.requires(FlowAction::ExecuteBranch) {
            let history = conversation.recent_messages(self.settings.context_window);
            let decision = self.router.route(text, history).await;
            let context = ReplyContext { lead: &lead, campaign: &campaign, history };

            let draft = match decision.branch {
                Branch::DocumentQuestion => {
                    let scope = ProjectScope::new(campaign.project_name.clone());
                    self.rag.answer_with_retrieval(text, &scope, context).await
                }
                Branch::DataQuestion => {
                    let schema = self.t2sql.schema_context();
                    self.t2sql.answer_with_sql(text, &schema, context).await
                }
            };

            let mut metadata = draft.metadata;
            let branch_failures = std::mem::take(&mut metadata.failures);
            decision.annotate(&mut metadata);
            metadata.failures.extend(branch_failures);
            let kind = ReplyKind::for_metadata(&metadata);

            let answer = NewMessage::agent(draft.text.clone(), draft.route, metadata, committed_at);
            self.commit(&conversation, vec![lead_message, answer], None, committed_at, &audit)
                .await?;
            ReplyOutcome {
                reply_text: draft.text,
                route_taken: draft.route,
                goal: None,
                conversation_status: status,
                kind,
                replayed: false,
            }
        } else {
            let logged = lead_message.with_metadata(MessageMetadata {
                informational: true,
                ..MessageMetadata::default()
            });
            self.commit(&conversation, vec![logged], None, committed_at, &audit).await?;
            ReplyOutcome {
                reply_text: sealed_acknowledgement(&lead, conversation.goal.as_ref()),
                route_taken: RouteTaken::None,
                goal: conversation.goal.clone(),
                conversation_status: status,
                kind: ReplyKind::LoggedOnly,
                replayed: false,
            }
        };

        info!(
            event_name = "agent.reply.handled",
            correlation_id,
            conversation_id = %conversation_id.0,
            kind = outcome.kind.as_str(),
            route = outcome.route_taken.as_str(),
            status = outcome.conversation_status.as_str(),
            "inbound reply handled"
        );
        Ok(outcome)
    }

    /// Generates and stores the opening message unless the conversation has one.
    pub async fn send_outreach(
        &self,
        conversation_id: &ConversationId,
    ) -> Result<OutreachOutcome, ApplicationError> {
        let _guard = self.locks.acquire(conversation_id, self.settings.lock_timeout).await?;
        let conversation = self.load(conversation_id).await?;
        if let Some(existing) =
            conversation.messages.iter().find(|message| message.role == MessageRole::Agent)
        {
            return Ok(OutreachOutcome { message: existing.clone(), created: false });
        }

        let (lead, campaign) = self.participants(&conversation).await?;
        let draft = self.outreach.compose(&lead, &campaign).await;
        let message = self
            .stores
            .conversations
            .append_message(
                conversation_id,
                NewMessage::agent(draft.text, draft.route, draft.metadata, Utc::now()),
            )
            .await?;

        info!(
            event_name = "agent.outreach.stored",
            conversation_id = %conversation_id.0,
            message_id = %message.id.0,
            "opening message stored"
        );
        Ok(OutreachOutcome { message, created: true })
    }

    pub async fn conversation(
        &self,
        conversation_id: &ConversationId,
    ) -> Result<Conversation, ApplicationError> {
        self.load(conversation_id).await
    }

    /// History for a lead within a campaign, `None` before any conversation exists.
    pub async fn get_conversation(
        &self,
        lead_id: &LeadId,
        campaign_id: &CampaignId,
    ) -> Result<Option<Conversation>, ApplicationError> {
        Ok(self.stores.conversations.find_by_participants(lead_id, campaign_id).await?)
    }

    /// The conversation for the pair, started if needed.
    pub async fn conversation_for(
        &self,
        lead_id: &LeadId,
        campaign_id: &CampaignId,
    ) -> Result<Conversation, ApplicationError> {
        if self.stores.leads.find_by_id(lead_id).await?.is_none() {
            return Err(
                DomainError::InvariantViolation(format!("unknown lead {}", lead_id.0)).into()
            );
        }
        if self.stores.campaigns.find_by_id(campaign_id).await?.is_none() {
            return Err(DomainError::InvariantViolation(format!(
                "unknown campaign {}",
                campaign_id.0
            ))
            .into());
        }
        Ok(self.stores.conversations.open(lead_id, campaign_id, Utc::now()).await?)
    }

    pub async fn campaign_metrics(
        &self,
        campaign_id: &CampaignId,
    ) -> Result<CampaignMetrics, ApplicationError> {
        if self.stores.campaigns.find_by_id(campaign_id).await?.is_none() {
            return Err(ApplicationError::UnknownCampaign(campaign_id.0.clone()));
        }
        Ok(self.stores.campaigns.metrics(campaign_id).await?)
    }

    /// Leads matching `filter`; at least two filter fields must be set.
    pub async fn shortlist_leads(
        &self,
        filter: &LeadFilter,
    ) -> Result<Vec<Lead>, ApplicationError> {
        let active = filter.active_filters();
        if active < LeadFilter::MINIMUM_FILTERS {
            return Err(DomainError::InvariantViolation(format!(
                "shortlist needs at least {} filter fields, got {active}",
                LeadFilter::MINIMUM_FILTERS
            ))
            .into());
        }
        if let (Some(from), Some(to)) =
            (filter.last_conversation_from, filter.last_conversation_to)
        {
            if from > to {
                return Err(DomainError::InvariantViolation(format!(
                    "last conversation range starts after it ends ({from} > {to})"
                ))
                .into());
            }
        }
        if let (Some(min), Some(max)) = (filter.budget_min, filter.budget_max) {
            if min > max {
                return Err(DomainError::InvariantViolation(format!(
                    "budget range is inverted ({min} > {max})"
                ))
                .into());
            }
        }

        let leads = self.stores.leads.shortlist(filter).await?;
        info!(
            event_name = "agent.leads.shortlisted",
            active_filters = active,
            matched = leads.len(),
            "leads shortlisted"
        );
        Ok(leads)
    }

    /// Stores the campaign, then opens a conversation and sends outreach to
    /// each selected lead in order.
    pub async fn create_campaign(
        &self,
        request: NewCampaign,
    ) -> Result<CampaignLaunch, ApplicationError> {
        let name = request.name.trim();
        let project_name = request.project_name.trim();
        if name.is_empty() || project_name.is_empty() {
            return Err(DomainError::InvariantViolation(
                "campaign name and project are required".to_string(),
            )
            .into());
        }

        let mut lead_ids: Vec<LeadId> = Vec::with_capacity(request.lead_ids.len());
        for lead_id in request.lead_ids {
            if !lead_ids.contains(&lead_id) {
                lead_ids.push(lead_id);
            }
        }
        if lead_ids.is_empty() {
            return Err(DomainError::InvariantViolation(
                "a campaign needs at least one lead".to_string(),
            )
            .into());
        }
        let mut missing = Vec::new();
        for lead_id in &lead_ids {
            if self.stores.leads.find_by_id(lead_id).await?.is_none() {
                missing.push(lead_id.0.as_str());
            }
        }
        if !missing.is_empty() {
            return Err(DomainError::InvariantViolation(format!(
                "lead ids not found: {}",
                missing.join(", ")
            ))
            .into());
        }

        let campaign = Campaign {
            id: CampaignId(format!("camp-{}", Uuid::new_v4())),
            name: name.to_string(),
            project_name: project_name.to_string(),
            message_channel: request.message_channel,
            offer_details: request.offer_details,
            created_at: Utc::now(),
        };
        self.stores.campaigns.save(campaign.clone()).await?;
        info!(
            event_name = "agent.campaign.created",
            campaign_id = %campaign.id.0,
            leads = lead_ids.len(),
            "campaign stored"
        );

        let mut outreach = Vec::with_capacity(lead_ids.len());
        for lead_id in &lead_ids {
            let conversation = self.conversation_for(lead_id, &campaign.id).await?;
            outreach.push(self.send_outreach(&conversation.id).await?);
        }
        Ok(CampaignLaunch { campaign, outreach })
    }

    async fn load(
        &self,
        conversation_id: &ConversationId,
    ) -> Result<Conversation, ApplicationError> {
        self.stores
            .conversations
            .find_by_id(conversation_id)
            .await?
            .ok_or_else(|| ApplicationError::UnknownConversation(conversation_id.0.clone()))
    }

    async fn participants(
        &self,
        conversation: &Conversation,
    ) -> Result<(Lead, Campaign), ApplicationError> {
        let lead = self.stores.leads.find_by_id(&conversation.lead_id).await?.ok_or_else(|| {
            DomainError::InvariantViolation(format!(
                "conversation {} references unknown lead {}",
                conversation.id.0, conversation.lead_id.0
            ))
        })?;
        let campaign =
            self.stores.campaigns.find_by_id(&conversation.campaign_id).await?.ok_or_else(|| {
                DomainError::InvariantViolation(format!(
                    "conversation {} references unknown campaign {}",
                    conversation.id.0, conversation.campaign_id.0
                ))
            })?;
        Ok((lead, campaign))
    }

    async fn commit(
        &self,
        conversation: &Conversation,
        messages: Vec<NewMessage>,
        seal: Option<Goal>,
        committed_at: DateTime<Utc>,
        audit: &AuditContext,
    ) -> Result<Vec<Message>, ApplicationError> {
        self.machine
            .commit(
                TurnCommit {
                    conversation_id: conversation.id.clone(),
                    messages,
                    seal,
                    committed_at,
                },
                audit,
            )
            .await
    }
}
