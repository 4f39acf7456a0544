use std::collections::HashMap;

use chrono::{DateTime, Utc};
use tokio::sync::RwLock;
use uuid::Uuid;

use nurture_core::documents::DocumentChunk;
use nurture_core::domain::campaign::{Campaign, CampaignId, CampaignMetrics};
use nurture_core::domain::conversation::{
    Conversation, ConversationId, ConversationStatus, Message, MessageId, MessageRole, NewMessage,
};
use nurture_core::domain::goal::GoalType;
use nurture_core::domain::knowledge::{ProjectScope, StoredPassage};
use nurture_core::domain::lead::{Lead, LeadFilter, LeadId};

use super::{
    CampaignRepository, ConversationRepository, LeadRepository, PassageRepository,
    RepositoryError, TurnCommit,
};

#[derive(Default)]
pub struct InMemoryConversationRepository {
    conversations: RwLock<HashMap<String, Conversation>>,
}

impl InMemoryConversationRepository {
    /// Inserts a conversation as-is, replacing any with the same id.
    pub async fn insert(&self, conversation: Conversation) {
        let mut conversations = self.conversations.write().await;
        conversations.insert(conversation.id.0.clone(), conversation);
    }
}

fn stage_message(
    conversation: &Conversation,
    seq: u32,
    message: NewMessage,
) -> Result<Message, RepositoryError> {
    if let Some(key) = &message.inbound_key {
        if conversation.find_inbound(key).is_some() {
            return Err(RepositoryError::Conflict(format!(
                "duplicate conversation message: inbound key `{}`",
                key.0
            )));
        }
    }
    Ok(Message {
        id: MessageId(format!("msg-{}", Uuid::new_v4())),
        conversation_id: conversation.id.clone(),
        seq,
        role: message.role,
        text: message.text,
        route: message.route,
        inbound_key: message.inbound_key,
        metadata: message.metadata,
        created_at: message.created_at,
    })
}

#[async_trait::async_trait]
impl ConversationRepository for InMemoryConversationRepository {
    async fn find_by_id(
        &self,
        id: &ConversationId,
    ) -> Result<Option<Conversation>, RepositoryError> {
        let conversations = self.conversations.read().await;
        Ok(conversations.get(&id.0).cloned())
    }

    async fn find_by_participants(
        &self,
        lead_id: &LeadId,
        campaign_id: &CampaignId,
    ) -> Result<Option<Conversation>, RepositoryError> {
        let conversations = self.conversations.read().await;
        Ok(conversations
            .values()
            .find(|conversation| {
                &conversation.lead_id == lead_id && &conversation.campaign_id == campaign_id
            })
            .cloned())
    }

    async fn open(
        &self,
        lead_id: &LeadId,
        campaign_id: &CampaignId,
        now: DateTime<Utc>,
    ) -> Result<Conversation, RepositoryError> {
        let mut conversations = self.conversations.write().await;
        if let Some(existing) = conversations.values().find(|conversation| {
            &conversation.lead_id == lead_id && &conversation.campaign_id == campaign_id
        }) {
            return Ok(existing.clone());
        }

        let conversation = Conversation {
            id: ConversationId(format!("conv-{}", Uuid::new_v4())),
            lead_id: lead_id.clone(),
            campaign_id: campaign_id.clone(),
            status: ConversationStatus::Active,
            goal: None,
            messages: Vec::new(),
            created_at: now,
            updated_at: now,
        };
        conversations.insert(conversation.id.0.clone(), conversation.clone());
        Ok(conversation)
    }

    async fn list_for_campaign(
        &self,
        campaign_id: &CampaignId,
    ) -> Result<Vec<Conversation>, RepositoryError> {
        let conversations = self.conversations.read().await;
        let mut matching = conversations
            .values()
            .filter(|conversation| &conversation.campaign_id == campaign_id)
            .cloned()
            .collect::<Vec<_>>();
        matching.sort_by(|a, b| a.created_at.cmp(&b.created_at).then_with(|| a.id.cmp(&b.id)));
        Ok(matching)
    }

    async fn append_message(
        &self,
        conversation_id: &ConversationId,
        message: NewMessage,
    ) -> Result<Message, RepositoryError> {
        let mut conversations = self.conversations.write().await;
        let conversation = conversations
            .get_mut(&conversation_id.0)
            .ok_or_else(|| RepositoryError::NotFound(conversation_id.0.clone()))?;

        let stored = stage_message(conversation, conversation.next_seq(), message)?;
        conversation.updated_at = stored.created_at;
        conversation.messages.push(stored.clone());
        Ok(stored)
    }

    async fn commit_turn(&self, turn: TurnCommit) -> Result<Vec<Message>, RepositoryError> {
        let mut conversations = self.conversations.write().await;
        let conversation = conversations
            .get(&turn.conversation_id.0)
            .ok_or_else(|| RepositoryError::NotFound(turn.conversation_id.0.clone()))?;

        // Stage on a copy so a rejected turn leaves the stored conversation untouched.
        let mut staged = conversation.clone();
        if let Some(goal) = turn.seal {
            staged.seal(goal).map_err(|_| {
                RepositoryError::Conflict(format!(
                    "conversation `{}` is already sealed",
                    turn.conversation_id.0
                ))
            })?;
        }

        let mut stored = Vec::with_capacity(turn.messages.len());
        for message in turn.messages {
            let message = stage_message(&staged, staged.next_seq(), message)?;
            staged.messages.push(message.clone());
            stored.push(message);
        }
        staged.updated_at = turn.committed_at;

        conversations.insert(staged.id.0.clone(), staged);
        Ok(stored)
    }
}

#[derive(Default)]
pub struct InMemoryLeadRepository {
    leads: RwLock<HashMap<String, Lead>>,
}

#[async_trait::async_trait]
impl LeadRepository for InMemoryLeadRepository {
    async fn find_by_id(&self, id: &LeadId) -> Result<Option<Lead>, RepositoryError> {
        let leads = self.leads.read().await;
        Ok(leads.get(&id.0).cloned())
    }

    async fn save(&self, lead: Lead) -> Result<(), RepositoryError> {
        let mut leads = self.leads.write().await;
        leads.insert(lead.id.0.clone(), lead);
        Ok(())
    }

    async fn shortlist(&self, filter: &LeadFilter) -> Result<Vec<Lead>, RepositoryError> {
        let leads = self.leads.read().await;
        let mut matched =
            leads.values().filter(|lead| filter.matches(lead)).cloned().collect::<Vec<_>>();
        matched.sort_by(|left, right| left.id.0.cmp(&right.id.0));
        Ok(matched)
    }
}

/// Campaign store whose metrics are computed from a shared conversation repository.
pub struct InMemoryCampaignRepository {
    campaigns: RwLock<HashMap<String, Campaign>>,
    conversations: std::sync::Arc<InMemoryConversationRepository>,
}

impl InMemoryCampaignRepository {
    pub fn new(conversations: std::sync::Arc<InMemoryConversationRepository>) -> Self {
        Self { campaigns: RwLock::new(HashMap::new()), conversations }
    }
}

#[async_trait::async_trait]
impl CampaignRepository for InMemoryCampaignRepository {
    async fn find_by_id(&self, id: &CampaignId) -> Result<Option<Campaign>, RepositoryError> {
        let campaigns = self.campaigns.read().await;
        Ok(campaigns.get(&id.0).cloned())
    }

    async fn save(&self, campaign: Campaign) -> Result<(), RepositoryError> {
        let mut campaigns = self.campaigns.write().await;
        campaigns.insert(campaign.id.0.clone(), campaign);
        Ok(())
    }

    async fn metrics(&self, id: &CampaignId) -> Result<CampaignMetrics, RepositoryError> {
        let conversations = self.conversations.list_for_campaign(id).await?;
        let has_role = |conversation: &Conversation, role: MessageRole| {
            conversation.messages.iter().any(|message| message.role == role)
        };
        let sealed_as = |goal_type: GoalType| {
            conversations
                .iter()
                .filter(|c| c.goal.as_ref().map(|goal| goal.goal_type) == Some(goal_type))
                .count() as u64
        };

        Ok(CampaignMetrics {
            campaign_id: id.0.clone(),
            total_leads: conversations.len() as u64,
            contacted: conversations.iter().filter(|c| has_role(c, MessageRole::Agent)).count()
                as u64,
            responded: conversations.iter().filter(|c| has_role(c, MessageRole::Lead)).count()
                as u64,
            goals_sealed: conversations.iter().filter(|c| c.is_sealed()).count() as u64,
            visits_sealed: sealed_as(GoalType::Visit),
            calls_sealed: sealed_as(GoalType::Call),
        })
    }
}

#[derive(Default)]
pub struct InMemoryPassageRepository {
    passages: RwLock<Vec<StoredPassage>>,
}

#[async_trait::async_trait]
impl PassageRepository for InMemoryPassageRepository {
    async fn list_for_project(
        &self,
        scope: &ProjectScope,
    ) -> Result<Vec<StoredPassage>, RepositoryError> {
        let passages = self.passages.read().await;
        Ok(passages
            .iter()
            .filter(|passage| passage.project_name == scope.project_name)
            .cloned()
            .collect())
    }

    async fn replace_source(
        &self,
        scope: &ProjectScope,
        source_id: &str,
        chunks: &[DocumentChunk],
    ) -> Result<usize, RepositoryError> {
        let mut passages = self.passages.write().await;
        passages.retain(|passage| {
            !(passage.project_name == scope.project_name && passage.source_id == source_id)
        });
        for chunk in chunks {
            passages.push(StoredPassage {
                id: format!("{source_id}-{}", chunk.index),
                project_name: scope.project_name.clone(),
                source_id: source_id.to_string(),
                chunk_index: u32::try_from(chunk.index).unwrap_or(u32::MAX),
                text: chunk.text.clone(),
            });
        }
        Ok(chunks.len())
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use chrono::Utc;

    use nurture_core::domain::campaign::CampaignId;
    use nurture_core::domain::conversation::{InboundKey, MessageMetadata, NewMessage, RouteTaken};
    use nurture_core::domain::goal::{Goal, GoalType};
    use nurture_core::domain::lead::LeadId;

    use crate::repositories::{
        CampaignRepository, ConversationRepository, InMemoryCampaignRepository,
        InMemoryConversationRepository, RepositoryError, TurnCommit,
    };

    fn goal(goal_type: GoalType) -> Goal {
        Goal { goal_type, scheduled_slot: None, slot_phrase: None, created_at: Utc::now() }
    }

    #[tokio::test]
    async fn in_memory_commit_turn_matches_sql_semantics() {
        let repo = Arc::new(InMemoryConversationRepository::default());
        let now = Utc::now();
        let conversation = repo
            .open(&LeadId("lead-1".into()), &CampaignId("camp-1".into()), now)
            .await
            .expect("open");
        let key = InboundKey::derive(&conversation.id, "book a tour", now);

        let stored = repo
            .commit_turn(TurnCommit {
                conversation_id: conversation.id.clone(),
                messages: vec![
                    NewMessage::lead("book a tour", key.clone(), now),
                    NewMessage::agent("Done", RouteTaken::None, MessageMetadata::default(), now),
                ],
                seal: Some(goal(GoalType::Visit)),
                committed_at: now,
            })
            .await
            .expect("commit");
        assert_eq!(stored.iter().map(|m| m.seq).collect::<Vec<_>>(), vec![1, 2]);

        let rejected = repo
            .commit_turn(TurnCommit {
                conversation_id: conversation.id.clone(),
                messages: vec![NewMessage::lead("call me", InboundKey("other".into()), now)],
                seal: Some(goal(GoalType::Call)),
                committed_at: now,
            })
            .await;
        assert!(matches!(rejected, Err(RepositoryError::Conflict(_))));

        let duplicate = repo
            .commit_turn(TurnCommit {
                conversation_id: conversation.id.clone(),
                messages: vec![NewMessage::lead("book a tour", key, now)],
                seal: None,
                committed_at: now,
            })
            .await;
        assert!(matches!(duplicate, Err(RepositoryError::Conflict(_))));

        let loaded = repo.find_by_id(&conversation.id).await.expect("find").expect("exists");
        assert_eq!(loaded.messages.len(), 2);
        assert_eq!(loaded.goal.map(|g| g.goal_type), Some(GoalType::Visit));

        let campaigns = InMemoryCampaignRepository::new(repo.clone());
        let metrics = campaigns.metrics(&CampaignId("camp-1".into())).await.expect("metrics");
        assert_eq!((metrics.total_leads, metrics.contacted, metrics.responded), (1, 1, 1));
        assert_eq!((metrics.goals_sealed, metrics.visits_sealed), (1, 1));
    }
}
