use chrono::{DateTime, Utc};
use sqlx::{sqlite::SqliteRow, Row, Sqlite, Transaction};
use uuid::Uuid;

use nurture_core::domain::campaign::CampaignId;
use nurture_core::domain::conversation::{
    Conversation, ConversationId, ConversationStatus, InboundKey, Message, MessageId,
    MessageMetadata, MessageRole, NewMessage, RouteTaken,
};
use nurture_core::domain::goal::{Goal, GoalType};
use nurture_core::domain::lead::LeadId;

use super::{map_unique_violation, ConversationRepository, RepositoryError, TurnCommit};
use crate::DbPool;

const CONVERSATION_COLUMNS: &str = "id, lead_id, campaign_id, status, goal_type,
    goal_scheduled_slot, goal_slot_phrase, goal_created_at, created_at, updated_at";

pub struct SqlConversationRepository {
    pool: DbPool,
}

impl SqlConversationRepository {
    pub fn new(pool: DbPool) -> Self {
        Self { pool }
    }

    async fn load(&self, row: Option<SqliteRow>) -> Result<Option<Conversation>, RepositoryError> {
        let Some(row) = row else {
            return Ok(None);
        };
        let mut conversation = conversation_from_row(&row)?;
        conversation.messages = self.messages_for(&conversation.id).await?;
        Ok(Some(conversation))
    }

    async fn messages_for(&self, id: &ConversationId) -> Result<Vec<Message>, RepositoryError> {
        let rows = sqlx::query(
            "SELECT id, conversation_id, seq, role, text, route, inbound_key, metadata_json,
                    created_at
             FROM conversation_message
             WHERE conversation_id = ?
             ORDER BY seq ASC",
        )
        .bind(&id.0)
        .fetch_all(&self.pool)
        .await?;

        rows.iter().map(message_from_row).collect()
    }
}

#[async_trait::async_trait]
impl ConversationRepository for SqlConversationRepository {
    async fn find_by_id(
        &self,
        id: &ConversationId,
    ) -> Result<Option<Conversation>, RepositoryError> {
        let row =
            sqlx::query(&format!("SELECT {CONVERSATION_COLUMNS} FROM conversation WHERE id = ?"))
                .bind(&id.0)
                .fetch_optional(&self.pool)
                .await?;
        self.load(row).await
    }

    async fn find_by_participants(
        &self,
        lead_id: &LeadId,
        campaign_id: &CampaignId,
    ) -> Result<Option<Conversation>, RepositoryError> {
        let row = sqlx::query(&format!(
            "SELECT {CONVERSATION_COLUMNS} FROM conversation WHERE lead_id = ? AND campaign_id = ?"
        ))
        .bind(&lead_id.0)
        .bind(&campaign_id.0)
        .fetch_optional(&self.pool)
        .await?;
        self.load(row).await
    }

    async fn open(
        &self,
        lead_id: &LeadId,
        campaign_id: &CampaignId,
        now: DateTime<Utc>,
    ) -> Result<Conversation, RepositoryError> {
        sqlx::query(
            "INSERT INTO conversation (id, lead_id, campaign_id, status, created_at, updated_at)
             VALUES (?, ?, ?, 'active', ?, ?)
             ON CONFLICT(lead_id, campaign_id) DO NOTHING",
        )
        .bind(format!("conv-{}", Uuid::new_v4()))
        .bind(&lead_id.0)
        .bind(&campaign_id.0)
        .bind(now.to_rfc3339())
        .bind(now.to_rfc3339())
        .execute(&self.pool)
        .await?;

        self.find_by_participants(lead_id, campaign_id).await?.ok_or_else(|| {
            RepositoryError::Decode(format!(
                "conversation for lead `{}` and campaign `{}` vanished after insert",
                lead_id.0, campaign_id.0
            ))
        })
    }

    async fn list_for_campaign(
        &self,
        campaign_id: &CampaignId,
    ) -> Result<Vec<Conversation>, RepositoryError> {
        let rows = sqlx::query(&format!(
            "SELECT {CONVERSATION_COLUMNS} FROM conversation
             WHERE campaign_id = ?
             ORDER BY created_at ASC, id ASC"
        ))
        .bind(&campaign_id.0)
        .fetch_all(&self.pool)
        .await?;

        let mut conversations = Vec::with_capacity(rows.len());
        for row in rows {
            let mut conversation = conversation_from_row(&row)?;
            conversation.messages = self.messages_for(&conversation.id).await?;
            conversations.push(conversation);
        }
        Ok(conversations)
    }

    async fn append_message(
        &self,
        conversation_id: &ConversationId,
        message: NewMessage,
    ) -> Result<Message, RepositoryError> {
        let mut tx = self.pool.begin().await?;
        touch_conversation(&mut tx, conversation_id, message.created_at).await?;
        let next_seq = next_seq(&mut tx, conversation_id).await?;
        let stored = insert_message(&mut tx, conversation_id, next_seq, message).await?;
        tx.commit().await?;
        Ok(stored)
    }

    async fn commit_turn(&self, turn: TurnCommit) -> Result<Vec<Message>, RepositoryError> {
        let mut tx = self.pool.begin().await?;
        touch_conversation(&mut tx, &turn.conversation_id, turn.committed_at).await?;

        if let Some(goal) = &turn.seal {
            let sealed = sqlx::query(
                "UPDATE conversation
                 SET status = 'goal_sealed',
                     goal_type = ?,
                     goal_scheduled_slot = ?,
                     goal_slot_phrase = ?,
                     goal_created_at = ?
                 WHERE id = ? AND status = 'active'",
            )
            .bind(goal.goal_type.as_str())
            .bind(goal.scheduled_slot.map(|slot| slot.to_rfc3339()))
            .bind(goal.slot_phrase.as_deref())
            .bind(goal.created_at.to_rfc3339())
            .bind(&turn.conversation_id.0)
            .execute(&mut *tx)
            .await?;

            if sealed.rows_affected() == 0 {
                return Err(RepositoryError::Conflict(format!(
                    "conversation `{}` is already sealed",
                    turn.conversation_id.0
                )));
            }
        }

        let mut seq = next_seq(&mut tx, &turn.conversation_id).await?;
        let mut stored = Vec::with_capacity(turn.messages.len());
        for message in turn.messages {
            stored.push(insert_message(&mut tx, &turn.conversation_id, seq, message).await?);
            seq += 1;
        }

        tx.commit().await?;
        Ok(stored)
    }
}

async fn touch_conversation(
    tx: &mut Transaction<'_, Sqlite>,
    conversation_id: &ConversationId,
    at: DateTime<Utc>,
) -> Result<(), RepositoryError> {
    let touched = sqlx::query("UPDATE conversation SET updated_at = ? WHERE id = ?")
        .bind(at.to_rfc3339())
        .bind(&conversation_id.0)
        .execute(&mut **tx)
        .await?;
    if touched.rows_affected() == 0 {
        return Err(RepositoryError::NotFound(conversation_id.0.clone()));
    }
    Ok(())
}

async fn next_seq(
    tx: &mut Transaction<'_, Sqlite>,
    conversation_id: &ConversationId,
) -> Result<u32, RepositoryError> {
    let current: i64 = sqlx::query_scalar(
        "SELECT COALESCE(MAX(seq), 0) FROM conversation_message WHERE conversation_id = ?",
    )
    .bind(&conversation_id.0)
    .fetch_one(&mut **tx)
    .await?;
    parse_u32("seq", current + 1)
}

async fn insert_message(
    tx: &mut Transaction<'_, Sqlite>,
    conversation_id: &ConversationId,
    seq: u32,
    message: NewMessage,
) -> Result<Message, RepositoryError> {
    let id = MessageId(format!("msg-{}", Uuid::new_v4()));
    let metadata_json = serde_json::to_string(&message.metadata)
        .map_err(|error| RepositoryError::Decode(format!("metadata encode failed: {error}")))?;

    sqlx::query(
        "INSERT INTO conversation_message
            (id, conversation_id, seq, role, text, route, inbound_key, metadata_json, created_at)
         VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?)",
    )
    .bind(&id.0)
    .bind(&conversation_id.0)
    .bind(i64::from(seq))
    .bind(message.role.as_str())
    .bind(&message.text)
    .bind(message.route.as_str())
    .bind(message.inbound_key.as_ref().map(|key| key.0.as_str()))
    .bind(metadata_json)
    .bind(message.created_at.to_rfc3339())
    .execute(&mut **tx)
    .await
    .map_err(|error| map_unique_violation(error, "duplicate conversation message"))?;

    Ok(Message {
        id,
        conversation_id: conversation_id.clone(),
        seq,
        role: message.role,
        text: message.text,
        route: message.route,
        inbound_key: message.inbound_key,
        metadata: message.metadata,
        created_at: message.created_at,
    })
}

fn conversation_from_row(row: &SqliteRow) -> Result<Conversation, RepositoryError> {
    let status_raw = row.try_get::<String, _>("status")?;
    let status = ConversationStatus::parse(&status_raw).ok_or_else(|| {
        RepositoryError::Decode(format!("unknown conversation status `{status_raw}`"))
    })?;

    let goal = match row.try_get::<Option<String>, _>("goal_type")? {
        Some(goal_type_raw) => {
            let goal_type = GoalType::parse(&goal_type_raw).ok_or_else(|| {
                RepositoryError::Decode(format!("unknown goal type `{goal_type_raw}`"))
            })?;
            let created_at = row
                .try_get::<Option<String>, _>("goal_created_at")?
                .ok_or_else(|| {
                    RepositoryError::Decode("sealed goal without goal_created_at".to_string())
                })?;
            Some(Goal {
                goal_type,
                scheduled_slot: parse_optional_timestamp(
                    "goal_scheduled_slot",
                    row.try_get("goal_scheduled_slot")?,
                )?,
                slot_phrase: row.try_get("goal_slot_phrase")?,
                created_at: parse_timestamp("goal_created_at", created_at)?,
            })
        }
        None => None,
    };

    Ok(Conversation {
        id: ConversationId(row.try_get("id")?),
        lead_id: LeadId(row.try_get("lead_id")?),
        campaign_id: CampaignId(row.try_get("campaign_id")?),
        status,
        goal,
        messages: Vec::new(),
        created_at: parse_timestamp("created_at", row.try_get("created_at")?)?,
        updated_at: parse_timestamp("updated_at", row.try_get("updated_at")?)?,
    })
}

fn message_from_row(row: &SqliteRow) -> Result<Message, RepositoryError> {
    let role_raw = row.try_get::<String, _>("role")?;
    let role = MessageRole::parse(&role_raw)
        .ok_or_else(|| RepositoryError::Decode(format!("unknown message role `{role_raw}`")))?;
    let route_raw = row.try_get::<String, _>("route")?;
    let route = RouteTaken::parse(&route_raw)
        .ok_or_else(|| RepositoryError::Decode(format!("unknown message route `{route_raw}`")))?;
    let metadata_raw = row.try_get::<String, _>("metadata_json")?;
    let metadata = serde_json::from_str::<MessageMetadata>(&metadata_raw)
        .map_err(|error| RepositoryError::Decode(format!("invalid metadata_json: {error}")))?;

    Ok(Message {
        id: MessageId(row.try_get("id")?),
        conversation_id: ConversationId(row.try_get("conversation_id")?),
        seq: parse_u32("seq", row.try_get("seq")?)?,
        role,
        text: row.try_get("text")?,
        route,
        inbound_key: row.try_get::<Option<String>, _>("inbound_key")?.map(InboundKey),
        metadata,
        created_at: parse_timestamp("created_at", row.try_get("created_at")?)?,
    })
}

pub(crate) fn parse_u32(column: &str, value: i64) -> Result<u32, RepositoryError> {
    u32::try_from(value).map_err(|_| {
        RepositoryError::Decode(format!(
            "invalid value for `{column}` (expected non-negative u32): {value}"
        ))
    })
}

pub(crate) fn parse_timestamp(
    column: &str,
    value: String,
) -> Result<DateTime<Utc>, RepositoryError> {
    DateTime::parse_from_rfc3339(&value).map(|timestamp| timestamp.with_timezone(&Utc)).map_err(
        |error| {
            RepositoryError::Decode(format!("invalid timestamp in `{column}`: `{value}` ({error})"))
        },
    )
}

pub(crate) fn parse_optional_timestamp(
    column: &str,
    value: Option<String>,
) -> Result<Option<DateTime<Utc>>, RepositoryError> {
    value.map(|timestamp| parse_timestamp(column, timestamp)).transpose()
}

#[cfg(test)]
mod tests {
    use chrono::{DateTime, Duration, Utc};

    use nurture_core::domain::campaign::CampaignId;
    use nurture_core::domain::conversation::{
        ConversationId, ConversationStatus, InboundKey, MessageMetadata, MessageRole, NewMessage,
        RouteTaken,
    };
    use nurture_core::domain::goal::{Goal, GoalType};
    use nurture_core::domain::lead::LeadId;

    use super::SqlConversationRepository;
    use crate::repositories::{ConversationRepository, RepositoryError, TurnCommit};
    use crate::{connect_with_settings, migrations, DbPool};

    async fn setup_pool() -> DbPool {
        let pool = connect_with_settings("sqlite::memory:", 1, 30).await.expect("connect");
        migrations::run_pending(&pool).await.expect("migrations");
        sqlx::query(
            "INSERT INTO lead (id, crm_id, first_name, email, project_enquired, unit_type,
                               created_at, updated_at)
             VALUES ('lead-1', 'CRM-1', 'Jordan', 'jordan@example.com', 'Altura Residences',
                     '2 bed', '2026-10-01T00:00:00+00:00', '2026-10-01T00:00:00+00:00')",
        )
        .execute(&pool)
        .await
        .expect("insert lead");
        sqlx::query(
            "INSERT INTO campaign (id, name, project_name, message_channel, created_at)
             VALUES ('camp-1', 'Launch', 'Altura Residences', 'email',
                     '2026-10-01T00:00:00+00:00')",
        )
        .execute(&pool)
        .await
        .expect("insert campaign");
        pool
    }

    fn parse_ts(value: &str) -> DateTime<Utc> {
        DateTime::parse_from_rfc3339(value).expect("valid rfc3339").with_timezone(&Utc)
    }

    fn lead_message(conversation_id: &ConversationId, text: &str, at: DateTime<Utc>) -> NewMessage {
        NewMessage::lead(text, InboundKey::derive(conversation_id, text, at), at)
    }

    fn agent_message(text: &str, at: DateTime<Utc>) -> NewMessage {
        NewMessage::agent(text, RouteTaken::DocumentQuestion, MessageMetadata::default(), at)
    }

    fn visit_goal(at: DateTime<Utc>) -> Goal {
        Goal {
            goal_type: GoalType::Visit,
            scheduled_slot: Some(parse_ts("2026-10-17T15:00:00Z")),
            slot_phrase: Some("saturday at 3pm".to_string()),
            created_at: at,
        }
    }

    #[tokio::test]
    async fn open_is_idempotent_per_participant_pair() {
        let pool = setup_pool().await;
        let repo = SqlConversationRepository::new(pool.clone());
        let now = parse_ts("2026-10-14T09:00:00Z");

        let first = repo
            .open(&LeadId("lead-1".into()), &CampaignId("camp-1".into()), now)
            .await
            .expect("open");
        let second = repo
            .open(
                &LeadId("lead-1".into()),
                &CampaignId("camp-1".into()),
                now + Duration::minutes(5),
            )
            .await
            .expect("reopen");

        assert_eq!(first.id, second.id);
        assert_eq!(first.status, ConversationStatus::Active);
        assert!(first.messages.is_empty());

        pool.close().await;
    }

    #[tokio::test]
    async fn commit_turn_orders_messages_and_seals_goal() {
        let pool = setup_pool().await;
        let repo = SqlConversationRepository::new(pool.clone());
        let now = parse_ts("2026-10-14T09:00:00Z");
        let conversation = repo
            .open(&LeadId("lead-1".into()), &CampaignId("camp-1".into()), now)
            .await
            .expect("open");

        repo.append_message(&conversation.id, agent_message("Welcome to Altura", now))
            .await
            .expect("append opening");

        let stored = repo
            .commit_turn(TurnCommit {
                conversation_id: conversation.id.clone(),
                messages: vec![
                    lead_message(
                        &conversation.id,
                        "Can we book a visit this Saturday at 3pm?",
                        now,
                    ),
                    agent_message("Wonderful news, Jordan!", now),
                ],
                seal: Some(visit_goal(now)),
                committed_at: now,
            })
            .await
            .expect("commit turn");
        assert_eq!(stored.iter().map(|m| m.seq).collect::<Vec<_>>(), vec![2, 3]);

        let loaded = repo.find_by_id(&conversation.id).await.expect("find").expect("exists");
        assert_eq!(loaded.status, ConversationStatus::GoalSealed);
        assert_eq!(loaded.goal, Some(visit_goal(now)));
        assert_eq!(
            loaded.messages.iter().map(|m| (m.seq, m.role)).collect::<Vec<_>>(),
            vec![(1, MessageRole::Agent), (2, MessageRole::Lead), (3, MessageRole::Agent)]
        );
        assert_eq!(loaded.messages[1].inbound_key, stored[0].inbound_key);

        pool.close().await;
    }

    #[tokio::test]
    async fn second_seal_is_rejected_and_rolls_back_turn() {
        let pool = setup_pool().await;
        let repo = SqlConversationRepository::new(pool.clone());
        let now = parse_ts("2026-10-14T09:00:00Z");
        let conversation = repo
            .open(&LeadId("lead-1".into()), &CampaignId("camp-1".into()), now)
            .await
            .expect("open");

        repo.commit_turn(TurnCommit {
            conversation_id: conversation.id.clone(),
            messages: vec![lead_message(&conversation.id, "Let's book a tour tomorrow", now)],
            seal: Some(visit_goal(now)),
            committed_at: now,
        })
        .await
        .expect("first seal");

        let later = now + Duration::minutes(1);
        let error = repo
            .commit_turn(TurnCommit {
                conversation_id: conversation.id.clone(),
                messages: vec![
                    lead_message(&conversation.id, "Actually can we schedule a call?", later),
                    agent_message("Great!", later),
                ],
                seal: Some(Goal { goal_type: GoalType::Call, ..visit_goal(later) }),
                committed_at: later,
            })
            .await
            .expect_err("second seal must fail");
        assert!(matches!(error, RepositoryError::Conflict(_)));

        let loaded = repo.find_by_id(&conversation.id).await.expect("find").expect("exists");
        assert_eq!(loaded.goal.map(|goal| goal.goal_type), Some(GoalType::Visit));
        assert_eq!(loaded.messages.len(), 1);

        pool.close().await;
    }

    #[tokio::test]
    async fn duplicate_inbound_key_fails_without_partial_commit() {
        let pool = setup_pool().await;
        let repo = SqlConversationRepository::new(pool.clone());
        let now = parse_ts("2026-10-14T09:00:00Z");
        let conversation = repo
            .open(&LeadId("lead-1".into()), &CampaignId("camp-1".into()), now)
            .await
            .expect("open");
        let text = "I'd like to visit sometime";

        repo.commit_turn(TurnCommit {
            conversation_id: conversation.id.clone(),
            messages: vec![lead_message(&conversation.id, text, now), agent_message("Sure", now)],
            seal: None,
            committed_at: now,
        })
        .await
        .expect("first delivery");

        let error = repo
            .commit_turn(TurnCommit {
                conversation_id: conversation.id.clone(),
                messages: vec![
                    lead_message(&conversation.id, text, now),
                    agent_message("Sure", now),
                ],
                seal: Some(visit_goal(now)),
                committed_at: now,
            })
            .await
            .expect_err("redelivery must fail");
        assert!(matches!(error, RepositoryError::Conflict(_)));

        let loaded = repo.find_by_id(&conversation.id).await.expect("find").expect("exists");
        assert_eq!(loaded.status, ConversationStatus::Active, "seal must roll back");
        assert_eq!(loaded.messages.len(), 2);

        pool.close().await;
    }

    #[tokio::test]
    async fn unknown_conversation_is_not_found() {
        let pool = setup_pool().await;
        let repo = SqlConversationRepository::new(pool.clone());
        let now = parse_ts("2026-10-14T09:00:00Z");
        let missing = ConversationId("conv-missing".to_string());

        let error = repo
            .append_message(&missing, agent_message("hello", now))
            .await
            .expect_err("unknown conversation");
        assert!(matches!(error, RepositoryError::NotFound(ref id) if id == "conv-missing"));
        assert!(repo.find_by_id(&missing).await.expect("lookup").is_none());

        pool.close().await;
    }

    #[tokio::test]
    async fn metadata_round_trips_through_json_column() {
        let pool = setup_pool().await;
        let repo = SqlConversationRepository::new(pool.clone());
        let now = parse_ts("2026-10-14T09:00:00Z");
        let conversation = repo
            .open(&LeadId("lead-1".into()), &CampaignId("camp-1".into()), now)
            .await
            .expect("open");

        let metadata = MessageMetadata {
            classifier_label: Some("T2SQL".to_string()),
            classifier_confidence: Some(0.75),
            sql: Some("SELECT COUNT(*) FROM unit_listing".to_string()),
            row_count: Some(1),
            ..MessageMetadata::default()
        };
        repo.append_message(
            &conversation.id,
            NewMessage::agent(
                "There are 3 units.",
                RouteTaken::DataQuestion,
                metadata.clone(),
                now,
            ),
        )
        .await
        .expect("append");

        let loaded = repo.find_by_id(&conversation.id).await.expect("find").expect("exists");
        assert_eq!(loaded.messages[0].metadata, metadata);
        assert_eq!(loaded.messages[0].route, RouteTaken::DataQuestion);

        pool.close().await;
    }
}
