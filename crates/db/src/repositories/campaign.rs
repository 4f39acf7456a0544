use sqlx::{sqlite::SqliteRow, Row};

use nurture_core::domain::campaign::{Campaign, CampaignId, CampaignMetrics, MessageChannel};

use super::conversation::parse_timestamp;
use super::{CampaignRepository, RepositoryError};
use crate::DbPool;

pub struct SqlCampaignRepository {
    pool: DbPool,
}

impl SqlCampaignRepository {
    pub fn new(pool: DbPool) -> Self {
        Self { pool }
    }
}

#[async_trait::async_trait]
impl CampaignRepository for SqlCampaignRepository {
    async fn find_by_id(&self, id: &CampaignId) -> Result<Option<Campaign>, RepositoryError> {
        let row = sqlx::query(
            "SELECT id, name, project_name, message_channel, offer_details, created_at
             FROM campaign
             WHERE id = ?",
        )
        .bind(&id.0)
        .fetch_optional(&self.pool)
        .await?;

        row.map(campaign_from_row).transpose()
    }

    async fn save(&self, campaign: Campaign) -> Result<(), RepositoryError> {
        sqlx::query(
            "INSERT INTO campaign (id, name, project_name, message_channel, offer_details,
                                   created_at)
             VALUES (?, ?, ?, ?, ?, ?)
             ON CONFLICT(id) DO UPDATE SET
                name = excluded.name,
                project_name = excluded.project_name,
                message_channel = excluded.message_channel,
                offer_details = excluded.offer_details",
        )
        .bind(&campaign.id.0)
        .bind(&campaign.name)
        .bind(&campaign.project_name)
        .bind(campaign.message_channel.as_str())
        .bind(campaign.offer_details.as_deref())
        .bind(campaign.created_at.to_rfc3339())
        .execute(&self.pool)
        .await?;

        Ok(())
    }

    async fn metrics(&self, id: &CampaignId) -> Result<CampaignMetrics, RepositoryError> {
        let row = sqlx::query(
            "SELECT
                COUNT(*) AS total_leads,
                COALESCE(SUM(EXISTS(
                    SELECT 1 FROM conversation_message m
                    WHERE m.conversation_id = c.id AND m.role = 'agent'
                )), 0) AS contacted,
                COALESCE(SUM(EXISTS(
                    SELECT 1 FROM conversation_message m
                    WHERE m.conversation_id = c.id AND m.role = 'lead'
                )), 0) AS responded,
                COALESCE(SUM(c.status = 'goal_sealed'), 0) AS goals_sealed,
                COALESCE(SUM(c.goal_type = 'visit'), 0) AS visits_sealed,
                COALESCE(SUM(c.goal_type = 'call'), 0) AS calls_sealed
             FROM conversation c
             WHERE c.campaign_id = ?",
        )
        .bind(&id.0)
        .fetch_one(&self.pool)
        .await?;

        Ok(CampaignMetrics {
            campaign_id: id.0.clone(),
            total_leads: parse_count("total_leads", row.try_get("total_leads")?)?,
            contacted: parse_count("contacted", row.try_get("contacted")?)?,
            responded: parse_count("responded", row.try_get("responded")?)?,
            goals_sealed: parse_count("goals_sealed", row.try_get("goals_sealed")?)?,
            visits_sealed: parse_count("visits_sealed", row.try_get("visits_sealed")?)?,
            calls_sealed: parse_count("calls_sealed", row.try_get("calls_sealed")?)?,
        })
    }
}

fn campaign_from_row(row: SqliteRow) -> Result<Campaign, RepositoryError> {
    let channel_raw = row.try_get::<String, _>("message_channel")?;
    let message_channel = MessageChannel::parse(&channel_raw).ok_or_else(|| {
        RepositoryError::Decode(format!("unknown message channel `{channel_raw}`"))
    })?;

    Ok(Campaign {
        id: CampaignId(row.try_get("id")?),
        name: row.try_get("name")?,
        project_name: row.try_get("project_name")?,
        message_channel,
        offer_details: row.try_get("offer_details")?,
        created_at: parse_timestamp("created_at", row.try_get("created_at")?)?,
    })
}

fn parse_count(column: &str, value: i64) -> Result<u64, RepositoryError> {
    u64::try_from(value)
        .map_err(|_| RepositoryError::Decode(format!("negative count in `{column}`: {value}")))
}
