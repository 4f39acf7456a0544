use std::str::FromStr;

use chrono::NaiveDate;
use rust_decimal::Decimal;
use sqlx::{sqlite::SqliteRow, QueryBuilder, Row, Sqlite};

use nurture_core::domain::lead::{Lead, LeadFilter, LeadId, LeadStatus};

use super::conversation::{parse_timestamp, parse_u32};
use super::{LeadRepository, RepositoryError};
use crate::DbPool;

const LEAD_COLUMNS: &str = "id, crm_id, first_name, last_name, email, phone_number, \
    project_enquired, unit_type, status, budget_min, budget_max, family_size, \
    location_preference, purchase_motive, financing_readiness, last_conversation_summary, \
    last_conversation_date, created_at, updated_at";

pub struct SqlLeadRepository {
    pool: DbPool,
}

impl SqlLeadRepository {
    pub fn new(pool: DbPool) -> Self {
        Self { pool }
    }
}

#[async_trait::async_trait]
impl LeadRepository for SqlLeadRepository {
    async fn find_by_id(&self, id: &LeadId) -> Result<Option<Lead>, RepositoryError> {
        let row = sqlx::query(&format!("SELECT {LEAD_COLUMNS} FROM lead WHERE id = ?"))
            .bind(&id.0)
            .fetch_optional(&self.pool)
            .await?;

        row.map(lead_from_row).transpose()
    }

    async fn save(&self, lead: Lead) -> Result<(), RepositoryError> {
        sqlx::query(
            "INSERT INTO lead (
                id, crm_id, first_name, last_name, email, phone_number, project_enquired,
                unit_type, status, budget_min, budget_max, family_size, location_preference,
                purchase_motive, financing_readiness, last_conversation_summary,
                last_conversation_date, created_at, updated_at
             ) VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)
             ON CONFLICT(id) DO UPDATE SET
                crm_id = excluded.crm_id,
                first_name = excluded.first_name,
                last_name = excluded.last_name,
                email = excluded.email,
                phone_number = excluded.phone_number,
                project_enquired = excluded.project_enquired,
                unit_type = excluded.unit_type,
                status = excluded.status,
                budget_min = excluded.budget_min,
                budget_max = excluded.budget_max,
                family_size = excluded.family_size,
                location_preference = excluded.location_preference,
                purchase_motive = excluded.purchase_motive,
                financing_readiness = excluded.financing_readiness,
                last_conversation_summary = excluded.last_conversation_summary,
                last_conversation_date = excluded.last_conversation_date,
                updated_at = excluded.updated_at",
        )
        .bind(&lead.id.0)
        .bind(&lead.crm_id)
        .bind(&lead.first_name)
        .bind(&lead.last_name)
        .bind(&lead.email)
        .bind(lead.phone_number.as_deref())
        .bind(&lead.project_enquired)
        .bind(&lead.unit_type)
        .bind(lead.status.as_str())
        .bind(lead.budget_min.map(|value| value.to_string()))
        .bind(lead.budget_max.map(|value| value.to_string()))
        .bind(lead.family_size.map(i64::from))
        .bind(lead.location_preference.as_deref())
        .bind(lead.purchase_motive.as_deref())
        .bind(lead.financing_readiness.as_deref())
        .bind(lead.last_conversation_summary.as_deref())
        .bind(lead.last_conversation_date.map(|date| date.to_string()))
        .bind(lead.created_at.to_rfc3339())
        .bind(lead.updated_at.to_rfc3339())
        .execute(&self.pool)
        .await?;

        Ok(())
    }

    async fn shortlist(&self, filter: &LeadFilter) -> Result<Vec<Lead>, RepositoryError> {
        let mut query = QueryBuilder::<Sqlite>::new(format!("SELECT {LEAD_COLUMNS} FROM lead"));
        query.push(" WHERE 1=1");

        for (column, values) in [
            ("project_enquired", &filter.project_names),
            ("unit_type", &filter.unit_types),
        ] {
            if values.is_empty() {
                continue;
            }
            query.push(format!(" AND {column} IN ("));
            let mut separated = query.separated(", ");
            for value in values {
                separated.push_bind(value.as_str());
            }
            query.push(")");
        }
        if let Some(status) = &filter.status {
            query.push(" AND status = ").push_bind(status.as_str());
        }
        if let Some(from) = filter.last_conversation_from {
            query.push(" AND last_conversation_date >= ").push_bind(from.to_string());
        }
        if let Some(to) = filter.last_conversation_to {
            query.push(" AND last_conversation_date <= ").push_bind(to.to_string());
        }
        if filter.has_budget() {
            query.push(
                " AND ((budget_min IS NULL AND budget_max IS NULL) \
                 OR (budget_min IS NOT NULL AND budget_max IS NOT NULL",
            );
            if let Some(max) = filter.budget_max {
                query
                    .push(" AND CAST(budget_min AS REAL) <= CAST(")
                    .push_bind(max.to_string())
                    .push(" AS REAL)");
            }
            if let Some(min) = filter.budget_min {
                query
                    .push(" AND CAST(budget_max AS REAL) >= CAST(")
                    .push_bind(min.to_string())
                    .push(" AS REAL)");
            }
            query.push("))");
        }
        query.push(" ORDER BY id");

        let rows = query.build().fetch_all(&self.pool).await?;
        rows.into_iter().map(lead_from_row).collect()
    }
}

fn lead_from_row(row: SqliteRow) -> Result<Lead, RepositoryError> {
    let status_raw = row.try_get::<String, _>("status")?;
    let status = LeadStatus::parse(&status_raw)
        .ok_or_else(|| RepositoryError::Decode(format!("unknown lead status `{status_raw}`")))?;

    Ok(Lead {
        id: LeadId(row.try_get("id")?),
        crm_id: row.try_get("crm_id")?,
        first_name: row.try_get("first_name")?,
        last_name: row.try_get("last_name")?,
        email: row.try_get("email")?,
        phone_number: row.try_get("phone_number")?,
        project_enquired: row.try_get("project_enquired")?,
        unit_type: row.try_get("unit_type")?,
        status,
        budget_min: parse_decimal("budget_min", row.try_get("budget_min")?)?,
        budget_max: parse_decimal("budget_max", row.try_get("budget_max")?)?,
        family_size: row
            .try_get::<Option<i64>, _>("family_size")?
            .map(|value| parse_u32("family_size", value))
            .transpose()?,
        location_preference: row.try_get("location_preference")?,
        purchase_motive: row.try_get("purchase_motive")?,
        financing_readiness: row.try_get("financing_readiness")?,
        last_conversation_summary: row.try_get("last_conversation_summary")?,
        last_conversation_date: parse_date(
            "last_conversation_date",
            row.try_get("last_conversation_date")?,
        )?,
        created_at: parse_timestamp("created_at", row.try_get("created_at")?)?,
        updated_at: parse_timestamp("updated_at", row.try_get("updated_at")?)?,
    })
}

fn parse_decimal(column: &str, value: Option<String>) -> Result<Option<Decimal>, RepositoryError> {
    value
        .map(|raw| {
            Decimal::from_str(raw.trim()).map_err(|error| {
                RepositoryError::Decode(format!("invalid decimal in `{column}`: `{raw}` ({error})"))
            })
        })
        .transpose()
}

fn parse_date(column: &str, value: Option<String>) -> Result<Option<NaiveDate>, RepositoryError> {
    value
        .map(|raw| {
            NaiveDate::parse_from_str(&raw, "%Y-%m-%d").map_err(|error| {
                RepositoryError::Decode(format!("invalid date in `{column}`: `{raw}` ({error})"))
            })
        })
        .transpose()
}
