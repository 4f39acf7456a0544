use crate::connection::DbPool;
use crate::repositories::RepositoryError;
use sqlx::Executor;

/// Seeded row ids per table, checked by `verify` and removed by `clean`.
const SEED_TABLES: &[SeedTableContract] = &[
    SeedTableContract { table: "campaign", label: "campaign", ids: &["camp-altura-001"] },
    SeedTableContract { table: "lead", label: "leads", ids: &["lead-001", "lead-002", "lead-003"] },
    SeedTableContract {
        table: "conversation",
        label: "conversations",
        ids: &["conv-001", "conv-002", "conv-003"],
    },
    SeedTableContract {
        table: "conversation_message",
        label: "opening-messages",
        ids: &["msg-001-1", "msg-002-1"],
    },
    SeedTableContract {
        table: "project_passage",
        label: "brochure-passages",
        ids: &[
            "pp-altura-brochure-0",
            "pp-altura-brochure-1",
            "pp-altura-brochure-2",
            "pp-altura-brochure-3",
            "pp-altura-brochure-4",
        ],
    },
    SeedTableContract {
        table: "unit_listing",
        label: "unit-listings",
        ids: &[
            "unit-0201",
            "unit-0305",
            "unit-0402",
            "unit-0507",
            "unit-0803",
            "unit-1104",
            "unit-0901",
            "unit-1301",
        ],
    },
];

/// Deterministic nurture dataset: one campaign for Altura Residences, three
/// leads with a conversation each, brochure passages and unit listings.
pub struct NurtureSeedDataset;

impl NurtureSeedDataset {
    pub const SQL: &str = include_str!("../../../config/fixtures/nurture_seed.sql");

    /// Loads the dataset. Re-loading is a no-op for rows that already exist.
    pub async fn load(pool: &DbPool) -> Result<SeedResult, RepositoryError> {
        let mut tx = pool.begin().await?;

        tx.execute(sqlx::query(Self::SQL)).await?;
        tx.commit().await?;

        let tables_seeded =
            SEED_TABLES.iter().map(|contract| (contract.table, contract.ids.len())).collect();
        Ok(SeedResult { tables_seeded })
    }

    pub async fn verify(pool: &DbPool) -> Result<VerificationResult, RepositoryError> {
        let mut checks = Vec::new();

        for contract in SEED_TABLES {
            let quoted = sql_array_from_ids(contract.ids);
            let existing: i64 = sqlx::query_scalar(&format!(
                "SELECT COUNT(1) FROM {} WHERE id IN {quoted}",
                contract.table
            ))
            .fetch_one(pool)
            .await?;
            checks.push((contract.label, existing == contract.ids.len() as i64));
        }

        let scoped_passages: i64 = sqlx::query_scalar(
            "SELECT COUNT(1) FROM project_passage WHERE project_name = 'Altura Residences'",
        )
        .fetch_one(pool)
        .await?;
        checks.push(("passages-scoped-to-project", scoped_passages >= 5));

        let opening_roles_ok: i64 = sqlx::query_scalar(
            "SELECT NOT EXISTS(
                SELECT 1 FROM conversation_message
                WHERE id IN ('msg-001-1', 'msg-002-1') AND (role != 'agent' OR seq != 1)
             )",
        )
        .fetch_one(pool)
        .await?;
        checks.push(("opening-messages-are-agent-seq-1", opening_roles_ok == 1));

        let all_present = checks.iter().all(|(_, ok)| *ok);
        Ok(VerificationResult { all_present, checks })
    }

    /// Removes seeded rows, children first.
    pub async fn clean(pool: &DbPool) -> Result<(), RepositoryError> {
        let mut tx = pool.begin().await?;

        let conversations = sql_array_from_ids(&["conv-001", "conv-002", "conv-003"]);
        sqlx::query(&format!(
            "DELETE FROM conversation_message WHERE conversation_id IN {conversations}"
        ))
        .execute(&mut *tx)
        .await?;

        for contract in SEED_TABLES.iter().rev() {
            let quoted = sql_array_from_ids(contract.ids);
            sqlx::query(&format!("DELETE FROM {} WHERE id IN {quoted}", contract.table))
                .execute(&mut *tx)
                .await?;
        }

        tx.commit().await?;
        Ok(())
    }
}

#[derive(Debug, Clone, Copy)]
struct SeedTableContract {
    table: &'static str,
    label: &'static str,
    ids: &'static [&'static str],
}

fn sql_array_from_ids(ids: &[&str]) -> String {
    let quoted = ids.iter().map(|id| format!("'{}'", id)).collect::<Vec<_>>().join(",");
    format!("({quoted})")
}

#[derive(Debug)]
pub struct SeedResult {
    pub tables_seeded: Vec<(&'static str, usize)>,
}

#[derive(Debug)]
pub struct VerificationResult {
    pub all_present: bool,
    pub checks: Vec<(&'static str, bool)>,
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{connect_with_settings, migrations};

    #[test]
    fn sql_fixture_is_valid() {
        assert!(!NurtureSeedDataset::SQL.is_empty());
        for contract in SEED_TABLES {
            for id in contract.ids {
                assert!(
                    NurtureSeedDataset::SQL.contains(&format!("'{id}'")),
                    "fixture missing `{id}`"
                );
            }
        }
    }

    #[tokio::test]
    async fn verify_seed_contract_and_idempotency() {
        let pool = connect_with_settings("sqlite::memory:", 1, 30)
            .await
            .expect("connect to test database");
        migrations::run_pending(&pool).await.expect("run migrations");

        let first = NurtureSeedDataset::load(&pool).await.expect("load seed fixtures");
        let first_verification = NurtureSeedDataset::verify(&pool).await.expect("verify");
        assert!(first_verification.all_present, "{:?}", first_verification.checks);
        assert_eq!(first.tables_seeded.len(), SEED_TABLES.len());

        NurtureSeedDataset::load(&pool).await.expect("reload seed fixtures");
        let second_verification = NurtureSeedDataset::verify(&pool).await.expect("re-verify");
        assert!(second_verification.all_present);
        assert_eq!(first_verification.checks, second_verification.checks);

        let units: i64 = sqlx::query_scalar("SELECT COUNT(1) FROM unit_listing")
            .fetch_one(&pool)
            .await
            .expect("count units");
        assert_eq!(units, 8);
    }

    #[tokio::test]
    async fn clean_removes_seeded_rows() {
        let pool = connect_with_settings("sqlite::memory:", 1, 30)
            .await
            .expect("connect to test database");
        migrations::run_pending(&pool).await.expect("run migrations");
        NurtureSeedDataset::load(&pool).await.expect("load seed fixtures");

        NurtureSeedDataset::clean(&pool).await.expect("clean");
        let verification = NurtureSeedDataset::verify(&pool).await.expect("verify");
        assert!(!verification.all_present);

        let remaining: i64 = sqlx::query_scalar("SELECT COUNT(1) FROM conversation")
            .fetch_one(&pool)
            .await
            .expect("count conversations");
        assert_eq!(remaining, 0);
    }
}
