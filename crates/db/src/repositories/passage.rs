use chrono::Utc;
use sqlx::{sqlite::SqliteRow, Row};

use nurture_core::documents::DocumentChunk;
use nurture_core::domain::knowledge::{ProjectScope, StoredPassage};

use super::conversation::parse_u32;
use super::{PassageRepository, RepositoryError};
use crate::DbPool;

pub struct SqlPassageRepository {
    pool: DbPool,
}

impl SqlPassageRepository {
    pub fn new(pool: DbPool) -> Self {
        Self { pool }
    }
}

#[async_trait::async_trait]
impl PassageRepository for SqlPassageRepository {
    async fn list_for_project(
        &self,
        scope: &ProjectScope,
    ) -> Result<Vec<StoredPassage>, RepositoryError> {
        let rows = sqlx::query(
            "SELECT id, project_name, source_id, chunk_index, text
             FROM project_passage
             WHERE project_name = ?
             ORDER BY source_id ASC, chunk_index ASC",
        )
        .bind(&scope.project_name)
        .fetch_all(&self.pool)
        .await?;

        rows.into_iter().map(passage_from_row).collect()
    }

    async fn replace_source(
        &self,
        scope: &ProjectScope,
        source_id: &str,
        chunks: &[DocumentChunk],
    ) -> Result<usize, RepositoryError> {
        let mut tx = self.pool.begin().await?;

        sqlx::query("DELETE FROM project_passage WHERE project_name = ? AND source_id = ?")
            .bind(&scope.project_name)
            .bind(source_id)
            .execute(&mut *tx)
            .await?;

        let created_at = Utc::now().to_rfc3339();
        for chunk in chunks {
            sqlx::query(
                "INSERT INTO project_passage (id, project_name, source_id, chunk_index, text,
                                              created_at)
                 VALUES (?, ?, ?, ?, ?, ?)",
            )
            .bind(passage_id(&scope.project_name, source_id, chunk.index))
            .bind(&scope.project_name)
            .bind(source_id)
            .bind(i64::try_from(chunk.index).unwrap_or(i64::MAX))
            .bind(&chunk.text)
            .bind(&created_at)
            .execute(&mut *tx)
            .await?;
        }

        tx.commit().await?;
        Ok(chunks.len())
    }
}

fn passage_id(project_name: &str, source_id: &str, index: usize) -> String {
    let project_slug = project_name
        .chars()
        .map(|ch| if ch.is_ascii_alphanumeric() { ch.to_ascii_lowercase() } else { '-' })
        .collect::<String>();
    format!("pp-{project_slug}-{source_id}-{index}")
}

fn passage_from_row(row: SqliteRow) -> Result<StoredPassage, RepositoryError> {
    Ok(StoredPassage {
        id: row.try_get("id")?,
        project_name: row.try_get("project_name")?,
        source_id: row.try_get("source_id")?,
        chunk_index: parse_u32("chunk_index", row.try_get("chunk_index")?)?,
        text: row.try_get("text")?,
    })
}

#[cfg(test)]
mod tests {
    use nurture_core::documents::DocumentChunk;
    use nurture_core::domain::knowledge::ProjectScope;

    use super::SqlPassageRepository;
    use crate::repositories::PassageRepository;
    use crate::{connect_with_settings, migrations};

    fn chunk(index: usize, text: &str) -> DocumentChunk {
        DocumentChunk { index, text: text.to_string() }
    }

    #[tokio::test]
    async fn replace_source_swaps_chunks_within_project_scope() {
        let pool = connect_with_settings("sqlite::memory:", 1, 30).await.expect("connect");
        migrations::run_pending(&pool).await.expect("migrations");
        let repo = SqlPassageRepository::new(pool.clone());
        let altura = ProjectScope::new("Altura Residences");
        let other = ProjectScope::new("Bayview Towers");

        let old_chunks = [chunk(0, "old floor plans"), chunk(1, "old amenities")];
        repo.replace_source(&altura, "brochure", &old_chunks).await.expect("first ingest");
        repo.replace_source(&other, "brochure", &[chunk(0, "bayview pool")])
            .await
            .expect("other project");
        let stored = repo
            .replace_source(&altura, "brochure", &[chunk(0, "new floor plans")])
            .await
            .expect("re-ingest");
        assert_eq!(stored, 1);

        let passages = repo.list_for_project(&altura).await.expect("list");
        assert_eq!(passages.len(), 1);
        assert_eq!(passages[0].text, "new floor plans");
        assert_eq!(passages[0].id, "pp-altura-residences-brochure-0");
        assert_eq!(repo.list_for_project(&other).await.expect("list other").len(), 1);

        pool.close().await;
    }
}
