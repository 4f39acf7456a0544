use std::collections::BTreeSet;
use std::sync::Arc;

use async_trait::async_trait;

use nurture_core::domain::knowledge::{Passage, ProjectScope};
use nurture_core::errors::CapabilityError;
use nurture_db::repositories::PassageRepository;

use crate::capabilities::Retriever;

const STOP_WORDS: &[&str] = &[
    "a", "an", "and", "any", "are", "at", "be", "can", "do", "does", "for", "from", "have", "how",
    "i", "in", "is", "it", "me", "my", "of", "on", "or", "so", "the", "there", "this", "to", "we",
    "what", "when", "where", "which", "with", "you", "your",
];

/// Scores a project's stored brochure chunks by query-term overlap.
pub struct StoredPassageRetriever<R: ?Sized> {
    passages: Arc<R>,
}

impl<R> StoredPassageRetriever<R>
where
    R: PassageRepository + ?Sized,
{
    pub fn new(passages: Arc<R>) -> Self {
        Self { passages }
    }
}

#[async_trait]
impl<R> Retriever for StoredPassageRetriever<R>
where
    R: PassageRepository + ?Sized,
{
    async fn retrieve(
        &self,
        query: &str,
        scope: &ProjectScope,
        k: usize,
    ) -> Result<Vec<Passage>, CapabilityError> {
        let stored = self
            .passages
            .list_for_project(scope)
            .await
            .map_err(|error| CapabilityError::RetrievalUnavailable(error.to_string()))?;

        let query_terms = terms(query);
        if query_terms.is_empty() {
            return Ok(Vec::new());
        }

        let mut scored = stored
            .into_iter()
            .filter_map(|passage| {
                let passage_terms = terms(&passage.text);
                let overlap = query_terms.intersection(&passage_terms).count();
                (overlap > 0).then(|| Passage {
                    score: overlap as f32 / query_terms.len() as f32,
                    text: passage.text,
                    source_id: passage.id,
                })
            })
            .collect::<Vec<_>>();

        // Stable sort keeps stored order among equal scores.
        scored.sort_by(|a, b| b.score.total_cmp(&a.score));
        scored.truncate(k);
        Ok(scored)
    }
}

fn terms(text: &str) -> BTreeSet<String> {
    text.to_lowercase()
        .split(|ch: char| !ch.is_alphanumeric())
        .filter(|word| word.len() > 1 && !STOP_WORDS.contains(word))
        .map(stem)
        .collect()
}

/// Folds simple plurals so "plans" meets "plan".
fn stem(word: &str) -> String {
    match word.strip_suffix('s') {
        Some(stripped) if stripped.len() > 2 && !stripped.ends_with('s') => stripped.to_string(),
        _ => word.to_string(),
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use nurture_core::documents::DocumentChunk;
    use nurture_core::domain::knowledge::ProjectScope;
    use nurture_db::repositories::{InMemoryPassageRepository, PassageRepository};

    use super::StoredPassageRetriever;
    use crate::capabilities::Retriever;

    fn chunk(index: usize, text: &str) -> DocumentChunk {
        DocumentChunk { index, text: text.to_string() }
    }

    #[tokio::test]
    async fn ranks_by_overlap_within_project_scope() {
        let repo = Arc::new(InMemoryPassageRepository::default());
        let altura = ProjectScope::new("Altura Residences");
        repo.replace_source(
            &altura,
            "brochure",
            &[
                chunk(0, "Floor plans range from one bed apartments to three bed corner homes."),
                chunk(1, "Residents enjoy a rooftop pool and a gym."),
                chunk(2, "Two bed floor plan includes a utility room."),
            ],
        )
        .await
        .expect("ingest");
        let bayview = ProjectScope::new("Bayview");
        repo.replace_source(&bayview, "brochure", &[chunk(0, "Floor plans at Bayview")])
            .await
            .expect("ingest other");

        let retriever = StoredPassageRetriever::new(repo);
        let passages = retriever
            .retrieve("What floor plans are available?", &altura, 4)
            .await
            .expect("retrieve");

        assert_eq!(passages.len(), 2);
        assert_eq!(passages[0].source_id, "brochure-0");
        assert!(passages.iter().all(|passage| !passage.text.contains("Bayview")));
        assert!(passages[0].score >= passages[1].score);

        let none = retriever.retrieve("the?", &altura, 4).await.expect("retrieve");
        assert!(none.is_empty());
    }
}
