use serde::{Deserialize, Serialize};
use serde_json::Value;

/// Retrieval is always scoped to one project's material.
#[derive(Clone, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct ProjectScope {
    pub project_name: String,
}

impl ProjectScope {
    pub fn new(project_name: impl Into<String>) -> Self {
        Self { project_name: project_name.into() }
    }
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct Passage {
    pub text: String,
    pub score: f32,
    pub source_id: String,
}

/// A brochure chunk as stored for a project.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct StoredPassage {
    pub id: String,
    pub project_name: String,
    pub source_id: String,
    pub chunk_index: u32,
    pub text: String,
}

#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct TabularResult {
    pub columns: Vec<String>,
    pub rows: Vec<Vec<Value>>,
}

impl TabularResult {
    pub fn is_empty(&self) -> bool {
        self.rows.is_empty()
    }

    pub fn row_count(&self) -> usize {
        self.rows.len()
    }

    /// The single value of a one-row, one-column result.
    pub fn scalar(&self) -> Option<(&str, &Value)> {
        match (self.columns.as_slice(), self.rows.as_slice()) {
            ([column], [row]) if row.len() == 1 => Some((column.as_str(), &row[0])),
            _ => None,
        }
    }

    pub fn row_pairs(&self, index: usize) -> Vec<(&str, &Value)> {
        self.rows
            .get(index)
            .map(|row| {
                self.columns.iter().map(String::as_str).zip(row.iter()).collect::<Vec<_>>()
            })
            .unwrap_or_default()
    }
}
