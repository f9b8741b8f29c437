//! Relational rows as the sync layer receives them.

use castgraph::SourceRecord;
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CharacterRecord {
    pub id: i64,
    pub project_id: i64,
    pub name: String,
    #[serde(default)]
    pub description: Option<String>,
    /// Narrative role, e.g. `protagonist`.
    #[serde(default)]
    pub role: Option<String>,
    #[serde(default)]
    pub importance: Option<i32>,
}

impl CharacterRecord {
    pub fn new(id: i64, project_id: i64, name: impl Into<String>) -> Self {
        Self {
            id,
            project_id,
            name: name.into(),
            description: None,
            role: None,
            importance: None,
        }
    }

    pub fn to_source(&self) -> SourceRecord {
        SourceRecord {
            source_id: self.id,
            project_id: self.project_id,
            name: self.name.clone(),
            description: self.description.clone(),
            node_type: self.role.clone(),
            importance: self.importance,
        }
    }

    /// Text indexed in the vector store for this character.
    pub fn embedding_text(&self) -> String {
        match &self.description {
            Some(d) if !d.trim().is_empty() => format!("{}: {}", self.name, d),
            _ => self.name.clone(),
        }
    }
}

/// An abstract concept: theme, emotion, event, setting or trait.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ConceptRecord {
    pub id: i64,
    pub project_id: i64,
    pub name: String,
    #[serde(default)]
    pub description: Option<String>,
    #[serde(default)]
    pub category: Option<String>,
    #[serde(default)]
    pub importance: Option<i32>,
}

impl ConceptRecord {
    pub fn new(id: i64, project_id: i64, name: impl Into<String>) -> Self {
        Self {
            id,
            project_id,
            name: name.into(),
            description: None,
            category: None,
            importance: None,
        }
    }

    pub fn to_source(&self) -> SourceRecord {
        SourceRecord {
            source_id: self.id,
            project_id: self.project_id,
            name: self.name.clone(),
            description: self.description.clone(),
            node_type: self.category.clone(),
            importance: self.importance,
        }
    }

    pub fn embedding_text(&self) -> String {
        match &self.description {
            Some(d) if !d.trim().is_empty() => format!("{}: {}", self.name, d),
            _ => self.name.clone(),
        }
    }
}

/// An episode-scoped relationship with both endpoint characters loaded.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RelationshipRecord {
    pub id: i64,
    pub episode_id: i64,
    pub from: CharacterRecord,
    pub to: CharacterRecord,
    pub relation_type: String,
    pub closeness: f64,
    #[serde(default)]
    pub description: Option<String>,
}

impl RelationshipRecord {
    /// Short label used in log lines and warnings.
    pub fn label(&self) -> String {
        format!(
            "relationship {} ({} -> {}, episode {})",
            self.id, self.from.id, self.to.id, self.episode_id
        )
    }
}
