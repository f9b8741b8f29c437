//! Operator-triggered rebuild of the graph mirror from the relational store.
//!
//! Characters are migrated first, then relationships, each in id-ordered
//! pages. After every page the position is written to an optional
//! [`CheckpointFile`], so an interrupted run resumes where it stopped.
//! Per-entity failures are counted in the [`MigrationReport`] and never stop
//! the run; only a failing [`RelationalSource`] or checkpoint write does.

use crate::records::{CharacterRecord, RelationshipRecord};
use crate::retrieval::HybridRetrievalService;
use crate::sync::{SyncOutcome, SyncService};
use anyhow::Context;
use castgraph::SourceType;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::json;
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tracing::{debug, info, warn};

/// Paged, id-ordered reads from the relational store.
///
/// Both methods return rows with `id > after_id` in ascending id order, at
/// most `limit` of them, restricted to `project_id` when given. A
/// relationship belongs to the project of its `from` character.
pub trait RelationalSource {
    fn characters(
        &self,
        project_id: Option<i64>,
        after_id: Option<i64>,
        limit: usize,
    ) -> anyhow::Result<Vec<CharacterRecord>>;

    fn relationships(
        &self,
        project_id: Option<i64>,
        after_id: Option<i64>,
        limit: usize,
    ) -> anyhow::Result<Vec<RelationshipRecord>>;
}

/// A relationship row as exported, referencing characters by id.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RelationshipRow {
    pub id: i64,
    pub episode_id: i64,
    pub from_character_id: i64,
    pub to_character_id: i64,
    pub relation_type: String,
    pub closeness: f64,
    #[serde(default)]
    pub description: Option<String>,
}

#[derive(Deserialize)]
struct SnapshotFile {
    #[serde(default)]
    characters: Vec<CharacterRecord>,
    #[serde(default)]
    relationships: Vec<RelationshipRow>,
}

/// A relational export held in memory: `{ "characters": [...],
/// "relationships": [...] }`.
#[derive(Debug, Clone)]
pub struct RelationalSnapshot {
    characters: Vec<CharacterRecord>,
    by_id: HashMap<i64, usize>,
    relationships: Vec<RelationshipRow>,
}

impl RelationalSnapshot {
    pub fn new(
        mut characters: Vec<CharacterRecord>,
        mut relationships: Vec<RelationshipRow>,
    ) -> anyhow::Result<Self> {
        characters.sort_by_key(|c| c.id);
        relationships.sort_by_key(|r| r.id);

        let mut by_id = HashMap::with_capacity(characters.len());
        for (i, c) in characters.iter().enumerate() {
            if by_id.insert(c.id, i).is_some() {
                anyhow::bail!("duplicate character id {}", c.id);
            }
        }
        for r in &relationships {
            for id in [r.from_character_id, r.to_character_id] {
                if !by_id.contains_key(&id) {
                    anyhow::bail!("relationship {} references unknown character {id}", r.id);
                }
            }
        }
        Ok(Self {
            characters,
            by_id,
            relationships,
        })
    }

    pub fn from_json(raw: &str) -> anyhow::Result<Self> {
        let file: SnapshotFile = serde_json::from_str(raw).context("invalid snapshot JSON")?;
        Self::new(file.characters, file.relationships)
    }

    pub fn from_path(path: &Path) -> anyhow::Result<Self> {
        let raw = std::fs::read_to_string(path)
            .with_context(|| format!("failed to read snapshot {}", path.display()))?;
        Self::from_json(&raw).with_context(|| format!("invalid snapshot {}", path.display()))
    }

    fn character(&self, id: i64) -> anyhow::Result<&CharacterRecord> {
        self.by_id
            .get(&id)
            .map(|&i| &self.characters[i])
            .ok_or_else(|| anyhow::anyhow!("unknown character {id}"))
    }
}

impl RelationalSource for RelationalSnapshot {
    fn characters(
        &self,
        project_id: Option<i64>,
        after_id: Option<i64>,
        limit: usize,
    ) -> anyhow::Result<Vec<CharacterRecord>> {
        Ok(self
            .characters
            .iter()
            .filter(|c| after_id.is_none_or(|after| c.id > after))
            .filter(|c| project_id.is_none_or(|p| c.project_id == p))
            .take(limit)
            .cloned()
            .collect())
    }

    fn relationships(
        &self,
        project_id: Option<i64>,
        after_id: Option<i64>,
        limit: usize,
    ) -> anyhow::Result<Vec<RelationshipRecord>> {
        let mut page = Vec::new();
        for row in &self.relationships {
            if page.len() == limit {
                break;
            }
            if after_id.is_some_and(|after| row.id <= after) {
                continue;
            }
            let from = self.character(row.from_character_id)?;
            if project_id.is_some_and(|p| from.project_id != p) {
                continue;
            }
            page.push(RelationshipRecord {
                id: row.id,
                episode_id: row.episode_id,
                from: from.clone(),
                to: self.character(row.to_character_id)?.clone(),
                relation_type: row.relation_type.clone(),
                closeness: row.closeness,
                description: row.description.clone(),
            });
        }
        Ok(page)
    }
}

/// Which rows a run covers.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MigrationScope {
    All,
    Project(i64),
}

impl MigrationScope {
    fn project_id(&self) -> Option<i64> {
        match self {
            MigrationScope::All => None,
            MigrationScope::Project(id) => Some(*id),
        }
    }
}

impl std::fmt::Display for MigrationScope {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            MigrationScope::All => f.write_str("all"),
            MigrationScope::Project(id) => write!(f, "project:{id}"),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MigrationPhase {
    Characters,
    Relationships,
}

/// Progress of an interrupted run.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MigrationCheckpoint {
    /// [`MigrationScope`] the run was started with, e.g. `project:3`.
    pub scope: String,
    pub phase: MigrationPhase,
    /// Last id fully processed in `phase`. `None` when the phase has not
    /// started.
    pub last_id: Option<i64>,
    pub updated_at: DateTime<Utc>,
}

/// A JSON checkpoint file, replaced atomically on every save.
#[derive(Debug, Clone)]
pub struct CheckpointFile {
    path: PathBuf,
}

impl CheckpointFile {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// The saved checkpoint for `scope`. A checkpoint written for another
    /// scope is ignored.
    pub fn load(&self, scope: MigrationScope) -> anyhow::Result<Option<MigrationCheckpoint>> {
        if !self.path.exists() {
            return Ok(None);
        }
        let raw = std::fs::read_to_string(&self.path)
            .with_context(|| format!("failed to read checkpoint {}", self.path.display()))?;
        let checkpoint: MigrationCheckpoint = serde_json::from_str(&raw)
            .with_context(|| format!("invalid checkpoint {}", self.path.display()))?;
        if checkpoint.scope != scope.to_string() {
            info!(
                found = %checkpoint.scope,
                requested = %scope,
                "ignoring checkpoint for a different scope"
            );
            return Ok(None);
        }
        Ok(Some(checkpoint))
    }

    pub fn save(&self, checkpoint: &MigrationCheckpoint) -> anyhow::Result<()> {
        let mut tmp = self.path.clone().into_os_string();
        tmp.push(".tmp");
        let tmp = PathBuf::from(tmp);
        let body = serde_json::to_vec_pretty(checkpoint)?;
        std::fs::write(&tmp, body)
            .with_context(|| format!("failed to write checkpoint {}", tmp.display()))?;
        std::fs::rename(&tmp, &self.path)
            .with_context(|| format!("failed to replace checkpoint {}", self.path.display()))?;
        Ok(())
    }

    pub fn clear(&self) -> anyhow::Result<()> {
        match std::fs::remove_file(&self.path) {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
            Err(e) => Err(e)
                .with_context(|| format!("failed to remove checkpoint {}", self.path.display())),
        }
    }
}

/// Counts for one run.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct MigrationReport {
    pub scope: String,
    pub nodes_synced: usize,
    pub nodes_ignored: usize,
    pub edges_synced: usize,
    pub edges_failed: usize,
    pub vectors_indexed: usize,
    pub vectors_failed: usize,
    /// Whether the run continued from a checkpoint.
    pub resumed: bool,
}

pub struct BulkMigration<S> {
    source: S,
    sync: SyncService,
    retrieval: Option<Arc<HybridRetrievalService>>,
    batch_size: usize,
    checkpoint: Option<CheckpointFile>,
}

impl<S: RelationalSource> BulkMigration<S> {
    pub fn new(source: S, sync: SyncService) -> Self {
        Self {
            source,
            sync,
            retrieval: None,
            batch_size: 500,
            checkpoint: None,
        }
    }

    pub fn with_batch_size(mut self, batch_size: usize) -> Self {
        self.batch_size = batch_size.max(1);
        self
    }

    /// Also index each character's text while its node is synced.
    pub fn with_retrieval(mut self, retrieval: Arc<HybridRetrievalService>) -> Self {
        self.retrieval = Some(retrieval);
        self
    }

    pub fn with_checkpoint(mut self, checkpoint: CheckpointFile) -> Self {
        self.checkpoint = Some(checkpoint);
        self
    }

    pub fn migrate_all(&self) -> anyhow::Result<MigrationReport> {
        self.run(MigrationScope::All)
    }

    pub fn migrate_project(&self, project_id: i64) -> anyhow::Result<MigrationReport> {
        self.run(MigrationScope::Project(project_id))
    }

    fn run(&self, scope: MigrationScope) -> anyhow::Result<MigrationReport> {
        let resume = match &self.checkpoint {
            Some(file) => file.load(scope)?,
            None => None,
        };
        let mut report = MigrationReport {
            scope: scope.to_string(),
            resumed: resume.is_some(),
            ..MigrationReport::default()
        };
        let (skip_characters, mut after_character, mut after_relationship) = match &resume {
            None => (false, None, None),
            Some(cp) if cp.phase == MigrationPhase::Characters => (false, cp.last_id, None),
            Some(cp) => (true, None, cp.last_id),
        };
        info!(%scope, resumed = report.resumed, batch_size = self.batch_size, "migration started");

        let project_id = scope.project_id();
        if !skip_characters {
            loop {
                let page = self
                    .source
                    .characters(project_id, after_character, self.batch_size)
                    .context("failed to read characters")?;
                for character in &page {
                    self.migrate_character(character, &mut report);
                }
                let Some(last) = page.last() else { break };
                after_character = Some(last.id);
                self.save(scope, MigrationPhase::Characters, after_character)?;
                debug!(last_id = last.id, synced = report.nodes_synced, "character page done");
                if page.len() < self.batch_size {
                    break;
                }
            }
            self.save(scope, MigrationPhase::Relationships, None)?;
        }

        loop {
            let page = self
                .source
                .relationships(project_id, after_relationship, self.batch_size)
                .context("failed to read relationships")?;
            for relationship in &page {
                match self.sync.sync_edge(relationship) {
                    Ok(SyncOutcome::Applied(_)) => report.edges_synced += 1,
                    Ok(SyncOutcome::Ignored(_)) | Err(_) => report.edges_failed += 1,
                }
            }
            let Some(last) = page.last() else { break };
            after_relationship = Some(last.id);
            self.save(scope, MigrationPhase::Relationships, after_relationship)?;
            debug!(last_id = last.id, synced = report.edges_synced, "relationship page done");
            if page.len() < self.batch_size {
                break;
            }
        }

        if let Some(file) = &self.checkpoint {
            file.clear()?;
        }
        info!(
            %scope,
            nodes_synced = report.nodes_synced,
            nodes_ignored = report.nodes_ignored,
            edges_synced = report.edges_synced,
            edges_failed = report.edges_failed,
            vectors_indexed = report.vectors_indexed,
            vectors_failed = report.vectors_failed,
            "migration finished"
        );
        Ok(report)
    }

    /// Sync one character node and, when attached, index its text. The two
    /// writes are independent and run concurrently.
    fn migrate_character(&self, character: &CharacterRecord, report: &mut MigrationReport) {
        let (node, vector) = match &self.retrieval {
            Some(retrieval) => std::thread::scope(|s| {
                let vector = s.spawn(|| {
                    retrieval.upsert(
                        SourceType::Character,
                        character.id,
                        &character.embedding_text(),
                        Some(json!({ "project_id": character.project_id })),
                    )
                });
                let node = self.sync.sync_character(character);
                (node, Some(vector.join()))
            }),
            None => (self.sync.sync_character(character), None),
        };

        match node {
            SyncOutcome::Applied(_) => report.nodes_synced += 1,
            SyncOutcome::Ignored(_) => report.nodes_ignored += 1,
        }
        match vector {
            None => {}
            Some(Ok(Ok(_))) => report.vectors_indexed += 1,
            Some(Ok(Err(e))) => {
                warn!(character_id = character.id, error = %e, "vector indexing failed");
                report.vectors_failed += 1;
            }
            Some(Err(_)) => {
                warn!(character_id = character.id, "vector indexing panicked");
                report.vectors_failed += 1;
            }
        }
    }

    fn save(
        &self,
        scope: MigrationScope,
        phase: MigrationPhase,
        last_id: Option<i64>,
    ) -> anyhow::Result<()> {
        let Some(file) = &self.checkpoint else {
            return Ok(());
        };
        file.save(&MigrationCheckpoint {
            scope: scope.to_string(),
            phase,
            last_id,
            updated_at: Utc::now(),
        })
    }
}
