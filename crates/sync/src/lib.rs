//! Services that keep Castgraph's stores in step with the relational store
//! and answer queries over them.
//!
//! The relational store stays authoritative. Writes reach the mirror through
//! [`MirrorHooks`] (called after the relational commit) or through
//! [`BulkMigration`] (operator-triggered recovery). Sync failures are reported
//! as [`SyncOutcome::Ignored`] and logged; they never fail the relational
//! write that triggered them. Reads go through [`GraphQueryService`] and
//! [`HybridRetrievalService`], which reject malformed input loudly.
//!
//! # Usage
//!
//! ```rust,no_run
//! use std::sync::Arc;
//! use castgraph::GraphMirror;
//! use castgraph_sync::{CharacterRecord, GraphQueryService, SyncService};
//!
//! let mirror = Arc::new(GraphMirror::open("story.castgraph").unwrap());
//! let sync = SyncService::new(mirror.clone());
//! let _ = sync.sync_character(&CharacterRecord::new(1, 10, "Ava"));
//!
//! let queries = GraphQueryService::new(mirror);
//! let friends = queries.find_n_degree_friends(10, 1, 2).unwrap();
//! ```

mod concept;
mod config;
mod embedding;
mod error;
mod hooks;
mod migration;
mod query;
mod records;
mod retrieval;
mod sync;
#[cfg(test)]
mod testing;

pub use concept::ConceptSyncService;
pub use config::{
    CastgraphConfig, EmbeddingConfig, MigrationConfig, RetrievalConfig, StorageConfig,
};
pub use embedding::{
    fallback_embedding, Embedding, EmbeddingAdapter, EmbeddingProvider, EmbeddingSource,
    FallbackReason, OpenAiEmbeddingProvider,
};
pub use error::{QueryError, RetrievalError, SyncError};
pub use hooks::{LifecycleHook, MirrorHooks};
pub use migration::{
    BulkMigration, CheckpointFile, MigrationCheckpoint, MigrationPhase, MigrationReport,
    MigrationScope, RelationalSnapshot, RelationalSource, RelationshipRow,
};
pub use query::{GraphQueryService, MAX_DEPTH, MAX_RANK_LIMIT};
pub use records::{CharacterRecord, ConceptRecord, RelationshipRecord};
pub use retrieval::HybridRetrievalService;
pub use sync::{SyncOutcome, SyncService, SyncWarning};
