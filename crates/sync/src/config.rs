//! Runtime configuration.
//!
//! Loaded from a TOML file; every section and field has a default, so a
//! missing file or a partial one is fine. A few environment variables
//! override the file for deployment.

use anyhow::Context;
use castgraph::HybridParams;
use secrecy::Secret;
use serde::Deserialize;
use std::path::{Path, PathBuf};
use tracing::debug;

pub const ENV_GRAPH_PATH: &str = "CASTGRAPH_GRAPH_PATH";
pub const ENV_VECTOR_PATH: &str = "CASTGRAPH_VECTOR_PATH";
pub const ENV_EMBEDDING_API_KEY: &str = "CASTGRAPH_EMBEDDING_API_KEY";

#[derive(Debug, Default, Deserialize)]
#[serde(default)]
pub struct CastgraphConfig {
    pub storage: StorageConfig,
    pub embedding: EmbeddingConfig,
    pub hybrid: HybridParams,
    pub retrieval: RetrievalConfig,
    pub migration: MigrationConfig,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct StorageConfig {
    pub graph_path: PathBuf,
    pub vector_path: PathBuf,
}

impl Default for StorageConfig {
    fn default() -> Self {
        Self {
            graph_path: PathBuf::from("castgraph.graph.redb"),
            vector_path: PathBuf::from("castgraph.vectors.redb"),
        }
    }
}

#[derive(Debug, Deserialize)]
#[serde(default)]
pub struct EmbeddingConfig {
    pub base_url: String,
    pub model: String,
    /// Must match the dimension the vector store was first written with.
    pub dimensions: usize,
    pub timeout_secs: u64,
    pub api_key: Option<Secret<String>>,
}

impl Default for EmbeddingConfig {
    fn default() -> Self {
        Self {
            base_url: "https://api.openai.com".to_string(),
            model: "text-embedding-3-small".to_string(),
            dimensions: 1536,
            timeout_secs: 30,
            api_key: None,
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct RetrievalConfig {
    /// Upper bound applied to every search limit.
    pub max_limit: usize,
}

impl Default for RetrievalConfig {
    fn default() -> Self {
        Self { max_limit: 100 }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct MigrationConfig {
    pub batch_size: usize,
    /// Where resumable progress is stored. No checkpointing when unset.
    pub checkpoint_path: Option<PathBuf>,
}

impl Default for MigrationConfig {
    fn default() -> Self {
        Self {
            batch_size: 500,
            checkpoint_path: None,
        }
    }
}

impl CastgraphConfig {
    /// Load config from a TOML file, then apply environment overrides.
    /// A path that does not exist yields the defaults.
    pub fn load(path: &Path) -> anyhow::Result<Self> {
        let mut config = if path.exists() {
            let raw = std::fs::read_to_string(path)
                .with_context(|| format!("failed to read {}", path.display()))?;
            debug!(path = %path.display(), "loading config");
            Self::from_toml(&raw).with_context(|| format!("invalid config {}", path.display()))?
        } else {
            debug!(path = %path.display(), "config file not found; using defaults");
            Self::default()
        };
        config.apply_env(|key| std::env::var(key).ok());
        config.validate()?;
        Ok(config)
    }

    pub fn from_toml(raw: &str) -> anyhow::Result<Self> {
        Ok(toml::from_str(raw)?)
    }

    /// Apply overrides from `lookup`, normally `std::env::var`.
    pub fn apply_env(&mut self, lookup: impl Fn(&str) -> Option<String>) {
        let set = |key: &str| lookup(key).filter(|v| !v.trim().is_empty());
        if let Some(path) = set(ENV_GRAPH_PATH) {
            self.storage.graph_path = PathBuf::from(path);
        }
        if let Some(path) = set(ENV_VECTOR_PATH) {
            self.storage.vector_path = PathBuf::from(path);
        }
        if let Some(key) = set(ENV_EMBEDDING_API_KEY) {
            self.embedding.api_key = Some(Secret::new(key));
        }
    }

    pub fn validate(&self) -> anyhow::Result<()> {
        if self.embedding.dimensions == 0 {
            anyhow::bail!("embedding.dimensions must be > 0");
        }
        if self.retrieval.max_limit == 0 {
            anyhow::bail!("retrieval.max_limit must be > 0");
        }
        if self.migration.batch_size == 0 {
            anyhow::bail!("migration.batch_size must be > 0");
        }
        self.hybrid
            .validate()
            .map_err(|e| anyhow::anyhow!("hybrid: {e}"))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use secrecy::ExposeSecret;
    use std::collections::HashMap;

    #[test]
    fn empty_toml_gives_defaults() {
        let config = CastgraphConfig::from_toml("").unwrap();
        assert_eq!(config.embedding.dimensions, 1536);
        assert_eq!(config.embedding.timeout_secs, 30);
        assert_eq!(config.retrieval.max_limit, 100);
        assert_eq!(config.migration.batch_size, 500);
        assert_eq!(config.hybrid, HybridParams::default());
        assert!(config.embedding.api_key.is_none());
    }

    #[test]
    fn partial_sections_keep_other_defaults() {
        let config = CastgraphConfig::from_toml(
            r#"
            [storage]
            graph_path = "/data/graph.redb"

            [hybrid]
            vector_weight = 0.5

            [migration]
            batch_size = 50
            checkpoint_path = "/data/migrate.json"
            "#,
        )
        .unwrap();
        assert_eq!(config.storage.graph_path, PathBuf::from("/data/graph.redb"));
        assert_eq!(
            config.storage.vector_path,
            PathBuf::from("castgraph.vectors.redb")
        );
        assert_eq!(config.hybrid.vector_weight, 0.5);
        assert_eq!(config.hybrid.keyword_weight, 0.3);
        assert_eq!(config.migration.batch_size, 50);
        assert!(config.migration.checkpoint_path.is_some());
    }

    #[test]
    fn env_overrides_file() {
        let mut config = CastgraphConfig::from_toml(
            r#"
            [storage]
            graph_path = "from-file.redb"
            "#,
        )
        .unwrap();
        let env: HashMap<&str, &str> = [
            (ENV_GRAPH_PATH, "from-env.redb"),
            (ENV_EMBEDDING_API_KEY, "sk-env"),
            (ENV_VECTOR_PATH, "  "),
        ]
        .into_iter()
        .collect();
        config.apply_env(|k| env.get(k).map(|v| v.to_string()));

        assert_eq!(config.storage.graph_path, PathBuf::from("from-env.redb"));
        assert_eq!(
            config.storage.vector_path,
            PathBuf::from("castgraph.vectors.redb")
        );
        assert_eq!(
            config.embedding.api_key.as_ref().unwrap().expose_secret(),
            "sk-env"
        );
    }

    #[test]
    fn validation_rejects_zero_sizes() {
        let mut config = CastgraphConfig::default();
        assert!(config.validate().is_ok());
        config.migration.batch_size = 0;
        assert!(config.validate().is_err());
    }

    #[test]
    fn missing_file_yields_defaults() {
        let dir = tempfile::tempdir().unwrap();
        let config = CastgraphConfig::load(&dir.path().join("absent.toml")).unwrap();
        assert_eq!(config.retrieval.max_limit, 100);
    }
}
