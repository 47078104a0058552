//! Snapshot store and graph providers.
//!
//! ```text
//! ┌──────────────────┐  load_graph   ┌──────────────┐  replace   ┌──────────────┐
//! │  GraphProvider   │ ────────────▶ │ GraphBuilder │ ─────────▶ │  GraphStore  │
//! │ (JSON, external) │               │  (validate)  │            │ Arc snapshot │
//! └──────────────────┘               └──────────────┘            └──────────────┘
//!                                                                       │ snapshot()
//!                                                                       ▼
//!                                                              planning (read-only)
//! ```
//!
//! Planners hold an `Arc<KnowledgeGraph>` for the duration of a request; a
//! reload builds a complete new graph and swaps the pointer, so in-flight
//! requests keep the snapshot they started with.

use std::path::{Path, PathBuf};
use std::sync::{Arc, RwLock};

use async_trait::async_trait;
use tracing::info;

use super::builder::GraphBuildError;
use super::types::GraphDocument;
use super::KnowledgeGraph;

/// Errors from loading a graph document.
#[derive(Debug, thiserror::Error)]
pub enum ProviderError {
    #[error("graph '{name}' not found at {path}")]
    NotFound { name: String, path: PathBuf },

    #[error("failed to read graph '{name}': {source}")]
    Io {
        name: String,
        #[source]
        source: std::io::Error,
    },

    #[error("failed to parse graph '{name}': {source}")]
    Parse {
        name: String,
        #[source]
        source: serde_json::Error,
    },

    #[error("invalid graph '{name}': {source}")]
    Build {
        name: String,
        #[source]
        source: GraphBuildError,
    },
}

pub type ProviderResult<T> = Result<T, ProviderError>;

/// Source of graph documents (a file store, a metadata service, ...).
///
/// The core only reads from providers; it never writes a graph back.
#[async_trait]
pub trait GraphProvider: Send + Sync {
    /// Load the named graph document.
    async fn load_graph(&self, name: &str) -> ProviderResult<GraphDocument>;
}

/// Reads `<dir>/<name>.json`.
#[derive(Debug, Clone)]
pub struct JsonGraphProvider {
    dir: PathBuf,
}

impl JsonGraphProvider {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self { dir: dir.into() }
    }

    pub fn path_for(&self, name: &str) -> PathBuf {
        self.dir.join(format!("{}.json", name))
    }

    /// Read a graph document from an explicit file path.
    pub async fn load_file(path: &Path) -> ProviderResult<GraphDocument> {
        let name = path
            .file_stem()
            .map(|s| s.to_string_lossy().into_owned())
            .unwrap_or_default();
        let bytes = tokio::fs::read(path).await.map_err(|e| {
            if e.kind() == std::io::ErrorKind::NotFound {
                ProviderError::NotFound {
                    name: name.clone(),
                    path: path.to_path_buf(),
                }
            } else {
                ProviderError::Io {
                    name: name.clone(),
                    source: e,
                }
            }
        })?;
        serde_json::from_slice(&bytes).map_err(|e| ProviderError::Parse { name, source: e })
    }
}

#[async_trait]
impl GraphProvider for JsonGraphProvider {
    async fn load_graph(&self, name: &str) -> ProviderResult<GraphDocument> {
        Self::load_file(&self.path_for(name)).await
    }
}

/// Holds the current graph and hands out immutable snapshots.
#[derive(Debug, Default)]
pub struct GraphStore {
    current: RwLock<Arc<KnowledgeGraph>>,
}

impl GraphStore {
    pub fn new(graph: KnowledgeGraph) -> Self {
        Self {
            current: RwLock::new(Arc::new(graph)),
        }
    }

    /// The current graph. Cheap: clones an `Arc`.
    pub fn snapshot(&self) -> Arc<KnowledgeGraph> {
        match self.current.read() {
            Ok(guard) => Arc::clone(&guard),
            Err(poisoned) => Arc::clone(&poisoned.into_inner()),
        }
    }

    /// Swap in a new graph. Existing snapshots are unaffected.
    pub fn replace(&self, graph: KnowledgeGraph) {
        let graph = Arc::new(graph);
        match self.current.write() {
            Ok(mut guard) => *guard = graph,
            Err(poisoned) => *poisoned.into_inner() = graph,
        }
    }

    /// Load, validate and swap in the named graph.
    pub async fn reload(&self, provider: &dyn GraphProvider, name: &str) -> ProviderResult<()> {
        let doc = provider.load_graph(name).await?;
        let graph = KnowledgeGraph::from_document(doc).map_err(|e| ProviderError::Build {
            name: name.into(),
            source: e,
        })?;
        info!(
            graph = name,
            tables = graph.table_count(),
            relationships = graph.relationship_count(),
            "loaded knowledge graph"
        );
        self.replace(graph);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::graph::fixtures::gpu_graph;

    #[test]
    fn test_snapshot_survives_replace() {
        let store = GraphStore::new(gpu_graph());
        let before = store.snapshot();
        store.replace(KnowledgeGraph::default());
        assert_eq!(before.table_count(), 4);
        assert_eq!(store.snapshot().table_count(), 0);
    }

    #[tokio::test]
    async fn test_json_provider_round_trip() {
        let dir = tempfile::tempdir().unwrap();
        let doc = gpu_graph().to_document();
        std::fs::write(
            dir.path().join("gpu.json"),
            serde_json::to_vec_pretty(&doc).unwrap(),
        )
        .unwrap();

        let provider = JsonGraphProvider::new(dir.path());
        let store = GraphStore::default();
        store.reload(&provider, "gpu").await.unwrap();
        assert_eq!(store.snapshot().table_count(), 4);
        assert_eq!(store.snapshot().relationship_count(), 3);
    }

    #[tokio::test]
    async fn test_json_provider_missing_file() {
        let dir = tempfile::tempdir().unwrap();
        let provider = JsonGraphProvider::new(dir.path());
        let err = provider.load_graph("nope").await.unwrap_err();
        assert!(matches!(err, ProviderError::NotFound { .. }));
    }

    #[tokio::test]
    async fn test_invalid_document_rejected_on_reload() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(
            dir.path().join("bad.json"),
            r#"{"tables":[{"name":"A","columns":[{"name":"id"}]}],
                "relationships":[{"source_table":"A","target_table":"B",
                                  "source_column":"id","target_column":"id"}]}"#,
        )
        .unwrap();
        let provider = JsonGraphProvider::new(dir.path());
        let store = GraphStore::new(gpu_graph());
        let err = store.reload(&provider, "bad").await.unwrap_err();
        assert!(matches!(err, ProviderError::Build { .. }));
        // the old graph stays in place
        assert_eq!(store.snapshot().table_count(), 4);
    }
}
