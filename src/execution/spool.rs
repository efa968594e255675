//! Engine adapter that spools graphs as JSON files for an external scheduler.

use super::{ExecutionEngine, SubmissionError, SubmissionHandle};
use crate::constants::JSON_EXT;
use crate::graph::TaskGraph;
use async_trait::async_trait;
use std::path::{Path, PathBuf};
use tracing::{debug, info};

/// Writes each graph to `<spool_dir>/<squid>-<graph_id>.json`
#[derive(Debug, Clone)]
pub struct SpoolDirectoryEngine {
    spool_dir: PathBuf,
}

impl SpoolDirectoryEngine {
    pub fn new<P: Into<PathBuf>>(spool_dir: P) -> Self {
        Self {
            spool_dir: spool_dir.into(),
        }
    }

    pub fn spool_dir(&self) -> &Path {
        &self.spool_dir
    }

    fn io_error(path: &Path, source: std::io::Error) -> SubmissionError {
        SubmissionError::Io {
            path: path.display().to_string(),
            source,
        }
    }
}

#[async_trait]
impl ExecutionEngine for SpoolDirectoryEngine {
    async fn submit(&self, graph: TaskGraph) -> Result<SubmissionHandle, SubmissionError> {
        if graph.is_empty() {
            return Err(SubmissionError::Rejected(format!(
                "graph {} for {} has no nodes",
                graph.graph_id, graph.squid
            )));
        }

        tokio::fs::create_dir_all(&self.spool_dir)
            .await
            .map_err(|e| Self::io_error(&self.spool_dir, e))?;

        let handle = SubmissionHandle(graph.graph_id.to_string());
        let final_path = self
            .spool_dir
            .join(format!("{}-{}{}", graph.squid, handle, JSON_EXT));
        let tmp_path = final_path.with_extension("tmp");

        let body = serde_json::to_vec_pretty(&graph)?;
        tokio::fs::write(&tmp_path, &body)
            .await
            .map_err(|e| Self::io_error(&tmp_path, e))?;
        tokio::fs::rename(&tmp_path, &final_path)
            .await
            .map_err(|e| Self::io_error(&final_path, e))?;

        debug!(path = %final_path.display(), bytes = body.len(), "Spooled task graph");
        info!(
            handle = %handle,
            squid = %graph.squid,
            nodes = graph.node_count(),
            "📤 SUBMIT: task graph spooled"
        );
        Ok(handle)
    }

    fn engine_name(&self) -> &str {
        "spool_directory"
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::graph::{NodeId, TaskKind, TaskNode};
    use chrono::Utc;
    use uuid::Uuid;

    fn graph(nodes: Vec<TaskNode>) -> TaskGraph {
        TaskGraph {
            graph_id: Uuid::new_v4(),
            squid: "abc123".into(),
            taxon_name: "Puma concolor".into(),
            user_id: "kubi".into(),
            archive_name: "cats".into(),
            priority: 0,
            created_at: Utc::now(),
            nodes,
        }
    }

    #[tokio::test]
    async fn test_spooled_graph_round_trips() {
        let dir = tempfile::tempdir().unwrap();
        let engine = SpoolDirectoryEngine::new(dir.path().join("spool"));
        let submitted = graph(vec![TaskNode {
            id: NodeId(0),
            kind: TaskKind::OccurrencePreparation,
            name: "occurrence-1".into(),
            depends_on: vec![],
            inputs: vec!["/raw_1.csv".into()],
            outputs: vec!["/occ_1.shp".into()],
            parameters: serde_json::json!({ "occurrence_id": 1 }),
        }]);

        let handle = engine.submit(submitted.clone()).await.unwrap();
        assert_eq!(handle.0, submitted.graph_id.to_string());

        let path = dir
            .path()
            .join("spool")
            .join(format!("abc123-{handle}.json"));
        let stored: TaskGraph =
            serde_json::from_slice(&std::fs::read(path).unwrap()).unwrap();
        assert_eq!(stored, submitted);
    }

    #[tokio::test]
    async fn test_empty_graph_is_rejected() {
        let dir = tempfile::tempdir().unwrap();
        let engine = SpoolDirectoryEngine::new(dir.path());
        let err = engine.submit(graph(vec![])).await.unwrap_err();
        assert!(matches!(err, SubmissionError::Rejected(_)));
    }
}
