//! # Execution Engine Seam
//!
//! The walker hands each lowered [`TaskGraph`] to an [`ExecutionEngine`] and
//! records the returned [`SubmissionHandle`]. Running the graph is the engine's
//! business; the walker never waits on it.

pub mod spool;

pub use spool::SpoolDirectoryEngine;

use crate::graph::TaskGraph;
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::fmt;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum SubmissionError {
    #[error("Graph rejected by engine: {0}")]
    Rejected(String),
    #[error("Spool I/O error on {path}: {source}")]
    Io {
        path: String,
        #[source]
        source: std::io::Error,
    },
    #[error("Graph serialization failed: {0}")]
    Serialization(#[from] serde_json::Error),
}

/// Engine-assigned identifier of a submitted graph
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct SubmissionHandle(pub String);

impl fmt::Display for SubmissionHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Receives task graphs for execution
#[async_trait]
pub trait ExecutionEngine: Send + Sync {
    async fn submit(&self, graph: TaskGraph) -> Result<SubmissionHandle, SubmissionError>;

    fn engine_name(&self) -> &str;
}
