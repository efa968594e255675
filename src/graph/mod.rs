//! # Task Graphs
//!
//! Per-taxon dependency graphs handed to the execution engine. Nodes are
//! emitted in dependency order: every node's dependencies precede it.
//!
//! [`SpudAssembler`] collects the tasks for one taxon and lowers them into a
//! [`TaskGraph`], wiring dependencies by matching input and output locations.

pub mod assembler;

pub use assembler::{IntersectionTask, OccurrenceTask, ProjectionTask, SpudAssembler, SpudContext};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use thiserror::Error;
use uuid::Uuid;

#[derive(Debug, Error, PartialEq, Eq)]
pub enum AssemblyError {
    #[error("Intersection input {location} matches no projection output")]
    UnmatchedInput { location: String },
    #[error("Output location {0} is produced by more than one task")]
    DuplicateOutput(String),
}

/// Position of a node within its graph
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct NodeId(pub usize);

impl fmt::Display for NodeId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "n{}", self.0)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TaskKind {
    /// Clean raw points into a processed occurrence layer
    OccurrencePreparation,
    /// Build a model and project it onto one scenario
    Projection,
    /// Intersect a projection with a shapegrid into a presence/absence vector
    Intersection,
    /// Collect outputs and report final status to the catalog
    Stockpile,
    /// Index presence/absence vectors for search
    Index,
}

impl fmt::Display for TaskKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::OccurrencePreparation => write!(f, "occurrence_preparation"),
            Self::Projection => write!(f, "projection"),
            Self::Intersection => write!(f, "intersection"),
            Self::Stockpile => write!(f, "stockpile"),
            Self::Index => write!(f, "index"),
        }
    }
}

/// One executable unit of work
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TaskNode {
    pub id: NodeId,
    pub kind: TaskKind,
    pub name: String,
    pub depends_on: Vec<NodeId>,
    pub inputs: Vec<String>,
    pub outputs: Vec<String>,
    /// Everything else the executor needs (algorithm parameters, ids, thresholds)
    pub parameters: serde_json::Value,
}

/// Work for one taxon, submitted as a unit
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TaskGraph {
    pub graph_id: Uuid,
    pub squid: String,
    pub taxon_name: String,
    pub user_id: String,
    pub archive_name: String,
    pub priority: i32,
    pub created_at: DateTime<Utc>,
    pub nodes: Vec<TaskNode>,
}

impl TaskGraph {
    pub fn node_count(&self) -> usize {
        self.nodes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.nodes.is_empty()
    }

    pub fn nodes_of_kind(&self, kind: TaskKind) -> impl Iterator<Item = &TaskNode> {
        self.nodes.iter().filter(move |node| node.kind == kind)
    }

    pub fn count_of_kind(&self, kind: TaskKind) -> usize {
        self.nodes_of_kind(kind).count()
    }

    pub fn node(&self, id: NodeId) -> Option<&TaskNode> {
        self.nodes.get(id.0).filter(|node| node.id == id)
    }

    /// Whether every dependency points at an earlier node
    pub fn is_dependency_ordered(&self) -> bool {
        self.nodes.iter().enumerate().all(|(idx, node)| {
            node.id.0 == idx && node.depends_on.iter().all(|dep| dep.0 < idx)
        })
    }
}
