//! Error types for the walker.
//!
//! Every layer owns a focused `thiserror` enum; they all converge into
//! [`WalkerError`], whose [`ErrorClass`] decides whether the orchestrator absorbs
//! the failure at the taxon boundary or halts the walk.

use crate::catalog::CatalogError;
use crate::checkpoint::CheckpointError;
use crate::config::ConfigurationError;
use crate::execution::SubmissionError;
use crate::graph::AssemblyError;
use crate::source::SourceError;
use crate::taxonomy::TaxonomyError;
use serde::{Deserialize, Serialize};
use std::fmt;
use thiserror::Error;

/// How a failure propagates through the walk loop
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorClass {
    /// Name-resolution or catalog timeouts; the taxon is skipped
    TransientExternal,
    /// Missing input file or metadata; fatal before any checkpoint is read
    Configuration,
    /// Malformed input; skipped while the position advances
    Data,
    /// Catalog or durable storage unreachable; halts without advancing the checkpoint
    Persistence,
}

impl ErrorClass {
    /// Whether the walk may continue with the next taxon
    pub fn is_absorbed_per_taxon(&self) -> bool {
        matches!(self, Self::TransientExternal | Self::Data)
    }
}

impl fmt::Display for ErrorClass {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::TransientExternal => write!(f, "transient_external"),
            Self::Configuration => write!(f, "configuration"),
            Self::Data => write!(f, "data"),
            Self::Persistence => write!(f, "persistence"),
        }
    }
}

#[derive(Debug, Error)]
pub enum WalkerError {
    #[error("Configuration error: {0}")]
    Configuration(#[from] ConfigurationError),
    #[error("Catalog error: {0}")]
    Catalog(#[from] CatalogError),
    #[error("Taxonomy resolution error: {0}")]
    Taxonomy(#[from] TaxonomyError),
    #[error("Data source error: {0}")]
    Source(#[from] SourceError),
    #[error("Task graph assembly error: {0}")]
    Assembly(#[from] AssemblyError),
    #[error("Submission error: {0}")]
    Submission(#[from] SubmissionError),
    #[error("Checkpoint error: {0}")]
    Checkpoint(#[from] CheckpointError),
    #[error("Invalid data for taxon {group_key}: {reason}")]
    InvalidData { group_key: String, reason: String },
    #[error("Raw data write failed for {location}: {reason}")]
    RawDataWrite { location: String, reason: String },
}

impl WalkerError {
    /// Classify this error for the walk loop
    pub fn class(&self) -> ErrorClass {
        match self {
            Self::Configuration(_) => ErrorClass::Configuration,
            Self::Catalog(err) => err.class(),
            Self::Taxonomy(_) => ErrorClass::TransientExternal,
            Self::Source(err) => err.class(),
            Self::Assembly(_) | Self::InvalidData { .. } => ErrorClass::Data,
            Self::Submission(_) | Self::Checkpoint(_) | Self::RawDataWrite { .. } => {
                ErrorClass::Persistence
            }
        }
    }
}

pub type Result<T> = std::result::Result<T, WalkerError>;
