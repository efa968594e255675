#![allow(clippy::doc_markdown)] // Allow technical terms like PostgreSQL, SQLx in docs
#![allow(clippy::missing_errors_doc)] // Allow public functions without # Errors sections
#![allow(clippy::must_use_candidate)] // Allow methods without must_use when context is clear

//! # BOOM Walker
//!
//! Resumable species-occurrence walker for a biodiversity modeling archive.
//!
//! ## Overview
//!
//! A walk reads a species input one taxon at a time, reconciles each taxon and
//! its occurrence set against a persistent catalog, decides whether dependent
//! computations are stale, and submits a per-taxon task graph (occurrence
//! processing, model projections, grid intersections) to an execution engine.
//! Progress is checkpointed after every taxon so an interrupted walk resumes
//! without repeating or skipping work.
//!
//! ## Module Organization
//!
//! - [`source`] - Species inputs: grouped user tables, per-taxon file sets, existing ids
//! - [`catalog`] - Taxon and occurrence-set persistence (PostgreSQL and in-memory)
//! - [`taxonomy`] - Name-resolution seam
//! - [`staleness`] - The recompute decision
//! - [`graph`] - Per-taxon task assembly and lowering
//! - [`execution`] - Engine seam and the spool-directory engine
//! - [`checkpoint`] - Durable walk position
//! - [`orchestration`] - The walk state machine
//! - [`config`] - Layered TOML + environment configuration
//! - [`error`] - Structured error handling
//!
//! ## Quick Start
//!
//! ```rust,no_run
//! use boom_walker::catalog::InMemoryCatalog;
//! use boom_walker::config::ConfigManager;
//! use boom_walker::execution::SpoolDirectoryEngine;
//! use boom_walker::orchestration::SpeciesWalker;
//! use std::path::Path;
//! use std::sync::Arc;
//!
//! # async fn example() -> Result<(), Box<dyn std::error::Error>> {
//! let manager = ConfigManager::load_from_file(Path::new("config/walker.toml"), None)?;
//! let config = manager.config().clone();
//! let engine = Arc::new(SpoolDirectoryEngine::new(&config.storage.spool_dir));
//! let descriptor = config.datasource.clone();
//!
//! let mut walker =
//!     SpeciesWalker::new(config, Arc::new(InMemoryCatalog::new()), None, engine).await?;
//! let summary = walker.start_walk(&descriptor).await?;
//! println!("submitted {} graphs", summary.graphs_submitted);
//! # Ok(())
//! # }
//! ```

pub mod catalog;
pub mod checkpoint;
pub mod config;
pub mod constants;
pub mod error;
pub mod execution;
pub mod graph;
pub mod locator;
pub mod logging;
pub mod models;
pub mod orchestration;
pub mod source;
pub mod staleness;
pub mod taxonomy;

pub use catalog::{Catalog, CatalogError, CatalogResolver, InMemoryCatalog, PgCatalog};
pub use checkpoint::{CheckpointStore, WalkCheckpoint};
pub use config::{ConfigManager, ConfigurationError, SourceDescriptor, WalkerConfig};
pub use constants::JobStatus;
pub use error::{ErrorClass, Result, WalkerError};
pub use execution::{ExecutionEngine, SpoolDirectoryEngine, SubmissionError, SubmissionHandle};
pub use graph::{SpudAssembler, TaskGraph, TaskKind};
pub use models::{OccurrenceBatch, OccurrenceEntity, TaxonEntity, TaxonKey};
pub use orchestration::{SpeciesWalker, WalkAborted, WalkState, WalkStopHandle, WalkSummary};
pub use source::{OccurrenceSource, SpeciesSource};
pub use staleness::should_recompute;
pub use taxonomy::{StaticTaxonomyResolver, TaxonomyResolver};
