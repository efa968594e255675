//! # Walk Orchestration
//!
//! [`SpeciesWalker`] drives one archive walk: it resumes a data source from its
//! checkpoint, resolves each batch against the catalog, assembles and submits
//! the taxon's task graph, and checkpoints only after submission succeeded.
//!
//! ## State Machine
//!
//! ```text
//! Idle -> Resuming -> Walking -> Deciding -> Assembling -> Checkpointing -> Walking
//!                        |                                                   |
//!                        +--> Finished (input exhausted or stopped)          |
//!                        +--> Failed (configuration / persistence error) <---+
//! ```
//!
//! One taxon is processed completely before the next pull; there is no
//! internal parallelism. Independent walkers over disjoint inputs may share a
//! catalog because every catalog write is an idempotent find-or-insert.

pub mod species_walker;

pub use species_walker::{
    SpeciesWalker, SubmissionRecord, WalkAborted, WalkState, WalkStopHandle, WalkSummary,
};
