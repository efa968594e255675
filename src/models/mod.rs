//! # Catalog and Walk Data Model
//!
//! Entities persisted by the catalog ([`TaxonEntity`], [`OccurrenceEntity`]) and
//! the transient [`OccurrenceBatch`] handed from a data source to the walker.

pub mod batch;
pub mod occurrence;
pub mod taxon;

pub use batch::{BatchPayload, ColumnRoles, OccurrenceBatch, TaxonKey};
pub use occurrence::{NewOccurrence, OccurrenceEntity, OccurrenceStatusUpdate};
pub use taxon::{compute_squid, NewTaxon, TaxonEntity, TaxonIdentity};
