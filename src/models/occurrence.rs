use crate::constants::JobStatus;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// OccurrenceEntity is one species' materialized occurrence set for one user
/// Maps to `boom_occurrence_sets` table
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct OccurrenceEntity {
    pub occurrence_id: i64,
    pub display_name: String,
    pub user_id: String,
    /// Owning taxon (back-reference)
    pub taxon_id: i64,
    pub squid: String,
    pub record_count: i64,
    pub status: JobStatus,
    /// Never moves backwards across updates
    pub status_mod_time: DateTime<Utc>,
    pub raw_dlocation: Option<String>,
    pub dlocation: Option<String>,
}

impl OccurrenceEntity {
    pub fn is_owned_by(&self, user_id: &str) -> bool {
        self.user_id == user_id
    }
}

/// New OccurrenceEntity for find-or-insert
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NewOccurrence {
    pub display_name: String,
    pub user_id: String,
    pub taxon_id: i64,
    pub squid: String,
    pub record_count: i64,
    pub status: JobStatus,
    pub status_mod_time: DateTime<Utc>,
}

/// Status change request for an occurrence set
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OccurrenceStatusUpdate {
    pub occurrence_id: i64,
    pub status: JobStatus,
    pub mod_time: DateTime<Utc>,
    pub record_count: Option<i64>,
}
