//! # Staleness Policy
//!
//! Decides whether a catalogued occurrence set must be (re)computed. The
//! expiration horizon is passed in by the caller; nothing here reads global state.

use crate::constants::JobStatus;
use chrono::{DateTime, Utc};

/// Whether an entity must be (re)computed.
///
/// - failed: always
/// - incomplete (never scheduled): always
/// - complete: only when its status time predates `expiration`
/// - waiting: only when there is no raw data to wait on
///
/// The output-existence flag is reported for logging by callers but never forces a
/// recompute: a complete entity inside the freshness horizon stays fresh.
pub fn should_recompute(
    status: JobStatus,
    status_mod_time: DateTime<Utc>,
    _output_exists: bool,
    raw_exists: bool,
    expiration: DateTime<Utc>,
) -> bool {
    if status.is_failed() || status.is_incomplete() {
        return true;
    }
    if status.is_complete() {
        return status_mod_time < expiration;
    }
    if status.is_waiting() {
        return !raw_exists;
    }
    false
}
