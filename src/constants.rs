//! # System Constants
//!
//! Status codes, well-known users and file naming conventions shared by the
//! catalog, the data sources and the task graph assembler.
//!
//! Status codes are stored as integers in the catalog and keep the numeric
//! ranges used by the downstream compute cluster: anything at or above
//! [`JobStatus::GENERAL_ERROR_CODE`] is a failure.

use serde::{Deserialize, Serialize};
use std::fmt;

/// Owner of shared, publicly readable catalog records
pub const PUBLIC_USER: &str = "public";

/// Extension for raw and processed point tables
pub const CSV_EXT: &str = ".csv";

/// Extension for JSON sidecars (column metadata, spooled graphs)
pub const JSON_EXT: &str = ".json";

/// Extension for projected rasters
pub const GTIFF_EXT: &str = ".tif";

/// Extension for processed occurrence layers
pub const SHAPEFILE_EXT: &str = ".shp";

/// Cluster failure code; never below [`JobStatus::GENERAL_ERROR_CODE`]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(from = "i32", into = "i32")]
pub struct ErrorCode(i32);

impl ErrorCode {
    /// Codes below the failure range are raised to the general error code
    pub fn new(code: i32) -> Self {
        Self(code.max(JobStatus::GENERAL_ERROR_CODE))
    }

    pub fn get(self) -> i32 {
        self.0
    }
}

impl From<i32> for ErrorCode {
    fn from(code: i32) -> Self {
        Self::new(code)
    }
}

impl From<ErrorCode> for i32 {
    fn from(code: ErrorCode) -> Self {
        code.0
    }
}

impl fmt::Display for ErrorCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Computation status of a catalogued entity
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum JobStatus {
    /// Created but never scheduled
    Uninitialized,
    /// Scheduled; waiting on the execution engine
    Initializing,
    /// Picked up by the execution engine
    Running,
    /// Outputs written
    Complete,
    /// Failed with a cluster error code (>= 1000)
    Error(ErrorCode),
}

impl JobStatus {
    pub const UNINITIALIZED_CODE: i32 = 0;
    pub const INITIALIZE_CODE: i32 = 1;
    pub const RUNNING_CODE: i32 = 120;
    pub const COMPLETE_CODE: i32 = 300;
    pub const GENERAL_ERROR_CODE: i32 = 1000;

    pub fn error(code: i32) -> Self {
        Self::Error(ErrorCode::new(code))
    }

    /// Numeric code persisted in the catalog
    pub fn code(&self) -> i32 {
        match self {
            Self::Uninitialized => Self::UNINITIALIZED_CODE,
            Self::Initializing => Self::INITIALIZE_CODE,
            Self::Running => Self::RUNNING_CODE,
            Self::Complete => Self::COMPLETE_CODE,
            Self::Error(code) => code.get(),
        }
    }

    /// Decode a persisted status code.
    ///
    /// Codes between the named states (pull/push sub-steps reported by the
    /// cluster) collapse onto the nearest preceding named state.
    pub fn from_code(code: i32) -> Self {
        match code {
            c if c >= Self::GENERAL_ERROR_CODE => Self::error(c),
            c if c >= Self::COMPLETE_CODE => Self::Complete,
            c if c >= Self::RUNNING_CODE => Self::Running,
            c if c >= Self::INITIALIZE_CODE => Self::Initializing,
            _ => Self::Uninitialized,
        }
    }

    /// Terminal failure state
    pub fn is_failed(&self) -> bool {
        matches!(self, Self::Error(_))
    }

    /// Below the "initialized" threshold
    pub fn is_incomplete(&self) -> bool {
        matches!(self, Self::Uninitialized)
    }

    /// Scheduled but not yet picked up
    pub fn is_waiting(&self) -> bool {
        matches!(self, Self::Initializing)
    }

    pub fn is_complete(&self) -> bool {
        matches!(self, Self::Complete)
    }
}

impl Default for JobStatus {
    fn default() -> Self {
        Self::Uninitialized
    }
}

impl fmt::Display for JobStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Uninitialized => write!(f, "uninitialized"),
            Self::Initializing => write!(f, "initializing"),
            Self::Running => write!(f, "running"),
            Self::Complete => write!(f, "complete"),
            Self::Error(code) => write!(f, "error({code})"),
        }
    }
}
