//! Filesystem layout for walk artifacts.
//!
//! ```text
//! <data_root>/<user>/<squid[..3]>/<occurrence_id>/raw_<id>.csv
//! <data_root>/<user>/<squid[..3]>/<occurrence_id>/raw_<id>.json
//! <data_root>/<user>/<squid[..3]>/<occurrence_id>/occ_<id>.shp
//! <data_root>/<user>/<squid[..3]>/<squid>/spud/...
//! ```

use crate::constants::{CSV_EXT, JSON_EXT, SHAPEFILE_EXT};
use std::path::{Path, PathBuf};

const SQUID_PREFIX_LEN: usize = 3;

#[derive(Debug, Clone)]
pub struct DataLocator {
    data_root: PathBuf,
}

impl DataLocator {
    pub fn new<P: Into<PathBuf>>(data_root: P) -> Self {
        Self {
            data_root: data_root.into(),
        }
    }

    pub fn data_root(&self) -> &Path {
        &self.data_root
    }

    fn squid_dir(&self, user_id: &str, squid: &str) -> PathBuf {
        let prefix: String = squid.chars().take(SQUID_PREFIX_LEN).collect();
        self.data_root.join(user_id).join(prefix)
    }

    pub fn occurrence_dir(&self, user_id: &str, squid: &str, occurrence_id: i64) -> PathBuf {
        self.squid_dir(user_id, squid)
            .join(occurrence_id.to_string())
    }

    pub fn raw_data_path(&self, user_id: &str, squid: &str, occurrence_id: i64) -> PathBuf {
        self.occurrence_dir(user_id, squid, occurrence_id)
            .join(format!("raw_{occurrence_id}{CSV_EXT}"))
    }

    /// Column-role sidecar written next to the raw data
    pub fn raw_metadata_path(&self, user_id: &str, squid: &str, occurrence_id: i64) -> PathBuf {
        self.occurrence_dir(user_id, squid, occurrence_id)
            .join(format!("raw_{occurrence_id}{JSON_EXT}"))
    }

    pub fn processed_path(&self, user_id: &str, squid: &str, occurrence_id: i64) -> PathBuf {
        self.occurrence_dir(user_id, squid, occurrence_id)
            .join(format!("occ_{occurrence_id}{SHAPEFILE_EXT}"))
    }

    /// Working directory for one taxon's task outputs
    pub fn spud_work_dir(&self, user_id: &str, squid: &str) -> PathBuf {
        self.squid_dir(user_id, squid).join(squid).join("spud")
    }
}
