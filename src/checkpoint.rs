//! # Walk Checkpoints
//!
//! Durable record of how far a walk got through its input, plus a marker file
//! written when a pass reaches the end of the input.
//!
//! ```text
//! # Next start line for Heuchera using species data /data/heuchera.csv
//! input: /data/heuchera.csv
//! 12
//! ```
//!
//! Writes go to a temporary file that is renamed over the checkpoint, so a
//! crash leaves either the previous or the new offset, never a torn file.

use std::fs;
use std::io::{ErrorKind, Write};
use std::path::{Path, PathBuf};
use thiserror::Error;
use tracing::debug;

const INPUT_PREFIX: &str = "input:";
const DONE_SUFFIX: &str = "done";

#[derive(Debug, Error)]
pub enum CheckpointError {
    #[error("Checkpoint I/O error on {path}: {source}")]
    Io {
        path: String,
        #[source]
        source: std::io::Error,
    },
    #[error("Corrupt checkpoint {path}: {reason}")]
    Corrupt { path: String, reason: String },
}

impl CheckpointError {
    fn io(path: &Path, source: std::io::Error) -> Self {
        Self::Io {
            path: path.display().to_string(),
            source,
        }
    }
}

/// Position reached in one input
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WalkCheckpoint {
    pub input_id: String,
    /// Data records fully processed
    pub offset: u64,
}

impl WalkCheckpoint {
    pub fn new<S: Into<String>>(input_id: S, offset: u64) -> Self {
        Self {
            input_id: input_id.into(),
            offset,
        }
    }
}

/// File-backed checkpoint for one named walk
#[derive(Debug, Clone)]
pub struct CheckpointStore {
    path: PathBuf,
    walk_name: String,
}

impl CheckpointStore {
    pub fn new<P: Into<PathBuf>, S: Into<String>>(path: P, walk_name: S) -> Self {
        Self {
            path: path.into(),
            walk_name: walk_name.into(),
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Stored checkpoint, or `None` when no walk has checkpointed yet
    pub fn load(&self) -> Result<Option<WalkCheckpoint>, CheckpointError> {
        let contents = match fs::read_to_string(&self.path) {
            Ok(contents) => contents,
            Err(e) if e.kind() == ErrorKind::NotFound => return Ok(None),
            Err(e) => return Err(CheckpointError::io(&self.path, e)),
        };

        let mut input_id = String::new();
        let mut offset = None;
        for line in contents.lines().map(str::trim) {
            if line.is_empty() || line.starts_with('#') {
                continue;
            }
            if let Some(id) = line.strip_prefix(INPUT_PREFIX) {
                input_id = id.trim().to_string();
                continue;
            }
            if offset.is_none() {
                offset = Some(line.parse::<u64>().map_err(|e| CheckpointError::Corrupt {
                    path: self.path.display().to_string(),
                    reason: format!("offset '{line}': {e}"),
                })?);
            }
        }

        let offset = offset.ok_or_else(|| CheckpointError::Corrupt {
            path: self.path.display().to_string(),
            reason: "no offset line".to_string(),
        })?;
        Ok(Some(WalkCheckpoint { input_id, offset }))
    }

    pub fn save(&self, checkpoint: &WalkCheckpoint) -> Result<(), CheckpointError> {
        if let Some(parent) = self.path.parent().filter(|p| !p.as_os_str().is_empty()) {
            fs::create_dir_all(parent).map_err(|e| CheckpointError::io(parent, e))?;
        }
        let tmp = self.sibling("tmp");
        let mut file = fs::File::create(&tmp).map_err(|e| CheckpointError::io(&tmp, e))?;
        write!(
            file,
            "# Next start line for {} using species data {}\n{} {}\n{}\n",
            self.walk_name, checkpoint.input_id, INPUT_PREFIX, checkpoint.input_id, checkpoint.offset
        )
        .and_then(|_| file.sync_all())
        .map_err(|e| CheckpointError::io(&tmp, e))?;
        fs::rename(&tmp, &self.path).map_err(|e| CheckpointError::io(&self.path, e))?;

        debug!(
            checkpoint = %self.path.display(),
            offset = checkpoint.offset,
            "Checkpoint saved"
        );
        Ok(())
    }

    pub fn done_marker_path(&self) -> PathBuf {
        self.sibling(DONE_SUFFIX)
    }

    /// Record that a pass reached the end of its input
    pub fn mark_done(&self) -> Result<(), CheckpointError> {
        let marker = self.done_marker_path();
        fs::write(&marker, format!("{}\n", chrono::Utc::now().to_rfc3339()))
            .map_err(|e| CheckpointError::io(&marker, e))
    }

    pub fn is_done(&self) -> bool {
        self.done_marker_path().is_file()
    }

    pub fn clear_done(&self) -> Result<(), CheckpointError> {
        let marker = self.done_marker_path();
        match fs::remove_file(&marker) {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == ErrorKind::NotFound => Ok(()),
            Err(e) => Err(CheckpointError::io(&marker, e)),
        }
    }

    /// `walk.ckpt` -> `walk.ckpt.<suffix>`
    fn sibling(&self, suffix: &str) -> PathBuf {
        let mut name = self.path.as_os_str().to_owned();
        name.push(".");
        name.push(suffix);
        PathBuf::from(name)
    }
}
