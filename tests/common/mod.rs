//! Shared fixtures for walker integration tests.
#![allow(dead_code)]

use async_trait::async_trait;
use boom_walker::config::{
    AlgorithmConfig, ArchiveConfig, ColumnNames, DatabaseConfig, IntersectConfig, SdmConfig,
    SourceDescriptor, StorageConfig, TaxonomyConfig, WalkConfig, WalkerConfig,
};
use boom_walker::execution::{ExecutionEngine, SubmissionError, SubmissionHandle};
use boom_walker::graph::TaskGraph;
use boom_walker::orchestration::WalkStopHandle;
use boom_walker::taxonomy::{TaxonomyError, TaxonomyRecord, TaxonomyResolver};
use chrono::{Duration, Utc};
use parking_lot::Mutex;
use std::collections::BTreeMap;
use std::fmt::Write as _;
use std::path::{Path, PathBuf};

pub const USER: &str = "kubi";

/// Engine that keeps every submitted graph in memory
#[derive(Debug, Default)]
pub struct RecordingEngine {
    graphs: Mutex<Vec<TaskGraph>>,
    stop_on_submit: Mutex<Option<WalkStopHandle>>,
}

impl RecordingEngine {
    pub fn new() -> Self {
        Self::default()
    }

    /// Request a stop as soon as the next graph arrives
    pub fn stop_walk_on_submit(&self, handle: WalkStopHandle) {
        *self.stop_on_submit.lock() = Some(handle);
    }

    /// Stop requesting stops on submit
    pub fn keep_walking(&self) {
        *self.stop_on_submit.lock() = None;
    }

    pub fn graphs(&self) -> Vec<TaskGraph> {
        self.graphs.lock().clone()
    }

    pub fn taxon_names(&self) -> Vec<String> {
        self.graphs
            .lock()
            .iter()
            .map(|g| g.taxon_name.clone())
            .collect()
    }
}

#[async_trait]
impl ExecutionEngine for RecordingEngine {
    async fn submit(&self, graph: TaskGraph) -> Result<SubmissionHandle, SubmissionError> {
        let handle = SubmissionHandle(format!("mem-{}", graph.graph_id));
        self.graphs.lock().push(graph);
        if let Some(stop) = self.stop_on_submit.lock().as_ref() {
            stop.stop();
        }
        Ok(handle)
    }

    fn engine_name(&self) -> &str {
        "recording"
    }
}

/// Engine whose queue is always full
#[derive(Debug, Default)]
pub struct RejectingEngine;

#[async_trait]
impl ExecutionEngine for RejectingEngine {
    async fn submit(&self, _graph: TaskGraph) -> Result<SubmissionHandle, SubmissionError> {
        Err(SubmissionError::Rejected("queue full".to_string()))
    }

    fn engine_name(&self) -> &str {
        "rejecting"
    }
}

/// Authority that is never reachable
#[derive(Debug, Default)]
pub struct UnreachableTaxonomy;

#[async_trait]
impl TaxonomyResolver for UnreachableTaxonomy {
    async fn resolve(
        &self,
        _key: &str,
        _kingdom: Option<&str>,
    ) -> Result<Option<TaxonomyRecord>, TaxonomyError> {
        Err(TaxonomyError::Unavailable("connection timed out".to_string()))
    }

    fn source_name(&self) -> &str {
        "GBIF Backbone Taxonomy"
    }
}

/// Write a grouped occurrence table; each taxon gets `count` contiguous rows
pub fn write_table(dir: &Path, name: &str, taxa: &[(&str, usize)]) -> PathBuf {
    let path = dir.join(name);
    let mut body = String::from("species,latitude,longitude,gbifid\n");
    let mut id = 0;
    for (taxon, count) in taxa {
        for i in 0..*count {
            id += 1;
            let _ = writeln!(body, "{taxon},{}.5,-{}.25,{id}", 10 + i, 100 + i);
        }
    }
    std::fs::write(&path, body).expect("write table");
    path
}

/// Write one CSV per taxon under `dir`
pub fn write_taxon_files(dir: &Path, taxa: &[(&str, usize)]) {
    std::fs::create_dir_all(dir).expect("create taxon dir");
    for (file_stem, count) in taxa {
        let mut body = String::from("longitude,latitude\n");
        for i in 0..*count {
            let _ = writeln!(body, "-{}.5,{}.25", 80 + i, 30 + i);
        }
        std::fs::write(dir.join(format!("{file_stem}.csv")), body).expect("write taxon file");
    }
}

pub fn table_descriptor(path: &Path, group_key_is_source_key: bool) -> SourceDescriptor {
    SourceDescriptor::UserTable {
        path: path.to_path_buf(),
        delimiter: ",".to_string(),
        columns: ColumnNames {
            group_by: "species".to_string(),
            latitude: "latitude".to_string(),
            longitude: "longitude".to_string(),
            unique_id: Some("gbifid".to_string()),
            taxon_name: None,
        },
        group_key_is_source_key,
    }
}

/// Config for a walk rooted in `workspace` with one algorithm, one extra
/// projection scenario and intersection enabled
pub fn walker_config(workspace: &Path, datasource: SourceDescriptor, min_points: usize) -> WalkerConfig {
    WalkerConfig {
        archive: ArchiveConfig {
            user_id: USER.to_string(),
            name: "Heuchera".to_string(),
            priority: 5,
        },
        datasource,
        walk: WalkConfig {
            expiration: Utc::now() - Duration::days(30),
            min_points,
            checkpoint_path: workspace.join("walk.checkpoint"),
            max_taxa_per_tick: None,
        },
        storage: StorageConfig {
            data_root: workspace.join("data"),
            spool_dir: workspace.join("spool"),
        },
        taxonomy: TaxonomyConfig::default(),
        sdm: SdmConfig {
            algorithms: vec![AlgorithmConfig {
                code: "ATT_MAXENT".to_string(),
                parameters: BTreeMap::new(),
            }],
            model_scenario: "observed".to_string(),
            projection_scenarios: vec!["AR5-CCSM4-RCP8.5-2070".to_string()],
            mask_layer: Some("ecoreg".to_string()),
        },
        intersect: Some(IntersectConfig {
            shapegrid: "global_1deg".to_string(),
            filter_string: None,
            value_name: "pixel".to_string(),
            min_presence: 1.0,
            max_presence: 255.0,
            min_percent: 25.0,
        }),
        database: DatabaseConfig::default(),
    }
}
