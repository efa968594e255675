//! End-to-end walks over the in-memory catalog.

mod common;

use boom_walker::catalog::{Catalog, InMemoryCatalog};
use boom_walker::checkpoint::{CheckpointStore, WalkCheckpoint};
use boom_walker::config::{CoordinateColumns, SourceDescriptor, TaxonomyConfig};
use boom_walker::constants::JobStatus;
use boom_walker::error::ErrorClass;
use boom_walker::graph::TaskKind;
use boom_walker::orchestration::{SpeciesWalker, WalkState};
use common::*;
use std::io::Write;
use std::sync::Arc;
use tempfile::TempDir;

const PUMA: &str = "Puma concolor";
const LYNX: &str = "Lynx rufus";

struct Harness {
    _workspace: TempDir,
    config: boom_walker::config::WalkerConfig,
    catalog: Arc<InMemoryCatalog>,
}

impl Harness {
    fn two_taxa() -> Self {
        let workspace = TempDir::new().unwrap();
        let table = write_table(workspace.path(), "points.csv", &[(PUMA, 12), (LYNX, 3)]);
        let config = walker_config(workspace.path(), table_descriptor(&table, false), 5);
        Self {
            _workspace: workspace,
            config,
            catalog: Arc::new(InMemoryCatalog::new()),
        }
    }

    fn checkpoints(&self) -> CheckpointStore {
        CheckpointStore::new(&self.config.walk.checkpoint_path, &self.config.archive.name)
    }

    async fn walker(&self, engine: Arc<RecordingEngine>) -> SpeciesWalker {
        SpeciesWalker::new(self.config.clone(), self.catalog.clone(), None, engine)
            .await
            .unwrap()
    }
}

#[tokio::test]
async fn test_full_graph_only_above_min_points() {
    let harness = Harness::two_taxa();
    let engine = Arc::new(RecordingEngine::new());
    let mut walker = harness.walker(engine.clone()).await;

    let summary = walker.start_walk(&harness.config.datasource).await.unwrap();

    assert!(summary.finished);
    assert_eq!(summary.taxa_seen, 2);
    assert_eq!(summary.graphs_submitted, 2);
    assert_eq!(summary.position, 15);
    assert_eq!(walker.state(), WalkState::Finished);

    let graphs = engine.graphs();
    assert_eq!(engine.taxon_names(), vec![PUMA.to_string(), LYNX.to_string()]);

    // observed + one future scenario, each intersected
    let puma = &graphs[0];
    assert_eq!(puma.count_of_kind(TaskKind::OccurrencePreparation), 1);
    assert_eq!(puma.count_of_kind(TaskKind::Projection), 2);
    assert_eq!(puma.count_of_kind(TaskKind::Intersection), 2);
    assert_eq!(puma.count_of_kind(TaskKind::Stockpile), 1);
    assert_eq!(puma.count_of_kind(TaskKind::Index), 1);
    assert!(puma.is_dependency_ordered());
    assert_eq!(summary.submissions[0].node_count, 7);

    let lynx = &graphs[1];
    assert_eq!(lynx.node_count(), 1);
    assert_eq!(lynx.count_of_kind(TaskKind::OccurrencePreparation), 1);
    assert_eq!(summary.tasks_submitted, 8);

    let checkpoint = harness.checkpoints().load().unwrap().unwrap();
    assert_eq!(checkpoint.offset, 15);
    assert!(harness.checkpoints().is_done());

    let occurrences = harness.catalog.occurrences();
    assert_eq!(occurrences.len(), 2);
    assert!(occurrences.iter().all(|o| o.status == JobStatus::Initializing));
    assert_eq!(occurrences[0].record_count, 12);
    assert!(occurrences
        .iter()
        .all(|o| std::path::Path::new(o.raw_dlocation.as_deref().unwrap()).exists()));
}

#[tokio::test]
async fn test_second_pass_without_changes_submits_nothing() {
    let harness = Harness::two_taxa();
    let first = Arc::new(RecordingEngine::new());
    harness
        .walker(first.clone())
        .await
        .start_walk(&harness.config.datasource)
        .await
        .unwrap();
    assert_eq!(first.graphs().len(), 2);

    let second = Arc::new(RecordingEngine::new());
    let summary = harness
        .walker(second.clone())
        .await
        .start_walk(&harness.config.datasource)
        .await
        .unwrap();

    assert!(summary.finished);
    assert_eq!(summary.taxa_seen, 2);
    assert_eq!(summary.graphs_submitted, 0);
    assert!(second.graphs().is_empty());
    assert_eq!(harness.catalog.occurrence_count(), 2);
    assert_eq!(harness.catalog.taxon_count(), 2);
}

#[tokio::test]
async fn test_restart_after_interruption_resumes_at_next_taxon() {
    let mut harness = Harness::two_taxa();
    harness.config.walk.max_taxa_per_tick = Some(1);

    let before_crash = Arc::new(RecordingEngine::new());
    let summary = harness
        .walker(before_crash.clone())
        .await
        .start_walk(&harness.config.datasource)
        .await
        .unwrap();
    assert!(!summary.finished);
    assert_eq!(summary.position, 12);
    assert_eq!(before_crash.taxon_names(), vec![PUMA.to_string()]);

    // The first walker is dropped without closing anything
    harness.config.walk.max_taxa_per_tick = None;
    let after_crash = Arc::new(RecordingEngine::new());
    let summary = harness
        .walker(after_crash.clone())
        .await
        .start_walk(&harness.config.datasource)
        .await
        .unwrap();

    assert!(summary.finished);
    assert_eq!(after_crash.taxon_names(), vec![LYNX.to_string()]);
    assert_eq!(summary.position, 15);
}

#[tokio::test]
async fn test_tick_bound_keeps_source_open_between_calls() {
    let mut harness = Harness::two_taxa();
    harness.config.walk.max_taxa_per_tick = Some(1);
    let engine = Arc::new(RecordingEngine::new());
    let mut walker = harness.walker(engine.clone()).await;

    let first = walker.start_walk(&harness.config.datasource).await.unwrap();
    assert_eq!(first.graphs_submitted, 1);
    assert_eq!(walker.state(), WalkState::Idle);

    let second = walker.start_walk(&harness.config.datasource).await.unwrap();
    assert_eq!(second.graphs_submitted, 1);
    assert!(!second.finished);

    let third = walker.start_walk(&harness.config.datasource).await.unwrap();
    assert!(third.finished);
    assert_eq!(third.taxa_seen, 0);
    assert_eq!(third.position, 15);
    assert_eq!(engine.taxon_names(), vec![PUMA.to_string(), LYNX.to_string()]);
}

#[tokio::test]
async fn test_stop_takes_effect_after_current_taxon_is_checkpointed() {
    let harness = Harness::two_taxa();
    let engine = Arc::new(RecordingEngine::new());
    let mut walker = harness.walker(engine.clone()).await;
    engine.stop_walk_on_submit(walker.stop_handle());

    let summary = walker.start_walk(&harness.config.datasource).await.unwrap();

    assert!(!summary.finished);
    assert_eq!(summary.graphs_submitted, 1);
    assert_eq!(summary.position, 12);
    assert_eq!(walker.state(), WalkState::Finished);
    assert!(!harness.checkpoints().is_done());
    assert_eq!(harness.checkpoints().load().unwrap().unwrap().offset, 12);
}

#[tokio::test]
async fn test_stopped_walker_continues_on_next_call() {
    let harness = Harness::two_taxa();
    let engine = Arc::new(RecordingEngine::new());
    let mut walker = harness.walker(engine.clone()).await;
    engine.stop_walk_on_submit(walker.stop_handle());

    let stopped = walker.start_walk(&harness.config.datasource).await.unwrap();
    assert!(!stopped.finished);
    assert_eq!(stopped.position, 12);

    engine.keep_walking();
    let resumed = walker.start_walk(&harness.config.datasource).await.unwrap();

    assert!(resumed.finished);
    assert_eq!(resumed.taxa_seen, 1);
    assert_eq!(resumed.position, 15);
    assert!(!walker.stop_handle().is_stopped());
    assert_eq!(engine.taxon_names(), vec![PUMA.to_string(), LYNX.to_string()]);
}

#[tokio::test]
async fn test_rejected_submission_aborts_without_advancing_checkpoint() {
    let harness = Harness::two_taxa();
    let mut walker = SpeciesWalker::new(
        harness.config.clone(),
        harness.catalog.clone(),
        None,
        Arc::new(RejectingEngine),
    )
    .await
    .unwrap();

    let aborted = walker
        .start_walk(&harness.config.datasource)
        .await
        .unwrap_err();

    assert_eq!(aborted.error.class(), ErrorClass::Persistence);
    assert_eq!(aborted.last_checkpoint, 0);
    assert_eq!(walker.state(), WalkState::Failed);
    assert!(harness.checkpoints().load().unwrap().is_none());
}

#[tokio::test]
async fn test_rejected_taxon_is_submitted_on_retry() {
    let harness = Harness::two_taxa();
    let mut rejected = SpeciesWalker::new(
        harness.config.clone(),
        harness.catalog.clone(),
        None,
        Arc::new(RejectingEngine),
    )
    .await
    .unwrap();
    rejected
        .start_walk(&harness.config.datasource)
        .await
        .unwrap_err();
    assert!(harness
        .catalog
        .occurrences()
        .iter()
        .all(|o| o.status == JobStatus::Uninitialized));

    let engine = Arc::new(RecordingEngine::new());
    let summary = harness
        .walker(engine.clone())
        .await
        .start_walk(&harness.config.datasource)
        .await
        .unwrap();

    assert!(summary.finished);
    assert_eq!(engine.taxon_names(), vec![PUMA.to_string(), LYNX.to_string()]);
    assert_eq!(harness.catalog.occurrence_count(), 2);
    assert!(harness
        .catalog
        .occurrences()
        .iter()
        .all(|o| o.status == JobStatus::Initializing));
}

#[tokio::test]
async fn test_quoted_fields_with_delimiters_are_walked() {
    let workspace = TempDir::new().unwrap();
    let table = workspace.path().join("remarks.csv");
    let mut body = String::from("species,latitude,longitude,gbifid,remarks\n");
    for i in 0..6 {
        body.push_str(&format!(
            "{PUMA},{}.5,-80.0,{i},\"seen near river, north bank\"\n",
            10 + i
        ));
    }
    body.push_str(&format!("{LYNX},40.5,-100.0,7,\"fence, \"\"old\"\" gate\"\n"));
    std::fs::write(&table, body).unwrap();

    let config = walker_config(workspace.path(), table_descriptor(&table, false), 5);
    let catalog = Arc::new(InMemoryCatalog::new());
    let engine = Arc::new(RecordingEngine::new());
    let mut walker = SpeciesWalker::new(config.clone(), catalog.clone(), None, engine.clone())
        .await
        .unwrap();

    let summary = walker.start_walk(&config.datasource).await.unwrap();

    assert_eq!(summary.position, 7);
    assert_eq!(summary.submissions[0].node_count, 7);
    let occurrences = catalog.occurrences();
    assert_eq!(occurrences[0].record_count, 6);
    assert_eq!(occurrences[1].record_count, 1);

    let mut raw = csv::Reader::from_path(occurrences[1].raw_dlocation.as_deref().unwrap()).unwrap();
    let row = raw.records().next().unwrap().unwrap();
    assert_eq!(&row[4], "fence, \"old\" gate");
}

#[tokio::test]
async fn test_taxonomy_outage_skips_taxa_but_advances() {
    let mut harness = Harness::two_taxa();
    let table = harness.config.datasource.input_path().to_path_buf();
    harness.config.datasource = table_descriptor(&table, true);
    harness.config.taxonomy = TaxonomyConfig {
        source_name: Some("GBIF Backbone Taxonomy".to_string()),
        dump_path: None,
    };
    harness.catalog.seed_taxon_source("GBIF Backbone Taxonomy");

    let engine = Arc::new(RecordingEngine::new());
    let mut walker = SpeciesWalker::new(
        harness.config.clone(),
        harness.catalog.clone(),
        Some(Arc::new(UnreachableTaxonomy)),
        engine.clone(),
    )
    .await
    .unwrap();

    let summary = walker.start_walk(&harness.config.datasource).await.unwrap();

    assert!(summary.finished);
    assert_eq!(summary.taxa_seen, 2);
    assert_eq!(summary.taxa_skipped, 2);
    assert_eq!(summary.position, 15);
    assert!(engine.graphs().is_empty());
    assert_eq!(harness.catalog.taxon_count(), 0);
}

#[tokio::test]
async fn test_unknown_taxonomy_source_is_a_configuration_error() {
    let mut harness = Harness::two_taxa();
    harness.config.taxonomy.source_name = Some("ITIS".to_string());

    let err = SpeciesWalker::new(
        harness.config.clone(),
        harness.catalog.clone(),
        None,
        Arc::new(RecordingEngine::new()),
    )
    .await
    .unwrap_err();

    assert_eq!(err.class(), ErrorClass::Configuration);
}

#[tokio::test]
async fn test_checkpoint_for_another_input_is_ignored() {
    let harness = Harness::two_taxa();
    harness
        .checkpoints()
        .save(&WalkCheckpoint::new("/elsewhere/other.csv", 12))
        .unwrap();

    let engine = Arc::new(RecordingEngine::new());
    let summary = harness
        .walker(engine.clone())
        .await
        .start_walk(&harness.config.datasource)
        .await
        .unwrap();

    assert_eq!(summary.graphs_submitted, 2);
    assert_eq!(engine.taxon_names(), vec![PUMA.to_string(), LYNX.to_string()]);
}

#[tokio::test]
async fn test_missing_input_fails_before_walking() {
    let harness = Harness::two_taxa();
    let missing = SourceDescriptor::ExistingIds {
        path: harness.config.walk.checkpoint_path.with_file_name("no_such_ids.txt"),
    };
    let mut walker = harness.walker(Arc::new(RecordingEngine::new())).await;

    let aborted = walker.start_walk(&missing).await.unwrap_err();

    assert!(!aborted.error.class().is_absorbed_per_taxon());
    assert_eq!(walker.state(), WalkState::Failed);
}

#[tokio::test]
async fn test_taxon_file_set_walk() {
    let workspace = TempDir::new().unwrap();
    let species_dir = workspace.path().join("species");
    write_taxon_files(&species_dir, &[("Puma_concolor", 12), ("Lynx_rufus_2435240", 3)]);
    let mut puma_file = std::fs::OpenOptions::new()
        .append(true)
        .open(species_dir.join("Puma_concolor.csv"))
        .unwrap();
    puma_file.write_all(b"0,0\n-81.5,north\n-82.5\n").unwrap();
    let descriptor = SourceDescriptor::TaxonFileSet {
        directory: species_dir.clone(),
        manifest_path: workspace.path().join("species.manifest"),
        delimiter: ",".to_string(),
        has_header: true,
        columns: CoordinateColumns::default(),
    };
    let config = walker_config(workspace.path(), descriptor.clone(), 5);
    let catalog = Arc::new(InMemoryCatalog::new());
    let engine = Arc::new(RecordingEngine::new());

    let mut walker = SpeciesWalker::new(config, catalog.clone(), None, engine.clone())
        .await
        .unwrap();
    let summary = walker.start_walk(&descriptor).await.unwrap();

    assert!(summary.finished);
    assert_eq!(summary.position, 2);
    // Manifest order is sorted by file name
    assert_eq!(engine.taxon_names(), vec![LYNX.to_string(), PUMA.to_string()]);
    assert_eq!(engine.graphs()[0].node_count(), 1);
    assert_eq!(engine.graphs()[1].node_count(), 7);

    let lynx = catalog
        .find_occurrence_for_taxon(USER, 1)
        .await
        .unwrap()
        .unwrap();
    assert_eq!(lynx.record_count, 3);

    let puma = catalog
        .find_occurrence_for_taxon(USER, 2)
        .await
        .unwrap()
        .unwrap();
    assert_eq!(puma.record_count, 12);
    let raw_path = std::path::PathBuf::from(puma.raw_dlocation.unwrap());
    let raw = std::fs::read_to_string(&raw_path).unwrap();
    assert!(raw.starts_with("longitude,latitude\n"));
    assert_eq!(raw.lines().count(), 13);
    let sidecar: serde_json::Value =
        serde_json::from_str(&std::fs::read_to_string(raw_path.with_extension("json")).unwrap())
            .unwrap();
    assert_eq!(sidecar["columns"]["latitude"], 1);
    assert_eq!(sidecar["columns"]["longitude"], 0);
}
