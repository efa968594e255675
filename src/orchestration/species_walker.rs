//! The resumable per-taxon walk loop.

use crate::catalog::{Catalog, CatalogResolver, ResolverSettings};
use crate::checkpoint::{CheckpointStore, WalkCheckpoint};
use crate::config::{SourceDescriptor, WalkerConfig};
use crate::error::{Result, WalkerError};
use crate::execution::{ExecutionEngine, SubmissionHandle};
use crate::graph::{SpudAssembler, SpudContext};
use crate::logging::{log_error, log_taxon_decision, log_walk_operation};
use crate::models::OccurrenceBatch;
use crate::source::{OccurrenceSource, SourceContext, SpeciesSource};
use crate::taxonomy::TaxonomyResolver;
use serde::Serialize;
use std::fmt;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use thiserror::Error;
use tracing::{debug, info, instrument, warn};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum WalkState {
    Idle,
    Resuming,
    Walking,
    Deciding,
    Assembling,
    Checkpointing,
    Finished,
    Failed,
}

impl WalkState {
    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Finished | Self::Failed)
    }
}

impl fmt::Display for WalkState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::Idle => "idle",
            Self::Resuming => "resuming",
            Self::Walking => "walking",
            Self::Deciding => "deciding",
            Self::Assembling => "assembling",
            Self::Checkpointing => "checkpointing",
            Self::Finished => "finished",
            Self::Failed => "failed",
        };
        f.write_str(name)
    }
}

/// One graph handed to the engine
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct SubmissionRecord {
    pub group_key: String,
    pub squid: String,
    pub handle: SubmissionHandle,
    pub node_count: usize,
}

/// What one `start_walk` call accomplished
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct WalkSummary {
    pub taxa_seen: usize,
    pub taxa_skipped: usize,
    pub tasks_submitted: usize,
    pub graphs_submitted: usize,
    pub submissions: Vec<SubmissionRecord>,
    /// Last checkpointed position
    pub position: u64,
    /// The input was exhausted during this call
    pub finished: bool,
}

/// A walk halted by a configuration or persistence failure
#[derive(Debug, Error)]
#[error("Walk aborted at checkpoint {last_checkpoint}: {error}")]
pub struct WalkAborted {
    #[source]
    pub error: WalkerError,
    pub last_checkpoint: u64,
}

/// Cloneable request to stop a running walk after the current taxon
#[derive(Debug, Clone, Default)]
pub struct WalkStopHandle(Arc<AtomicBool>);

impl WalkStopHandle {
    pub fn stop(&self) {
        self.0.store(true, Ordering::SeqCst);
    }

    pub fn is_stopped(&self) -> bool {
        self.0.load(Ordering::SeqCst)
    }

    fn reset(&self) {
        self.0.store(false, Ordering::SeqCst);
    }
}

enum WalkOutcome {
    Exhausted,
    Stopped,
    TickLimit,
}

/// Source kept open between ticks
struct ActiveSource {
    descriptor: SourceDescriptor,
    source: SpeciesSource,
}

pub struct SpeciesWalker {
    config: WalkerConfig,
    catalog: Arc<dyn Catalog>,
    resolver: CatalogResolver,
    engine: Arc<dyn ExecutionEngine>,
    checkpoints: CheckpointStore,
    stop: WalkStopHandle,
    state: WalkState,
    active: Option<ActiveSource>,
    last_checkpoint: u64,
}

impl fmt::Debug for SpeciesWalker {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SpeciesWalker")
            .field("archive", &self.config.archive.name)
            .field("state", &self.state)
            .field("engine", &self.engine.engine_name())
            .field("last_checkpoint", &self.last_checkpoint)
            .finish()
    }
}

impl SpeciesWalker {
    pub async fn new(
        config: WalkerConfig,
        catalog: Arc<dyn Catalog>,
        taxonomy: Option<Arc<dyn TaxonomyResolver>>,
        engine: Arc<dyn ExecutionEngine>,
    ) -> Result<Self> {
        config.validate()?;
        let resolver = CatalogResolver::connect(
            catalog.clone(),
            taxonomy,
            ResolverSettings {
                user_id: config.archive.user_id.clone(),
                expiration: config.walk.expiration,
                data_root: config.storage.data_root.clone(),
                taxonomy_source_name: config.taxonomy.source_name.clone(),
            },
        )
        .await?;
        let checkpoints = CheckpointStore::new(&config.walk.checkpoint_path, &config.archive.name);

        Ok(Self {
            config,
            catalog,
            resolver,
            engine,
            checkpoints,
            stop: WalkStopHandle::default(),
            state: WalkState::Idle,
            active: None,
            last_checkpoint: 0,
        })
    }

    pub fn state(&self) -> WalkState {
        self.state
    }

    pub fn config(&self) -> &WalkerConfig {
        &self.config
    }

    pub fn stop_handle(&self) -> WalkStopHandle {
        self.stop.clone()
    }

    /// Stop after the current taxon has been checkpointed.
    ///
    /// The request is consumed by the `start_walk` call it stops; a later call
    /// resumes from the checkpoint.
    pub fn stop_walk(&self) {
        info!(archive = %self.config.archive.name, "🛑 Stop requested");
        self.stop.stop();
    }

    fn set_state(&mut self, next: WalkState) {
        if self.state != next {
            debug!(from = %self.state, to = %next, "Walk state transition");
            self.state = next;
        }
    }

    /// Walk `descriptor` until its input is exhausted, the tick bound is hit or
    /// a stop is requested.
    ///
    /// The open source is cached between calls, so repeated calls with the
    /// same descriptor continue where the previous one paused.
    #[instrument(skip(self, descriptor), fields(archive = %self.config.archive.name, input = %descriptor.input_id()))]
    pub async fn start_walk(
        &mut self,
        descriptor: &SourceDescriptor,
    ) -> std::result::Result<WalkSummary, WalkAborted> {
        let mut active = match self.active.take() {
            Some(active) if &active.descriptor == descriptor => active,
            stale => {
                if let Some(mut previous) = stale {
                    previous.source.close();
                }
                self.set_state(WalkState::Resuming);
                match self.resume(descriptor).await {
                    Ok(active) => active,
                    Err(error) => return Err(self.fail(error)),
                }
            }
        };

        self.set_state(WalkState::Walking);
        let mut summary = WalkSummary::default();
        let outcome = self.walk(&mut active, &mut summary).await;
        summary.position = self.last_checkpoint;

        match outcome {
            Ok(WalkOutcome::Exhausted) => {
                active.source.close();
                summary.finished = true;
                self.set_state(WalkState::Finished);
                log_walk_operation(
                    "finished",
                    &self.config.archive.name,
                    active.source.input_id(),
                    summary.position,
                    None,
                );
                Ok(summary)
            }
            Ok(WalkOutcome::Stopped) => {
                active.source.close();
                self.stop.reset();
                self.set_state(WalkState::Finished);
                log_walk_operation(
                    "stopped",
                    &self.config.archive.name,
                    active.source.input_id(),
                    summary.position,
                    Some("stop requested"),
                );
                Ok(summary)
            }
            Ok(WalkOutcome::TickLimit) => {
                self.active = Some(active);
                self.set_state(WalkState::Idle);
                Ok(summary)
            }
            Err(error) => {
                active.source.close();
                Err(self.fail(error))
            }
        }
    }

    fn fail(&mut self, error: WalkerError) -> WalkAborted {
        self.set_state(WalkState::Failed);
        log_error(
            "species_walker",
            "start_walk",
            &error.to_string(),
            Some(format!("class={} last_checkpoint={}", error.class(), self.last_checkpoint).as_str()),
        );
        WalkAborted {
            error,
            last_checkpoint: self.last_checkpoint,
        }
    }

    /// Open the source and position it from the stored checkpoint
    async fn resume(&mut self, descriptor: &SourceDescriptor) -> Result<ActiveSource> {
        let context = SourceContext {
            user_id: self.config.archive.user_id.clone(),
            catalog: self.catalog.clone(),
            expiration: self.config.walk.expiration,
        };
        let mut source = SpeciesSource::open(descriptor, &context).await?;
        let input_id = source.input_id().to_string();

        let offset = if self.checkpoints.is_done() {
            info!(input = %input_id, "Previous pass completed, starting a new pass");
            self.checkpoints.save(&WalkCheckpoint::new(&input_id, 0))?;
            self.checkpoints.clear_done()?;
            0
        } else {
            match self.checkpoints.load()? {
                Some(checkpoint) if checkpoint.input_id == input_id => checkpoint.offset,
                Some(checkpoint) => {
                    warn!(
                        checkpoint_input = %checkpoint.input_id,
                        input = %input_id,
                        "Checkpoint belongs to another input, starting from the beginning"
                    );
                    0
                }
                None => 0,
            }
        };

        source.resume_from(offset).await?;
        self.last_checkpoint = offset;
        log_walk_operation("resume", &self.config.archive.name, &input_id, offset, None);

        Ok(ActiveSource {
            descriptor: descriptor.clone(),
            source,
        })
    }

    async fn walk(
        &mut self,
        active: &mut ActiveSource,
        summary: &mut WalkSummary,
    ) -> Result<WalkOutcome> {
        loop {
            if self.stop.is_stopped() {
                return Ok(WalkOutcome::Stopped);
            }
            if let Some(limit) = self.config.walk.max_taxa_per_tick {
                if summary.taxa_seen >= limit {
                    return Ok(WalkOutcome::TickLimit);
                }
            }

            let batch = match active.source.pull_next().await {
                Ok(Some(batch)) => batch,
                Ok(None) => {
                    self.checkpoint(&active.source)?;
                    self.checkpoints.mark_done()?;
                    return Ok(WalkOutcome::Exhausted);
                }
                Err(source_error) => {
                    let error = WalkerError::from(source_error);
                    if !error.class().is_absorbed_per_taxon() {
                        return Err(error);
                    }
                    log_error("species_walker", "pull_next", &error.to_string(), None);
                    summary.taxa_skipped += 1;
                    self.checkpoint(&active.source)?;
                    continue;
                }
            };

            summary.taxa_seen += 1;
            self.set_state(WalkState::Deciding);
            match self.process_batch(&batch, summary).await {
                Ok(()) => {}
                Err(error) if error.class().is_absorbed_per_taxon() => {
                    summary.taxa_skipped += 1;
                    log_error(
                        "species_walker",
                        "process_batch",
                        &error.to_string(),
                        Some(format!("group_key={} class={}", batch.group_key, error.class()).as_str()),
                    );
                }
                Err(error) => return Err(error),
            }

            self.set_state(WalkState::Checkpointing);
            self.checkpoint(&active.source)?;
            self.set_state(WalkState::Walking);
        }
    }

    fn checkpoint(&mut self, source: &SpeciesSource) -> Result<()> {
        let position = source.current_position();
        self.checkpoints
            .save(&WalkCheckpoint::new(source.input_id(), position))?;
        self.last_checkpoint = position;
        Ok(())
    }

    /// Resolve, decide, assemble and submit one taxon
    async fn process_batch(
        &mut self,
        batch: &OccurrenceBatch,
        summary: &mut WalkSummary,
    ) -> Result<()> {
        let Some(taxon) = self
            .resolver
            .resolve_taxon(&batch.taxon_key, batch.record_count)
            .await?
        else {
            summary.taxa_skipped += 1;
            info!(group_key = %batch.group_key, "Taxon could not be resolved, skipping");
            return Ok(());
        };

        let resolved = self.resolver.resolve_occurrence(&taxon, batch).await?;
        self.set_state(WalkState::Assembling);

        let min_points = self.config.walk.min_points;
        let sdm = &self.config.sdm;
        let mut spud = SpudAssembler::new(SpudContext {
            user_id: self.config.archive.user_id.clone(),
            archive_name: self.config.archive.name.clone(),
            priority: self.config.archive.priority,
            squid: taxon.squid.clone(),
            taxon_name: taxon.display_name().to_string(),
            work_dir: self
                .resolver
                .locator()
                .spud_work_dir(&self.config.archive.user_id, &taxon.squid),
            occurrence_location: resolved.processed_location.display().to_string(),
        });

        if resolved.will_compute {
            spud.add_occurrence_task(
                resolved.occurrence.occurrence_id,
                &resolved.raw_location.display().to_string(),
                &resolved.processed_location.display().to_string(),
                batch.record_count,
                min_points,
            );

            if batch.record_count >= min_points {
                let mask = sdm.mask_layer.as_deref();
                for algorithm in &sdm.algorithms {
                    for scenario in sdm.all_projection_scenarios() {
                        let projection = spud.add_projection_task(
                            algorithm,
                            &sdm.model_scenario,
                            &scenario,
                            mask,
                            mask,
                        );
                        if let Some(intersect) = &self.config.intersect {
                            let task = spud.add_intersection_task(
                                &projection,
                                &intersect.shapegrid,
                                intersect.min_presence,
                                intersect.max_presence,
                                intersect.min_percent,
                            );
                            task.filter_string = intersect.filter_string.clone();
                            task.value_name = Some(intersect.value_name.clone());
                        }
                    }
                }
            }
        }

        log_taxon_decision(
            &batch.group_key,
            Some(taxon.squid.as_str()),
            Some(resolved.occurrence.occurrence_id),
            batch.record_count,
            resolved.will_compute,
            spud.task_count(),
        );

        let Some(graph) = spud.lower()? else {
            return Ok(());
        };
        let node_count = graph.node_count();
        let handle = self.engine.submit(graph).await?;
        self.resolver
            .mark_scheduled(resolved.occurrence.occurrence_id, batch.record_count)
            .await?;

        summary.graphs_submitted += 1;
        summary.tasks_submitted += node_count;
        summary.submissions.push(SubmissionRecord {
            group_key: batch.group_key.clone(),
            squid: taxon.squid.clone(),
            handle,
            node_count,
        });
        Ok(())
    }
}
