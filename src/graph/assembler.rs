//! Per-taxon task accumulation and lowering.

use super::{AssemblyError, NodeId, TaskGraph, TaskKind, TaskNode};
use crate::config::AlgorithmConfig;
use crate::constants::{GTIFF_EXT, JSON_EXT};
use chrono::Utc;
use serde_json::json;
use sha2::{Digest, Sha256};
use std::collections::{HashMap, HashSet};
use std::path::PathBuf;
use uuid::Uuid;

/// Identity and layout shared by every task of one taxon
#[derive(Debug, Clone)]
pub struct SpudContext {
    pub user_id: String,
    pub archive_name: String,
    pub priority: i32,
    pub squid: String,
    pub taxon_name: String,
    pub work_dir: PathBuf,
    /// Processed occurrence layer read by projections
    pub occurrence_location: String,
}

#[derive(Debug, Clone, PartialEq)]
pub struct OccurrenceTask {
    pub occurrence_id: i64,
    pub raw_location: String,
    pub processed_location: String,
    pub record_count: usize,
    pub min_points: usize,
}

#[derive(Debug, Clone, PartialEq)]
pub struct ProjectionTask {
    pub algorithm: AlgorithmConfig,
    pub model_scenario: String,
    pub projection_scenario: String,
    pub model_mask: Option<String>,
    pub projection_mask: Option<String>,
    pub occurrence_location: String,
    pub output_location: String,
}

#[derive(Debug, Clone, PartialEq)]
pub struct IntersectionTask {
    pub projection_output: String,
    pub shapegrid: String,
    pub min_presence: f64,
    pub max_presence: f64,
    pub min_percent: f64,
    pub filter_string: Option<String>,
    pub value_name: Option<String>,
    pub output_location: String,
}

/// Collects the tasks for one taxon ("single-species parameter sweep")
#[derive(Debug, Clone)]
pub struct SpudAssembler {
    context: SpudContext,
    occurrence: Option<OccurrenceTask>,
    projections: Vec<ProjectionTask>,
    intersections: Vec<IntersectionTask>,
}

fn path_safe(value: &str) -> String {
    value
        .chars()
        .map(|c| if c.is_ascii_alphanumeric() { c } else { '-' })
        .collect()
}

/// Readable file stem; the digest of the exact identifiers keeps distinct
/// codes apart after `path_safe` folds their punctuation
fn output_stem(prefix: &str, identifiers: &[&str]) -> String {
    let mut hasher = Sha256::new();
    for identifier in identifiers {
        hasher.update(identifier.as_bytes());
        hasher.update(b"\x1f");
    }
    let digest = hasher.finalize();
    let tag: String = digest[..4].iter().map(|b| format!("{b:02x}")).collect();
    let readable: Vec<String> = identifiers.iter().map(|i| path_safe(i)).collect();
    format!("{prefix}_{}_{tag}", readable.join("_"))
}

impl SpudAssembler {
    pub fn new(context: SpudContext) -> Self {
        Self {
            context,
            occurrence: None,
            projections: Vec::new(),
            intersections: Vec::new(),
        }
    }

    pub fn context(&self) -> &SpudContext {
        &self.context
    }

    pub fn add_occurrence_task(
        &mut self,
        occurrence_id: i64,
        raw_location: &str,
        processed_location: &str,
        record_count: usize,
        min_points: usize,
    ) {
        self.occurrence = Some(OccurrenceTask {
            occurrence_id,
            raw_location: raw_location.to_string(),
            processed_location: processed_location.to_string(),
            record_count,
            min_points,
        });
    }

    /// Add a model + projection; returns the projected layer's location
    pub fn add_projection_task(
        &mut self,
        algorithm: &AlgorithmConfig,
        model_scenario: &str,
        projection_scenario: &str,
        model_mask: Option<&str>,
        projection_mask: Option<&str>,
    ) -> String {
        let file_name = format!(
            "{}{GTIFF_EXT}",
            output_stem("prj", &[algorithm.code.as_str(), model_scenario, projection_scenario])
        );
        let output_location = self.context.work_dir.join(file_name).display().to_string();
        self.projections.push(ProjectionTask {
            algorithm: algorithm.clone(),
            model_scenario: model_scenario.to_string(),
            projection_scenario: projection_scenario.to_string(),
            model_mask: model_mask.map(str::to_string),
            projection_mask: projection_mask.map(str::to_string),
            occurrence_location: self.context.occurrence_location.clone(),
            output_location: output_location.clone(),
        });
        output_location
    }

    /// Intersect a projection output with a shapegrid
    pub fn add_intersection_task(
        &mut self,
        projection_output: &str,
        shapegrid: &str,
        min_presence: f64,
        max_presence: f64,
        min_percent: f64,
    ) -> &mut IntersectionTask {
        let projection_stem = std::path::Path::new(projection_output)
            .file_stem()
            .map(|s| s.to_string_lossy().into_owned())
            .unwrap_or_else(|| path_safe(projection_output));
        let file_name = format!(
            "{}{JSON_EXT}",
            output_stem("pav", &[projection_stem.as_str(), shapegrid])
        );
        let output_location = self.context.work_dir.join(file_name).display().to_string();
        self.intersections.push(IntersectionTask {
            projection_output: projection_output.to_string(),
            shapegrid: shapegrid.to_string(),
            min_presence,
            max_presence,
            min_percent,
            filter_string: None,
            value_name: None,
            output_location,
        });
        let last = self.intersections.len() - 1;
        &mut self.intersections[last]
    }

    pub fn task_count(&self) -> usize {
        usize::from(self.occurrence.is_some()) + self.projections.len() + self.intersections.len()
    }

    pub fn is_empty(&self) -> bool {
        self.task_count() == 0
    }

    pub fn projections(&self) -> &[ProjectionTask] {
        &self.projections
    }

    fn check_unique_outputs(&self) -> Result<(), AssemblyError> {
        let mut seen = HashSet::new();
        let outputs = self
            .occurrence
            .iter()
            .map(|o| o.processed_location.as_str())
            .chain(self.projections.iter().map(|p| p.output_location.as_str()))
            .chain(self.intersections.iter().map(|i| i.output_location.as_str()));
        for output in outputs {
            if !seen.insert(output) {
                return Err(AssemblyError::DuplicateOutput(output.to_string()));
            }
        }
        Ok(())
    }

    /// Lower the accumulated tasks into a dependency-ordered graph.
    ///
    /// Returns `Ok(None)` when nothing was added.
    pub fn lower(&self) -> Result<Option<TaskGraph>, AssemblyError> {
        if self.is_empty() {
            return Ok(None);
        }
        self.check_unique_outputs()?;

        let mut nodes: Vec<TaskNode> = Vec::with_capacity(self.task_count() + 2);
        let mut push = |kind: TaskKind,
                        name: String,
                        depends_on: Vec<NodeId>,
                        inputs: Vec<String>,
                        outputs: Vec<String>,
                        parameters: serde_json::Value| {
            let id = NodeId(nodes.len());
            nodes.push(TaskNode {
                id,
                kind,
                name,
                depends_on,
                inputs,
                outputs,
                parameters,
            });
            id
        };

        let occurrence_node = self.occurrence.as_ref().map(|occ| {
            push(
                TaskKind::OccurrencePreparation,
                format!("occurrence-{}", occ.occurrence_id),
                Vec::new(),
                vec![occ.raw_location.clone()],
                vec![occ.processed_location.clone()],
                json!({
                    "occurrence_id": occ.occurrence_id,
                    "record_count": occ.record_count,
                    "min_points": occ.min_points,
                }),
            )
        });

        let mut by_output: HashMap<&str, NodeId> = HashMap::new();
        let mut projection_nodes = Vec::with_capacity(self.projections.len());
        for prj in &self.projections {
            let id = push(
                TaskKind::Projection,
                format!(
                    "projection-{}-{}",
                    path_safe(&prj.algorithm.code),
                    path_safe(&prj.projection_scenario)
                ),
                occurrence_node.into_iter().collect(),
                vec![prj.occurrence_location.clone()],
                vec![prj.output_location.clone()],
                json!({
                    "algorithm_code": prj.algorithm.code,
                    "algorithm_parameters": prj.algorithm.parameters,
                    "model_scenario": prj.model_scenario,
                    "projection_scenario": prj.projection_scenario,
                    "model_mask": prj.model_mask,
                    "projection_mask": prj.projection_mask,
                }),
            );
            by_output.insert(prj.output_location.as_str(), id);
            projection_nodes.push(id);
        }

        let mut intersection_nodes = Vec::with_capacity(self.intersections.len());
        for (idx, int) in self.intersections.iter().enumerate() {
            let projection = by_output
                .get(int.projection_output.as_str())
                .copied()
                .ok_or_else(|| AssemblyError::UnmatchedInput {
                    location: int.projection_output.clone(),
                })?;
            let id = push(
                TaskKind::Intersection,
                format!("intersection-{idx}"),
                vec![projection],
                vec![int.projection_output.clone(), int.shapegrid.clone()],
                vec![int.output_location.clone()],
                json!({
                    "shapegrid": int.shapegrid,
                    "min_presence": int.min_presence,
                    "max_presence": int.max_presence,
                    "min_percent": int.min_percent,
                    "filter_string": int.filter_string,
                    "value_name": int.value_name,
                }),
            );
            intersection_nodes.push(id);
        }

        if !projection_nodes.is_empty() {
            let collected: Vec<String> = self
                .projections
                .iter()
                .map(|p| p.output_location.clone())
                .chain(self.intersections.iter().map(|i| i.output_location.clone()))
                .collect();
            let stockpile = push(
                TaskKind::Stockpile,
                "stockpile".to_string(),
                projection_nodes
                    .iter()
                    .chain(intersection_nodes.iter())
                    .copied()
                    .collect(),
                collected,
                vec![self
                    .context
                    .work_dir
                    .join(format!("stockpile{JSON_EXT}"))
                    .display()
                    .to_string()],
                json!({
                    "occurrence_id": self.occurrence.as_ref().map(|o| o.occurrence_id),
                    "squid": self.context.squid,
                }),
            );

            if !intersection_nodes.is_empty() {
                push(
                    TaskKind::Index,
                    "index".to_string(),
                    vec![stockpile],
                    self.intersections
                        .iter()
                        .map(|i| i.output_location.clone())
                        .collect(),
                    vec![self
                        .context
                        .work_dir
                        .join(format!("index{JSON_EXT}"))
                        .display()
                        .to_string()],
                    json!({ "squid": self.context.squid }),
                );
            }
        }

        Ok(Some(TaskGraph {
            graph_id: Uuid::new_v4(),
            squid: self.context.squid.clone(),
            taxon_name: self.context.taxon_name.clone(),
            user_id: self.context.user_id.clone(),
            archive_name: self.context.archive_name.clone(),
            priority: self.context.priority,
            created_at: Utc::now(),
            nodes,
        }))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn assembler() -> SpudAssembler {
        SpudAssembler::new(SpudContext {
            user_id: "kubi".into(),
            archive_name: "Heuchera".into(),
            priority: 2,
            squid: "abc123".into(),
            taxon_name: "Heuchera americana".into(),
            work_dir: PathBuf::from("/boom/kubi/abc/abc123/spud"),
            occurrence_location: "/boom/kubi/abc/7/occ_7.shp".into(),
        })
    }

    fn maxent() -> AlgorithmConfig {
        AlgorithmConfig {
            code: "ATT_MAXENT".into(),
            parameters: Default::default(),
        }
    }

    #[test]
    fn test_empty_assembler_lowers_to_nothing() {
        assert_eq!(assembler().lower().unwrap(), None);
    }

    #[test]
    fn test_occurrence_only_graph() {
        let mut spud = assembler();
        spud.add_occurrence_task(7, "/raw_7.csv", "/occ_7.shp", 3, 5);
        let graph = spud.lower().unwrap().unwrap();
        assert_eq!(graph.node_count(), 1);
        assert_eq!(graph.nodes[0].kind, TaskKind::OccurrencePreparation);
        assert_eq!(graph.count_of_kind(TaskKind::Stockpile), 0);
    }

    #[test]
    fn test_full_graph_wiring() {
        let mut spud = assembler();
        spud.add_occurrence_task(7, "/raw_7.csv", "/occ_7.shp", 12, 5);
        let observed = spud.add_projection_task(&maxent(), "observed", "observed", Some("mask"), Some("mask"));
        let future = spud.add_projection_task(&maxent(), "observed", "ssp585-2070", None, None);
        spud.add_intersection_task(&future, "grid_1deg", 0.0, 255.0, 25.0)
            .value_name = Some("pixel".into());

        let graph = spud.lower().unwrap().unwrap();
        let kinds: Vec<TaskKind> = graph.nodes.iter().map(|n| n.kind).collect();
        assert_eq!(
            kinds,
            vec![
                TaskKind::OccurrencePreparation,
                TaskKind::Projection,
                TaskKind::Projection,
                TaskKind::Intersection,
                TaskKind::Stockpile,
                TaskKind::Index,
            ]
        );
        assert!(graph.is_dependency_ordered());
        assert_eq!(graph.nodes[1].depends_on, vec![NodeId(0)]);
        assert_eq!(graph.nodes[3].depends_on, vec![NodeId(2)]);
        assert_eq!(graph.nodes[3].inputs[0], future);
        assert_eq!(graph.nodes[4].depends_on, vec![NodeId(1), NodeId(2), NodeId(3)]);
        assert_eq!(graph.nodes[5].depends_on, vec![NodeId(4)]);
        let observed_name = observed.rsplit('/').next().unwrap();
        assert!(observed_name.starts_with("prj_ATT-MAXENT_observed_observed_"));
        assert!(observed_name.ends_with(".tif"));
        assert_eq!(graph.nodes[3].parameters["value_name"], "pixel");
    }

    #[test]
    fn test_no_index_without_intersections() {
        let mut spud = assembler();
        spud.add_projection_task(&maxent(), "observed", "observed", None, None);
        let graph = spud.lower().unwrap().unwrap();
        assert_eq!(graph.count_of_kind(TaskKind::Stockpile), 1);
        assert_eq!(graph.count_of_kind(TaskKind::Index), 0);
        assert!(graph.nodes[0].depends_on.is_empty());
    }

    #[test]
    fn test_unmatched_intersection_input() {
        let mut spud = assembler();
        spud.add_projection_task(&maxent(), "observed", "observed", None, None);
        spud.add_intersection_task("/elsewhere/prj.tif", "grid", 0.0, 1.0, 10.0);
        assert_eq!(
            spud.lower(),
            Err(AssemblyError::UnmatchedInput {
                location: "/elsewhere/prj.tif".into()
            })
        );
    }

    #[test]
    fn test_codes_differing_in_punctuation_get_distinct_outputs() {
        let mut spud = assembler();
        let dashed = spud.add_projection_task(&maxent(), "observed", "ssp585-2070", None, None);
        let underscored = spud.add_projection_task(&maxent(), "observed", "ssp585_2070", None, None);
        assert_ne!(dashed, underscored);
        spud.add_intersection_task(&dashed, "grid 1deg", 0.0, 255.0, 25.0);
        spud.add_intersection_task(&dashed, "grid_1deg", 0.0, 255.0, 25.0);

        let graph = spud.lower().unwrap().unwrap();
        assert_eq!(graph.count_of_kind(TaskKind::Projection), 2);
        assert_eq!(graph.count_of_kind(TaskKind::Intersection), 2);
    }

    #[test]
    fn test_duplicate_projection_is_rejected() {
        let mut spud = assembler();
        spud.add_projection_task(&maxent(), "observed", "observed", None, None);
        spud.add_projection_task(&maxent(), "observed", "observed", None, None);
        assert!(matches!(spud.lower(), Err(AssemblyError::DuplicateOutput(_))));
    }
}
