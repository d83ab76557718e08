//! Run report
//!
//! The durable record of a build: what was produced, what could not be
//! resolved, what the dictionary got wrong about itself, and whether the
//! store agrees with what was produced.

use std::collections::{BTreeMap, BTreeSet};
use std::path::Path;
use std::time::Duration;

use serde::Serialize;

use crate::dictionary::SchemaStats;
use crate::error::{ParseDegradation, Result, SchemaInconsistency, UnresolvedReference};
use crate::fs_utils;
use crate::merge::{HaltCause, MergeFailure, MergeReport, MergeTier};
use crate::model::{BusinessKey, Entity, EntityKind, RelationKind, TypeTag};
use crate::pipeline::{DumpSummary, Extraction};
use crate::resolver::StageSummary;
use crate::store::GraphStore;

/// Number of confidence histogram buckets over [0, 1]
pub const CONFIDENCE_BUCKETS: usize = 10;

#[derive(Debug, Clone, Serialize)]
pub struct DecodeReport {
    pub entries: usize,
    pub malformed: usize,
    pub dumps: Vec<DumpSummary>,
}

#[derive(Debug, Clone, Serialize)]
pub struct UnresolvedReport {
    pub total: usize,
    /// Resolved code references over all code references
    pub resolution_rate: f64,
    pub by_reason: BTreeMap<String, usize>,
    pub references: Vec<UnresolvedReference>,
}

/// Produced count against what the store holds afterwards
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct CountCheck {
    pub kind: String,
    pub produced: usize,
    pub stored: usize,
}

impl CountCheck {
    /// Stores may hold more than one run produced, never less
    pub fn is_missing(&self) -> bool {
        self.stored < self.produced
    }
}

/// Counts and structural checks read back from a store
#[derive(Debug, Clone, Default, Serialize)]
pub struct StoreSummary {
    pub nodes: BTreeMap<String, usize>,
    pub edges: BTreeMap<String, usize>,
    pub files_without_fields: Vec<String>,
}

impl StoreSummary {
    pub fn collect(store: &dyn GraphStore) -> Result<Self> {
        let mut summary = Self::default();
        for kind in EntityKind::ALL {
            summary
                .nodes
                .insert(kind.to_string(), store.node_count(Some(kind))?);
        }
        for kind in RelationKind::ALL {
            summary
                .edges
                .insert(kind.to_string(), store.edge_count(Some(kind))?);
        }
        summary.files_without_fields =
            store.nodes_without_edge(EntityKind::File, RelationKind::ContainsField)?;
        Ok(summary)
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct Validation {
    pub passed: bool,
    pub nodes: Vec<CountCheck>,
    pub edges: Vec<CountCheck>,
    /// Files in the store with no CONTAINS_FIELD edge
    pub files_without_fields: Vec<String>,
    /// Pointer fields produced without a POINTS_TO edge
    pub pointer_fields_without_target: Vec<String>,
}

/// Compare the store against one run's output
pub fn validate_store(store: &dyn GraphStore, extraction: &Extraction) -> Result<Validation> {
    let summary = StoreSummary::collect(store)?;
    let nodes: Vec<CountCheck> = EntityKind::ALL
        .into_iter()
        .map(|kind| CountCheck {
            kind: kind.to_string(),
            produced: extraction.entity_count(kind),
            stored: summary.nodes.get(kind.as_str()).copied().unwrap_or(0),
        })
        .collect();
    let edges: Vec<CountCheck> = RelationKind::ALL
        .into_iter()
        .map(|kind| CountCheck {
            kind: kind.to_string(),
            produced: extraction.relationship_count(kind),
            stored: summary.edges.get(kind.as_str()).copied().unwrap_or(0),
        })
        .collect();
    let pointer_fields_without_target = pointer_fields_without_target(extraction);

    let missing: Vec<&CountCheck> = nodes.iter().chain(&edges).filter(|c| c.is_missing()).collect();
    for check in &missing {
        tracing::warn!(
            "[VALIDATE] {}: produced {}, store holds {}",
            check.kind,
            check.produced,
            check.stored
        );
    }
    if !summary.files_without_fields.is_empty() {
        tracing::warn!(
            "[VALIDATE] {} files have no fields",
            summary.files_without_fields.len()
        );
    }
    Ok(Validation {
        passed: missing.is_empty(),
        nodes,
        edges,
        files_without_fields: summary.files_without_fields,
        pointer_fields_without_target,
    })
}

fn pointer_fields_without_target(extraction: &Extraction) -> Vec<String> {
    let linked: BTreeSet<&BusinessKey> = extraction
        .relationships
        .iter()
        .filter(|r| r.kind == RelationKind::PointsTo)
        .filter_map(|r| extraction.ctx.key(r.from))
        .collect();
    extraction
        .entities
        .iter()
        .filter_map(|e| match e {
            Entity::Field(field) if field.tags.contains(TypeTag::Pointer) => Some(e.key()),
            _ => None,
        })
        .filter(|key| !linked.contains(key))
        .map(|key| key.render())
        .collect()
}

/// Per-kind histogram of edge confidence in 0.1 buckets
pub fn confidence_histogram(extraction: &Extraction) -> BTreeMap<String, [usize; CONFIDENCE_BUCKETS]> {
    let mut histogram: BTreeMap<String, [usize; CONFIDENCE_BUCKETS]> = BTreeMap::new();
    for rel in &extraction.relationships {
        let bucket = ((rel.confidence * CONFIDENCE_BUCKETS as f64).floor() as usize)
            .min(CONFIDENCE_BUCKETS - 1);
        histogram.entry(rel.kind.to_string()).or_default()[bucket] += 1;
    }
    histogram
}

/// Where a halted merge stopped
#[derive(Debug, Clone, Serialize)]
pub struct HaltSummary {
    pub tier: MergeTier,
    pub cause: HaltCause,
    pub failed_batches: Vec<usize>,
    pub committed_batches: Vec<usize>,
    pub pending_records: usize,
}

impl From<&MergeFailure> for HaltSummary {
    fn from(failure: &MergeFailure) -> Self {
        Self {
            tier: failure.tier,
            cause: failure.cause.clone(),
            failed_batches: failure.failed_batches.clone(),
            committed_batches: failure.committed_batches.clone(),
            pending_records: failure.pending.len(),
        }
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct RunReport {
    pub generated_at: String,
    pub duration_ms: u64,
    pub dry_run: bool,
    pub entities: BTreeMap<String, usize>,
    pub relationships: BTreeMap<String, usize>,
    pub stages: Vec<StageSummary>,
    pub decode: DecodeReport,
    pub schema: SchemaStats,
    pub inconsistencies: Vec<SchemaInconsistency>,
    pub degradations: Vec<ParseDegradation>,
    pub unresolved: UnresolvedReport,
    pub confidence: BTreeMap<String, [usize; CONFIDENCE_BUCKETS]>,
    pub merge: MergeReport,
    /// Set when the merge halted before committing everything
    pub halt: Option<HaltSummary>,
    pub validation: Option<Validation>,
}

impl RunReport {
    pub fn new(
        extraction: &Extraction,
        merge: MergeReport,
        validation: Option<Validation>,
        elapsed: Duration,
    ) -> Self {
        let mut entities = BTreeMap::new();
        for kind in EntityKind::ALL {
            entities.insert(kind.to_string(), extraction.entity_count(kind));
        }
        let mut relationships = BTreeMap::new();
        for kind in RelationKind::ALL {
            relationships.insert(kind.to_string(), extraction.relationship_count(kind));
        }

        let resolved = [RelationKind::Calls, RelationKind::Invokes, RelationKind::Accesses]
            .into_iter()
            .map(|k| extraction.relationship_count(k))
            .sum::<usize>();
        let unresolved = extraction.unresolved.len();
        let mut by_reason = BTreeMap::new();
        for reference in &extraction.unresolved {
            *by_reason.entry(reference.reason.to_string()).or_insert(0) += 1;
        }

        Self {
            generated_at: chrono::Utc::now().to_rfc3339(),
            duration_ms: elapsed.as_millis() as u64,
            dry_run: merge.dry_run,
            entities,
            relationships,
            stages: extraction.stages.clone(),
            decode: DecodeReport {
                entries: extraction.dumps.iter().map(|d| d.stats.entries).sum(),
                malformed: extraction.dumps.iter().map(|d| d.stats.malformed).sum(),
                dumps: extraction.dumps.clone(),
            },
            schema: extraction.schema_stats.clone(),
            inconsistencies: extraction.inconsistencies.clone(),
            degradations: extraction.degradations.clone(),
            unresolved: UnresolvedReport {
                total: unresolved,
                resolution_rate: resolution_rate(resolved, unresolved),
                by_reason,
                references: extraction.unresolved.clone(),
            },
            confidence: confidence_histogram(extraction),
            merge,
            halt: None,
            validation,
        }
    }

    pub fn to_json(&self) -> Result<String> {
        Ok(serde_json::to_string_pretty(self)?)
    }

    pub fn write(&self, path: &Path) -> Result<()> {
        fs_utils::write_atomic(path, self.to_json()?.as_bytes())?;
        tracing::info!("[REPORT] written to {}", path.display());
        Ok(())
    }

    /// One-line totals for the log
    pub fn log_summary(&self) {
        tracing::info!(
            "[REPORT] {} entities, {} relationships, {} unresolved ({:.1}% resolved), {} inconsistencies, {} degraded routines",
            self.entities.values().sum::<usize>(),
            self.relationships.values().sum::<usize>(),
            self.unresolved.total,
            self.unresolved.resolution_rate * 100.0,
            self.inconsistencies.len(),
            self.degradations.len()
        );
    }
}

fn resolution_rate(resolved: usize, unresolved: usize) -> f64 {
    match resolved + unresolved {
        0 => 1.0,
        total => resolved as f64 / total as f64,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::EngineConfig;
    use crate::pipeline::{DumpInput, Pipeline, PipelineInput, RoutineInput};
    use crate::store::MemoryGraphStore;
    use tempfile::TempDir;

    fn input() -> PipelineInput {
        PipelineInput {
            dumps: vec![DumpInput::inline(
                "DD.zwr",
                "^DD(2,0)=\"PATIENT^DPT\"\n^DD(2,.01,0)=\"NAME^F^^0;1\"\n^DD(2,.3,0)=\"WARD^P42'^DIC(42,^.3;1\"\n^DD(9,0)=\"EMPTY^X\"\n",
            )],
            routines: vec![RoutineInput::inline(
                "DG10",
                "DG10 ;test\n D EN^NOWHERE\n D MISSING\n S X=^DPT(1,0)\n Q\n",
            )],
            ..Default::default()
        }
    }

    #[test]
    fn test_resolution_rate() {
        assert_eq!(resolution_rate(0, 0), 1.0);
        assert_eq!(resolution_rate(3, 1), 0.75);
    }

    #[test]
    fn test_report_counts_and_unresolved() {
        let store = MemoryGraphStore::new();
        let report = Pipeline::new(EngineConfig::default())
            .unwrap()
            .run(&input(), &store)
            .unwrap();
        assert_eq!(report.entities["File"], 2);
        assert_eq!(report.entities["Routine"], 1);
        assert_eq!(report.unresolved.total, 2);
        assert_eq!(report.unresolved.by_reason["unknown routine"], 1);
        assert_eq!(report.unresolved.by_reason["unknown label"], 1);
        assert!((report.unresolved.resolution_rate - 1.0 / 3.0).abs() < 1e-9);
        assert_eq!(report.inconsistencies.len(), 1);
    }

    #[test]
    fn test_validation_flags_structural_gaps() {
        let store = MemoryGraphStore::new();
        let report = Pipeline::new(EngineConfig::default())
            .unwrap()
            .run(&input(), &store)
            .unwrap();
        let validation = report.validation.unwrap();
        assert!(validation.passed);
        assert_eq!(validation.files_without_fields, vec!["9".to_string()]);
        assert_eq!(validation.pointer_fields_without_target, vec!["2|.3".to_string()]);
    }

    #[test]
    fn test_histogram_buckets() {
        let extraction = Pipeline::new(EngineConfig::default())
            .unwrap()
            .extract(&input())
            .unwrap();
        let histogram = confidence_histogram(&extraction);
        // CONTAINS_FIELD edges are parser-confirmed
        assert_eq!(histogram["CONTAINS_FIELD"][9], 2);
        assert_eq!(histogram["ACCESSES"].iter().sum::<usize>(), 1);
    }

    #[test]
    fn test_write_report() {
        let temp = TempDir::new().unwrap();
        let path = temp.path().join("out").join("report.json");
        let report = Pipeline::new(EngineConfig::default())
            .unwrap()
            .run(&input(), &MemoryGraphStore::new())
            .unwrap();
        report.write(&path).unwrap();
        let json: serde_json::Value =
            serde_json::from_str(&std::fs::read_to_string(&path).unwrap()).unwrap();
        assert_eq!(json["dry_run"], false);
        assert!(json["generated_at"].is_string());
    }
}
