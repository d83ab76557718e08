//! Edge-tier contract and merge failure replay
//!
//! Merge-tier kinds must be count-invariant under re-run. Append-tier kinds
//! must NOT be: re-running without a reset duplicates them. Both halves are
//! asserted against the in-memory and SQLite stores.

use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

use vista_graph::error::StoreError;
use vista_graph::merge::{HaltCause, MergeTier};
use vista_graph::model::{EntityKind, RelationKind, WriteTier};
use vista_graph::store::{
    EdgeRecord, GraphStore, MemoryGraphStore, NodeRecord, SqliteGraphStore, StoreResult,
};
use vista_graph::{GraphError, GraphMergeEngine, Pipeline};

use crate::common::*;

fn build(fixture: &VistaFixture, store: &dyn GraphStore) {
    Pipeline::new(fixture.config())
        .unwrap()
        .run(&fixture.input(), store)
        .unwrap();
}

fn assert_rerun_contract(fixture: &VistaFixture, store: &dyn GraphStore) {
    build(fixture, store);
    let nodes = node_counts(store);
    let edges = edge_counts(store);
    assert!(store.edge_count(Some(RelationKind::Accesses)).unwrap() > 0);

    build(fixture, store);
    assert_eq!(node_counts(store), nodes);
    for ((kind, before), (_, after)) in edges.iter().zip(edge_counts(store)) {
        match kind.tier() {
            WriteTier::Merge => assert_eq!(after, *before, "{} changed on re-run", kind),
            WriteTier::Append => assert_eq!(after, before * 2, "{} not duplicated", kind),
        }
    }

    store.clear_edges(RelationKind::Accesses).unwrap();
    build(fixture, store);
    assert_eq!(edge_counts(store), edges);
}

#[test]
fn test_rerun_contract_memory_store() {
    let fixture = VistaFixture::standard();
    assert_rerun_contract(&fixture, &MemoryGraphStore::new());
}

#[test]
fn test_rerun_contract_sqlite_store() {
    let fixture = VistaFixture::standard();
    let store =
        SqliteGraphStore::open(&fixture.store_path(), 2, Duration::from_millis(100)).unwrap();
    assert_rerun_contract(&fixture, &store);
}

#[test]
fn test_sqlite_store_matches_memory_store() {
    let fixture = VistaFixture::standard();
    let memory = MemoryGraphStore::new();
    let sqlite =
        SqliteGraphStore::open(&fixture.store_path(), 2, Duration::from_millis(100)).unwrap();
    build(&fixture, &memory);
    build(&fixture, &sqlite);
    assert_eq!(node_counts(&memory), node_counts(&sqlite));
    assert_eq!(edge_counts(&memory), edge_counts(&sqlite));
    assert_eq!(
        sqlite
            .nodes_without_edge(EntityKind::File, RelationKind::ContainsField)
            .unwrap(),
        vec!["44".to_string()]
    );
}

/// Fails the first merged-edge batch permanently, then delegates
struct FailFirstEdgeBatch {
    inner: MemoryGraphStore,
    tripped: AtomicBool,
}

impl FailFirstEdgeBatch {
    fn new() -> Self {
        Self {
            inner: MemoryGraphStore::new(),
            tripped: AtomicBool::new(false),
        }
    }
}

impl GraphStore for FailFirstEdgeBatch {
    fn upsert_nodes(&self, batch: &[NodeRecord]) -> StoreResult<usize> {
        self.inner.upsert_nodes(batch)
    }

    fn merge_edges(&self, batch: &[EdgeRecord]) -> StoreResult<usize> {
        if !self.tripped.swap(true, Ordering::SeqCst) {
            return Err(StoreError::permanent("constraint violated"));
        }
        self.inner.merge_edges(batch)
    }

    fn append_edges(&self, batch: &[EdgeRecord]) -> StoreResult<usize> {
        self.inner.append_edges(batch)
    }

    fn node_count(&self, kind: Option<EntityKind>) -> StoreResult<usize> {
        self.inner.node_count(kind)
    }

    fn edge_count(&self, kind: Option<RelationKind>) -> StoreResult<usize> {
        self.inner.edge_count(kind)
    }

    fn clear_edges(&self, kind: RelationKind) -> StoreResult<usize> {
        self.inner.clear_edges(kind)
    }

    fn nodes_without_edge(
        &self,
        node_kind: EntityKind,
        edge_kind: RelationKind,
    ) -> StoreResult<Vec<String>> {
        self.inner.nodes_without_edge(node_kind, edge_kind)
    }
}

#[test]
fn test_merge_failure_is_replayable() {
    let fixture = VistaFixture::standard();
    let store = FailFirstEdgeBatch::new();
    let pipeline = Pipeline::new(fixture.config()).unwrap();

    let failure = match pipeline.run(&fixture.input(), &store) {
        Err(GraphError::MergeHalted(failure)) => *failure,
        other => panic!("expected a halted merge, got {:?}", other.map(|r| r.dry_run)),
    };
    assert_eq!(failure.tier, MergeTier::MergeEdges);
    assert!(matches!(failure.cause, HaltCause::Store { .. }));
    assert_eq!(failure.failed_batches, vec![0]);
    assert!(failure.pending.nodes.is_empty());
    assert!(!failure.pending.merge_edges.is_empty());
    assert!(!failure.pending.append_edges.is_empty());
    assert!(store.node_count(None).unwrap() > 0);
    assert_eq!(store.edge_count(None).unwrap(), 0);

    GraphMergeEngine::new(&store, pipeline.config().merge.clone())
        .unwrap()
        .merge(failure.pending)
        .unwrap();

    let clean = MemoryGraphStore::new();
    build(&fixture, &clean);
    assert_eq!(node_counts(&store), node_counts(&clean));
    assert_eq!(edge_counts(&store), edge_counts(&clean));
}

#[test]
fn test_halted_merge_keeps_run_report() {
    let fixture = VistaFixture::standard();
    let store = FailFirstEdgeBatch::new();
    let outcome = Pipeline::new(fixture.config())
        .unwrap()
        .execute(&fixture.input(), &store)
        .unwrap();

    let failure = outcome.failure.as_ref().unwrap();
    let halt = outcome.report.halt.as_ref().unwrap();
    assert_eq!(halt.tier, MergeTier::MergeEdges);
    assert_eq!(halt.failed_batches, vec![0]);
    assert_eq!(halt.pending_records, failure.pending.len());
    assert!(outcome.report.validation.is_none());
    assert_eq!(outcome.report.unresolved.total, 2);
    assert_eq!(outcome.report.degradations.len(), 1);

    let json = assert_valid_json(&outcome.report.to_json().unwrap(), "halted report");
    assert_eq!(json["halt"]["tier"], "merge_edges");
    assert_eq!(json["halt"]["cause"]["cause"], "store");

    assert!(matches!(outcome.into_result(), Err(GraphError::MergeHalted(_))));
}
