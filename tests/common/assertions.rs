//! Assertion helpers for store and report contents

use serde_json::Value;

use vista_graph::model::{EntityKind, RelationKind};
use vista_graph::store::GraphStore;

/// Assert that output is valid JSON and return parsed value
pub fn assert_valid_json(output: &str, context: &str) -> Value {
    serde_json::from_str(output).unwrap_or_else(|e| {
        panic!(
            "Expected valid JSON ({}): {}\nOutput:\n{}",
            context, e, output
        )
    })
}

/// Node counts per kind, in `EntityKind::ALL` order
pub fn node_counts(store: &dyn GraphStore) -> Vec<usize> {
    EntityKind::ALL
        .iter()
        .map(|kind| store.node_count(Some(*kind)).unwrap())
        .collect()
}

/// Edge counts per kind, in `RelationKind::ALL` order
pub fn edge_counts(store: &dyn GraphStore) -> Vec<(RelationKind, usize)> {
    RelationKind::ALL
        .iter()
        .map(|kind| (*kind, store.edge_count(Some(*kind)).unwrap()))
        .collect()
}
