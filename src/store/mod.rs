//! Graph store seam
//!
//! [`GraphStore`] is the protocol the merge engine writes through. Nodes are
//! addressed by `(kind, rendered business key)`, never by run-scoped
//! resolver identities.
//!
//! Edge write tiers:
//! - [`GraphStore::merge_edges`] is idempotent on
//!   `(kind, from, to, discriminator)`. Re-running leaves counts unchanged.
//! - [`GraphStore::append_edges`] always inserts. Re-running the same input
//!   without [`GraphStore::clear_edges`] for that kind duplicates every edge.
//!   This is the operating contract for high-volume kinds, not a defect.

pub mod sqlite;

use std::collections::BTreeMap;

use parking_lot::Mutex;
use serde::Serialize;
use serde_json::Value;

use crate::error::{GraphError, Result, StoreError};
use crate::model::{Entity, EntityKind, RelationKind, Relationship};
use crate::resolver::ResolutionContext;

pub use sqlite::SqliteGraphStore;

pub type StoreResult<T> = std::result::Result<T, StoreError>;

/// Store address of a node
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize)]
pub struct NodeRef {
    pub kind: EntityKind,
    pub key: String,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct NodeRecord {
    pub node: NodeRef,
    /// Stable integer id derived from the business key
    pub id: i64,
    pub properties: Value,
}

impl NodeRecord {
    pub fn from_entity(entity: &Entity) -> Result<Self> {
        let key = entity.key();
        Ok(Self {
            node: NodeRef {
                kind: key.kind(),
                key: key.render(),
            },
            id: key.stable_id(),
            properties: entity.properties()?,
        })
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct EdgeRecord {
    pub kind: RelationKind,
    pub from: NodeRef,
    pub to: NodeRef,
    /// Empty when the kind allows one edge per endpoint pair
    pub discriminator: String,
    pub properties: Value,
}

impl EdgeRecord {
    /// Translate resolver identities into store addresses
    pub fn from_relationship(rel: &Relationship, ctx: &ResolutionContext) -> Result<Self> {
        let address = |id| {
            ctx.key(id)
                .map(|key| NodeRef {
                    kind: key.kind(),
                    key: key.render(),
                })
                .ok_or_else(|| GraphError::StageError {
                    message: format!("{} edge references an unknown identity {:?}", rel.kind, id),
                })
        };
        Ok(Self {
            kind: rel.kind,
            from: address(rel.from)?,
            to: address(rel.to)?,
            discriminator: rel.discriminator.clone().unwrap_or_default(),
            properties: rel.properties()?,
        })
    }

    /// Identity of the edge in the merge tier
    pub fn merge_key(&self) -> (RelationKind, &NodeRef, &NodeRef, &str) {
        (self.kind, &self.from, &self.to, self.discriminator.as_str())
    }
}

/// Write protocol of the external graph store. Implementations must be safe
/// to call from several write slots at once.
pub trait GraphStore: Send + Sync {
    /// Create-if-absent, refresh properties on match
    fn upsert_nodes(&self, batch: &[NodeRecord]) -> StoreResult<usize>;

    /// Idempotent edge merge
    fn merge_edges(&self, batch: &[EdgeRecord]) -> StoreResult<usize>;

    /// Non-idempotent edge creation; see the module docs
    fn append_edges(&self, batch: &[EdgeRecord]) -> StoreResult<usize>;

    fn node_count(&self, kind: Option<EntityKind>) -> StoreResult<usize>;

    fn edge_count(&self, kind: Option<RelationKind>) -> StoreResult<usize>;

    /// Remove every edge of one kind, in either tier
    fn clear_edges(&self, kind: RelationKind) -> StoreResult<usize>;

    /// Keys of `node_kind` nodes with no outgoing `edge_kind` edge
    fn nodes_without_edge(
        &self,
        node_kind: EntityKind,
        edge_kind: RelationKind,
    ) -> StoreResult<Vec<String>>;
}

type EdgeKey = (RelationKind, NodeRef, NodeRef, String);

#[derive(Default)]
struct MemoryInner {
    nodes: BTreeMap<NodeRef, NodeRecord>,
    merged: BTreeMap<EdgeKey, EdgeRecord>,
    appended: Vec<EdgeRecord>,
}

/// In-process store, used by dry runs and tests
#[derive(Default)]
pub struct MemoryGraphStore {
    inner: Mutex<MemoryInner>,
}

impl MemoryGraphStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn node(&self, kind: EntityKind, key: &str) -> Option<NodeRecord> {
        self.inner
            .lock()
            .nodes
            .get(&NodeRef {
                kind,
                key: key.to_string(),
            })
            .cloned()
    }

    pub fn edges(&self, kind: RelationKind) -> Vec<EdgeRecord> {
        let inner = self.inner.lock();
        inner
            .merged
            .values()
            .chain(inner.appended.iter())
            .filter(|e| e.kind == kind)
            .cloned()
            .collect()
    }
}

impl GraphStore for MemoryGraphStore {
    fn upsert_nodes(&self, batch: &[NodeRecord]) -> StoreResult<usize> {
        let mut inner = self.inner.lock();
        for record in batch {
            inner.nodes.insert(record.node.clone(), record.clone());
        }
        Ok(batch.len())
    }

    fn merge_edges(&self, batch: &[EdgeRecord]) -> StoreResult<usize> {
        let mut inner = self.inner.lock();
        for edge in batch {
            let key = (
                edge.kind,
                edge.from.clone(),
                edge.to.clone(),
                edge.discriminator.clone(),
            );
            inner.merged.insert(key, edge.clone());
        }
        Ok(batch.len())
    }

    fn append_edges(&self, batch: &[EdgeRecord]) -> StoreResult<usize> {
        self.inner.lock().appended.extend_from_slice(batch);
        Ok(batch.len())
    }

    fn node_count(&self, kind: Option<EntityKind>) -> StoreResult<usize> {
        let inner = self.inner.lock();
        Ok(match kind {
            Some(kind) => inner.nodes.keys().filter(|n| n.kind == kind).count(),
            None => inner.nodes.len(),
        })
    }

    fn edge_count(&self, kind: Option<RelationKind>) -> StoreResult<usize> {
        let inner = self.inner.lock();
        let matches = |e: &&EdgeRecord| kind.map_or(true, |k| e.kind == k);
        Ok(inner.merged.values().filter(matches).count() + inner.appended.iter().filter(matches).count())
    }

    fn clear_edges(&self, kind: RelationKind) -> StoreResult<usize> {
        let mut inner = self.inner.lock();
        let before = inner.merged.len() + inner.appended.len();
        inner.merged.retain(|key, _| key.0 != kind);
        inner.appended.retain(|e| e.kind != kind);
        Ok(before - inner.merged.len() - inner.appended.len())
    }

    fn nodes_without_edge(
        &self,
        node_kind: EntityKind,
        edge_kind: RelationKind,
    ) -> StoreResult<Vec<String>> {
        let inner = self.inner.lock();
        let with_edge: std::collections::BTreeSet<&NodeRef> = inner
            .merged
            .values()
            .chain(inner.appended.iter())
            .filter(|e| e.kind == edge_kind)
            .map(|e| &e.from)
            .collect();
        Ok(inner
            .nodes
            .keys()
            .filter(|n| n.kind == node_kind && !with_edge.contains(n))
            .map(|n| n.key.clone())
            .collect())
    }
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use serde_json::json;

    pub(crate) fn node(kind: EntityKind, key: &str) -> NodeRecord {
        NodeRecord {
            node: NodeRef {
                kind,
                key: key.to_string(),
            },
            id: 0,
            properties: json!({ "key": key }),
        }
    }

    pub(crate) fn edge(kind: RelationKind, from: &str, to: &str, disc: &str) -> EdgeRecord {
        EdgeRecord {
            kind,
            from: NodeRef {
                kind: EntityKind::Label,
                key: from.to_string(),
            },
            to: NodeRef {
                kind: EntityKind::DataStore,
                key: to.to_string(),
            },
            discriminator: disc.to_string(),
            properties: json!({ "confidence": 1.0 }),
        }
    }

    #[test]
    fn test_memory_upsert_refreshes() {
        let store = MemoryGraphStore::new();
        store.upsert_nodes(&[node(EntityKind::File, "2")]).unwrap();
        let mut refreshed = node(EntityKind::File, "2");
        refreshed.properties = json!({ "name": "PATIENT" });
        store.upsert_nodes(&[refreshed]).unwrap();
        assert_eq!(store.node_count(Some(EntityKind::File)).unwrap(), 1);
        assert_eq!(
            store.node(EntityKind::File, "2").unwrap().properties,
            json!({ "name": "PATIENT" })
        );
    }

    #[test]
    fn test_memory_edge_tiers() {
        let store = MemoryGraphStore::new();
        let batch = vec![
            edge(RelationKind::Calls, "DG10|EN", "DG10|X", "5:3"),
            edge(RelationKind::Calls, "DG10|EN", "DG10|X", "6:3"),
        ];
        store.merge_edges(&batch).unwrap();
        store.merge_edges(&batch).unwrap();
        assert_eq!(store.edge_count(Some(RelationKind::Calls)).unwrap(), 2);

        let access = vec![edge(RelationKind::Accesses, "DG10|EN", "DPT", "4:5")];
        store.append_edges(&access).unwrap();
        store.append_edges(&access).unwrap();
        assert_eq!(store.edge_count(Some(RelationKind::Accesses)).unwrap(), 2);

        assert_eq!(store.clear_edges(RelationKind::Accesses).unwrap(), 2);
        assert_eq!(store.edge_count(None).unwrap(), 2);
    }

    #[test]
    fn test_memory_nodes_without_edge() {
        let store = MemoryGraphStore::new();
        store
            .upsert_nodes(&[node(EntityKind::Label, "DG10|EN"), node(EntityKind::Label, "DG10|Q")])
            .unwrap();
        store
            .merge_edges(&[edge(RelationKind::Calls, "DG10|EN", "X", "")])
            .unwrap();
        assert_eq!(
            store
                .nodes_without_edge(EntityKind::Label, RelationKind::Calls)
                .unwrap(),
            vec!["DG10|Q".to_string()]
        );
    }
}
