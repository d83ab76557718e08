//! Business-key entity resolution
//!
//! [`ResolutionContext`] is created once per run and passed by reference to
//! every stage. Its lifecycle is:
//!
//! 1. **load**: each entity-creating stage opens a [`StageWriter`] with
//!    [`ResolutionContext::begin_stage`], registers the keys it owns and calls
//!    [`StageWriter::finish`], which seals those entity kinds. Stages run in
//!    the fixed order Registry, Schema, RoutineStructure.
//! 2. **resolve**: relationship emitters take `&ResolutionContext`, call
//!    [`ResolutionContext::require`] for the kinds they depend on and then
//!    only look keys up. Lookups never insert.
//! 3. **discard**: the context is dropped at the end of the run. Identities
//!    are never persisted.
//!
//! While a `StageWriter` is alive the context is mutably borrowed, so no
//! emitter can observe a half-loaded tier.

use ahash::AHashMap;
use serde::Serialize;

use crate::error::{GraphError, Result};
use crate::model::{BusinessKey, EntityId, EntityKind, FileRange, Package};

/// Entity-creating stages, in execution order
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum Stage {
    Registry,
    Schema,
    RoutineStructure,
}

impl Stage {
    /// Entity kinds this stage may create
    pub fn owns(&self) -> &'static [EntityKind] {
        match self {
            Self::Registry => &[EntityKind::Package],
            Self::Schema => &[
                EntityKind::File,
                EntityKind::Field,
                EntityKind::CrossReference,
                EntityKind::DataStore,
            ],
            Self::RoutineStructure => &[
                EntityKind::Routine,
                EntityKind::Label,
                EntityKind::DataStore,
            ],
        }
    }

    /// Last stage allowed to add a kind; the kind is sealed when it finishes
    fn sealing_stage(kind: EntityKind) -> Stage {
        match kind {
            EntityKind::Package => Self::Registry,
            EntityKind::File | EntityKind::Field | EntityKind::CrossReference => Self::Schema,
            EntityKind::Routine | EntityKind::Label | EntityKind::DataStore => {
                Self::RoutineStructure
            }
        }
    }
}

/// Result of a registration
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Registration {
    pub id: EntityId,
    pub created: bool,
}

#[derive(Debug, Default)]
pub struct ResolutionContext {
    ids: AHashMap<BusinessKey, EntityId>,
    keys: [Vec<BusinessKey>; 7],
    sealed: [bool; 7],
    last_stage: Option<Stage>,
    prefixes: Vec<(String, String)>,
    package_files: AHashMap<String, String>,
    package_ranges: Vec<(String, FileRange)>,
    store_files: AHashMap<String, String>,
    top_labels: AHashMap<String, String>,
}

impl ResolutionContext {
    pub fn new() -> Self {
        Self::default()
    }

    /// Open the registration window for `stage`
    pub fn begin_stage(&mut self, stage: Stage) -> Result<StageWriter<'_>> {
        if let Some(last) = self.last_stage {
            if stage <= last {
                return Err(GraphError::StageError {
                    message: format!("{:?} cannot start after {:?}", stage, last),
                });
            }
        }
        tracing::debug!("[RESOLVER] begin {:?}", stage);
        Ok(StageWriter {
            ctx: self,
            stage,
            created: 0,
            existing: 0,
        })
    }

    /// Fail unless every kind in `kinds` is fully loaded
    pub fn require(&self, kinds: &[EntityKind]) -> Result<()> {
        for kind in kinds {
            if !self.sealed[*kind as usize] {
                return Err(GraphError::StageError {
                    message: format!("{} entities are not fully indexed yet", kind),
                });
            }
        }
        Ok(())
    }

    pub fn is_sealed(&self, kind: EntityKind) -> bool {
        self.sealed[kind as usize]
    }

    /// Look up a business key. Never creates an entity.
    pub fn resolve(&self, key: &BusinessKey) -> Option<EntityId> {
        self.ids.get(key).copied()
    }

    pub fn resolve_file(&self, number: &str) -> Option<EntityId> {
        self.resolve(&BusinessKey::File(number.to_string()))
    }

    pub fn resolve_field(&self, file: &str, field: &str) -> Option<EntityId> {
        self.resolve(&BusinessKey::field(file, field))
    }

    pub fn resolve_routine(&self, name: &str) -> Option<EntityId> {
        self.resolve(&BusinessKey::Routine(name.to_string()))
    }

    pub fn resolve_label(&self, routine: &str, label: &str) -> Option<EntityId> {
        self.resolve(&BusinessKey::label(routine, label))
    }

    pub fn resolve_data_store(&self, name: &str) -> Option<EntityId> {
        self.resolve(&BusinessKey::DataStore(name.to_string()))
    }

    /// Business key behind an identity handed out by this context
    pub fn key(&self, id: EntityId) -> Option<&BusinessKey> {
        self.keys[id.kind as usize].get(id.index as usize)
    }

    pub fn count(&self, kind: EntityKind) -> usize {
        self.keys[kind as usize].len()
    }

    /// Every key of one kind, in registration order
    pub fn keys(&self, kind: EntityKind) -> &[BusinessKey] {
        &self.keys[kind as usize]
    }

    /// Owning package by longest matching routine-name prefix
    pub fn package_for_routine(&self, routine: &str) -> Option<&str> {
        self.prefixes
            .iter()
            .find(|(prefix, _)| routine.starts_with(prefix.as_str()))
            .map(|(_, package)| package.as_str())
    }

    /// Owning package by explicit file number, then by numeric range
    pub fn package_for_file(&self, number: &str) -> Option<&str> {
        if let Some(package) = self.package_files.get(number) {
            return Some(package.as_str());
        }
        self.package_ranges
            .iter()
            .find(|(_, range)| range.contains(number))
            .map(|(package, _)| package.as_str())
    }

    /// File whose storage root is the named data store
    pub fn file_for_store(&self, store: &str) -> Option<&str> {
        self.store_files.get(store).map(String::as_str)
    }

    /// First label of a routine (where `D ^ROUTINE` lands)
    pub fn top_label(&self, routine: &str) -> Option<&str> {
        self.top_labels.get(routine).map(String::as_str)
    }
}

/// Registration handle for one stage. Dropping it without [`finish`](Self::finish)
/// leaves the stage's kinds unsealed, so downstream emitters refuse to run.
pub struct StageWriter<'a> {
    ctx: &'a mut ResolutionContext,
    stage: Stage,
    created: usize,
    existing: usize,
}

impl<'a> StageWriter<'a> {
    /// Register a key owned by this stage. Registering an existing key
    /// returns the identity it already has.
    pub fn register(&mut self, key: BusinessKey) -> Result<Registration> {
        let kind = key.kind();
        if !self.stage.owns().contains(&kind) || self.ctx.sealed[kind as usize] {
            return Err(GraphError::StageError {
                message: format!("{:?} stage may not create {}", self.stage, key),
            });
        }
        if let Some(id) = self.ctx.ids.get(&key) {
            self.existing += 1;
            return Ok(Registration {
                id: *id,
                created: false,
            });
        }
        let slot = &mut self.ctx.keys[kind as usize];
        let id = EntityId {
            kind,
            index: slot.len() as u32,
        };
        slot.push(key.clone());
        self.ctx.ids.insert(key, id);
        self.created += 1;
        Ok(Registration { id, created: true })
    }

    pub fn register_package(&mut self, package: &Package) -> Result<Registration> {
        let registration = self.register(BusinessKey::Package(package.name.clone()))?;
        for prefix in &package.prefixes {
            self.ctx
                .prefixes
                .push((prefix.clone(), package.name.clone()));
        }
        for file in &package.file_numbers {
            self.ctx
                .package_files
                .entry(file.clone())
                .or_insert_with(|| package.name.clone());
        }
        for range in &package.file_ranges {
            self.ctx
                .package_ranges
                .push((package.name.clone(), range.clone()));
        }
        // longest prefix first; ties by prefix text for determinism
        self.ctx
            .prefixes
            .sort_by(|a, b| b.0.len().cmp(&a.0.len()).then_with(|| a.0.cmp(&b.0)));
        Ok(registration)
    }

    pub fn register_data_store(&mut self, name: &str, file: Option<&str>) -> Result<Registration> {
        let registration = self.register(BusinessKey::DataStore(name.to_string()))?;
        if let Some(file) = file {
            self.ctx
                .store_files
                .entry(name.to_string())
                .or_insert_with(|| file.to_string());
        }
        Ok(registration)
    }

    /// Labels must be registered in line order; the first one per routine
    /// becomes its top label
    pub fn register_label(&mut self, routine: &str, label: &str) -> Result<Registration> {
        let registration = self.register(BusinessKey::label(routine, label))?;
        self.ctx
            .top_labels
            .entry(routine.to_string())
            .or_insert_with(|| label.to_string());
        Ok(registration)
    }

    /// Read access during the stage, for kinds sealed by earlier stages
    pub fn context(&self) -> &ResolutionContext {
        self.ctx
    }

    /// Seal the kinds this stage is the last owner of
    pub fn finish(self) -> StageSummary {
        for kind in self.stage.owns() {
            if Stage::sealing_stage(*kind) == self.stage {
                self.ctx.sealed[*kind as usize] = true;
            }
        }
        self.ctx.last_stage = Some(self.stage);
        tracing::info!(
            "[RESOLVER] {:?} sealed: {} created, {} already known",
            self.stage,
            self.created,
            self.existing
        );
        StageSummary {
            stage: self.stage,
            created: self.created,
            existing: self.existing,
        }
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct StageSummary {
    pub stage: Stage,
    pub created: usize,
    pub existing: usize,
}
