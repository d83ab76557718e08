//! vista-graph-engine: knowledge graph builder for FileMan dictionaries and M routines
//!
//! The engine reads two inputs, a global dump of the FileMan data dictionary
//! and the routine source tree, and produces one graph: files, fields,
//! cross-references, routines, labels, packages and data stores, joined by
//! structural and code relationships with confidence scores.
//!
//! # Pipeline
//!
//! - [`dictionary`]: dump decoding and schema extraction
//! - [`routine`]: routine structure, classification and code relationships
//! - [`resolver`]: business-key resolution between stages
//! - [`merge`]: batched, retried, replayable writes through a [`store::GraphStore`]
//! - [`pipeline`]: stage orchestration with hard barriers
//! - [`report`]: counts, unresolved references, validation
//!
//! # Example
//!
//! ```ignore
//! use vista_graph::{EngineConfig, Pipeline, PipelineInput, DumpInput, RoutineInput};
//! use vista_graph::store::MemoryGraphStore;
//!
//! let input = PipelineInput {
//!     dumps: vec![DumpInput::file("DD.zwr")],
//!     routines: vec![RoutineInput::file("DG10", "routines/DG10.m")],
//!     ..Default::default()
//! };
//! let store = MemoryGraphStore::new();
//! let report = Pipeline::new(EngineConfig::default())?.run(&input, &store)?;
//! println!("{}", report.to_json()?);
//! ```

pub mod cli;
pub mod commands;
pub mod config;
pub mod confidence;
pub mod dictionary;
pub mod error;
pub mod fs_utils;
pub mod merge;
pub mod model;
pub mod pipeline;
pub mod registry;
pub mod report;
pub mod resolver;
pub mod routine;
pub mod store;

// Re-export commonly used types
pub use config::EngineConfig;
pub use confidence::{ConfidenceTable, Evidence};
pub use error::{GraphError, Result, StoreError};
pub use merge::{GraphMergeEngine, MergeFailure, MergePlan, MergeReport};
pub use model::{BusinessKey, Entity, EntityKind, RelationKind, Relationship};
pub use pipeline::{DumpInput, Extraction, Pipeline, PipelineInput, RoutineInput, RunOutcome};
pub use registry::PackageRegistry;
pub use report::RunReport;
pub use resolver::{ResolutionContext, Stage};
