//! Command modules for the vista-graph CLI
//!
//! Each command module implements a single top-level command:
//! - `build` - Extract, resolve and merge into the graph store
//! - `decode` - Decode one dictionary dump to JSON lines
//! - `reset_edges` - Clear one relationship kind from the store
//! - `validate` - Store counts and structural checks
//!
//! All command handlers take their respective `Args` struct from `cli.rs`
//! and a shared `CommandContext`, and return the text printed on stdout.

pub mod build;
pub mod decode;
pub mod reset_edges;
pub mod validate;

pub use build::run_build;
pub use decode::run_decode;
pub use reset_edges::run_reset_edges;
pub use validate::run_validate;

use std::path::Path;
use std::time::Duration;

use crate::config::EngineConfig;
use crate::error::Result;
use crate::store::SqliteGraphStore;

/// Shared context passed to all command handlers
#[derive(Debug, Clone, Default)]
pub struct CommandContext {
    /// Loaded configuration, before per-command overrides
    pub config: EngineConfig,
    /// Show verbose output
    pub verbose: bool,
    /// Show progress during long operations
    pub progress: bool,
}

impl CommandContext {
    pub fn new(config: EngineConfig, verbose: bool, progress: bool) -> Self {
        Self {
            config,
            verbose,
            progress,
        }
    }

    /// Open the SQLite store, preferring an explicit path over the config
    pub fn open_store(&self, path: Option<&Path>) -> Result<SqliteGraphStore> {
        let path = path.unwrap_or(&self.config.store.path);
        Ok(SqliteGraphStore::open(
            path,
            self.config.merge.write_slots,
            Duration::from_millis(self.config.store.busy_timeout_ms),
        )?)
    }
}
