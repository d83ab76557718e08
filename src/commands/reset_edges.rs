//! Reset-edges command handler
//!
//! Append-tier kinds (ACCESSES) duplicate on every re-run; clearing them
//! first is the supported way to rebuild.

use serde_json::json;

use crate::cli::ResetEdgesArgs;
use crate::commands::CommandContext;
use crate::error::Result;
use crate::store::GraphStore;

pub fn run_reset_edges(args: &ResetEdgesArgs, ctx: &CommandContext) -> Result<String> {
    let store = ctx.open_store(args.store.as_deref())?;
    let removed = store.clear_edges(args.kind)?;
    tracing::info!("[STORE] removed {} {} edges", removed, args.kind);
    let output = json!({
        "store": store.path().display().to_string(),
        "kind": args.kind,
        "removed": removed,
    });
    Ok(format!("{}\n", serde_json::to_string_pretty(&output)?))
}
