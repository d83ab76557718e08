//! Validate command handler - store counts and structural checks

use crate::cli::ValidateArgs;
use crate::commands::CommandContext;
use crate::error::Result;
use crate::report::StoreSummary;

pub fn run_validate(args: &ValidateArgs, ctx: &CommandContext) -> Result<String> {
    let store = ctx.open_store(args.store.as_deref())?;
    let summary = StoreSummary::collect(&store)?;
    tracing::info!(
        "[VALIDATE] {}: {} nodes, {} edges, {} files without fields",
        store.path().display(),
        summary.nodes.values().sum::<usize>(),
        summary.edges.values().sum::<usize>(),
        summary.files_without_fields.len()
    );
    Ok(format!("{}\n", serde_json::to_string_pretty(&summary)?))
}
