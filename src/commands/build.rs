//! Build command handler - the full extraction and merge

use std::path::{Path, PathBuf};

use crate::cli::BuildArgs;
use crate::commands::CommandContext;
use crate::error::Result;
use crate::pipeline::{discover_dumps, discover_routines, Pipeline, PipelineInput};
use crate::registry::PackageRegistry;
use crate::store::MemoryGraphStore;

pub fn run_build(args: &BuildArgs, ctx: &CommandContext) -> Result<String> {
    let mut config = ctx.config.clone();
    if let Some(workers) = args.workers {
        config.extraction.workers = workers;
    }
    if let Some(batch_size) = args.batch_size {
        config.merge = config.merge.with_batch_size(batch_size);
    }
    if args.dry_run {
        config.merge.dry_run = true;
    }
    if let Some(store) = &args.store {
        config.store.path = store.clone();
    }

    let mut input = PipelineInput::default();
    if let Some(path) = &args.registry {
        input.registry = PackageRegistry::load(path)?;
    }
    for path in &args.dumps {
        input.dumps.extend(discover_dumps(path)?);
    }
    if let Some(root) = &args.routines {
        input.routines = discover_routines(root, &config.extraction.routine_extension)?;
    }
    tracing::info!(
        "[BUILD] {} dumps, {} routines, {} packages",
        input.dumps.len(),
        input.routines.len(),
        input.registry.packages.len()
    );

    let dry_run = config.merge.dry_run;
    let context = CommandContext {
        config,
        ..ctx.clone()
    };
    let pipeline = Pipeline::new(context.config.clone())?
        .with_reset_append_edges(args.reset_append_edges)
        .with_progress(ctx.progress);

    let outcome = if dry_run {
        pipeline.execute(&input, &MemoryGraphStore::new())?
    } else {
        let store = context.open_store(None)?;
        pipeline.execute(&input, &store)?
    };

    outcome.report.log_summary();
    let report_path = match (&args.report, &outcome.failure) {
        (Some(path), _) => Some(path.clone()),
        (None, Some(_)) => Some(halted_report_path(&context.config.store.path)),
        (None, None) => None,
    };
    if let Some(path) = &report_path {
        outcome.report.write(path)?;
        if outcome.failure.is_some() {
            tracing::error!("[BUILD] merge halted; run report written to {}", path.display());
        }
    }
    let report = outcome.into_result()?;
    Ok(format!("{}\n", report.to_json()?))
}

/// Report location for a halted build run without `--report`
fn halted_report_path(store: &Path) -> PathBuf {
    let mut name = store
        .file_name()
        .map(|n| n.to_os_string())
        .unwrap_or_else(|| "vista-graph.db".into());
    name.push(".report.json");
    store.with_file_name(name)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_halted_report_beside_store() {
        assert_eq!(
            halted_report_path(Path::new("graph/vista-graph.db")),
            PathBuf::from("graph/vista-graph.db.report.json")
        );
        assert_eq!(
            halted_report_path(Path::new("store.db")),
            PathBuf::from("store.db.report.json")
        );
    }
}
