//! Decode command handler - dump entries as JSON lines, then a summary

use serde_json::json;

use crate::cli::DecodeArgs;
use crate::commands::CommandContext;
use crate::dictionary::{DictionaryDecoder, SchemaExtractor};
use crate::error::Result;

pub fn run_decode(args: &DecodeArgs, ctx: &CommandContext) -> Result<String> {
    let mut decoder = DictionaryDecoder::open(&args.dump)?
        .with_max_samples(ctx.config.extraction.malformed_samples);
    let mut schema = SchemaExtractor::new();
    let mut output = String::new();
    let mut emitted = 0usize;

    for entry in decoder.by_ref() {
        if args.limit.is_some_and(|limit| emitted >= limit) {
            break;
        }
        schema.ingest(&entry);
        if !args.summary_only {
            output.push_str(&serde_json::to_string(&entry)?);
            output.push('\n');
        }
        emitted += 1;
    }

    let stats = decoder.into_stats();
    let model = schema.finish();
    tracing::info!(
        "[DECODE] {}: {} entries, {} malformed",
        args.dump.display(),
        stats.entries,
        stats.malformed
    );
    let summary = json!({
        "summary": {
            "origin": args.dump.display().to_string(),
            "decode": stats,
            "schema": model.stats,
            "files": model.files.len(),
            "fields": model.fields.len(),
            "cross_references": model.xrefs.len(),
        }
    });
    output.push_str(&serde_json::to_string(&summary)?);
    output.push('\n');
    Ok(output)
}
