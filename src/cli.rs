//! CLI argument definitions using clap with subcommand architecture

use clap::{Args, Parser, Subcommand};
use std::path::PathBuf;

use crate::model::RelationKind;

/// Knowledge-graph builder for FileMan dictionaries and M routines
#[derive(Parser, Debug)]
#[command(name = "vista-graph")]
#[command(about = "Builds a knowledge graph from FileMan dictionary dumps and M routine sources")]
#[command(version)]
#[command(propagate_version = true)]
pub struct Cli {
    /// Subcommand to execute
    #[command(subcommand)]
    pub command: Commands,

    /// Configuration file (defaults to vista-graph.toml when present)
    #[arg(short, long, global = true, env = "VISTA_GRAPH_CONFIG", value_name = "FILE")]
    pub config: Option<PathBuf>,

    /// Show verbose output (debug logging)
    #[arg(short, long, global = true)]
    pub verbose: bool,

    /// Show progress bars during long operations
    #[arg(long, global = true)]
    pub progress: bool,
}

#[derive(Subcommand, Debug)]
pub enum Commands {
    /// Extract, resolve and merge everything into the graph store
    #[command(visible_alias = "b")]
    Build(BuildArgs),

    /// Decode a dictionary dump and print its entries as JSON lines
    Decode(DecodeArgs),

    /// Remove every edge of one kind from the store
    ResetEdges(ResetEdgesArgs),

    /// Print store counts and structural checks
    Validate(ValidateArgs),
}

#[derive(Args, Debug)]
pub struct BuildArgs {
    /// Dump file, or directory searched for *.zwr files (repeatable)
    #[arg(long = "dump", value_name = "PATH", required_unless_present = "routines")]
    pub dumps: Vec<PathBuf>,

    /// Root directory of routine sources
    #[arg(long, value_name = "DIR")]
    pub routines: Option<PathBuf>,

    /// Package registry (TOML)
    #[arg(long, value_name = "FILE")]
    pub registry: Option<PathBuf>,

    /// SQLite graph store (overrides [store] path)
    #[arg(long, value_name = "FILE")]
    pub store: Option<PathBuf>,

    /// Extract and resolve but write nothing
    #[arg(long)]
    pub dry_run: bool,

    /// Clear append-only edge kinds before merging
    #[arg(long)]
    pub reset_append_edges: bool,

    /// Extraction worker threads
    #[arg(long, value_name = "N")]
    pub workers: Option<usize>,

    /// Records per merge batch (clamped to 100..=50000)
    #[arg(long, value_name = "N")]
    pub batch_size: Option<usize>,

    /// Also write the run report to this file
    #[arg(long, value_name = "FILE")]
    pub report: Option<PathBuf>,
}

#[derive(Args, Debug)]
pub struct DecodeArgs {
    /// Dump file to decode
    #[arg(value_name = "DUMP")]
    pub dump: PathBuf,

    /// Print only the summary
    #[arg(long)]
    pub summary_only: bool,

    /// Stop after N entries
    #[arg(long, value_name = "N")]
    pub limit: Option<usize>,
}

#[derive(Args, Debug)]
pub struct ResetEdgesArgs {
    /// SQLite graph store (overrides [store] path)
    #[arg(long, value_name = "FILE")]
    pub store: Option<PathBuf>,

    /// Relationship kind, e.g. ACCESSES
    #[arg(long, value_parser = parse_relation_kind)]
    pub kind: RelationKind,
}

#[derive(Args, Debug)]
pub struct ValidateArgs {
    /// SQLite graph store (overrides [store] path)
    #[arg(long, value_name = "FILE")]
    pub store: Option<PathBuf>,
}

fn parse_relation_kind(s: &str) -> Result<RelationKind, String> {
    RelationKind::from_str(s).ok_or_else(|| {
        let known: Vec<&str> = RelationKind::ALL.iter().map(|k| k.as_str()).collect();
        format!("unknown relationship kind '{}' (expected one of {})", s, known.join(", "))
    })
}
