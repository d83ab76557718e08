//! Build orchestration
//!
//! A build runs in hard barriers:
//!
//! 1. Registry: packages are registered and sealed.
//! 2. Schema: dump files are decoded in parallel, merged into one
//!    [`SchemaModel`] and registered.
//! 3. Routine structure: routines are scanned in parallel and registered.
//! 4. Relationships: with every tier sealed, schema links and code edges are
//!    emitted against the frozen [`ResolutionContext`].
//! 5. Merge: nodes, then merged edges, then appended edges.
//!
//! Parallel work never touches the resolver; registration happens on the
//! calling thread between barriers.

use std::collections::BTreeSet;
use std::path::{Path, PathBuf};
use std::time::{Duration, Instant};

use ahash::AHashMap;
use ignore::WalkBuilder;
use indicatif::{ProgressBar, ProgressStyle};
use rayon::prelude::*;
use serde::Serialize;

use crate::confidence::{ConfidenceTable, Evidence};
use crate::config::EngineConfig;
use crate::dictionary::{
    link_schema, register_schema, DecodeStats, DictionaryDecoder, SchemaExtractor, SchemaModel,
    SchemaStats,
};
use crate::error::{GraphError, ParseDegradation, Result, SchemaInconsistency, UnresolvedReference};
use crate::fs_utils;
use crate::merge::{CancellationToken, GraphMergeEngine, MergeFailure, MergePlan};
use crate::model::{
    BusinessKey, DataStoreNode, EdgeDetail, Entity, EntityId, EntityKind, Label, RelationKind,
    Relationship, StoreOrigin, WriteTier,
};
use crate::registry::PackageRegistry;
use crate::report::{self, HaltSummary, RunReport};
use crate::resolver::{ResolutionContext, Stage, StageSummary};
use crate::routine::{
    classify_label, register_structure, CodeRelationshipExtractor, LabelSignals, RoutineEdges,
    RoutineStructure, RoutineStructureExtractor,
};
use crate::store::{EdgeRecord, GraphStore, NodeRecord};

/// Where input text comes from
#[derive(Debug, Clone)]
pub enum Source {
    File(PathBuf),
    Inline(String),
}

impl Source {
    fn read(&self, origin: &str) -> Result<String> {
        match self {
            Self::File(path) => {
                let (text, lossy) = fs_utils::read_text_lossy(path)?;
                if lossy {
                    tracing::warn!("[ROUTINES] {}: invalid UTF-8 replaced", origin);
                }
                Ok(text)
            }
            Self::Inline(text) => Ok(text.clone()),
        }
    }
}

#[derive(Debug, Clone)]
pub struct DumpInput {
    pub origin: String,
    pub source: Source,
}

impl DumpInput {
    pub fn file(path: impl Into<PathBuf>) -> Self {
        let path = path.into();
        Self {
            origin: path.display().to_string(),
            source: Source::File(path),
        }
    }

    pub fn inline(origin: impl Into<String>, text: impl Into<String>) -> Self {
        Self {
            origin: origin.into(),
            source: Source::Inline(text.into()),
        }
    }
}

#[derive(Debug, Clone)]
pub struct RoutineInput {
    pub name: String,
    pub source: Source,
}

impl RoutineInput {
    pub fn file(name: impl Into<String>, path: impl Into<PathBuf>) -> Self {
        Self {
            name: name.into(),
            source: Source::File(path.into()),
        }
    }

    pub fn inline(name: impl Into<String>, text: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            source: Source::Inline(text.into()),
        }
    }
}

/// Everything one build reads
#[derive(Debug, Clone, Default)]
pub struct PipelineInput {
    pub registry: PackageRegistry,
    pub dumps: Vec<DumpInput>,
    pub routines: Vec<RoutineInput>,
}

/// Routine name for a source file. `_` stands in for a leading `%`, which
/// most filesystems used for routine directories do not allow.
pub fn routine_name(path: &Path) -> Option<String> {
    let stem = path.file_stem()?.to_str()?;
    let name = match stem.strip_prefix('_') {
        Some(rest) => format!("%{}", rest),
        None => stem.to_string(),
    };
    (!name.is_empty()).then_some(name)
}

/// Walk `root` for routine files with the given extension, sorted by name.
/// A name seen twice keeps the first path in walk order.
pub fn discover_routines(root: &Path, extension: &str) -> Result<Vec<RoutineInput>> {
    if !root.is_dir() {
        return Err(GraphError::FileNotFound {
            path: root.display().to_string(),
        });
    }
    let mut seen = BTreeSet::new();
    let mut routines = Vec::new();
    let walker = WalkBuilder::new(root)
        .hidden(true)
        .git_ignore(false)
        .sort_by_file_path(|a, b| a.cmp(b))
        .build();
    for entry in walker {
        let entry = match entry {
            Ok(entry) => entry,
            Err(e) => {
                tracing::warn!("[ROUTINES] skipping unreadable entry: {}", e);
                continue;
            }
        };
        let path = entry.path();
        if !entry.file_type().is_some_and(|t| t.is_file())
            || path.extension().and_then(|e| e.to_str()) != Some(extension)
        {
            continue;
        }
        let Some(name) = routine_name(path) else {
            continue;
        };
        if !seen.insert(name.clone()) {
            tracing::warn!("[ROUTINES] {} appears twice; ignoring {}", name, path.display());
            continue;
        }
        routines.push(RoutineInput::file(name, path));
    }
    routines.sort_by(|a, b| a.name.cmp(&b.name));
    tracing::info!("[ROUTINES] discovered {} routines under {}", routines.len(), root.display());
    Ok(routines)
}

/// A dump file, or every `*.zwr` file under a directory
pub fn discover_dumps(path: &Path) -> Result<Vec<DumpInput>> {
    if path.is_file() {
        return Ok(vec![DumpInput::file(path)]);
    }
    if !path.is_dir() {
        return Err(GraphError::FileNotFound {
            path: path.display().to_string(),
        });
    }
    let mut dumps: Vec<DumpInput> = WalkBuilder::new(path)
        .git_ignore(false)
        .build()
        .filter_map(|entry| entry.ok())
        .filter(|entry| entry.file_type().is_some_and(|t| t.is_file()))
        .filter(|entry| {
            entry
                .path()
                .extension()
                .and_then(|e| e.to_str())
                .is_some_and(|e| e.eq_ignore_ascii_case("zwr"))
        })
        .map(|entry| DumpInput::file(entry.path()))
        .collect();
    dumps.sort_by(|a, b| a.origin.cmp(&b.origin));
    Ok(dumps)
}

/// Decode statistics of one dump file
#[derive(Debug, Clone, Serialize)]
pub struct DumpSummary {
    pub origin: String,
    pub stats: DecodeStats,
}

/// Output of every stage before the merge
#[derive(Debug)]
pub struct Extraction {
    pub ctx: ResolutionContext,
    pub entities: Vec<Entity>,
    pub relationships: Vec<Relationship>,
    pub stages: Vec<StageSummary>,
    pub dumps: Vec<DumpSummary>,
    pub schema_stats: SchemaStats,
    pub inconsistencies: Vec<SchemaInconsistency>,
    pub degradations: Vec<ParseDegradation>,
    pub unresolved: Vec<UnresolvedReference>,
}

impl Extraction {
    /// Convert to store records
    pub fn plan(&self) -> Result<MergePlan> {
        let nodes = self
            .entities
            .iter()
            .map(NodeRecord::from_entity)
            .collect::<Result<Vec<_>>>()?;
        let edges = self
            .relationships
            .iter()
            .map(|rel| EdgeRecord::from_relationship(rel, &self.ctx))
            .collect::<Result<Vec<_>>>()?;
        Ok(MergePlan::new(nodes, edges))
    }

    pub fn entity_count(&self, kind: EntityKind) -> usize {
        self.entities.iter().filter(|e| e.kind() == kind).count()
    }

    pub fn relationship_count(&self, kind: RelationKind) -> usize {
        self.relationships.iter().filter(|r| r.kind == kind).count()
    }
}

/// Report of one build, and the merge failure if the merge halted
#[derive(Debug)]
pub struct RunOutcome {
    pub report: RunReport,
    /// Pass `failure.pending` back to the merge engine to finish the build
    pub failure: Option<MergeFailure>,
}

impl RunOutcome {
    pub fn into_result(self) -> Result<RunReport> {
        match self.failure {
            Some(failure) => Err(failure.into()),
            None => Ok(self.report),
        }
    }
}

pub struct Pipeline {
    config: EngineConfig,
    cancel: CancellationToken,
    reset_append_edges: bool,
    show_progress: bool,
}

impl Pipeline {
    pub fn new(config: EngineConfig) -> Result<Self> {
        config.validate()?;
        Ok(Self {
            config,
            cancel: CancellationToken::new(),
            reset_append_edges: false,
            show_progress: false,
        })
    }

    /// Clear append-tier edge kinds in the store before merging
    pub fn with_reset_append_edges(mut self, reset: bool) -> Self {
        self.reset_append_edges = reset;
        self
    }

    pub fn with_progress(mut self, show: bool) -> Self {
        self.show_progress = show;
        self
    }

    pub fn cancellation(&self) -> CancellationToken {
        self.cancel.clone()
    }

    pub fn config(&self) -> &EngineConfig {
        &self.config
    }

    /// Extract, resolve and merge into `store`
    pub fn run(&self, input: &PipelineInput, store: &dyn GraphStore) -> Result<RunReport> {
        self.execute(input, store)?.into_result()
    }

    /// Like [`Pipeline::run`], but a halted merge still yields its report
    pub fn execute(&self, input: &PipelineInput, store: &dyn GraphStore) -> Result<RunOutcome> {
        let started = Instant::now();
        let extraction = self.extract(input)?;
        let plan = extraction.plan()?;
        let dry_run = self.config.merge.dry_run;

        if self.reset_append_edges && !dry_run {
            for kind in RelationKind::ALL
                .into_iter()
                .filter(|k| k.tier() == WriteTier::Append)
            {
                let removed = store.clear_edges(kind)?;
                tracing::info!("[MERGE] cleared {} {} edges before merge", removed, kind);
            }
        }

        let mut engine = GraphMergeEngine::new(store, self.config.merge.clone())?
            .with_cancellation(self.cancel.clone());
        if self.show_progress && !dry_run {
            engine = engine.with_progress(self.bar(plan.len() as u64, "merging"));
        }
        let (merge, failure) = match engine.merge(plan) {
            Ok(merge) => (merge, None),
            Err(failure) => {
                tracing::error!("[MERGE] {}", failure);
                (failure.report.clone(), Some(failure))
            }
        };

        // A partial store says nothing about this run's output
        let validation = if dry_run || failure.is_some() {
            None
        } else {
            Some(report::validate_store(store, &extraction)?)
        };
        let mut report = RunReport::new(&extraction, merge, validation, started.elapsed());
        report.halt = failure.as_ref().map(HaltSummary::from);
        Ok(RunOutcome { report, failure })
    }

    /// Every stage up to, but not including, the merge
    pub fn extract(&self, input: &PipelineInput) -> Result<Extraction> {
        let pool = rayon::ThreadPoolBuilder::new()
            .num_threads(self.config.extraction.workers)
            .thread_name(|i| format!("extract-{}", i))
            .build()
            .map_err(|e| GraphError::ConfigError {
                message: format!("Failed to start extraction workers: {}", e),
            })?;
        let table = &self.config.confidence;
        let mut ctx = ResolutionContext::new();
        let mut stages = Vec::with_capacity(3);

        // registry
        let mut writer = ctx.begin_stage(Stage::Registry)?;
        input.registry.register(&mut writer)?;
        stages.push(writer.finish());

        // schema
        let spinner = self.spinner("decoding dictionary dumps");
        let decoded: Vec<(SchemaExtractor, DumpSummary)> =
            pool.install(|| input.dumps.par_iter().map(|d| self.decode_dump(d)).collect());
        let mut schema = SchemaExtractor::new();
        let mut dumps = Vec::with_capacity(decoded.len());
        for (part, summary) in decoded {
            schema.absorb(part);
            dumps.push(summary);
        }
        let model = schema.finish();
        spinner.finish_and_clear();
        tracing::info!(
            "[SCHEMA] {} dumps: {} files, {} fields, {} cross-references",
            dumps.len(),
            model.files.len(),
            model.fields.len(),
            model.xrefs.len()
        );
        let mut writer = ctx.begin_stage(Stage::Schema)?;
        register_schema(&mut writer, &model)?;
        stages.push(writer.finish());

        // routine structure
        let routines = unique_routines(&input.routines);
        let bar = self.bar(routines.len() as u64, "scanning routines");
        let extractor = RoutineStructureExtractor::new();
        let structures: Vec<RoutineStructure> = pool.install(|| {
            routines
                .par_iter()
                .map(|r| {
                    let structure = match r.source.read(&r.name) {
                        Ok(text) => extractor.extract(&r.name, &text),
                        Err(e) => extractor.unreadable(&r.name, format!("unreadable source: {}", e)),
                    };
                    bar.inc(1);
                    structure
                })
                .collect()
        });
        bar.finish_and_clear();
        let mut writer = ctx.begin_stage(Stage::RoutineStructure)?;
        for structure in &structures {
            register_structure(&mut writer, structure)?;
        }
        stages.push(writer.finish());

        // relationships
        let links = link_schema(&model, &ctx, table)?;
        let code = CodeRelationshipExtractor::new(&ctx, table)?;
        let bar = self.bar(routines.len() as u64, "resolving code references");
        let emitted: Vec<RoutineEdges> = pool.install(|| {
            structures
                .par_iter()
                .map(|structure| {
                    let edges = code.extract(structure);
                    bar.inc(1);
                    edges
                })
                .collect()
        });
        bar.finish_and_clear();

        let mut code_edges = Vec::new();
        let mut unresolved = Vec::new();
        for edges in emitted {
            code_edges.extend(edges.relationships);
            unresolved.extend(edges.unresolved);
        }
        tracing::info!(
            "[ROUTINES] {} code relationships, {} unresolved references",
            code_edges.len(),
            unresolved.len()
        );

        let structural = structural_edges(&structures, &ctx, table);
        let labels = classified_labels(&structures, &code_edges, &ctx, table);

        let SchemaModel {
            files,
            fields,
            xrefs,
            inconsistencies: mut schema_inconsistencies,
            stats: schema_stats,
            ..
        } = model;
        schema_inconsistencies.extend(links.inconsistencies);

        let mut entities = Vec::new();
        entities.extend(input.registry.packages.iter().cloned().map(Entity::Package));
        entities.extend(files.into_iter().map(Entity::File));
        entities.extend(fields.into_iter().map(Entity::Field));
        entities.extend(xrefs.into_iter().map(Entity::CrossReference));
        let degradations = structures
            .iter()
            .filter_map(|s| s.degradation.clone())
            .collect();
        entities.extend(structures.into_iter().map(|s| {
            let mut routine = s.routine;
            routine.package = ctx.package_for_routine(&routine.name).map(str::to_string);
            Entity::Routine(routine)
        }));
        entities.extend(labels.into_iter().map(Entity::Label));
        entities.extend(data_stores(&ctx).into_iter().map(Entity::DataStore));

        let mut relationships = links.relationships;
        relationships.extend(structural);
        relationships.extend(code_edges);

        tracing::info!(
            "[PIPELINE] {} entities, {} relationships",
            entities.len(),
            relationships.len()
        );

        Ok(Extraction {
            ctx,
            entities,
            relationships,
            stages,
            dumps,
            schema_stats,
            inconsistencies: schema_inconsistencies,
            degradations,
            unresolved,
        })
    }

    /// A dump that cannot be opened contributes nothing and keeps its error
    fn decode_dump(&self, dump: &DumpInput) -> (SchemaExtractor, DumpSummary) {
        let samples = self.config.extraction.malformed_samples;
        match &dump.source {
            Source::File(path) => match DictionaryDecoder::open(path) {
                Ok(decoder) => ingest(decoder.with_max_samples(samples), &dump.origin),
                Err(e) => {
                    tracing::warn!("[SCHEMA] {}: skipped, {}", dump.origin, e);
                    let stats = DecodeStats {
                        read_error: Some(e.to_string()),
                        ..DecodeStats::default()
                    };
                    (
                        SchemaExtractor::new(),
                        DumpSummary {
                            origin: dump.origin.clone(),
                            stats,
                        },
                    )
                }
            },
            Source::Inline(text) => ingest(
                DictionaryDecoder::new(text.as_bytes(), dump.origin.clone())
                    .with_max_samples(samples),
                &dump.origin,
            ),
        }
    }

    fn spinner(&self, message: &str) -> ProgressBar {
        if !self.show_progress {
            return ProgressBar::hidden();
        }
        let pb = ProgressBar::new_spinner();
        if let Ok(style) = ProgressStyle::default_spinner().template("{spinner:.cyan} {msg}") {
            pb.set_style(style);
        }
        pb.set_message(message.to_string());
        pb.enable_steady_tick(Duration::from_millis(100));
        pb
    }

    fn bar(&self, len: u64, message: &str) -> ProgressBar {
        if !self.show_progress {
            return ProgressBar::hidden();
        }
        let pb = ProgressBar::new(len);
        if let Ok(style) =
            ProgressStyle::default_bar().template("{msg} [{bar:40.cyan/blue}] {pos}/{len}")
        {
            pb.set_style(style.progress_chars("=> "));
        }
        pb.set_message(message.to_string());
        pb
    }
}

fn ingest<R: std::io::BufRead>(
    mut decoder: DictionaryDecoder<R>,
    origin: &str,
) -> (SchemaExtractor, DumpSummary) {
    let mut extractor = SchemaExtractor::new();
    for entry in decoder.by_ref() {
        extractor.ingest(&entry);
    }
    let stats = decoder.into_stats();
    tracing::debug!(
        "[SCHEMA] {}: {} entries, {} malformed",
        origin,
        stats.entries,
        stats.malformed
    );
    (
        extractor,
        DumpSummary {
            origin: origin.to_string(),
            stats,
        },
    )
}

/// First input per routine name, in input order
fn unique_routines(routines: &[RoutineInput]) -> Vec<&RoutineInput> {
    let mut seen = BTreeSet::new();
    routines
        .iter()
        .filter(|r| {
            let first = seen.insert(r.name.as_str());
            if !first {
                tracing::warn!("[ROUTINES] duplicate routine {} ignored", r.name);
            }
            first
        })
        .collect()
}

fn confirmed(
    kind: RelationKind,
    from: EntityId,
    to: EntityId,
    line: Option<usize>,
    table: &ConfidenceTable,
) -> Relationship {
    Relationship {
        kind,
        from,
        to,
        discriminator: None,
        confidence: table.score(Evidence::ParserConfirmed),
        evidence: Evidence::ParserConfirmed,
        line,
        detail: EdgeDetail::None,
    }
}

/// OWNS_ROUTINE and CONTAINS_LABEL
fn structural_edges(
    structures: &[RoutineStructure],
    ctx: &ResolutionContext,
    table: &ConfidenceTable,
) -> Vec<Relationship> {
    let mut edges = Vec::new();
    for structure in structures {
        let name = structure.routine.name.as_str();
        let Some(routine_id) = ctx.resolve_routine(name) else {
            continue;
        };
        if let Some(package_id) = ctx
            .package_for_routine(name)
            .and_then(|p| ctx.resolve(&BusinessKey::Package(p.to_string())))
        {
            edges.push(confirmed(RelationKind::OwnsRoutine, package_id, routine_id, None, table));
        }
        for label in &structure.labels {
            if let Some(label_id) = ctx.resolve_label(name, &label.name) {
                edges.push(confirmed(
                    RelationKind::ContainsLabel,
                    routine_id,
                    label_id,
                    Some(label.line_number),
                    table,
                ));
            }
        }
    }
    edges
}

fn routine_of(ctx: &ResolutionContext, id: EntityId) -> Option<&str> {
    match ctx.key(id)? {
        BusinessKey::Label { routine, .. } => Some(routine.as_str()),
        _ => None,
    }
}

/// Label entities with traits derived from structure and incoming code edges
fn classified_labels(
    structures: &[RoutineStructure],
    code_edges: &[Relationship],
    ctx: &ResolutionContext,
    table: &ConfidenceTable,
) -> Vec<Label> {
    let mut external_callers: AHashMap<EntityId, usize> = AHashMap::new();
    let mut invocations: AHashMap<EntityId, usize> = AHashMap::new();
    for rel in code_edges {
        if !matches!(rel.kind, RelationKind::Calls | RelationKind::Invokes) {
            continue;
        }
        if routine_of(ctx, rel.from) != routine_of(ctx, rel.to) {
            *external_callers.entry(rel.to).or_default() += 1;
        }
        if rel.kind == RelationKind::Invokes {
            *invocations.entry(rel.to).or_default() += 1;
        }
    }

    let mut labels = Vec::new();
    for structure in structures {
        let routine = structure.routine.name.as_str();
        for record in &structure.labels {
            let mut signals = LabelSignals::from_record(routine, record);
            if let Some(id) = ctx.resolve_label(routine, &record.name) {
                signals.external_callers = external_callers.get(&id).copied().unwrap_or(0);
                signals.invocations = invocations.get(&id).copied().unwrap_or(0);
            }
            let classification = classify_label(&signals, table);
            labels.push(Label {
                routine: routine.to_string(),
                name: record.name.clone(),
                line_number: record.line_number,
                params: record.params.clone(),
                comment: record.comment.clone(),
                traits: classification.traits,
                entry_point_confidence: classification.entry_point_confidence,
                function_confidence: classification.function_confidence,
            });
        }
    }
    labels
}

fn data_stores(ctx: &ResolutionContext) -> Vec<DataStoreNode> {
    ctx.keys(EntityKind::DataStore)
        .iter()
        .filter_map(|key| match key {
            BusinessKey::DataStore(name) => {
                let file = ctx.file_for_store(name);
                Some(DataStoreNode {
                    name: name.clone(),
                    file_number: file.map(str::to_string),
                    origin: if file.is_some() {
                        StoreOrigin::StorageRoot
                    } else {
                        StoreOrigin::RoutineText
                    },
                })
            }
            _ => None,
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::LabelTrait;
    use crate::store::MemoryGraphStore;
    use tempfile::TempDir;

    const DUMP: &str = "\
GT.M MUPIP EXTRACT
ZWR
^DD(2,0)=\"FIELD^^.01^3\"
^DD(2,0,\"NM\",\"PATIENT\")=\"\"
^DD(2,.01,0)=\"NAME^RF^^0;1^K:$L(X)>30 X\"
^DD(2,.02,0)=\"SEX^RS^M:MALE;F:FEMALE;^0;2^Q\"
^DIC(2,0,\"GL\")=\"^DPT(\"
";

    const DG10: &str = "\
DG10 ;ALB/MRL - LOAD/EDIT PATIENT DATA
 ;;5.3;Registration;**32,109**;Aug 13, 1993
EN ;entry
 D PROCESS
 S NAME=$$GETNAME^DGREG(DFN)
 Q
PROCESS ;
 S ^DPT(DFN,0)=NAME
 Q
";

    const DGREG: &str = "\
DGREG ;ALB/JDS - REGISTER PATIENT
 ;;5.3;Registration;;Aug 13, 1993
GETNAME(DFN) ;
 Q $P($G(^DPT(DFN,0)),\"^\",1)
";

    fn input() -> PipelineInput {
        PipelineInput {
            registry: PackageRegistry::parse(
                "[[package]]\nname = \"REGISTRATION\"\nprefixes = [\"DG\"]\nfiles = [\"2\"]\n",
            )
            .unwrap(),
            dumps: vec![DumpInput::inline("DD.zwr", DUMP)],
            routines: vec![
                RoutineInput::inline("DG10", DG10),
                RoutineInput::inline("DGREG", DGREG),
            ],
        }
    }

    fn pipeline() -> Pipeline {
        let mut config = EngineConfig::default();
        config.extraction.workers = 2;
        Pipeline::new(config).unwrap()
    }

    fn label<'e>(extraction: &'e Extraction, routine: &str, name: &str) -> &'e Label {
        extraction
            .entities
            .iter()
            .find_map(|e| match e {
                Entity::Label(l) if l.routine == routine && l.name == name => Some(l),
                _ => None,
            })
            .unwrap()
    }

    #[test]
    fn test_extract_counts() {
        let extraction = pipeline().extract(&input()).unwrap();
        assert_eq!(extraction.entity_count(EntityKind::Package), 1);
        assert_eq!(extraction.entity_count(EntityKind::File), 1);
        assert_eq!(extraction.entity_count(EntityKind::Field), 2);
        assert_eq!(extraction.entity_count(EntityKind::Routine), 2);
        assert_eq!(extraction.entity_count(EntityKind::Label), 5);
        assert_eq!(extraction.entity_count(EntityKind::DataStore), 1);
        assert_eq!(extraction.relationship_count(RelationKind::OwnsRoutine), 2);
        assert_eq!(extraction.relationship_count(RelationKind::OwnsFile), 1);
        assert_eq!(extraction.relationship_count(RelationKind::ContainsLabel), 5);
        assert_eq!(extraction.relationship_count(RelationKind::StoredIn), 1);
        assert_eq!(extraction.stages.len(), 3);
    }

    #[test]
    fn test_labels_classified_from_edges() {
        let extraction = pipeline().extract(&input()).unwrap();
        let getname = label(&extraction, "DGREG", "GETNAME");
        assert!(getname.traits.contains(&LabelTrait::EntryPoint));
        assert!(getname.traits.contains(&LabelTrait::Function));
        assert_eq!(getname.entry_point_confidence, 1.0);

        let process = label(&extraction, "DG10", "PROCESS");
        assert!(process.traits.is_empty());
    }

    #[test]
    fn test_routine_package_assigned() {
        let extraction = pipeline().extract(&input()).unwrap();
        let routine = extraction
            .entities
            .iter()
            .find_map(|e| match e {
                Entity::Routine(r) if r.name == "DG10" => Some(r),
                _ => None,
            })
            .unwrap();
        assert_eq!(routine.package.as_deref(), Some("REGISTRATION"));
        assert_eq!(routine.version.as_deref(), Some("5.3"));
    }

    #[test]
    fn test_data_store_origin() {
        let extraction = pipeline().extract(&input()).unwrap();
        let store = extraction
            .entities
            .iter()
            .find_map(|e| match e {
                Entity::DataStore(d) => Some(d),
                _ => None,
            })
            .unwrap();
        assert_eq!(store.name, "DPT");
        assert_eq!(store.file_number.as_deref(), Some("2"));
        assert_eq!(store.origin, StoreOrigin::StorageRoot);
    }

    #[test]
    fn test_dry_run_writes_nothing() {
        let mut config = EngineConfig::default();
        config.merge.dry_run = true;
        let store = MemoryGraphStore::new();
        let report = Pipeline::new(config).unwrap().run(&input(), &store).unwrap();
        assert!(report.dry_run);
        assert!(report.validation.is_none());
        assert_eq!(store.node_count(None).unwrap(), 0);
        assert_eq!(store.edge_count(None).unwrap(), 0);
    }

    #[test]
    fn test_reset_append_edges_keeps_counts_stable() {
        let store = MemoryGraphStore::new();
        let pipeline = pipeline().with_reset_append_edges(true);
        pipeline.run(&input(), &store).unwrap();
        let first = store.edge_count(Some(RelationKind::Accesses)).unwrap();
        pipeline.run(&input(), &store).unwrap();
        assert_eq!(store.edge_count(Some(RelationKind::Accesses)).unwrap(), first);
        assert!(first > 0);
    }

    #[test]
    fn test_duplicate_routine_inputs_ignored() {
        let mut input = input();
        input.routines.push(RoutineInput::inline("DG10", "DG10 ;other\n Q\n"));
        let extraction = pipeline().extract(&input).unwrap();
        assert_eq!(extraction.entity_count(EntityKind::Routine), 2);
    }

    #[test]
    fn test_routine_name_from_path() {
        assert_eq!(routine_name(Path::new("r/DG10.m")).as_deref(), Some("DG10"));
        assert_eq!(routine_name(Path::new("r/_ZIS.m")).as_deref(), Some("%ZIS"));
    }

    #[test]
    fn test_discover_routines_by_extension() {
        let temp = TempDir::new().unwrap();
        let nested = temp.path().join("Packages").join("Registration");
        std::fs::create_dir_all(&nested).unwrap();
        std::fs::write(nested.join("DG10.m"), DG10).unwrap();
        std::fs::write(nested.join("DGREG.m"), DGREG).unwrap();
        std::fs::write(nested.join("README.txt"), "not a routine").unwrap();

        let routines = discover_routines(temp.path(), "m").unwrap();
        let names: Vec<&str> = routines.iter().map(|r| r.name.as_str()).collect();
        assert_eq!(names, vec!["DG10", "DGREG"]);
    }

    #[test]
    fn test_discover_dumps_in_directory() {
        let temp = TempDir::new().unwrap();
        std::fs::write(temp.path().join("DD.zwr"), DUMP).unwrap();
        std::fs::write(temp.path().join("notes.txt"), "").unwrap();
        let dumps = discover_dumps(temp.path()).unwrap();
        assert_eq!(dumps.len(), 1);
        assert!(dumps[0].origin.ends_with("DD.zwr"));
    }
}
