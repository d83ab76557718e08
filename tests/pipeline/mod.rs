//! Pipeline behavior over the standard fixture tree

use std::collections::BTreeSet;

use vista_graph::error::UnresolvedReason;
use vista_graph::model::{
    BusinessKey, EdgeDetail, Entity, EntityKind, FieldDef, ParentSource, RelationKind,
    Relationship,
};
use vista_graph::store::{MemoryGraphStore, SqliteGraphStore};
use vista_graph::{DumpInput, Extraction, Pipeline, RoutineInput};

use crate::common::*;

fn extract(fixture: &VistaFixture) -> Extraction {
    Pipeline::new(fixture.config())
        .unwrap()
        .extract(&fixture.input())
        .unwrap()
}

fn key(extraction: &Extraction, rel: &Relationship, from: bool) -> BusinessKey {
    let id = if from { rel.from } else { rel.to };
    extraction.ctx.key(id).cloned().unwrap()
}

fn find_edge<'e>(
    extraction: &'e Extraction,
    kind: RelationKind,
    from: &BusinessKey,
    to: &BusinessKey,
) -> Vec<&'e Relationship> {
    extraction
        .relationships
        .iter()
        .filter(|r| r.kind == kind)
        .filter(|r| &key(extraction, r, true) == from && &key(extraction, r, false) == to)
        .collect()
}

fn field<'e>(extraction: &'e Extraction, file: &str, number: &str) -> &'e FieldDef {
    extraction
        .entities
        .iter()
        .find_map(|e| match e {
            Entity::Field(f) if f.file_number == file && f.number == number => Some(f),
            _ => None,
        })
        .unwrap()
}

#[test]
fn test_call_resolves_to_label() {
    let fixture = VistaFixture::standard();
    let extraction = extract(&fixture);
    let calls = find_edge(
        &extraction,
        RelationKind::Calls,
        &BusinessKey::label("DG10", "EN"),
        &BusinessKey::label("DG10", "PROCESS"),
    );
    assert_eq!(calls.len(), 1);
    assert_eq!(calls[0].confidence, 1.0);
    assert_eq!(calls[0].line, Some(5));
}

#[test]
fn test_unresolved_call_has_no_edge() {
    let fixture = VistaFixture::standard();
    let extraction = extract(&fixture);

    let missing = extraction
        .unresolved
        .iter()
        .find(|u| u.target.contains("MISSING"))
        .unwrap();
    assert_eq!(missing.routine, "DG10");
    assert_eq!(missing.line_number, 5);
    assert_eq!(missing.reason, UnresolvedReason::UnknownLabel);
    assert!(missing.raw_line.contains("MISSING^DG10"));

    let nope = extraction
        .unresolved
        .iter()
        .find(|u| u.target.contains("NOPE"))
        .unwrap();
    assert_eq!(nope.reason, UnresolvedReason::UnknownRoutine);
    assert_eq!(nope.line_number, 6);

    assert_eq!(extraction.ctx.resolve_label("DG10", "MISSING"), None);
    assert_eq!(extraction.ctx.resolve_routine("ZZZ"), None);
}

#[test]
fn test_entity_keys_are_unique() {
    let fixture = VistaFixture::standard();
    let extraction = extract(&fixture);
    let mut seen = BTreeSet::new();
    for entity in &extraction.entities {
        assert!(seen.insert(entity.key()), "duplicate {}", entity.key());
    }
    assert_eq!(extraction.entity_count(EntityKind::File), 4);
    assert_eq!(extraction.entity_count(EntityKind::Field), 7);
    assert_eq!(extraction.entity_count(EntityKind::Routine), 3);
}

#[test]
fn test_resolution_is_stable() {
    let fixture = VistaFixture::standard();
    let extraction = extract(&fixture);
    let first = extraction.ctx.resolve_field("2", ".01");
    assert!(first.is_some());
    assert_eq!(extraction.ctx.resolve_field("2", ".01"), first);
}

#[test]
fn test_field_decoded_from_dump() {
    let fixture = VistaFixture::standard();
    let extraction = extract(&fixture);
    let name = field(&extraction, "2", ".01");
    assert_eq!(name.name, "NAME");
    assert_eq!(name.type_code, "RF");
    assert_eq!(name.storage_location.as_deref(), Some("0;1"));
    assert_eq!(name.validation_text.as_deref(), Some("K:$L(X)>30 X"));
    assert!(name.required);
    assert_eq!(name.help_prompt.as_deref(), Some("Answer must be 3-30 characters in length."));

    let sex = field(&extraction, "2", ".02");
    assert_eq!(sex.set_codes.len(), 2);
    assert_eq!(sex.set_codes[1].label, "FEMALE");
}

#[test]
fn test_subfile_relation() {
    let fixture = VistaFixture::standard();
    let extraction = extract(&fixture);
    let links = find_edge(
        &extraction,
        RelationKind::SubfileOf,
        &BusinessKey::File("2.01".into()),
        &BusinessKey::File("2".into()),
    );
    assert_eq!(links.len(), 1);
    match &links[0].detail {
        EdgeDetail::Subfile {
            level,
            parent_source,
            owning_field,
        } => {
            assert_eq!(*level, 1);
            assert_eq!(*parent_source, ParentSource::UpNode);
            assert_eq!(owning_field.as_deref(), Some("1"));
        }
        other => panic!("unexpected detail {:?}", other),
    }
}

#[test]
fn test_missing_pointer_target_is_an_inconsistency() {
    let fixture = VistaFixture::standard();
    let extraction = extract(&fixture);
    assert!(extraction
        .inconsistencies
        .iter()
        .any(|i| i.file_number == "2" && i.field_number.as_deref() == Some(".104")));
    let to_ward = find_edge(
        &extraction,
        RelationKind::PointsTo,
        &BusinessKey::field("2", ".3"),
        &BusinessKey::File("42".into()),
    );
    assert_eq!(to_ward.len(), 1);
    assert_eq!(extraction.relationship_count(RelationKind::PointsTo), 1);
}

#[test]
fn test_package_ownership() {
    let fixture = VistaFixture::standard();
    let extraction = extract(&fixture);
    assert_eq!(extraction.relationship_count(RelationKind::OwnsRoutine), 2);
    // 2 by number, 42 and 44 by range; the multiple is unowned
    assert_eq!(extraction.relationship_count(RelationKind::OwnsFile), 3);
    assert_eq!(extraction.relationship_count(RelationKind::StoredIn), 3);
}

#[test]
fn test_degraded_routine_kept_for_review() {
    let fixture = VistaFixture::standard();
    let extraction = extract(&fixture);
    let routine = extraction
        .entities
        .iter()
        .find_map(|e| match e {
            Entity::Routine(r) if r.name == "ZZBAD" => Some(r),
            _ => None,
        })
        .unwrap();
    assert!(routine.needs_review);
    assert_eq!(extraction.degradations.len(), 1);
    assert_eq!(extraction.degradations[0].routine, "ZZBAD");
    assert!(extraction.ctx.resolve_label("ZZBAD", "ZZBAD").is_none());
}

#[test]
fn test_unreadable_inputs_do_not_stop_the_build() {
    let fixture = VistaFixture::standard();
    let mut input = fixture.input();
    input
        .routines
        .push(RoutineInput::file("ZZGONE", fixture.routines_dir().join("ZZGONE.m")));
    input
        .dumps
        .push(DumpInput::file(fixture.dumps_dir().join("GONE.zwr")));

    let pipeline = Pipeline::new(fixture.config()).unwrap();
    let extraction = pipeline.extract(&input).unwrap();
    assert_eq!(extraction.entity_count(EntityKind::Routine), 4);
    assert_eq!(extraction.entity_count(EntityKind::File), 4);
    let gone = extraction
        .entities
        .iter()
        .find_map(|e| match e {
            Entity::Routine(r) if r.name == "ZZGONE" => Some(r),
            _ => None,
        })
        .unwrap();
    assert!(gone.needs_review);
    let routines: BTreeSet<&str> = extraction
        .degradations
        .iter()
        .map(|d| d.routine.as_str())
        .collect();
    assert_eq!(routines, BTreeSet::from(["ZZBAD", "ZZGONE"]));
    let skipped: Vec<_> = extraction
        .dumps
        .iter()
        .filter(|d| d.stats.read_error.is_some())
        .collect();
    assert_eq!(skipped.len(), 1);
    assert!(skipped[0].origin.ends_with("GONE.zwr"));
    let calls = find_edge(
        &extraction,
        RelationKind::Calls,
        &BusinessKey::label("DG10", "EN"),
        &BusinessKey::label("DG10", "PROCESS"),
    );
    assert_eq!(calls.len(), 1);

    let store = MemoryGraphStore::new();
    let report = pipeline.run(&input, &store).unwrap();
    assert!(report.validation.unwrap().passed);
    assert_eq!(report.degradations.len(), 2);
}

#[test]
fn test_entity_counts_idempotent_across_runs() {
    let fixture = VistaFixture::standard();
    let mut counts = Vec::new();
    for run in 0..2 {
        let mut config = fixture.config();
        config.store.path = fixture.path().join(format!("run-{}.db", run));
        let store = SqliteGraphStore::open(&config.store.path, 2, std::time::Duration::from_millis(100))
            .unwrap();
        Pipeline::new(config)
            .unwrap()
            .run(&fixture.input(), &store)
            .unwrap();
        counts.push(node_counts(&store));
    }
    assert_eq!(counts[0], counts[1]);
    assert!(counts[0].iter().all(|c| *c > 0));
}
