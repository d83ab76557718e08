//! Schema entity registration and relationship emission
//!
//! Registration runs inside the Schema stage. Linking runs only after every
//! entity tier is sealed; a link whose endpoint does not resolve becomes a
//! [`SchemaInconsistency`] and no relationship is emitted for it.

use crate::confidence::{ConfidenceTable, Evidence};
use crate::dictionary::extractor::SchemaModel;
use crate::error::{InconsistencyKind, Result, SchemaInconsistency};
use crate::model::{
    store_name_from_root, BusinessKey, EdgeDetail, EntityId, EntityKind, ParentSource,
    RelationKind, Relationship,
};
use crate::resolver::{ResolutionContext, StageWriter};

/// Register files, fields, cross-references and storage-root data stores
pub fn register_schema(writer: &mut StageWriter<'_>, model: &SchemaModel) -> Result<()> {
    for file in &model.files {
        writer.register(BusinessKey::File(file.number.clone()))?;
        if let Some(store) = file.storage_root.as_deref().and_then(store_name_from_root) {
            writer.register_data_store(&store, Some(&file.number))?;
        }
    }
    for field in &model.fields {
        writer.register(BusinessKey::field(&field.file_number, &field.number))?;
    }
    for xref in &model.xrefs {
        writer.register(BusinessKey::CrossReference {
            file: xref.file_number.clone(),
            field: xref.field_number.clone(),
            name: xref.name.clone(),
        })?;
    }
    Ok(())
}

#[derive(Debug, Default)]
pub struct SchemaLinks {
    pub relationships: Vec<Relationship>,
    pub inconsistencies: Vec<SchemaInconsistency>,
}

struct Emitter<'a> {
    table: &'a ConfidenceTable,
    out: SchemaLinks,
}

impl Emitter<'_> {
    fn edge(
        &mut self,
        kind: RelationKind,
        from: EntityId,
        to: EntityId,
        evidence: Evidence,
        discriminator: Option<String>,
        detail: EdgeDetail,
    ) {
        self.out.relationships.push(Relationship {
            kind,
            from,
            to,
            discriminator,
            confidence: self.table.score(evidence),
            evidence,
            line: None,
            detail,
        });
    }

    fn inconsistency(&mut self, kind: InconsistencyKind, file: &str, field: Option<&str>, detail: String) {
        tracing::warn!("[SCHEMA] file {}: {} ({})", file, kind, detail);
        self.out.inconsistencies.push(SchemaInconsistency {
            kind,
            file_number: file.to_string(),
            field_number: field.map(str::to_string),
            detail,
        });
    }
}

/// Emit every schema-level relationship
pub fn link_schema(
    model: &SchemaModel,
    ctx: &ResolutionContext,
    table: &ConfidenceTable,
) -> Result<SchemaLinks> {
    ctx.require(&[
        EntityKind::Package,
        EntityKind::File,
        EntityKind::Field,
        EntityKind::CrossReference,
        EntityKind::DataStore,
    ])?;

    let mut emit = Emitter {
        table,
        out: SchemaLinks::default(),
    };
    let confirmed = Evidence::ParserConfirmed;

    for file in &model.files {
        let Some(file_id) = ctx.resolve_file(&file.number) else {
            continue;
        };
        if let Some(store_id) = file
            .storage_root
            .as_deref()
            .and_then(store_name_from_root)
            .and_then(|name| ctx.resolve_data_store(&name))
        {
            emit.edge(RelationKind::StoredIn, file_id, store_id, confirmed, None, EdgeDetail::None);
        }
        if let Some(package_id) = ctx
            .package_for_file(&file.number)
            .and_then(|name| ctx.resolve(&BusinessKey::Package(name.to_string())))
        {
            emit.edge(RelationKind::OwnsFile, package_id, file_id, confirmed, None, EdgeDetail::None);
        }
    }

    for field in &model.fields {
        let (Some(file_id), Some(field_id)) = (
            ctx.resolve_file(&field.file_number),
            ctx.resolve_field(&field.file_number, &field.number),
        ) else {
            continue;
        };
        emit.edge(RelationKind::ContainsField, file_id, field_id, confirmed, None, EdgeDetail::None);
    }

    for link in &model.subfiles {
        let Some(child_id) = ctx.resolve_file(&link.child) else {
            continue;
        };
        let Some(parent_id) = ctx.resolve_file(&link.parent) else {
            emit.inconsistency(
                InconsistencyKind::SubfileParentMissing,
                &link.child,
                None,
                format!("parent file {} is not defined", link.parent),
            );
            continue;
        };
        let evidence = match link.parent_source {
            ParentSource::UpNode => Evidence::ExplicitParent,
            ParentSource::DottedPrefix => Evidence::DottedParent,
        };
        emit.edge(
            RelationKind::SubfileOf,
            child_id,
            parent_id,
            evidence,
            None,
            EdgeDetail::Subfile {
                owning_field: link.owning_field.clone(),
                level: link.level,
                parent_source: link.parent_source,
            },
        );
    }

    for pointer in &model.pointers {
        let Some(field_id) = ctx.resolve_field(&pointer.file_number, &pointer.field_number) else {
            continue;
        };
        match ctx.resolve_file(&pointer.target_file) {
            Some(target_id) => {
                emit.edge(RelationKind::PointsTo, field_id, target_id, confirmed, None, EdgeDetail::None)
            }
            None => emit.inconsistency(
                InconsistencyKind::PointerTargetMissing,
                &pointer.file_number,
                Some(&pointer.field_number),
                format!("target file {} is not defined", pointer.target_file),
            ),
        }
    }

    for candidate in &model.variable_pointers {
        let Some(field_id) = ctx.resolve_field(&candidate.file_number, &candidate.field_number)
        else {
            emit.inconsistency(
                InconsistencyKind::FieldWithoutFile,
                &candidate.file_number,
                Some(&candidate.field_number),
                format!("variable pointer candidate {} on an undefined field", candidate.ordinal),
            );
            continue;
        };
        match ctx.resolve_file(&candidate.target_file) {
            Some(target_id) => emit.edge(
                RelationKind::VariablePointsTo,
                field_id,
                target_id,
                confirmed,
                Some(candidate.ordinal.clone()),
                EdgeDetail::VariablePointer {
                    ordinal: candidate.ordinal.clone(),
                    description: candidate.description.clone(),
                    prefix: candidate.prefix.clone(),
                },
            ),
            None => emit.inconsistency(
                InconsistencyKind::VariablePointerTargetMissing,
                &candidate.file_number,
                Some(&candidate.field_number),
                format!(
                    "candidate {} targets undefined file {}",
                    candidate.ordinal, candidate.target_file
                ),
            ),
        }
    }

    for xref in &model.xrefs {
        let key = BusinessKey::CrossReference {
            file: xref.file_number.clone(),
            field: xref.field_number.clone(),
            name: xref.name.clone(),
        };
        let (Some(field_id), Some(xref_id)) = (
            ctx.resolve_field(&xref.file_number, &xref.field_number),
            ctx.resolve(&key),
        ) else {
            emit.inconsistency(
                InconsistencyKind::CrossReferenceIncomplete,
                &xref.file_number,
                Some(&xref.field_number),
                format!("xref {} indexes an undefined field", xref.name),
            );
            continue;
        };
        emit.edge(RelationKind::IndexedBy, field_id, xref_id, confirmed, None, EdgeDetail::None);
    }

    tracing::info!(
        "[SCHEMA] {} relationships, {} inconsistencies",
        emit.out.relationships.len(),
        emit.out.inconsistencies.len()
    );
    Ok(emit.out)
}
