//! Code relationships: CALLS, INVOKES, ACCESSES, FALLS_THROUGH
//!
//! Runs only after routines, labels and data stores are sealed in the
//! [`ResolutionContext`]. Every construct whose target does not resolve is
//! recorded as an [`UnresolvedReference`] and no edge is emitted for it.

use crate::confidence::{ConfidenceTable, Evidence};
use crate::error::{ConstructKind, Result, UnresolvedReason, UnresolvedReference};
use crate::model::{EdgeDetail, EntityId, EntityKind, RelationKind, Relationship};
use crate::resolver::ResolutionContext;
use crate::routine::constructs::{line_constructs, Construct};
use crate::routine::lexer::{
    find_top_level, parse_line, split_args, EntryRef, Keyword, ParsedLine,
};
use crate::routine::structure::{LabelRecord, RoutineStructure};

/// Edges and unresolved references of one routine
#[derive(Debug, Default)]
pub struct RoutineEdges {
    pub relationships: Vec<Relationship>,
    pub unresolved: Vec<UnresolvedReference>,
}

pub struct CodeRelationshipExtractor<'a> {
    ctx: &'a ResolutionContext,
    table: &'a ConfidenceTable,
}

struct Site<'s> {
    routine: &'s str,
    label: Option<&'s LabelRecord>,
    from: Option<EntityId>,
    line_number: usize,
    raw_line: &'s str,
}

impl<'a> CodeRelationshipExtractor<'a> {
    pub fn new(ctx: &'a ResolutionContext, table: &'a ConfidenceTable) -> Result<Self> {
        ctx.require(&[
            EntityKind::Routine,
            EntityKind::Label,
            EntityKind::DataStore,
            EntityKind::File,
        ])?;
        Ok(Self { ctx, table })
    }

    /// Extract edges from one routine, reading the text it was structured from
    pub fn extract(&self, structure: &RoutineStructure) -> RoutineEdges {
        let mut edges = RoutineEdges::default();
        if structure.labels.is_empty() {
            return edges;
        }
        let routine = structure.routine.name.as_str();
        let lines: Vec<&str> = structure.source.lines().collect();
        let parsed: Vec<Option<ParsedLine<'_>>> =
            lines.iter().map(|line| parse_line(line).ok()).collect();

        let mut label_index: Option<usize> = None;
        for (index, line) in parsed.iter().enumerate() {
            let line_number = index + 1;
            while structure
                .labels
                .get(label_index.map_or(0, |i| i + 1))
                .is_some_and(|next| next.line_number <= line_number)
            {
                label_index = Some(label_index.map_or(0, |i| i + 1));
            }
            let Some(line) = line else { continue };
            let label = label_index.map(|i| &structure.labels[i]);
            let site = Site {
                routine,
                label,
                from: label.and_then(|l| self.ctx.resolve_label(routine, &l.name)),
                line_number,
                raw_line: lines[index],
            };
            for construct in line_constructs(line) {
                self.construct(&site, construct, &mut edges);
            }
        }

        for pair in structure.labels.windows(2) {
            self.fall_through(routine, &pair[0], &pair[1], &parsed, &mut edges);
        }

        tracing::debug!(
            "[ROUTINES] {}: {} edges, {} unresolved",
            routine,
            edges.relationships.len(),
            edges.unresolved.len()
        );
        edges
    }

    fn construct(&self, site: &Site<'_>, construct: Construct<'_>, edges: &mut RoutineEdges) {
        let offset = construct.offset();
        let (kind, construct_kind, target_text, resolution) = match &construct {
            Construct::Call { target, .. } => (
                RelationKind::Calls,
                ConstructKind::Call,
                target.span.text,
                self.resolve_entry(site.routine, target),
            ),
            Construct::Invoke { target, .. } => (
                RelationKind::Invokes,
                ConstructKind::Invoke,
                target.span.text,
                self.resolve_entry(site.routine, target),
            ),
            Construct::Access {
                name,
                by_keyword,
                pattern,
                ..
            } => {
                let evidence = if *by_keyword {
                    Evidence::AccessKeyword
                } else {
                    Evidence::AccessDefault
                };
                let resolution = self
                    .ctx
                    .resolve_data_store(name)
                    .map(|id| (id, evidence))
                    .ok_or(UnresolvedReason::UnknownDataStore);
                (RelationKind::Accesses, ConstructKind::Access, pattern.text, resolution)
            }
            Construct::NakedAccess { pattern } => (
                RelationKind::Accesses,
                ConstructKind::Access,
                pattern.text,
                Err(UnresolvedReason::NakedReference),
            ),
            Construct::IndirectAccess { pattern } => (
                RelationKind::Accesses,
                ConstructKind::Access,
                pattern.text,
                Err(UnresolvedReason::Indirection),
            ),
        };

        let resolution = match site.from {
            Some(from) => resolution.map(|(to, evidence)| (from, to, evidence)),
            None => Err(UnresolvedReason::NoEnclosingLabel),
        };
        let (from, to, evidence) = match resolution {
            Ok(resolved) => resolved,
            Err(reason) => {
                tracing::debug!(
                    "[ROUTINES] unresolved {} at {}:{} ({}): {}",
                    target_text,
                    site.routine,
                    site.line_number,
                    reason,
                    site.raw_line
                );
                edges.unresolved.push(UnresolvedReference {
                    routine: site.routine.to_string(),
                    label: site.label.map(|l| l.name.clone()),
                    line_number: site.line_number,
                    construct: construct_kind,
                    target: target_text.to_string(),
                    reason,
                    raw_line: site.raw_line.to_string(),
                });
                return;
            }
        };

        let detail = match construct {
            Construct::Call { style, target } => EdgeDetail::Call {
                style,
                offset: target.offset.map(str::to_string),
                raw: target.span.text.to_string(),
            },
            Construct::Invoke { target, assigns_to } => EdgeDetail::Invoke {
                assigns_to: assigns_to.map(str::to_string),
                raw: target.span.text.to_string(),
            },
            Construct::Access {
                name,
                mode,
                pattern,
                subscripts,
                ..
            } => EdgeDetail::Access {
                mode,
                pattern: pattern.text.to_string(),
                subscripts: subscripts.map(|s| s.text.to_string()),
                file_number: self.ctx.file_for_store(name).map(str::to_string),
            },
            Construct::NakedAccess { .. } | Construct::IndirectAccess { .. } => return,
        };

        edges.relationships.push(Relationship {
            kind,
            from,
            to,
            discriminator: Some(format!("{}:{}", site.line_number, offset)),
            confidence: self.table.score(evidence),
            evidence,
            line: Some(site.line_number),
            detail,
        });
    }

    /// Resolve `LABEL+OFFSET^ROUTINE` against the index
    fn resolve_entry(
        &self,
        current: &str,
        target: &EntryRef<'_>,
    ) -> std::result::Result<(EntityId, Evidence), UnresolvedReason> {
        if target.indirect {
            return Err(UnresolvedReason::Indirection);
        }
        let routine = target.routine.unwrap_or(current);
        let missing = || {
            if self.ctx.resolve_routine(routine).is_none() {
                UnresolvedReason::UnknownRoutine
            } else {
                UnresolvedReason::UnknownLabel
            }
        };
        let label = match target.label {
            Some(label) => label,
            None => self.ctx.top_label(routine).ok_or_else(missing)?,
        };
        let id = self.ctx.resolve_label(routine, label).ok_or_else(missing)?;
        let evidence = if target.offset.is_some() {
            Evidence::LabelOffset
        } else if target.label.is_none() {
            Evidence::TopOfRoutine
        } else if target.routine.is_some() {
            Evidence::ParserConfirmed
        } else {
            Evidence::InferredRoutine
        };
        Ok((id, evidence))
    }

    fn fall_through(
        &self,
        routine: &str,
        label: &LabelRecord,
        next: &LabelRecord,
        parsed: &[Option<ParsedLine<'_>>],
        edges: &mut RoutineEdges,
    ) {
        let (Some(from), Some(to)) = (
            self.ctx.resolve_label(routine, &label.name),
            self.ctx.resolve_label(routine, &next.name),
        ) else {
            return;
        };
        // Label bodies outside the parsed text mean the structure came from other text
        let Some(body) = parsed.get(label.line_number.saturating_sub(1)..label.body_end.saturating_sub(1)) else {
            tracing::debug!("[ROUTINES] {}: label {} outside the routine text", routine, label.name);
            return;
        };
        let last = body
            .iter()
            .rev()
            .flatten()
            .find(|line| line.depth == 0 && !line.commands.is_empty());
        let evidence = match last.and_then(exit_kind) {
            Some(Exit::Unconditional) => return,
            Some(Exit::Conditional) => Evidence::FallThroughConditional,
            None => Evidence::FallThrough,
        };
        edges.relationships.push(Relationship {
            kind: RelationKind::FallsThrough,
            from,
            to,
            discriminator: None,
            confidence: self.table.score(evidence),
            evidence,
            line: Some(next.line_number),
            detail: EdgeDetail::FallThrough {
                conditional_exit: evidence == Evidence::FallThroughConditional,
            },
        });
    }
}

enum Exit {
    Unconditional,
    Conditional,
}

/// How the last command of a line leaves the label, if it does
fn exit_kind(line: &ParsedLine<'_>) -> Option<Exit> {
    let (last, before) = line.commands.split_last()?;
    if !matches!(last.keyword, Keyword::Quit | Keyword::Goto | Keyword::Halt) {
        return None;
    }
    let guarded_args = last.keyword == Keyword::Goto
        && last.args.is_some_and(|args| {
            split_args(args)
                .into_iter()
                .any(|arg| find_top_level(arg, b':').is_some())
        });
    let conditional = last.postcond.is_some()
        || guarded_args
        || before
            .iter()
            .any(|c| matches!(c.keyword, Keyword::If | Keyword::Else | Keyword::For));
    Some(if conditional {
        Exit::Conditional
    } else {
        Exit::Unconditional
    })
}
