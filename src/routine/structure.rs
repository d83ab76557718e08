//! Routine structure: labels, header metadata and referenced globals
//!
//! A routine that does not follow the label grammar is kept as a minimal
//! record (name and line count) flagged `needs_review`, with no labels.

use std::collections::BTreeSet;

use crate::error::{ParseDegradation, Result};
use crate::model::{BusinessKey, Routine};
use crate::resolver::StageWriter;
use crate::routine::constructs::{line_constructs, Construct};
use crate::routine::lexer::{parse_line, Keyword, ParsedLine};

/// A label and the extent of its body
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LabelRecord {
    pub name: String,
    /// 1-based
    pub line_number: usize,
    pub params: Vec<String>,
    pub comment: Option<String>,
    /// 1-based, exclusive: first line of the next label or one past the end
    pub body_end: usize,
    /// A `QUIT` with an argument occurs in the body
    pub quits_with_value: bool,
}

#[derive(Debug, Clone)]
pub struct RoutineStructure {
    pub routine: Routine,
    pub labels: Vec<LabelRecord>,
    /// Global names referenced anywhere in the routine
    pub data_stores: BTreeSet<String>,
    pub degradation: Option<ParseDegradation>,
    /// Text the structure was extracted from; code relationships are read from it
    pub source: String,
}

impl RoutineStructure {
    pub fn top_label(&self) -> Option<&LabelRecord> {
        self.labels.first()
    }

    fn degraded(mut routine: Routine, source: String, line_number: Option<usize>, reason: String) -> Self {
        routine.needs_review = true;
        Self {
            degradation: Some(ParseDegradation {
                routine: routine.name.clone(),
                line_number,
                reason,
            }),
            routine,
            labels: Vec::new(),
            data_stores: BTreeSet::new(),
            source,
        }
    }
}

/// Recovers labels and header metadata from routine text
#[derive(Debug, Default, Clone, Copy)]
pub struct RoutineStructureExtractor;

impl RoutineStructureExtractor {
    pub fn new() -> Self {
        Self
    }

    pub fn extract(&self, name: &str, text: &str) -> RoutineStructure {
        let lines: Vec<&str> = text.lines().collect();
        let mut routine = Routine {
            name: name.to_string(),
            line_count: lines.len(),
            ..Routine::default()
        };

        let parsed = match parse_all(&lines) {
            Ok(parsed) => parsed,
            Err((line_number, reason)) => {
                tracing::warn!("[ROUTINES] {} line {}: {}", name, line_number, reason);
                return RoutineStructure::degraded(routine, text.to_string(), Some(line_number), reason);
            }
        };

        let mut labels: Vec<LabelRecord> = Vec::new();
        let mut data_stores = BTreeSet::new();
        let mut seen = BTreeSet::new();

        for (index, line) in parsed.iter().enumerate() {
            let line_number = index + 1;
            if let Some(head) = &line.label {
                if !seen.insert(head.name) {
                    let reason = format!("duplicate label {}", head.name);
                    tracing::warn!("[ROUTINES] {} line {}: {}", name, line_number, reason);
                    return RoutineStructure::degraded(routine, text.to_string(), Some(line_number), reason);
                }
                if let Some(previous) = labels.last_mut() {
                    previous.body_end = line_number;
                }
                labels.push(LabelRecord {
                    name: head.name.to_string(),
                    line_number,
                    params: head.param_list(),
                    comment: line.comment.map(|c| c.trim().to_string()).filter(|c| !c.is_empty()),
                    body_end: lines.len() + 1,
                    quits_with_value: false,
                });
            }

            if line
                .commands
                .iter()
                .any(|c| c.keyword == Keyword::Quit && c.args.is_some())
            {
                if let Some(current) = labels.last_mut() {
                    current.quits_with_value = true;
                }
            }

            for construct in line_constructs(line) {
                if let Construct::Access { name, .. } = construct {
                    data_stores.insert(name.to_string());
                }
            }
        }

        routine.comment = labels.first().and_then(|l| l.comment.clone());
        if let Some((version, patches)) = lines.get(1).and_then(|l| parse_header(l)) {
            routine.version = Some(version);
            routine.patches = patches;
        }

        tracing::debug!(
            "[ROUTINES] {}: {} lines, {} labels, {} globals",
            name,
            routine.line_count,
            labels.len(),
            data_stores.len()
        );

        RoutineStructure {
            routine,
            labels,
            data_stores,
            degradation: None,
            source: text.to_string(),
        }
    }

    /// Minimal needs-review record for a routine whose source could not be read
    pub fn unreadable(&self, name: &str, reason: impl Into<String>) -> RoutineStructure {
        let reason = reason.into();
        tracing::warn!("[ROUTINES] {}: {}", name, reason);
        let routine = Routine {
            name: name.to_string(),
            ..Routine::default()
        };
        RoutineStructure::degraded(routine, String::new(), None, reason)
    }
}

/// Register a routine, its labels in line order and the globals it references
pub fn register_structure(writer: &mut StageWriter<'_>, structure: &RoutineStructure) -> Result<()> {
    let name = &structure.routine.name;
    writer.register(BusinessKey::Routine(name.clone()))?;
    for label in &structure.labels {
        writer.register_label(name, &label.name)?;
    }
    for store in &structure.data_stores {
        writer.register_data_store(store, None)?;
    }
    Ok(())
}

/// Parse every line; fails on the first non-conforming label position or
/// when the routine does not open with a label
fn parse_all<'a>(lines: &[&'a str]) -> std::result::Result<Vec<ParsedLine<'a>>, (usize, String)> {
    let mut parsed = Vec::with_capacity(lines.len());
    for (index, line) in lines.iter().enumerate() {
        let line = parse_line(line)
            .map_err(|e| (index + 1, format!("invalid label text {:?}", e.found)))?;
        parsed.push(line);
    }
    let first = parsed
        .iter()
        .position(|l| !l.commands.is_empty() || l.label.is_some() || l.comment.is_some());
    match first {
        Some(first) if parsed[first].label.is_none() => {
            Err((first + 1, "routine does not start with a label".to_string()))
        }
        None => Err((1, "routine is empty".to_string())),
        _ => Ok(parsed),
    }
}

/// Second-line header ` ;;version;package;**patches**;date`
fn parse_header(line: &str) -> Option<(String, Vec<String>)> {
    let rest = line.trim_start().strip_prefix(";;")?;
    let mut pieces = rest.split(';');
    let version = pieces.next()?.trim().to_string();
    if version.is_empty() {
        return None;
    }
    let patches = pieces
        .nth(1)
        .map(|p| {
            p.trim_matches('*')
                .split(',')
                .map(str::trim)
                .filter(|s| !s.is_empty())
                .map(str::to_string)
                .collect()
        })
        .unwrap_or_default();
    Some((version, patches))
}
