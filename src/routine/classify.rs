//! Entry-point and function classification
//!
//! [`classify_label`] is a pure function from a label's structural signals to
//! confidence-annotated traits. The thresholds live in [`ConfidenceTable`].

use serde::Serialize;

use crate::confidence::{ConfidenceTable, Evidence};
use crate::model::LabelTrait;
use crate::routine::structure::LabelRecord;

/// Conventional entry-point name prefixes
pub const ENTRY_PREFIXES: &[&str] = &["EN", "EP", "START", "INIT", "BEGIN"];

/// Structural facts about one label
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct LabelSignals {
    pub entry_prefix: bool,
    pub has_params: bool,
    pub names_routine: bool,
    /// Calls or invocations from other routines
    pub external_callers: usize,
    pub quits_with_value: bool,
    /// `$$` invocations targeting this label, from anywhere
    pub invocations: usize,
}

impl LabelSignals {
    pub fn from_record(routine: &str, label: &LabelRecord) -> Self {
        Self {
            entry_prefix: ENTRY_PREFIXES.iter().any(|p| label.name.starts_with(p)),
            has_params: !label.params.is_empty(),
            names_routine: label.name == routine,
            external_callers: 0,
            quits_with_value: label.quits_with_value,
            invocations: 0,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Classification {
    pub entry_point_confidence: f64,
    pub entry_point_evidence: Option<Evidence>,
    pub function_confidence: f64,
    pub function_evidence: Option<Evidence>,
    pub traits: Vec<LabelTrait>,
}

fn strongest(table: &ConfidenceTable, candidates: &[(bool, Evidence)]) -> (f64, Option<Evidence>) {
    candidates
        .iter()
        .filter(|(present, _)| *present)
        .map(|(_, evidence)| (table.score(*evidence), Some(*evidence)))
        .fold((0.0, None), |best, next| if next.0 > best.0 { next } else { best })
}

pub fn classify_label(signals: &LabelSignals, table: &ConfidenceTable) -> Classification {
    let (entry_point_confidence, entry_point_evidence) = strongest(
        table,
        &[
            (signals.external_callers > 0, Evidence::EntryByCaller),
            (signals.has_params, Evidence::EntryByParams),
            (signals.names_routine, Evidence::EntryByRoutineName),
            (signals.entry_prefix, Evidence::EntryByPrefix),
        ],
    );
    let (function_confidence, function_evidence) = strongest(
        table,
        &[
            (signals.quits_with_value, Evidence::FunctionByQuit),
            (signals.invocations > 0, Evidence::FunctionByInvocation),
        ],
    );

    let mut traits = Vec::new();
    if entry_point_evidence.is_some() && entry_point_confidence >= table.entry_point_threshold {
        traits.push(LabelTrait::EntryPoint);
    }
    if function_evidence.is_some() && function_confidence >= table.function_threshold {
        traits.push(LabelTrait::Function);
    }

    Classification {
        entry_point_confidence,
        entry_point_evidence,
        function_confidence,
        function_evidence,
        traits,
    }
}
