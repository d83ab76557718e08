//! Confidence policy
//!
//! Every score attached to an edge or a label classification comes from this
//! table. Call sites name the [`Evidence`] they have; they never pick numbers.
//!
//! | Evidence | Default | Meaning |
//! |---|---|---|
//! | `ParserConfirmed` | 1.00 | explicit target, both endpoints resolved exactly |
//! | `InferredRoutine` | 0.85 | label resolved inside the current routine (no `^ROUTINE`) |
//! | `TopOfRoutine` | 0.80 | `^ROUTINE` only, resolved to the routine's first label |
//! | `LabelOffset` | 0.60 | `LABEL+n`, resolved to the nearest named label |
//! | `AccessKeyword` | 1.00 | access mode taken from SET/KILL/MERGE/$DATA/$ORDER/... |
//! | `AccessDefault` | 0.85 | access mode defaulted to READ |
//! | `FallThrough` | 0.90 | label body ends without an exit |
//! | `FallThroughConditional` | 0.50 | label body ends with a conditional exit |
//! | `ExplicitParent` | 1.00 | subfile parent from the dictionary's UP node |
//! | `DottedParent` | 0.85 | subfile parent inferred from the dotted number |
//! | `EntryByCaller` | 1.00 | label is called from another routine |
//! | `EntryByParams` | 0.80 | label declares formal parameters |
//! | `EntryByRoutineName` | 0.75 | label has the routine's own name |
//! | `EntryByPrefix` | 0.60 | label name starts with EN/EP/START/INIT/BEGIN |
//! | `FunctionByQuit` | 0.95 | label body quits with a value |
//! | `FunctionByInvocation` | 0.70 | label is a `$$` target but no value quit was seen |
//!
//! A trait is assigned when its best evidence reaches the matching threshold
//! (`entry_point_threshold`, `function_threshold`, both 0.5 by default).

use serde::{Deserialize, Serialize};

use crate::error::{GraphError, Result};

/// Qualitative evidence level behind a score
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Evidence {
    ParserConfirmed,
    InferredRoutine,
    TopOfRoutine,
    LabelOffset,
    AccessKeyword,
    AccessDefault,
    FallThrough,
    FallThroughConditional,
    ExplicitParent,
    DottedParent,
    EntryByCaller,
    EntryByParams,
    EntryByRoutineName,
    EntryByPrefix,
    FunctionByQuit,
    FunctionByInvocation,
}

/// Evidence to score mapping. Overridable from the `[confidence]` config section.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ConfidenceTable {
    pub parser_confirmed: f64,
    pub inferred_routine: f64,
    pub top_of_routine: f64,
    pub label_offset: f64,
    pub access_keyword: f64,
    pub access_default: f64,
    pub fall_through: f64,
    pub fall_through_conditional: f64,
    pub explicit_parent: f64,
    pub dotted_parent: f64,
    pub entry_by_caller: f64,
    pub entry_by_params: f64,
    pub entry_by_routine_name: f64,
    pub entry_by_prefix: f64,
    pub function_by_quit: f64,
    pub function_by_invocation: f64,
    pub entry_point_threshold: f64,
    pub function_threshold: f64,
}

impl Default for ConfidenceTable {
    fn default() -> Self {
        Self {
            parser_confirmed: 1.0,
            inferred_routine: 0.85,
            top_of_routine: 0.8,
            label_offset: 0.6,
            access_keyword: 1.0,
            access_default: 0.85,
            fall_through: 0.9,
            fall_through_conditional: 0.5,
            explicit_parent: 1.0,
            dotted_parent: 0.85,
            entry_by_caller: 1.0,
            entry_by_params: 0.8,
            entry_by_routine_name: 0.75,
            entry_by_prefix: 0.6,
            function_by_quit: 0.95,
            function_by_invocation: 0.7,
            entry_point_threshold: 0.5,
            function_threshold: 0.5,
        }
    }
}

impl ConfidenceTable {
    pub fn score(&self, evidence: Evidence) -> f64 {
        match evidence {
            Evidence::ParserConfirmed => self.parser_confirmed,
            Evidence::InferredRoutine => self.inferred_routine,
            Evidence::TopOfRoutine => self.top_of_routine,
            Evidence::LabelOffset => self.label_offset,
            Evidence::AccessKeyword => self.access_keyword,
            Evidence::AccessDefault => self.access_default,
            Evidence::FallThrough => self.fall_through,
            Evidence::FallThroughConditional => self.fall_through_conditional,
            Evidence::ExplicitParent => self.explicit_parent,
            Evidence::DottedParent => self.dotted_parent,
            Evidence::EntryByCaller => self.entry_by_caller,
            Evidence::EntryByParams => self.entry_by_params,
            Evidence::EntryByRoutineName => self.entry_by_routine_name,
            Evidence::EntryByPrefix => self.entry_by_prefix,
            Evidence::FunctionByQuit => self.function_by_quit,
            Evidence::FunctionByInvocation => self.function_by_invocation,
        }
    }

    /// Every entry must lie in [0, 1]
    pub fn validate(&self) -> Result<()> {
        let entries = [
            ("parser_confirmed", self.parser_confirmed),
            ("inferred_routine", self.inferred_routine),
            ("top_of_routine", self.top_of_routine),
            ("label_offset", self.label_offset),
            ("access_keyword", self.access_keyword),
            ("access_default", self.access_default),
            ("fall_through", self.fall_through),
            ("fall_through_conditional", self.fall_through_conditional),
            ("explicit_parent", self.explicit_parent),
            ("dotted_parent", self.dotted_parent),
            ("entry_by_caller", self.entry_by_caller),
            ("entry_by_params", self.entry_by_params),
            ("entry_by_routine_name", self.entry_by_routine_name),
            ("entry_by_prefix", self.entry_by_prefix),
            ("function_by_quit", self.function_by_quit),
            ("function_by_invocation", self.function_by_invocation),
            ("entry_point_threshold", self.entry_point_threshold),
            ("function_threshold", self.function_threshold),
        ];
        for (name, value) in entries {
            if !(0.0..=1.0).contains(&value) {
                return Err(GraphError::ConfigError {
                    message: format!("confidence.{} = {} is outside [0, 1]", name, value),
                });
            }
        }
        Ok(())
    }
}
