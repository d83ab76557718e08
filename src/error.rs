//! Error types and exit codes for vista-graph-engine
//!
//! Two families live here. [`GraphError`] is fatal and propagates with `?` up to
//! the CLI. The remaining record types are the non-fatal taxonomy: extraction
//! never aborts on them, it collects them into the run report instead.

use std::fmt;
use std::process::ExitCode;

use serde::Serialize;
use thiserror::Error;

use crate::merge::MergeFailure;

/// Main error type for vista-graph-engine operations
#[derive(Error, Debug)]
pub enum GraphError {
    #[error("File not found: {path}")]
    FileNotFound { path: String },

    #[error("IO error at {path}: {message}")]
    IoError { path: String, message: String },

    #[error("Configuration error: {message}")]
    ConfigError { message: String },

    #[error("Registry error: {message}")]
    RegistryError { message: String },

    /// A stage tried to register or resolve an entity tier out of order.
    #[error("Stage ordering violated: {message}")]
    StageError { message: String },

    #[error("Store error: {0}")]
    Store(#[from] StoreError),

    #[error("{0}")]
    MergeHalted(Box<MergeFailure>),

    #[error("Serialization error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

impl GraphError {
    /// Convert error to a process exit code:
    /// - 0: Success
    /// - 1: File not found / IO error
    /// - 2: Configuration or registry error
    /// - 3: Stage ordering violation (internal)
    /// - 4: Store unavailable / merge halted
    pub fn exit_code(&self) -> ExitCode {
        match self {
            Self::FileNotFound { .. } | Self::IoError { .. } | Self::Io(_) => ExitCode::from(1),
            Self::ConfigError { .. } | Self::RegistryError { .. } | Self::Json(_) => {
                ExitCode::from(2)
            }
            Self::StageError { .. } => ExitCode::from(3),
            Self::Store(_) | Self::MergeHalted(_) => ExitCode::from(4),
        }
    }

    pub(crate) fn io(path: impl fmt::Display, err: std::io::Error) -> Self {
        if err.kind() == std::io::ErrorKind::NotFound {
            Self::FileNotFound {
                path: path.to_string(),
            }
        } else {
            Self::IoError {
                path: path.to_string(),
                message: err.to_string(),
            }
        }
    }
}

impl From<MergeFailure> for GraphError {
    fn from(failure: MergeFailure) -> Self {
        Self::MergeHalted(Box::new(failure))
    }
}

/// Result type alias for vista-graph-engine operations
pub type Result<T> = std::result::Result<T, GraphError>;

/// Failure reported by a [`crate::store::GraphStore`] write.
///
/// Transient failures are retried by the merge engine with bounded backoff;
/// permanent failures abort the batch and hand it back for replay.
#[derive(Error, Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "class", rename_all = "snake_case")]
pub enum StoreError {
    #[error("transient store failure: {message}")]
    Transient { message: String },

    #[error("permanent store failure: {message}")]
    Permanent { message: String },
}

impl StoreError {
    pub fn transient(message: impl Into<String>) -> Self {
        Self::Transient {
            message: message.into(),
        }
    }

    pub fn permanent(message: impl Into<String>) -> Self {
        Self::Permanent {
            message: message.into(),
        }
    }

    pub fn is_transient(&self) -> bool {
        matches!(self, Self::Transient { .. })
    }
}

/// Why a dump line was rejected
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum DecodeFailure {
    /// Line does not start with `^`
    MissingCaret,
    /// Store name is empty or not a valid global name
    BadStoreName,
    /// Subscript list has no closing parenthesis
    UnterminatedSubscripts,
    /// A bare subscript is not a canonical number
    BadSubscript,
    /// No `=` after the reference
    MissingValue,
    /// Quoted value never closes, even after continuation lines
    UnterminatedValue,
    /// Value is neither quoted nor a canonical number
    BadValue,
    /// Line bytes are not UTF-8; the entry could not be reproduced
    InvalidUtf8,
}

impl fmt::Display for DecodeFailure {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let text = match self {
            Self::MissingCaret => "line does not start with '^'",
            Self::BadStoreName => "invalid store name",
            Self::UnterminatedSubscripts => "unterminated subscript list",
            Self::BadSubscript => "bare subscript is not numeric",
            Self::MissingValue => "missing '=' and value",
            Self::UnterminatedValue => "unterminated quoted value",
            Self::BadValue => "value is neither quoted nor numeric",
            Self::InvalidUtf8 => "line is not valid UTF-8",
        };
        f.write_str(text)
    }
}

/// A malformed dump line. Skipped, counted, never fatal.
#[derive(Error, Debug, Clone, PartialEq, Eq, Serialize)]
#[error("{origin}:{line_number}: {reason}")]
pub struct DecodeError {
    pub origin: String,
    pub line_number: usize,
    pub reason: DecodeFailure,
    pub raw: String,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum InconsistencyKind {
    PointerTargetMissing,
    VariablePointerTargetMissing,
    SubfileParentMissing,
    FieldWithoutFile,
    CrossReferenceIncomplete,
    DuplicateDefinition,
}

impl fmt::Display for InconsistencyKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let text = match self {
            Self::PointerTargetMissing => "pointer target file does not exist",
            Self::VariablePointerTargetMissing => "variable pointer candidate file does not exist",
            Self::SubfileParentMissing => "subfile parent does not exist",
            Self::FieldWithoutFile => "field belongs to an undefined file",
            Self::CrossReferenceIncomplete => "cross-reference has logic but no definition",
            Self::DuplicateDefinition => "definition appears more than once",
        };
        f.write_str(text)
    }
}

/// Schema data that disagrees with itself. The entity is kept and the
/// relationship that depended on the missing piece is omitted.
#[derive(Error, Debug, Clone, PartialEq, Serialize)]
#[error("file {file_number}: {kind} ({detail})")]
pub struct SchemaInconsistency {
    pub kind: InconsistencyKind,
    pub file_number: String,
    pub field_number: Option<String>,
    pub detail: String,
}

/// Routine text that did not match the label grammar. The routine survives
/// as a minimal record flagged needs-review.
#[derive(Error, Debug, Clone, PartialEq, Eq, Serialize)]
#[error("routine {routine}: {reason}")]
pub struct ParseDegradation {
    pub routine: String,
    pub line_number: Option<usize>,
    pub reason: String,
}

/// Syntactic construct an unresolved reference came from
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ConstructKind {
    Call,
    Invoke,
    Access,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum UnresolvedReason {
    UnknownRoutine,
    UnknownLabel,
    UnknownDataStore,
    /// Target is computed at runtime (`@X`)
    Indirection,
    /// Naked global reference `^(...)`
    NakedReference,
    /// Code appears before the first label
    NoEnclosingLabel,
}

impl fmt::Display for UnresolvedReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let text = match self {
            Self::UnknownRoutine => "unknown routine",
            Self::UnknownLabel => "unknown label",
            Self::UnknownDataStore => "unknown data store",
            Self::Indirection => "indirection",
            Self::NakedReference => "naked reference",
            Self::NoEnclosingLabel => "no enclosing label",
        };
        f.write_str(text)
    }
}

/// A call/invoke/access whose target could not be resolved. No edge is
/// emitted for it; this record is the trace.
#[derive(Error, Debug, Clone, PartialEq, Eq, Serialize)]
#[error("{routine}:{line_number} {construct:?} {target}: {reason}")]
pub struct UnresolvedReference {
    pub routine: String,
    pub label: Option<String>,
    pub line_number: usize,
    pub construct: ConstructKind,
    pub target: String,
    pub reason: UnresolvedReason,
    pub raw_line: String,
}
