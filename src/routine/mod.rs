//! M routine processing
//!
//! - [`lexer`]: line tokenizer (labels, commands, arguments, comments)
//! - [`constructs`]: calls, extrinsic invocations and global accesses per line
//! - [`structure`]: labels, header metadata and referenced globals per routine
//! - [`classify`]: entry-point / function classification
//! - [`relationships`]: code edges resolved against the entity index

pub mod classify;
pub mod constructs;
pub mod lexer;
pub mod relationships;
pub mod structure;

pub use classify::{classify_label, Classification, LabelSignals, ENTRY_PREFIXES};
pub use constructs::{line_constructs, Construct};
pub use relationships::{CodeRelationshipExtractor, RoutineEdges};
pub use structure::{register_structure, LabelRecord, RoutineStructure, RoutineStructureExtractor};
