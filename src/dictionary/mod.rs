//! FileMan data dictionary processing
//!
//! - [`decoder`]: streaming line decoder for global dump text
//! - [`extractor`]: shape-driven assembly of files, fields and cross-references
//! - [`links`]: registration with the resolver and schema relationship emission

pub mod decoder;
pub mod extractor;
pub mod links;

pub use decoder::{decode_line, DecodeStats, DictionaryDecoder, DumpEntry, DumpValue, Subscript};
pub use extractor::{
    parse_type_code, PointerLink, SchemaExtractor, SchemaModel, SchemaStats, SubfileLink,
    TypeCode, VariablePointerCandidate,
};
pub use links::{link_schema, register_schema, SchemaLinks};
