//! Graph data model
//!
//! Entities are keyed by their business key ([`BusinessKey`]), which is the only
//! key used to match records across runs. Runtime identities ([`EntityId`]) are
//! handed out by the resolver and are meaningless outside one run.

use std::collections::BTreeMap;
use std::fmt;

use serde::{Deserialize, Serialize, Serializer};
use serde_json::Value;

use crate::confidence::Evidence;

// FNV-1a constants for 64-bit hash
const FNV_OFFSET: u64 = 0xcbf29ce484222325;
const FNV_PRIME: u64 = 0x100000001b3;

/// Compute a stable FNV-1a hash (deterministic across runs and platforms)
///
/// Used for store row ids derived from business keys.
pub fn fnv1a_hash(data: &str) -> u64 {
    let mut hash = FNV_OFFSET;
    for byte in data.bytes() {
        hash ^= byte as u64;
        hash = hash.wrapping_mul(FNV_PRIME);
    }
    hash
}

// ============================================================================
// Entity kinds and keys
// ============================================================================

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub enum EntityKind {
    Package,
    File,
    Field,
    CrossReference,
    Routine,
    Label,
    DataStore,
}

impl EntityKind {
    pub const ALL: [EntityKind; 7] = [
        EntityKind::Package,
        EntityKind::File,
        EntityKind::Field,
        EntityKind::CrossReference,
        EntityKind::Routine,
        EntityKind::Label,
        EntityKind::DataStore,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Package => "Package",
            Self::File => "File",
            Self::Field => "Field",
            Self::CrossReference => "CrossReference",
            Self::Routine => "Routine",
            Self::Label => "Label",
            Self::DataStore => "DataStore",
        }
    }

    pub fn from_str(s: &str) -> Option<Self> {
        Self::ALL.into_iter().find(|kind| kind.as_str().eq_ignore_ascii_case(s))
    }
}

impl fmt::Display for EntityKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Business key of an entity. Rendered with `|` between components, which
/// cannot occur in file numbers, field numbers or routine/label names.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize)]
pub enum BusinessKey {
    Package(String),
    File(String),
    Field { file: String, field: String },
    CrossReference { file: String, field: String, name: String },
    Routine(String),
    Label { routine: String, label: String },
    DataStore(String),
}

impl BusinessKey {
    pub fn field(file: &str, field: &str) -> Self {
        Self::Field {
            file: file.to_string(),
            field: field.to_string(),
        }
    }

    pub fn label(routine: &str, label: &str) -> Self {
        Self::Label {
            routine: routine.to_string(),
            label: label.to_string(),
        }
    }

    pub fn kind(&self) -> EntityKind {
        match self {
            Self::Package(_) => EntityKind::Package,
            Self::File(_) => EntityKind::File,
            Self::Field { .. } => EntityKind::Field,
            Self::CrossReference { .. } => EntityKind::CrossReference,
            Self::Routine(_) => EntityKind::Routine,
            Self::Label { .. } => EntityKind::Label,
            Self::DataStore(_) => EntityKind::DataStore,
        }
    }

    pub fn render(&self) -> String {
        match self {
            Self::Package(name) | Self::File(name) | Self::Routine(name) | Self::DataStore(name) => {
                name.clone()
            }
            Self::Field { file, field } => format!("{}|{}", file, field),
            Self::CrossReference { file, field, name } => format!("{}|{}|{}", file, field, name),
            Self::Label { routine, label } => format!("{}|{}", routine, label),
        }
    }

    /// Stable 63-bit row id for stores that want integer keys
    pub fn stable_id(&self) -> i64 {
        let input = format!("{}:{}", self.kind().as_str(), self.render());
        (fnv1a_hash(&input) >> 1) as i64
    }
}

impl fmt::Display for BusinessKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}({})", self.kind(), self.render())
    }
}

/// Run-scoped identity handed out by the resolver
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize)]
pub struct EntityId {
    pub kind: EntityKind,
    pub index: u32,
}

// ============================================================================
// Trait tag sets
// ============================================================================

/// Field type traits. A field carries a set of these, never a single type.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum TypeTag {
    Text,
    Numeric,
    Date,
    Pointer,
    Set,
    Computed,
    Multiline,
    VariablePointer,
    Nested,
}

impl TypeTag {
    pub const ALL: [TypeTag; 9] = [
        TypeTag::Text,
        TypeTag::Numeric,
        TypeTag::Date,
        TypeTag::Pointer,
        TypeTag::Set,
        TypeTag::Computed,
        TypeTag::Multiline,
        TypeTag::VariablePointer,
        TypeTag::Nested,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Text => "TEXT",
            Self::Numeric => "NUMERIC",
            Self::Date => "DATE",
            Self::Pointer => "POINTER",
            Self::Set => "SET",
            Self::Computed => "COMPUTED",
            Self::Multiline => "MULTILINE",
            Self::VariablePointer => "VARIABLE_POINTER",
            Self::Nested => "NESTED",
        }
    }

    fn bit(self) -> u16 {
        1 << (self as u16)
    }
}

/// Capability set of [`TypeTag`]s stored as a bitset
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash)]
pub struct TypeTags(u16);

impl TypeTags {
    pub fn empty() -> Self {
        Self(0)
    }

    pub fn insert(&mut self, tag: TypeTag) {
        self.0 |= tag.bit();
    }

    pub fn contains(&self, tag: TypeTag) -> bool {
        self.0 & tag.bit() != 0
    }

    pub fn is_empty(&self) -> bool {
        self.0 == 0
    }

    pub fn len(&self) -> usize {
        self.0.count_ones() as usize
    }

    pub fn iter(&self) -> impl Iterator<Item = TypeTag> + '_ {
        TypeTag::ALL.into_iter().filter(|tag| self.contains(*tag))
    }
}

impl FromIterator<TypeTag> for TypeTags {
    fn from_iter<I: IntoIterator<Item = TypeTag>>(iter: I) -> Self {
        let mut tags = Self::empty();
        for tag in iter {
            tags.insert(tag);
        }
        tags
    }
}

impl Serialize for TypeTags {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.collect_seq(self.iter().map(|tag| tag.as_str()))
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum LabelTrait {
    EntryPoint,
    Function,
}

// ============================================================================
// Entities
// ============================================================================

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FileRange {
    pub low: String,
    pub high: String,
}

impl FileRange {
    pub fn contains(&self, number: &str) -> bool {
        match (
            parse_file_number(&self.low),
            parse_file_number(&self.high),
            parse_file_number(number),
        ) {
            (Some(low), Some(high), Some(n)) => n >= low && n <= high,
            _ => false,
        }
    }
}

/// File numbers compare numerically (`2.01 < 2.1 < 10`)
pub fn parse_file_number(number: &str) -> Option<f64> {
    number.trim().parse::<f64>().ok()
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Package {
    pub name: String,
    pub prefixes: Vec<String>,
    pub file_numbers: Vec<String>,
    pub file_ranges: Vec<FileRange>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct FileDef {
    pub number: String,
    pub name: String,
    pub storage_root: Option<String>,
    pub parent_file: Option<String>,
    pub field_count: usize,
}

impl FileDef {
    pub fn is_subfile(&self) -> bool {
        self.number.contains('.')
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct SetCode {
    pub code: String,
    pub label: String,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct FieldDef {
    pub file_number: String,
    pub number: String,
    pub name: String,
    pub type_code: String,
    pub tags: TypeTags,
    pub required: bool,
    pub storage_location: Option<String>,
    pub validation_text: Option<String>,
    pub computation: Option<String>,
    pub help_prompt: Option<String>,
    pub description: Option<String>,
    pub set_codes: Vec<SetCode>,
    pub pointer_target: Option<String>,
    pub pointer_root: Option<String>,
    pub subfile_number: Option<String>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum XRefKind {
    Ordinary,
    Triggered,
    CodeDriven,
}

impl XRefKind {
    /// Map the third piece of an xref definition to its kind
    pub fn from_raw(raw: &str) -> Self {
        match raw.trim().to_ascii_uppercase().as_str() {
            "TRIGGER" => Self::Triggered,
            "MUMPS" | "BULLETIN" => Self::CodeDriven,
            _ => Self::Ordinary,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct CrossReference {
    pub file_number: String,
    pub field_number: String,
    pub name: String,
    pub xref_number: String,
    pub kind: XRefKind,
    pub raw_kind: String,
    pub set_logic: Option<String>,
    pub kill_logic: Option<String>,
    pub trigger_target: Option<String>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct Routine {
    pub name: String,
    pub package: Option<String>,
    pub line_count: usize,
    pub version: Option<String>,
    pub patches: Vec<String>,
    pub comment: Option<String>,
    pub needs_review: bool,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Label {
    pub routine: String,
    pub name: String,
    pub line_number: usize,
    pub params: Vec<String>,
    pub comment: Option<String>,
    pub traits: Vec<LabelTrait>,
    pub entry_point_confidence: f64,
    pub function_confidence: f64,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum StoreOrigin {
    StorageRoot,
    RoutineText,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct DataStoreNode {
    pub name: String,
    pub file_number: Option<String>,
    pub origin: StoreOrigin,
}

/// Extract a bare store name from a storage root like `^DPT(` or `DIC(5,`
pub fn store_name_from_root(root: &str) -> Option<String> {
    let trimmed = root.trim().trim_start_matches('^');
    let name: String = trimmed
        .chars()
        .take_while(|c| *c != '(' && *c != ',')
        .collect();
    let valid = !name.is_empty()
        && name
            .chars()
            .enumerate()
            .all(|(i, c)| c.is_ascii_alphanumeric() || (i == 0 && c == '%'));
    valid.then_some(name)
}

/// Any entity ready for the store
#[derive(Debug, Clone, PartialEq)]
pub enum Entity {
    Package(Package),
    File(FileDef),
    Field(FieldDef),
    CrossReference(CrossReference),
    Routine(Routine),
    Label(Label),
    DataStore(DataStoreNode),
}

impl Entity {
    pub fn kind(&self) -> EntityKind {
        self.key().kind()
    }

    pub fn key(&self) -> BusinessKey {
        match self {
            Self::Package(p) => BusinessKey::Package(p.name.clone()),
            Self::File(f) => BusinessKey::File(f.number.clone()),
            Self::Field(f) => BusinessKey::field(&f.file_number, &f.number),
            Self::CrossReference(x) => BusinessKey::CrossReference {
                file: x.file_number.clone(),
                field: x.field_number.clone(),
                name: x.name.clone(),
            },
            Self::Routine(r) => BusinessKey::Routine(r.name.clone()),
            Self::Label(l) => BusinessKey::label(&l.routine, &l.name),
            Self::DataStore(d) => BusinessKey::DataStore(d.name.clone()),
        }
    }

    /// Attributes written to the store
    pub fn properties(&self) -> serde_json::Result<Value> {
        match self {
            Self::Package(p) => serde_json::to_value(p),
            Self::File(f) => serde_json::to_value(f),
            Self::Field(f) => serde_json::to_value(f),
            Self::CrossReference(x) => serde_json::to_value(x),
            Self::Routine(r) => serde_json::to_value(r),
            Self::Label(l) => serde_json::to_value(l),
            Self::DataStore(d) => serde_json::to_value(d),
        }
    }
}

// ============================================================================
// Relationships
// ============================================================================

/// How a relationship kind is written to the store
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum WriteTier {
    /// Idempotent merge on (from, to, discriminator). Re-runs do not change counts.
    Merge,
    /// Plain append. Re-running without clearing this kind first duplicates its
    /// edges; that is the accepted price for throughput.
    Append,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum RelationKind {
    ContainsField,
    SubfileOf,
    PointsTo,
    VariablePointsTo,
    IndexedBy,
    StoredIn,
    OwnsFile,
    OwnsRoutine,
    ContainsLabel,
    Calls,
    Invokes,
    Accesses,
    FallsThrough,
}

impl RelationKind {
    pub const ALL: [RelationKind; 13] = [
        RelationKind::ContainsField,
        RelationKind::SubfileOf,
        RelationKind::PointsTo,
        RelationKind::VariablePointsTo,
        RelationKind::IndexedBy,
        RelationKind::StoredIn,
        RelationKind::OwnsFile,
        RelationKind::OwnsRoutine,
        RelationKind::ContainsLabel,
        RelationKind::Calls,
        RelationKind::Invokes,
        RelationKind::Accesses,
        RelationKind::FallsThrough,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::ContainsField => "CONTAINS_FIELD",
            Self::SubfileOf => "SUBFILE_OF",
            Self::PointsTo => "POINTS_TO",
            Self::VariablePointsTo => "VARIABLE_POINTS_TO",
            Self::IndexedBy => "INDEXED_BY",
            Self::StoredIn => "STORED_IN",
            Self::OwnsFile => "OWNS_FILE",
            Self::OwnsRoutine => "OWNS_ROUTINE",
            Self::ContainsLabel => "CONTAINS_LABEL",
            Self::Calls => "CALLS",
            Self::Invokes => "INVOKES",
            Self::Accesses => "ACCESSES",
            Self::FallsThrough => "FALLS_THROUGH",
        }
    }

    pub fn from_str(s: &str) -> Option<Self> {
        let wanted = s.trim().to_ascii_uppercase();
        Self::ALL.into_iter().find(|kind| kind.as_str() == wanted)
    }

    pub fn tier(&self) -> WriteTier {
        match self {
            Self::Accesses => WriteTier::Append,
            _ => WriteTier::Merge,
        }
    }
}

impl fmt::Display for RelationKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum CallStyle {
    /// `DO`: branch with return
    Direct,
    /// `GOTO`: unconditional branch
    Branch,
    /// `JOB`: starts the target in a new process
    Spawn,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum AccessMode {
    Read,
    Write,
    Kill,
    Exists,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ParentSource {
    /// Explicit `"UP"` node in the dictionary
    UpNode,
    /// Text before the first `.` of the file number
    DottedPrefix,
}

/// Kind-specific edge attributes
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "detail", rename_all = "snake_case")]
pub enum EdgeDetail {
    None,
    Subfile {
        owning_field: Option<String>,
        level: u32,
        parent_source: ParentSource,
    },
    VariablePointer {
        ordinal: String,
        description: Option<String>,
        prefix: Option<String>,
    },
    Call {
        style: CallStyle,
        offset: Option<String>,
        raw: String,
    },
    Invoke {
        assigns_to: Option<String>,
        raw: String,
    },
    Access {
        mode: AccessMode,
        pattern: String,
        subscripts: Option<String>,
        file_number: Option<String>,
    },
    FallThrough {
        conditional_exit: bool,
    },
}

/// A resolved relationship. Both endpoints are resolver identities, so a
/// relationship can only exist once both entities do.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Relationship {
    pub kind: RelationKind,
    pub from: EntityId,
    pub to: EntityId,
    /// Separates several edges of the same kind between the same pair
    pub discriminator: Option<String>,
    pub confidence: f64,
    pub evidence: Evidence,
    pub line: Option<usize>,
    pub detail: EdgeDetail,
}

impl Relationship {
    pub fn properties(&self) -> serde_json::Result<Value> {
        let mut props = BTreeMap::new();
        props.insert("confidence".to_string(), Value::from(self.confidence));
        props.insert("evidence".to_string(), serde_json::to_value(self.evidence)?);
        if let Some(line) = self.line {
            props.insert("line".to_string(), Value::from(line));
        }
        if let Value::Object(detail) = serde_json::to_value(&self.detail)? {
            for (key, value) in detail {
                if key != "detail" && !value.is_null() {
                    props.insert(key, value);
                }
            }
        }
        serde_json::to_value(props)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_fnv1a_is_stable() {
        assert_eq!(fnv1a_hash(""), FNV_OFFSET);
        assert_eq!(fnv1a_hash("DPT"), fnv1a_hash("DPT"));
        assert_ne!(fnv1a_hash("DPT"), fnv1a_hash("DIC"));
    }

    #[test]
    fn test_business_key_render() {
        assert_eq!(BusinessKey::field("2", ".01").render(), "2|.01");
        assert_eq!(BusinessKey::label("DG10", "EN").render(), "DG10|EN");
        assert_eq!(
            BusinessKey::label("DG10", "EN").to_string(),
            "Label(DG10|EN)"
        );
        assert!(BusinessKey::File("2".into()).stable_id() >= 0);
    }

    #[test]
    fn test_type_tags_set_semantics() {
        let mut tags = TypeTags::empty();
        tags.insert(TypeTag::Pointer);
        tags.insert(TypeTag::Computed);
        tags.insert(TypeTag::Pointer);
        assert_eq!(tags.len(), 2);
        assert!(tags.contains(TypeTag::Computed));
        assert!(!tags.contains(TypeTag::Text));
        let json = serde_json::to_string(&tags).unwrap();
        assert_eq!(json, r#"["POINTER","COMPUTED"]"#);
    }

    #[test]
    fn test_store_name_from_root() {
        assert_eq!(store_name_from_root("^DPT(").as_deref(), Some("DPT"));
        assert_eq!(store_name_from_root("DIC(5,").as_deref(), Some("DIC"));
        assert_eq!(store_name_from_root("^%ZIS(1,").as_deref(), Some("%ZIS"));
        assert_eq!(store_name_from_root(""), None);
        assert_eq!(store_name_from_root("^(1"), None);
    }

    #[test]
    fn test_file_range_numeric_compare() {
        let range = FileRange {
            low: "40".into(),
            high: "45.9".into(),
        };
        assert!(range.contains("40.7"));
        assert!(range.contains("45.9"));
        assert!(!range.contains("4"));
        assert!(!range.contains("46"));
    }

    #[test]
    fn test_relation_tiers() {
        assert_eq!(RelationKind::Accesses.tier(), WriteTier::Append);
        assert_eq!(RelationKind::Calls.tier(), WriteTier::Merge);
        assert_eq!(RelationKind::from_str("points_to"), Some(RelationKind::PointsTo));
    }

    #[test]
    fn test_xref_kind_from_raw() {
        assert_eq!(XRefKind::from_raw(""), XRefKind::Ordinary);
        assert_eq!(XRefKind::from_raw("TRIGGER"), XRefKind::Triggered);
        assert_eq!(XRefKind::from_raw("MUMPS"), XRefKind::CodeDriven);
    }
}
