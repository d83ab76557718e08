//! Schema extraction from decoded dictionary entries
//!
//! Dispatches purely on the shape of the subscript path:
//!
//! | Store | Subscripts | Produces |
//! |---|---|---|
//! | DD | (file, 0) | file header: name, storage root |
//! | DD | (file, 0, "NM", name) | canonical file name |
//! | DD | (file, 0, "UP") | explicit subfile parent |
//! | DD | (file, field, 0) | field definition |
//! | DD | (file, field, 1, xref, 0/1/2) | cross-reference definition / set / kill logic |
//! | DD | (file, field, 3) | help prompt |
//! | DD | (file, field, 9.1) | computation expression |
//! | DD | (file, field, 21, n, 0) | description text |
//! | DD | (file, field, "V", n, 0) | variable pointer candidate |
//! | DIC | (file, 0) | fallback file name |
//! | DIC | (file, 0, "GL") | storage root |
//!
//! Entries may arrive in any order and from several dump files. Each file is
//! fed to its own extractor; the extractors are merged with [`SchemaExtractor::absorb`]
//! and turned into entities once with [`SchemaExtractor::finish`].

use std::collections::BTreeMap;

use once_cell::sync::Lazy;
use regex::Regex;
use serde::Serialize;

use crate::dictionary::decoder::DumpEntry;
use crate::error::{InconsistencyKind, SchemaInconsistency};
use crate::model::{
    CrossReference, FieldDef, FileDef, ParentSource, SetCode, TypeTag, TypeTags, XRefKind,
};

static LEADING_NUMBER: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"^(\d*\.?\d+)").expect("valid number prefix pattern"));

/// Generic header names FileMan writes in place of the real file name
const GENERIC_HEADER_NAMES: [&str; 2] = ["FIELD", "SUB-FIELD"];
const SUBFILE_HEADER_SUFFIX: &str = " SUB-FIELD";

/// Deepest UP chain followed when computing nesting levels
const MAX_NESTING: u32 = 16;

/// Parsed FileMan type code
#[derive(Debug, Clone, Default, PartialEq)]
pub struct TypeCode {
    pub tags: TypeTags,
    pub required: bool,
    pub pointer_target: Option<String>,
    pub subfile_number: Option<String>,
}

/// Turn a type code such as `RF`, `*P200'`, `DC`, `Cm` or `2.01A` into a tag set.
///
/// A leading number names the subfile of a multiple. Otherwise each letter
/// contributes a trait; letters that only affect input handling are ignored.
/// An empty result defaults to TEXT.
pub fn parse_type_code(code: &str) -> TypeCode {
    let code = code.trim();
    let mut parsed = TypeCode::default();

    if let Some(m) = LEADING_NUMBER.find(code) {
        parsed.subfile_number = Some(m.as_str().to_string());
        parsed.tags.insert(TypeTag::Nested);
        parsed.required = code[m.end()..].contains('R');
        return parsed;
    }

    let chars: Vec<char> = code.chars().collect();
    let mut i = 0;
    while i < chars.len() {
        match chars[i] {
            'R' => parsed.required = true,
            'P' => {
                parsed.tags.insert(TypeTag::Pointer);
                let target: String = chars[i + 1..]
                    .iter()
                    .take_while(|c| c.is_ascii_digit() || **c == '.')
                    .collect();
                i += target.len();
                if !target.is_empty() {
                    parsed.pointer_target = Some(target);
                }
            }
            'V' => parsed.tags.insert(TypeTag::VariablePointer),
            'C' => parsed.tags.insert(TypeTag::Computed),
            'D' => parsed.tags.insert(TypeTag::Date),
            'N' => parsed.tags.insert(TypeTag::Numeric),
            'S' => parsed.tags.insert(TypeTag::Set),
            'F' | 'K' => parsed.tags.insert(TypeTag::Text),
            'W' => parsed.tags.insert(TypeTag::Multiline),
            'm' if parsed.tags.contains(TypeTag::Computed) => {
                parsed.tags.insert(TypeTag::Multiline)
            }
            'J' => {
                // output width, e.g. J8 or J3,0
                while i + 1 < chars.len()
                    && (chars[i + 1].is_ascii_digit() || chars[i + 1] == ',')
                {
                    i += 1;
                }
            }
            _ => {}
        }
        i += 1;
    }

    if parsed.tags.is_empty() {
        parsed.tags.insert(TypeTag::Text);
    }
    parsed
}

/// Parse SET field codes: `M:MALE;F:FEMALE;`
pub fn parse_set_codes(raw: &str) -> Vec<SetCode> {
    raw.split(';')
        .filter_map(|pair| {
            let (code, label) = pair.split_once(':')?;
            (!code.is_empty()).then(|| SetCode {
                code: code.to_string(),
                label: label.to_string(),
            })
        })
        .collect()
}

fn piece(value: &str, index: usize) -> Option<&str> {
    value.split('^').nth(index).filter(|p| !p.is_empty())
}

/// `ALIAS SUB-FIELD` names the subfile ALIAS; a bare `FIELD` names nothing
fn header_name(raw: &str) -> Option<String> {
    if GENERIC_HEADER_NAMES.contains(&raw) {
        return None;
    }
    let name = raw.strip_suffix(SUBFILE_HEADER_SUFFIX).unwrap_or(raw);
    non_empty(name)
}

fn non_empty(text: &str) -> Option<String> {
    let trimmed = text.trim();
    (!trimmed.is_empty()).then(|| trimmed.to_string())
}

#[derive(Debug, Clone, Default)]
struct FileParts {
    header_name: Option<String>,
    header_root: Option<String>,
    nm_name: Option<String>,
    dic_name: Option<String>,
    dic_root: Option<String>,
    up: Option<String>,
    has_header: bool,
}

#[derive(Debug, Clone, Default)]
struct FieldParts {
    zero: Option<String>,
    help_prompt: Option<String>,
    computation: Option<String>,
    description: BTreeMap<String, String>,
}

#[derive(Debug, Clone, Default)]
struct XRefParts {
    zero: Option<String>,
    set_logic: Option<String>,
    kill_logic: Option<String>,
}

/// Subfile link before resolution
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct SubfileLink {
    pub child: String,
    pub parent: String,
    pub owning_field: Option<String>,
    pub level: u32,
    pub parent_source: ParentSource,
}

/// Simple pointer before resolution
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct PointerLink {
    pub file_number: String,
    pub field_number: String,
    pub target_file: String,
}

/// One candidate target of a variable pointer field
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct VariablePointerCandidate {
    pub file_number: String,
    pub field_number: String,
    pub ordinal: String,
    pub target_file: String,
    pub description: Option<String>,
    pub prefix: Option<String>,
}

#[derive(Debug, Clone, Default, Serialize)]
pub struct SchemaStats {
    pub entries_seen: usize,
    pub entries_used: usize,
    pub entries_ignored: usize,
    pub duplicate_nodes: usize,
}

/// Everything the schema stage produces
#[derive(Debug, Clone, Default)]
pub struct SchemaModel {
    pub files: Vec<FileDef>,
    pub fields: Vec<FieldDef>,
    pub xrefs: Vec<CrossReference>,
    pub subfiles: Vec<SubfileLink>,
    pub pointers: Vec<PointerLink>,
    pub variable_pointers: Vec<VariablePointerCandidate>,
    pub inconsistencies: Vec<SchemaInconsistency>,
    pub stats: SchemaStats,
}

/// Accumulates dictionary entries; see the module docs for the shapes it reads
#[derive(Debug, Default)]
pub struct SchemaExtractor {
    files: BTreeMap<String, FileParts>,
    fields: BTreeMap<(String, String), FieldParts>,
    xrefs: BTreeMap<(String, String, String), XRefParts>,
    candidates: BTreeMap<(String, String, String), String>,
    stats: SchemaStats,
}

/// Store the first value seen for a node; count later ones as duplicates
fn set_once(slot: &mut Option<String>, value: &str, duplicates: &mut usize) {
    if slot.is_some() {
        *duplicates += 1;
    } else {
        *slot = Some(value.to_string());
    }
}

impl SchemaExtractor {
    pub fn new() -> Self {
        Self::default()
    }

    /// Classify one entry. Returns whether its shape was recognised.
    pub fn ingest(&mut self, entry: &DumpEntry) -> bool {
        self.stats.entries_seen += 1;
        let used = match entry.store.as_str() {
            "DD" => self.ingest_dd(entry),
            "DIC" => self.ingest_dic(entry),
            _ => false,
        };
        if used {
            self.stats.entries_used += 1;
        } else {
            self.stats.entries_ignored += 1;
        }
        used
    }

    fn ingest_dd(&mut self, entry: &DumpEntry) -> bool {
        let subs = &entry.subscripts;
        if subs.len() < 2 || !subs[0].is_numeric() {
            return false;
        }
        let file = subs[0].as_str().to_string();
        let s1 = subs[1].as_str();
        let s = |i: usize| entry.subscript(i);
        let value = entry.value();
        let dups = &mut self.stats.duplicate_nodes;

        if s1 == "0" && subs[1].is_numeric() {
            let parts = self.files.entry(file).or_default();
            return match (subs.len(), s(2), s(3)) {
                (2, _, _) => {
                    if parts.has_header {
                        *dups += 1;
                    } else {
                        parts.has_header = true;
                        parts.header_name = piece(value, 0).and_then(header_name);
                        parts.header_root = piece(value, 1).map(str::to_string);
                    }
                    true
                }
                (4, Some("NM"), Some(name)) => {
                    set_once(&mut parts.nm_name, name, dups);
                    true
                }
                (3, Some("UP"), _) => {
                    set_once(&mut parts.up, value, dups);
                    true
                }
                _ => false,
            };
        }

        if !subs[1].is_numeric() || subs.len() < 3 {
            return false;
        }
        let field_key = (file.clone(), s1.to_string());

        match (subs.len(), s(2), s(3), s(4)) {
            (3, Some("0"), _, _) => {
                let parts = self.fields.entry(field_key).or_default();
                set_once(&mut parts.zero, value, dups);
                true
            }
            (3, Some("3"), _, _) => {
                let parts = self.fields.entry(field_key).or_default();
                set_once(&mut parts.help_prompt, value, dups);
                true
            }
            (3, Some("9.1"), _, _) => {
                let parts = self.fields.entry(field_key).or_default();
                set_once(&mut parts.computation, value, dups);
                true
            }
            (5, Some("21"), Some(line), Some("0")) => {
                let parts = self.fields.entry(field_key).or_default();
                parts
                    .description
                    .entry(line.to_string())
                    .or_insert_with(|| value.to_string());
                true
            }
            (5, Some("1"), Some(xref), Some(node)) if xref != "0" && subs[3].is_numeric() => {
                let parts = self
                    .xrefs
                    .entry((file, s1.to_string(), xref.to_string()))
                    .or_default();
                match node {
                    "0" => set_once(&mut parts.zero, value, dups),
                    "1" => set_once(&mut parts.set_logic, value, dups),
                    "2" => set_once(&mut parts.kill_logic, value, dups),
                    _ => return false,
                }
                true
            }
            (5, Some("V"), Some(ordinal), Some("0")) => {
                let key = (file, s1.to_string(), ordinal.to_string());
                if self.candidates.contains_key(&key) {
                    *dups += 1;
                } else {
                    self.candidates.insert(key, value.to_string());
                }
                true
            }
            _ => false,
        }
    }

    fn ingest_dic(&mut self, entry: &DumpEntry) -> bool {
        let subs = &entry.subscripts;
        if subs.len() < 2 || !subs[0].is_numeric() || subs[1].as_str() != "0" {
            return false;
        }
        let parts = self.files.entry(subs[0].as_str().to_string()).or_default();
        let dups = &mut self.stats.duplicate_nodes;
        match (subs.len(), entry.subscript(2)) {
            (2, _) => {
                if let Some(name) = piece(entry.value(), 0) {
                    set_once(&mut parts.dic_name, name, dups);
                }
                true
            }
            (3, Some("GL")) => {
                set_once(&mut parts.dic_root, entry.value(), dups);
                true
            }
            _ => false,
        }
    }

    /// Merge another extractor's partial state into this one.
    ///
    /// Nodes already present here win; the other copy counts as a duplicate.
    pub fn absorb(&mut self, other: SchemaExtractor) {
        let dups = &mut self.stats.duplicate_nodes;
        for (number, theirs) in other.files {
            let ours = self.files.entry(number).or_default();
            if ours.has_header && theirs.has_header {
                *dups += 1;
            } else if theirs.has_header {
                ours.has_header = true;
                ours.header_name = theirs.header_name;
                ours.header_root = theirs.header_root;
            }
            merge_slot(&mut ours.nm_name, theirs.nm_name, dups);
            merge_slot(&mut ours.dic_name, theirs.dic_name, dups);
            merge_slot(&mut ours.dic_root, theirs.dic_root, dups);
            merge_slot(&mut ours.up, theirs.up, dups);
        }
        for (key, theirs) in other.fields {
            let ours = self.fields.entry(key).or_default();
            merge_slot(&mut ours.zero, theirs.zero, dups);
            merge_slot(&mut ours.help_prompt, theirs.help_prompt, dups);
            merge_slot(&mut ours.computation, theirs.computation, dups);
            for (line, text) in theirs.description {
                ours.description.entry(line).or_insert(text);
            }
        }
        for (key, theirs) in other.xrefs {
            let ours = self.xrefs.entry(key).or_default();
            merge_slot(&mut ours.zero, theirs.zero, dups);
            merge_slot(&mut ours.set_logic, theirs.set_logic, dups);
            merge_slot(&mut ours.kill_logic, theirs.kill_logic, dups);
        }
        for (key, value) in other.candidates {
            if self.candidates.contains_key(&key) {
                *dups += 1;
            } else {
                self.candidates.insert(key, value);
            }
        }
        self.stats.entries_seen += other.stats.entries_seen;
        self.stats.entries_used += other.stats.entries_used;
        self.stats.entries_ignored += other.stats.entries_ignored;
        self.stats.duplicate_nodes += other.stats.duplicate_nodes;
    }

    /// Assemble entities and unresolved links
    pub fn finish(self) -> SchemaModel {
        let mut model = SchemaModel {
            stats: self.stats,
            ..Default::default()
        };

        let mut files: BTreeMap<String, FileDef> = BTreeMap::new();
        let mut parents: BTreeMap<String, (String, ParentSource)> = BTreeMap::new();
        for (number, parts) in &self.files {
            if !parts.has_header {
                continue;
            }
            let name = parts
                .nm_name
                .clone()
                .or_else(|| parts.header_name.clone())
                .or_else(|| parts.dic_name.clone())
                .unwrap_or_else(|| number.clone());
            // A file with its own ^DIC entry is top level whatever its number
            let top_level = parts.dic_root.is_some() || parts.dic_name.is_some();
            let parent = match (&parts.up, number.split_once('.')) {
                (Some(up), _) => Some((up.clone(), ParentSource::UpNode)),
                (None, Some((prefix, _))) if !prefix.is_empty() && !top_level => {
                    Some((prefix.to_string(), ParentSource::DottedPrefix))
                }
                _ => None,
            };
            if let Some(parent) = &parent {
                parents.insert(number.clone(), parent.clone());
            }
            files.insert(
                number.clone(),
                FileDef {
                    number: number.clone(),
                    name,
                    storage_root: parts.dic_root.clone().or_else(|| parts.header_root.clone()),
                    parent_file: parent.map(|(p, _)| p),
                    field_count: 0,
                },
            );
        }

        let mut fields: BTreeMap<(String, String), FieldDef> = BTreeMap::new();
        for ((file, number), parts) in self.fields {
            let Some(zero) = parts.zero else {
                continue;
            };
            let field = build_field(&file, &number, &zero, parts.help_prompt, parts.computation, parts.description);
            match files.get_mut(&file) {
                Some(def) => def.field_count += 1,
                None => model.inconsistencies.push(SchemaInconsistency {
                    kind: InconsistencyKind::FieldWithoutFile,
                    file_number: file.clone(),
                    field_number: Some(number.clone()),
                    detail: format!("field {} has no file header", field.name),
                }),
            }
            fields.insert((file, number), field);
        }

        // A multiple whose subfile holds word-processing text is itself multiline
        let wp_subfiles: Vec<String> = fields
            .values()
            .filter(|f| f.number == ".01" && f.tags.contains(TypeTag::Multiline))
            .map(|f| f.file_number.clone())
            .collect();
        for field in fields.values_mut() {
            if let Some(sub) = &field.subfile_number {
                if wp_subfiles.contains(sub) {
                    field.tags.insert(TypeTag::Multiline);
                }
            }
        }

        for (child, (parent, source)) in &parents {
            let owning_field = fields
                .values()
                .find(|f| &f.file_number == parent && f.subfile_number.as_deref() == Some(child.as_str()))
                .map(|f| f.number.clone());
            model.subfiles.push(SubfileLink {
                child: child.clone(),
                parent: parent.clone(),
                owning_field,
                level: nesting_level(child, &parents),
                parent_source: *source,
            });
        }

        for field in fields.values() {
            if !field.tags.contains(TypeTag::Pointer) {
                continue;
            }
            match &field.pointer_target {
                Some(target) => model.pointers.push(PointerLink {
                    file_number: field.file_number.clone(),
                    field_number: field.number.clone(),
                    target_file: target.clone(),
                }),
                None => model.inconsistencies.push(SchemaInconsistency {
                    kind: InconsistencyKind::PointerTargetMissing,
                    file_number: field.file_number.clone(),
                    field_number: Some(field.number.clone()),
                    detail: format!("type code {} names no target file", field.type_code),
                }),
            }
        }

        for ((file, field, ordinal), value) in self.candidates {
            match piece(&value, 0) {
                Some(target) => model.variable_pointers.push(VariablePointerCandidate {
                    file_number: file,
                    field_number: field,
                    ordinal,
                    target_file: target.to_string(),
                    description: piece(&value, 1).map(str::to_string),
                    prefix: piece(&value, 3).map(str::to_string),
                }),
                None => model.inconsistencies.push(SchemaInconsistency {
                    kind: InconsistencyKind::VariablePointerTargetMissing,
                    file_number: file,
                    field_number: Some(field),
                    detail: format!("candidate {} names no target file", ordinal),
                }),
            }
        }

        let mut seen_names: BTreeMap<(String, String, String), String> = BTreeMap::new();
        for ((file, field, xref_number), parts) in self.xrefs {
            let Some(zero) = parts.zero else {
                if parts.set_logic.is_some() || parts.kill_logic.is_some() {
                    model.inconsistencies.push(SchemaInconsistency {
                        kind: InconsistencyKind::CrossReferenceIncomplete,
                        file_number: file,
                        field_number: Some(field),
                        detail: format!("xref {} has no 0 node", xref_number),
                    });
                }
                continue;
            };
            let name = piece(&zero, 1)
                .map(str::to_string)
                .unwrap_or_else(|| format!("#{}", xref_number));
            let key = (file.clone(), field.clone(), name.clone());
            if let Some(first) = seen_names.get(&key) {
                model.inconsistencies.push(SchemaInconsistency {
                    kind: InconsistencyKind::DuplicateDefinition,
                    file_number: file,
                    field_number: Some(field),
                    detail: format!("xref {} reuses name {} from xref {}", xref_number, name, first),
                });
                continue;
            }
            seen_names.insert(key, xref_number.clone());

            let raw_kind = piece(&zero, 2).unwrap_or_default().to_string();
            let kind = XRefKind::from_raw(&raw_kind);
            let trigger_target = match (kind, piece(&zero, 3), piece(&zero, 4)) {
                (XRefKind::Triggered, Some(tf), Some(tfld)) => Some(format!("{},{}", tf, tfld)),
                _ => None,
            };
            model.xrefs.push(CrossReference {
                file_number: file,
                field_number: field,
                name,
                xref_number,
                kind,
                raw_kind,
                set_logic: parts.set_logic,
                kill_logic: parts.kill_logic,
                trigger_target,
            });
        }

        model.files = files.into_values().collect();
        model.fields = fields.into_values().collect();
        model
    }
}

fn merge_slot(ours: &mut Option<String>, theirs: Option<String>, duplicates: &mut usize) {
    match (ours.is_some(), theirs) {
        (true, Some(_)) => *duplicates += 1,
        (false, Some(value)) => *ours = Some(value),
        _ => {}
    }
}

fn build_field(
    file: &str,
    number: &str,
    zero: &str,
    help_prompt: Option<String>,
    computation: Option<String>,
    description: BTreeMap<String, String>,
) -> FieldDef {
    let pieces: Vec<&str> = zero.split('^').collect();
    let type_code = pieces.get(1).copied().unwrap_or_default();
    let parsed = parse_type_code(type_code);
    let third = pieces.get(2).copied().unwrap_or_default();
    let validation = if pieces.len() > 4 {
        non_empty(&pieces[4..].join("^"))
    } else {
        None
    };

    let mut lines: Vec<(f64, String)> = description
        .into_iter()
        .map(|(n, text)| (n.parse::<f64>().unwrap_or(f64::MAX), text))
        .collect();
    lines.sort_by(|a, b| a.0.total_cmp(&b.0));
    let description = if lines.is_empty() {
        None
    } else {
        Some(lines.into_iter().map(|(_, t)| t).collect::<Vec<_>>().join("\n"))
    };

    FieldDef {
        file_number: file.to_string(),
        number: number.to_string(),
        name: pieces.first().copied().unwrap_or_default().to_string(),
        type_code: type_code.to_string(),
        tags: parsed.tags,
        required: parsed.required,
        storage_location: pieces.get(3).and_then(|p| non_empty(p)),
        validation_text: validation,
        computation: computation.and_then(|c| non_empty(&c)),
        help_prompt: help_prompt.and_then(|h| non_empty(&h)),
        description,
        set_codes: if parsed.tags.contains(TypeTag::Set) {
            parse_set_codes(third)
        } else {
            Vec::new()
        },
        pointer_root: if parsed.tags.contains(TypeTag::Pointer) {
            non_empty(third)
        } else {
            None
        },
        pointer_target: parsed.pointer_target,
        subfile_number: parsed.subfile_number,
    }
}

/// Depth of a subfile below its top-level file.
///
/// Follows recorded parents while they are themselves subfiles; without any
/// chain information it falls back to the number of dotted segments beyond
/// the root.
fn nesting_level(child: &str, parents: &BTreeMap<String, (String, ParentSource)>) -> u32 {
    let mut level = 0;
    let mut current = child;
    while let Some((parent, _)) = parents.get(current) {
        level += 1;
        if level >= MAX_NESTING || parent == child {
            break;
        }
        current = parent.as_str();
    }
    if level == 0 {
        child.split('.').count().saturating_sub(1) as u32
    } else {
        level
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::dictionary::decoder::DictionaryDecoder;

    fn extract(text: &str) -> SchemaModel {
        let mut extractor = SchemaExtractor::new();
        for entry in DictionaryDecoder::new(text.as_bytes(), "test") {
            extractor.ingest(&entry);
        }
        extractor.finish()
    }

    #[test]
    fn test_field_from_zero_node() {
        let model = extract("^DD(2,0)=\"PATIENT^DPT^^1\"\n^DD(2,.01,0)=\"NAME^RF^^0;1^K:$L(X)>30 X\"\n");
        let field = &model.fields[0];
        assert_eq!(field.file_number, "2");
        assert_eq!(field.number, ".01");
        assert_eq!(field.name, "NAME");
        assert_eq!(field.type_code, "RF");
        assert!(field.required);
        assert!(field.tags.contains(TypeTag::Text));
        assert_eq!(field.storage_location.as_deref(), Some("0;1"));
        assert_eq!(field.validation_text.as_deref(), Some("K:$L(X)>30 X"));
    }

    #[test]
    fn test_file_header() {
        let model = extract("^DD(2,0)=\"PATIENT^DPT^^...\"\n");
        assert_eq!(model.files.len(), 1);
        assert_eq!(model.files[0].number, "2");
        assert_eq!(model.files[0].name, "PATIENT");
        assert_eq!(model.files[0].storage_root.as_deref(), Some("DPT"));
    }

    #[test]
    fn test_validation_keeps_carets() {
        let model = extract(
            "^DD(2,0)=\"PATIENT^DPT\"\n^DD(2,.02,0)=\"SEX^RS^M:MALE;F:FEMALE;^0;2^Q:'$D(X)  D ^DIC\"\n",
        );
        let field = &model.fields[0];
        assert_eq!(field.validation_text.as_deref(), Some("Q:'$D(X)  D ^DIC"));
        assert_eq!(field.set_codes.len(), 2);
        assert_eq!(field.set_codes[1].label, "FEMALE");
    }

    #[test]
    fn test_type_code_traits() {
        let pointer = parse_type_code("*P200'");
        assert!(pointer.tags.contains(TypeTag::Pointer));
        assert_eq!(pointer.pointer_target.as_deref(), Some("200"));

        let date_computed = parse_type_code("DC");
        assert!(date_computed.tags.contains(TypeTag::Date));
        assert!(date_computed.tags.contains(TypeTag::Computed));

        let numeric = parse_type_code("NJ3,0");
        assert_eq!(numeric.tags.iter().collect::<Vec<_>>(), vec![TypeTag::Numeric]);

        let multiple = parse_type_code("2.01A");
        assert!(multiple.tags.contains(TypeTag::Nested));
        assert_eq!(multiple.subfile_number.as_deref(), Some("2.01"));

        assert!(parse_type_code("Cm").tags.contains(TypeTag::Multiline));
        assert!(parse_type_code("RV").tags.contains(TypeTag::VariablePointer));
        assert!(parse_type_code("").tags.contains(TypeTag::Text));
    }

    #[test]
    fn test_subfile_dotted_parent() {
        let model = extract(
            "^DD(2,0)=\"PATIENT^DPT\"\n^DD(2,1,0)=\"ALIAS^2.01A^^.01;0\"\n^DD(2.01,0)=\"ALIAS SUB-FIELD^^.01^1\"\n^DD(2.01,.01,0)=\"ALIAS^MF^^0;1^\"\n",
        );
        assert_eq!(model.subfiles.len(), 1);
        let link = &model.subfiles[0];
        assert_eq!(link.child, "2.01");
        assert_eq!(link.parent, "2");
        assert_eq!(link.level, 1);
        assert_eq!(link.parent_source, ParentSource::DottedPrefix);
        assert_eq!(link.owning_field.as_deref(), Some("1"));
        let sub = model.files.iter().find(|f| f.number == "2.01").unwrap();
        assert_eq!(sub.name, "ALIAS");
        assert_eq!(sub.parent_file.as_deref(), Some("2"));
    }

    #[test]
    fn test_dotted_file_with_dic_root_is_top_level() {
        let model = extract(
            "^DD(120,0)=\"ALLERGY^GMR\"\n^DD(120.8,0)=\"PATIENT ALLERGIES^GMR\"\n^DD(120.8,.01,0)=\"REACTANT^RF^^0;1^Q\"\n^DIC(120.8,0,\"GL\")=\"^GMR(120.8,\"\n",
        );
        let file = model.files.iter().find(|f| f.number == "120.8").unwrap();
        assert_eq!(file.parent_file, None);
        assert_eq!(file.storage_root.as_deref(), Some("^GMR(120.8,"));
        assert!(model.subfiles.is_empty());
        assert!(model
            .inconsistencies
            .iter()
            .all(|i| i.file_number != "120.8"));
    }

    #[test]
    fn test_subfile_up_chain_level() {
        let model = extract(
            "^DD(2,0)=\"PATIENT^DPT\"\n^DD(2.01,0)=\"SUB-FIELD\"\n^DD(2.01,0,\"UP\")=2\n^DD(2.011,0)=\"SUB-FIELD\"\n^DD(2.011,0,\"UP\")=2.01\n",
        );
        let deep = model.subfiles.iter().find(|l| l.child == "2.011").unwrap();
        assert_eq!(deep.parent, "2.01");
        assert_eq!(deep.level, 2);
        assert_eq!(deep.parent_source, ParentSource::UpNode);
    }

    #[test]
    fn test_word_processing_multiple_is_multiline() {
        let model = extract(
            "^DD(2,0)=\"PATIENT^DPT\"\n^DD(2,10,0)=\"REMARKS^2.08^^R;0\"\n^DD(2.08,0)=\"SUB-FIELD\"\n^DD(2.08,.01,0)=\"REMARKS^W^^0;1\"\n",
        );
        let owner = model.fields.iter().find(|f| f.number == "10").unwrap();
        assert!(owner.tags.contains(TypeTag::Nested));
        assert!(owner.tags.contains(TypeTag::Multiline));
    }

    #[test]
    fn test_cross_references() {
        let model = extract(
            "^DD(2,0)=\"PATIENT^DPT\"\n^DD(2,.01,0)=\"NAME^RF^^0;1^\"\n^DD(2,.01,1,0)=\"^.1\"\n^DD(2,.01,1,1,0)=\"2^B\"\n^DD(2,.01,1,1,1)=\"S ^DPT(\"\"B\"\",$E(X,1,30),DA)=\"\"\"\"\"\n^DD(2,.01,1,1,2)=\"K ^DPT(\"\"B\"\",$E(X,1,30),DA)\"\n^DD(2,.01,1,2,0)=\"2^^TRIGGER^2^.09\"\n^DD(2,.01,1,3,1)=\"Q\"\n",
        );
        assert_eq!(model.xrefs.len(), 2);
        let b = &model.xrefs[0];
        assert_eq!(b.name, "B");
        assert_eq!(b.kind, XRefKind::Ordinary);
        assert_eq!(b.set_logic.as_deref(), Some("S ^DPT(\"B\",$E(X,1,30),DA)=\"\""));
        let trigger = &model.xrefs[1];
        assert_eq!(trigger.name, "#2");
        assert_eq!(trigger.kind, XRefKind::Triggered);
        assert_eq!(trigger.trigger_target.as_deref(), Some("2,.09"));
        assert!(model
            .inconsistencies
            .iter()
            .any(|i| i.kind == InconsistencyKind::CrossReferenceIncomplete));
    }

    #[test]
    fn test_variable_pointer_candidates_accumulate() {
        let model = extract(
            "^DD(120.8,0)=\"ALLERGY^GMR(120.8,\"\n^DD(120.8,1,0)=\"REACTANT^RV^^0;3\"\n^DD(120.8,1,\"V\",1,0)=\"50^DRUG^1^D^^n\"\n^DD(120.8,1,\"V\",2,0)=\"120.82^ALLERGY^2^A^^n\"\n",
        );
        assert_eq!(model.variable_pointers.len(), 2);
        assert_eq!(model.variable_pointers[0].target_file, "50");
        assert_eq!(model.variable_pointers[0].description.as_deref(), Some("DRUG"));
        assert_eq!(model.variable_pointers[1].prefix.as_deref(), Some("A"));
        assert!(model.pointers.is_empty());
    }

    #[test]
    fn test_dic_root_and_name_fallback() {
        let model = extract(
            "^DD(200,0)=\"FIELD^^1^1\"\n^DIC(200,0)=\"NEW PERSON^200I^1^1\"\n^DIC(200,0,\"GL\")=\"^VA(200,\"\n",
        );
        let file = &model.files[0];
        assert_eq!(file.name, "NEW PERSON");
        assert_eq!(file.storage_root.as_deref(), Some("^VA(200,"));
    }

    #[test]
    fn test_absorb_keeps_first_and_counts_duplicates() {
        let mut first = SchemaExtractor::new();
        let mut second = SchemaExtractor::new();
        for entry in DictionaryDecoder::new("^DD(2,0)=\"PATIENT^DPT\"\n".as_bytes(), "a") {
            first.ingest(&entry);
        }
        for entry in DictionaryDecoder::new(
            "^DD(2,0)=\"OTHER^XX\"\n^DD(2,.01,0)=\"NAME^F^^0;1\"\n".as_bytes(),
            "b",
        ) {
            second.ingest(&entry);
        }
        first.absorb(second);
        let model = first.finish();
        assert_eq!(model.files.len(), 1);
        assert_eq!(model.files[0].name, "PATIENT");
        assert_eq!(model.files[0].field_count, 1);
        assert_eq!(model.stats.duplicate_nodes, 1);
    }

    #[test]
    fn test_field_without_file_is_inconsistency() {
        let model = extract("^DD(9,.01,0)=\"NAME^F^^0;1\"\n");
        assert_eq!(model.fields.len(), 1);
        assert_eq!(
            model.inconsistencies[0].kind,
            InconsistencyKind::FieldWithoutFile
        );
    }
}
