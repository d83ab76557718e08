//! Streaming decoder for global dump (ZWR) text
//!
//! One logical entry per line:
//!
//! ```text
//! ^DD(2,.01,0)="NAME^RF^^0;1^K:$L(X)>30 X"
//! ^DIC(2,0,"GL")="^DPT("
//! ^DD(2,0,"DT")=3120512
//! ```
//!
//! Subscripts are either quoted strings (embedded quotes doubled) or bare
//! canonical numbers. Values are quoted strings or bare numbers. A quoted value
//! that does not close on its physical line continues on the following lines
//! until it does, as long as those lines do not start a new entry.
//!
//! The decoder keeps the quoted/bare distinction so [`DumpEntry::encode`]
//! reproduces every accepted line byte for byte. The line terminator (LF or
//! CRLF) is not part of the entry. Lines that are not valid UTF-8 are counted
//! as malformed rather than decoded from a lossy copy.

use std::fs::File;
use std::io::{BufRead, BufReader};
use std::path::Path;

use once_cell::sync::Lazy;
use regex::Regex;
use serde::Serialize;

use crate::error::{DecodeError, DecodeFailure, GraphError, Result};

static CANONICAL_NUMBER: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"^-?(?:\d+(?:\.\d+)?|\.\d+)(?:E-?\d+)?$").expect("valid number pattern")
});

static STORE_NAME: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"^%?[A-Za-z][A-Za-z0-9]*$").expect("valid store name pattern"));

/// Physical lines a single value may span before it is declared unterminated
const MAX_CONTINUATION_LINES: usize = 64;

#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize)]
#[serde(untagged)]
pub enum Subscript {
    /// Quoted subscript, unescaped
    Str(String),
    /// Bare numeric subscript, as written
    Num(String),
}

impl Subscript {
    pub fn as_str(&self) -> &str {
        match self {
            Self::Str(s) | Self::Num(s) => s,
        }
    }

    pub fn is_numeric(&self) -> bool {
        matches!(self, Self::Num(_))
    }

    fn encode_into(&self, out: &mut String) {
        match self {
            Self::Num(n) => out.push_str(n),
            Self::Str(s) => push_quoted(out, s),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(untagged)]
pub enum DumpValue {
    Str(String),
    Num(String),
}

impl DumpValue {
    pub fn as_str(&self) -> &str {
        match self {
            Self::Str(s) | Self::Num(s) => s,
        }
    }
}

/// One decoded (store, subscripts, value) triple
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct DumpEntry {
    pub store: String,
    pub subscripts: Vec<Subscript>,
    pub value: DumpValue,
    /// First physical line of the entry (1-based)
    pub line_number: usize,
}

impl DumpEntry {
    pub fn subscript(&self, index: usize) -> Option<&str> {
        self.subscripts.get(index).map(Subscript::as_str)
    }

    pub fn value(&self) -> &str {
        self.value.as_str()
    }

    /// Re-encode in dump syntax
    pub fn encode(&self) -> String {
        let mut out = String::with_capacity(self.store.len() + self.value().len() + 16);
        out.push('^');
        out.push_str(&self.store);
        if !self.subscripts.is_empty() {
            out.push('(');
            for (i, sub) in self.subscripts.iter().enumerate() {
                if i > 0 {
                    out.push(',');
                }
                sub.encode_into(&mut out);
            }
            out.push(')');
        }
        out.push('=');
        match &self.value {
            DumpValue::Num(n) => out.push_str(n),
            DumpValue::Str(s) => push_quoted(&mut out, s),
        }
        out
    }
}

fn push_quoted(out: &mut String, s: &str) {
    out.push('"');
    for c in s.chars() {
        if c == '"' {
            out.push('"');
        }
        out.push(c);
    }
    out.push('"');
}

/// Decode one logical line (continuation lines already joined with `\n`).
pub fn decode_line(line: &str, line_number: usize) -> std::result::Result<DumpEntry, DecodeFailure> {
    let bytes = line.as_bytes();
    if bytes.first() != Some(&b'^') {
        return Err(DecodeFailure::MissingCaret);
    }

    let name_end = line[1..]
        .find(['(', '='])
        .map(|i| i + 1)
        .unwrap_or(line.len());
    let store = &line[1..name_end];
    if !STORE_NAME.is_match(store) {
        return Err(DecodeFailure::BadStoreName);
    }

    let mut pos = name_end;
    let mut subscripts = Vec::new();
    if bytes.get(pos) == Some(&b'(') {
        pos += 1;
        loop {
            let (sub, next) = read_subscript(line, pos)?;
            subscripts.push(sub);
            match bytes.get(next) {
                Some(b',') => pos = next + 1,
                Some(b')') => {
                    pos = next + 1;
                    break;
                }
                Some(_) => return Err(DecodeFailure::BadSubscript),
                None => return Err(DecodeFailure::UnterminatedSubscripts),
            }
        }
    }

    if bytes.get(pos) != Some(&b'=') {
        return Err(DecodeFailure::MissingValue);
    }
    pos += 1;
    if pos >= bytes.len() {
        return Err(DecodeFailure::MissingValue);
    }

    let value = if bytes[pos] == b'"' {
        let (text, end) = read_quoted(line, pos).ok_or(DecodeFailure::UnterminatedValue)?;
        if end != bytes.len() {
            return Err(DecodeFailure::BadValue);
        }
        DumpValue::Str(text)
    } else {
        let raw = &line[pos..];
        if !CANONICAL_NUMBER.is_match(raw) {
            return Err(DecodeFailure::BadValue);
        }
        DumpValue::Num(raw.to_string())
    };

    Ok(DumpEntry {
        store: store.to_string(),
        subscripts,
        value,
        line_number,
    })
}

/// Read one subscript starting at `pos`; returns it and the index just past it
fn read_subscript(line: &str, pos: usize) -> std::result::Result<(Subscript, usize), DecodeFailure> {
    let bytes = line.as_bytes();
    match bytes.get(pos) {
        None => Err(DecodeFailure::UnterminatedSubscripts),
        Some(b'"') => {
            let (text, end) = read_quoted(line, pos).ok_or(DecodeFailure::UnterminatedSubscripts)?;
            Ok((Subscript::Str(text), end))
        }
        Some(_) => {
            let end = line[pos..]
                .find([',', ')'])
                .map(|i| pos + i)
                .ok_or(DecodeFailure::UnterminatedSubscripts)?;
            let raw = &line[pos..end];
            if !CANONICAL_NUMBER.is_match(raw) {
                return Err(DecodeFailure::BadSubscript);
            }
            Ok((Subscript::Num(raw.to_string()), end))
        }
    }
}

/// Read a quoted string whose opening quote is at `start`. Doubled quotes are
/// unescaped. Returns the text and the index after the closing quote.
fn read_quoted(line: &str, start: usize) -> Option<(String, usize)> {
    let bytes = line.as_bytes();
    let mut out = String::new();
    let mut i = start + 1;
    let mut run_start = i;
    while i < bytes.len() {
        if bytes[i] == b'"' {
            out.push_str(&line[run_start..i]);
            if bytes.get(i + 1) == Some(&b'"') {
                out.push('"');
                i += 2;
                run_start = i;
                continue;
            }
            return Some((out, i + 1));
        }
        i += 1;
    }
    None
}

fn is_header(line: &str) -> bool {
    line.starts_with("GT.M") || line.starts_with("ZWR")
}

/// Counters for one decoded source
#[derive(Debug, Clone, Default, Serialize)]
pub struct DecodeStats {
    pub physical_lines: usize,
    pub entries: usize,
    pub header_lines: usize,
    pub blank_lines: usize,
    pub continued_entries: usize,
    pub malformed: usize,
    /// First malformed lines, verbatim
    pub samples: Vec<DecodeError>,
    /// Read failure that ended the stream early
    pub read_error: Option<String>,
}

/// Physical line number, text, and whether its bytes were valid UTF-8
type Physical = (usize, String, bool);

/// Lazy decoder over any buffered reader.
///
/// Yields accepted entries; malformed lines are counted in [`DecodeStats`]
/// and never stop the stream.
pub struct DictionaryDecoder<R> {
    reader: R,
    origin: String,
    line_number: usize,
    lookahead: Option<Physical>,
    max_samples: usize,
    stats: DecodeStats,
}

impl DictionaryDecoder<BufReader<File>> {
    pub fn open(path: &Path) -> Result<Self> {
        let file = File::open(path).map_err(|e| GraphError::io(path.display(), e))?;
        Ok(Self::new(BufReader::new(file), path.display().to_string()))
    }
}

impl<R: BufRead> DictionaryDecoder<R> {
    pub fn new(reader: R, origin: impl Into<String>) -> Self {
        Self {
            reader,
            origin: origin.into(),
            line_number: 0,
            lookahead: None,
            max_samples: 50,
            stats: DecodeStats::default(),
        }
    }

    pub fn with_max_samples(mut self, max_samples: usize) -> Self {
        self.max_samples = max_samples;
        self
    }

    pub fn stats(&self) -> &DecodeStats {
        &self.stats
    }

    pub fn into_stats(self) -> DecodeStats {
        self.stats
    }

    fn next_physical(&mut self) -> Option<Physical> {
        if let Some(line) = self.lookahead.take() {
            return Some(line);
        }
        let mut buf = Vec::new();
        match self.reader.read_until(b'\n', &mut buf) {
            Ok(0) => None,
            Ok(_) => {
                if buf.last() == Some(&b'\n') {
                    buf.pop();
                    if buf.last() == Some(&b'\r') {
                        buf.pop();
                    }
                }
                self.line_number += 1;
                self.stats.physical_lines += 1;
                let (text, valid_utf8) = match String::from_utf8(buf) {
                    Ok(text) => (text, true),
                    Err(err) => (String::from_utf8_lossy(err.as_bytes()).into_owned(), false),
                };
                Some((self.line_number, text, valid_utf8))
            }
            Err(err) => {
                tracing::warn!("[DECODE] {}: read failed after line {}: {}", self.origin, self.line_number, err);
                self.stats.read_error = Some(err.to_string());
                None
            }
        }
    }

    fn record_malformed(&mut self, line_number: usize, reason: DecodeFailure, raw: String) {
        self.stats.malformed += 1;
        tracing::debug!("[DECODE] {}:{}: {}", self.origin, line_number, reason);
        if self.stats.samples.len() < self.max_samples {
            self.stats.samples.push(DecodeError {
                origin: self.origin.clone(),
                line_number,
                reason,
                raw,
            });
        }
    }
}

impl<R: BufRead> Iterator for DictionaryDecoder<R> {
    type Item = DumpEntry;

    fn next(&mut self) -> Option<DumpEntry> {
        loop {
            let (line_number, mut logical, mut valid_utf8) = self.next_physical()?;

            if logical.trim().is_empty() {
                self.stats.blank_lines += 1;
                continue;
            }
            if is_header(&logical) {
                self.stats.header_lines += 1;
                continue;
            }

            let mut continued = 0;
            let outcome = loop {
                match decode_line(&logical, line_number) {
                    Err(DecodeFailure::UnterminatedValue) if continued < MAX_CONTINUATION_LINES => {
                        match self.next_physical() {
                            Some((_, next, next_valid)) if !next.starts_with('^') => {
                                logical.push('\n');
                                logical.push_str(&next);
                                valid_utf8 &= next_valid;
                                continued += 1;
                            }
                            Some(next) => {
                                self.lookahead = Some(next);
                                break Err(DecodeFailure::UnterminatedValue);
                            }
                            None => break Err(DecodeFailure::UnterminatedValue),
                        }
                    }
                    other => break other,
                }
            };

            let outcome = if valid_utf8 {
                outcome
            } else {
                Err(DecodeFailure::InvalidUtf8)
            };

            match outcome {
                Ok(entry) => {
                    self.stats.entries += 1;
                    if continued > 0 {
                        self.stats.continued_entries += 1;
                    }
                    return Some(entry);
                }
                Err(reason) => self.record_malformed(line_number, reason, logical),
            }
        }
    }
}
