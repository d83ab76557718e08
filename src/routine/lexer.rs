//! Line-level tokenizer for M routine text
//!
//! Splits a line into an optional label head, dot-block depth, commands
//! (name, postconditional, argument text) and trailing comment. Expression
//! text is never evaluated; [`scan_expr`] only locates global references and
//! extrinsic calls inside it.
//!
//! All pieces are [`Segment`]s that remember their byte offset in the source
//! line, so call sites can be told apart by position.

use once_cell::sync::Lazy;
use regex::Regex;

static LABEL_NAME: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"^(?:%[A-Za-z0-9]*|[A-Za-z][A-Za-z0-9]*|[0-9]+)").expect("valid label pattern"));

static GLOBAL_NAME: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"^%?[A-Za-z][A-Za-z0-9]*").expect("valid global pattern"));

static ROUTINE_NAME: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"^%?[A-Za-z0-9]+").expect("valid routine pattern"));

/// A slice of a line together with its byte offset in that line
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Segment<'a> {
    pub text: &'a str,
    pub start: usize,
}

impl<'a> Segment<'a> {
    pub fn new(text: &'a str, start: usize) -> Self {
        Self { text, start }
    }

    pub fn sub(&self, from: usize, to: usize) -> Segment<'a> {
        Segment {
            text: &self.text[from..to],
            start: self.start + from,
        }
    }

    pub fn tail(&self, from: usize) -> Segment<'a> {
        self.sub(from, self.text.len())
    }

    pub fn is_empty(&self) -> bool {
        self.text.is_empty()
    }
}

/// Commands the extractors care about. Abbreviations are matched case-insensitively.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Keyword {
    Do,
    Goto,
    Job,
    Set,
    Kill,
    Merge,
    Quit,
    Halt,
    Hang,
    If,
    Else,
    For,
    Lock,
    New,
    Other,
}

impl Keyword {
    fn classify(name: &str, has_args: bool) -> Self {
        match name.to_ascii_uppercase().as_str() {
            "D" | "DO" => Self::Do,
            "G" | "GOTO" => Self::Goto,
            "J" | "JOB" => Self::Job,
            "S" | "SET" => Self::Set,
            "K" | "KILL" => Self::Kill,
            "M" | "MERGE" => Self::Merge,
            "Q" | "QUIT" => Self::Quit,
            "H" if has_args => Self::Hang,
            "H" | "HALT" => Self::Halt,
            "HANG" => Self::Hang,
            "I" | "IF" => Self::If,
            "E" | "ELSE" => Self::Else,
            "F" | "FOR" => Self::For,
            "L" | "LOCK" => Self::Lock,
            "N" | "NEW" => Self::New,
            _ => Self::Other,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Command<'a> {
    pub name: Segment<'a>,
    pub keyword: Keyword,
    pub postcond: Option<Segment<'a>>,
    pub args: Option<Segment<'a>>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LabelHead<'a> {
    pub name: &'a str,
    pub params: Option<&'a str>,
}

impl LabelHead<'_> {
    pub fn param_list(&self) -> Vec<String> {
        self.params
            .map(|p| {
                p.split(',')
                    .map(str::trim)
                    .filter(|s| !s.is_empty())
                    .map(str::to_string)
                    .collect()
            })
            .unwrap_or_default()
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ParsedLine<'a> {
    pub label: Option<LabelHead<'a>>,
    /// Dot-block depth (number of leading `.`)
    pub depth: usize,
    pub commands: Vec<Command<'a>>,
    pub comment: Option<&'a str>,
    /// False when command scanning stopped on text it could not read
    pub clean: bool,
}

/// Text in label position that is not a valid label
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LabelError {
    pub found: String,
}

/// Parse one routine line
pub fn parse_line(line: &str) -> Result<ParsedLine<'_>, LabelError> {
    let bytes = line.as_bytes();
    let mut pos = 0;
    let mut label = None;

    match bytes.first() {
        Some(b' ') | Some(b'\t') | None => {}
        Some(b';') => {
            return Ok(ParsedLine {
                label: None,
                depth: 0,
                commands: Vec::new(),
                comment: Some(&line[1..]),
                clean: true,
            });
        }
        Some(_) => {
            let name = LABEL_NAME
                .find(line)
                .map(|m| m.as_str())
                .filter(|n| !n.is_empty())
                .ok_or_else(|| LabelError {
                    found: line.chars().take(16).collect(),
                })?;
            pos = name.len();
            let mut params = None;
            if bytes.get(pos) == Some(&b'(') {
                let close = line[pos..].find(')').ok_or_else(|| LabelError {
                    found: line.chars().take(16).collect(),
                })?;
                params = Some(&line[pos + 1..pos + close]);
                pos += close + 1;
            }
            match bytes.get(pos) {
                None | Some(b' ') | Some(b'\t') | Some(b';') => {}
                Some(_) => {
                    return Err(LabelError {
                        found: line.chars().take(16).collect(),
                    })
                }
            }
            label = Some(LabelHead { name, params });
        }
    }

    // line start: whitespace, then dots separated by optional spaces
    let mut depth = 0;
    while pos < bytes.len() {
        match bytes[pos] {
            b' ' | b'\t' => pos += 1,
            b'.' => {
                depth += 1;
                pos += 1;
            }
            _ => break,
        }
    }

    let (commands, comment, clean) = scan_commands(line, pos);
    Ok(ParsedLine {
        label,
        depth,
        commands,
        comment,
        clean,
    })
}

fn scan_commands(line: &str, mut pos: usize) -> (Vec<Command<'_>>, Option<&str>, bool) {
    let bytes = line.as_bytes();
    let mut commands = Vec::new();
    loop {
        while pos < bytes.len() && (bytes[pos] == b' ' || bytes[pos] == b'\t') {
            pos += 1;
        }
        if pos >= bytes.len() {
            return (commands, None, true);
        }
        if bytes[pos] == b';' {
            return (commands, Some(&line[pos + 1..]), true);
        }
        if !bytes[pos].is_ascii_alphabetic() {
            return (commands, None, false);
        }

        let name_start = pos;
        while pos < bytes.len() && bytes[pos].is_ascii_alphabetic() {
            pos += 1;
        }
        let name = Segment::new(&line[name_start..pos], name_start);

        let mut postcond = None;
        if bytes.get(pos) == Some(&b':') {
            let end = token_end(line, pos + 1);
            postcond = Some(Segment::new(&line[pos + 1..end], pos + 1));
            pos = end;
        }

        let mut args = None;
        match bytes.get(pos) {
            None => {}
            Some(b' ') => {
                pos += 1;
                // two spaces (or end of line) mean no argument
                if pos < bytes.len() && bytes[pos] != b' ' && bytes[pos] != b';' {
                    let end = token_end(line, pos);
                    args = Some(Segment::new(&line[pos..end], pos));
                    pos = end;
                }
            }
            Some(b'\t') => pos += 1,
            Some(_) => {
                return (commands, None, false);
            }
        }

        commands.push(Command {
            name,
            keyword: Keyword::classify(name.text, args.is_some()),
            postcond,
            args,
        });
    }
}

/// End of an argument token: first space outside strings and parentheses
fn token_end(line: &str, from: usize) -> usize {
    let bytes = line.as_bytes();
    let mut in_string = false;
    let mut depth = 0usize;
    let mut i = from;
    while i < bytes.len() {
        match bytes[i] {
            b'"' => in_string = !in_string,
            b'(' if !in_string => depth += 1,
            b')' if !in_string => depth = depth.saturating_sub(1),
            b' ' | b'\t' if !in_string && depth == 0 => return i,
            _ => {}
        }
        i += 1;
    }
    bytes.len()
}

/// Index of the `)` matching the `(` at `open`, skipping string literals
pub fn matching_paren(text: &str, open: usize) -> Option<usize> {
    let bytes = text.as_bytes();
    let mut in_string = false;
    let mut depth = 0usize;
    for (i, b) in bytes.iter().enumerate().skip(open) {
        match b {
            b'"' => in_string = !in_string,
            b'(' if !in_string => depth += 1,
            b')' if !in_string => {
                depth = depth.saturating_sub(1);
                if depth == 0 {
                    return Some(i);
                }
            }
            _ => {}
        }
    }
    None
}

/// Split at commas that are outside strings and parentheses
pub fn split_args<'a>(seg: Segment<'a>) -> Vec<Segment<'a>> {
    let bytes = seg.text.as_bytes();
    let mut parts = Vec::new();
    let mut in_string = false;
    let mut depth = 0usize;
    let mut start = 0;
    for (i, b) in bytes.iter().enumerate() {
        match b {
            b'"' => in_string = !in_string,
            b'(' if !in_string => depth += 1,
            b')' if !in_string => depth = depth.saturating_sub(1),
            b',' if !in_string && depth == 0 => {
                parts.push(seg.sub(start, i));
                start = i + 1;
            }
            _ => {}
        }
    }
    parts.push(seg.tail(start));
    parts
}

/// First top-level occurrence of `needle`
pub fn find_top_level(seg: Segment<'_>, needle: u8) -> Option<usize> {
    let mut in_string = false;
    let mut depth = 0usize;
    for (i, b) in seg.text.as_bytes().iter().enumerate() {
        match *b {
            b'"' => in_string = !in_string,
            b'(' if !in_string => depth += 1,
            b')' if !in_string => depth = depth.saturating_sub(1),
            c if c == needle && !in_string && depth == 0 => return Some(i),
            _ => {}
        }
    }
    None
}

/// `LABEL+OFFSET^ROUTINE(ACTUALS)` as written in DO/GOTO/JOB or after `$$`
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EntryRef<'a> {
    pub label: Option<&'a str>,
    pub offset: Option<&'a str>,
    pub routine: Option<&'a str>,
    /// Target is computed at runtime (`@`)
    pub indirect: bool,
    pub actuals: Option<Segment<'a>>,
    /// Whole reference including actuals
    pub span: Segment<'a>,
}

/// Parse an entry reference at the start of `seg`.
///
/// Returns `None` when the text does not start with one.
pub fn parse_entry_ref(seg: Segment<'_>) -> Option<EntryRef<'_>> {
    let text = seg.text;
    let bytes = text.as_bytes();

    if bytes.first() == Some(&b'@') {
        let end = find_top_level(seg, b':').unwrap_or(text.len());
        return Some(EntryRef {
            label: None,
            offset: None,
            routine: None,
            indirect: true,
            actuals: None,
            span: seg.sub(0, end),
        });
    }

    let mut pos = 0;
    let label = LABEL_NAME.find(text).map(|m| m.as_str()).filter(|l| !l.is_empty());
    if let Some(l) = label {
        pos = l.len();
    }

    let mut offset = None;
    if bytes.get(pos) == Some(&b'+') {
        let len = text[pos + 1..]
            .bytes()
            .take_while(|b| b.is_ascii_alphanumeric() || *b == b'%')
            .count();
        offset = Some(&text[pos + 1..pos + 1 + len]);
        pos += 1 + len;
    }

    let mut routine = None;
    let mut indirect = false;
    if bytes.get(pos) == Some(&b'^') {
        if bytes.get(pos + 1) == Some(&b'@') {
            indirect = true;
            let len = text[pos + 2..]
                .bytes()
                .take_while(|b| b.is_ascii_alphanumeric() || *b == b'%')
                .count();
            pos += 2 + len;
        } else {
            let m = ROUTINE_NAME.find(&text[pos + 1..])?;
            routine = Some(m.as_str());
            pos += 1 + m.end();
        }
    }

    if label.is_none() && routine.is_none() && !indirect {
        return None;
    }

    let mut actuals = None;
    if bytes.get(pos) == Some(&b'(') {
        let close = matching_paren(text, pos)?;
        actuals = Some(seg.sub(pos + 1, close));
        pos = close + 1;
    }

    Some(EntryRef {
        label,
        offset,
        routine,
        indirect,
        actuals,
        span: seg.sub(0, pos),
    })
}

/// Something found inside expression text
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ExprRef<'a> {
    Global {
        name: &'a str,
        subscripts: Option<Segment<'a>>,
        /// `^NAME(...)` as written
        pattern: Segment<'a>,
        /// Intrinsic function (`D`, `DATA`, `O`, ...) whose first argument this is
        wrapper: Option<&'a str>,
    },
    /// `^(...)`
    Naked { pattern: Segment<'a> },
    /// `^@X`
    IndirectGlobal { pattern: Segment<'a> },
    /// `$$LABEL^ROUTINE(...)`
    Extrinsic { target: EntryRef<'a> },
}

struct Frame<'a> {
    function: Option<&'a str>,
    open: usize,
    arg_index: usize,
}

/// Locate global references and extrinsic calls in expression text.
///
/// Nested references (inside subscripts or actual arguments) are reported
/// too, in order of appearance.
pub fn scan_expr(seg: Segment<'_>) -> Vec<ExprRef<'_>> {
    let text = seg.text;
    let bytes = text.as_bytes();
    let mut found = Vec::new();
    let mut frames: Vec<Frame<'_>> = Vec::new();
    let mut pending_function: Option<&str> = None;
    let mut in_string = false;
    let mut i = 0;

    while i < bytes.len() {
        let b = bytes[i];
        if in_string {
            if b == b'"' {
                in_string = false;
            }
            i += 1;
            continue;
        }
        match b {
            b'"' => {
                in_string = true;
                i += 1;
            }
            b'(' => {
                frames.push(Frame {
                    function: pending_function.take(),
                    open: i,
                    arg_index: 0,
                });
                i += 1;
            }
            b')' => {
                frames.pop();
                i += 1;
            }
            b',' => {
                if let Some(frame) = frames.last_mut() {
                    frame.arg_index += 1;
                }
                i += 1;
            }
            b'$' if bytes.get(i + 1) == Some(&b'$') => {
                match parse_entry_ref(seg.tail(i + 2)) {
                    Some(target) => {
                        // actuals are scanned as ordinary parentheses
                        let consumed = target.span.text.len()
                            - target.actuals.map(|a| a.text.len() + 2).unwrap_or(0);
                        found.push(ExprRef::Extrinsic { target });
                        i += 2 + consumed;
                    }
                    None => i += 2,
                }
            }
            b'$' => {
                let len = text[i + 1..]
                    .bytes()
                    .take_while(|c| c.is_ascii_alphabetic())
                    .count();
                let name = &text[i + 1..i + 1 + len];
                i += 1 + len;
                if bytes.get(i) == Some(&b'(') {
                    if name.eq_ignore_ascii_case("T") || name.eq_ignore_ascii_case("TEXT") {
                        // $TEXT takes an entry reference, not an expression
                        i = matching_paren(text, i).map(|c| c + 1).unwrap_or(bytes.len());
                    } else {
                        pending_function = Some(name);
                    }
                }
            }
            b'^' => {
                let wrapper = frames
                    .last()
                    .filter(|f| f.arg_index == 0 && f.open + 1 == i)
                    .and_then(|f| f.function);
                i = scan_global(seg, i, wrapper, &mut found);
            }
            _ => i += 1,
        }
    }
    found
}

/// Read a global reference whose caret is at `caret`; returns where scanning
/// resumes (just before any subscript parenthesis, so nested references are
/// scanned as well)
fn scan_global<'a>(
    seg: Segment<'a>,
    caret: usize,
    wrapper: Option<&'a str>,
    found: &mut Vec<ExprRef<'a>>,
) -> usize {
    let text = seg.text;
    let bytes = text.as_bytes();
    let mut pos = caret + 1;

    // extended reference ^|"ENV"|NAME
    if bytes.get(pos) == Some(&b'|') {
        match text[pos + 1..].find('|') {
            Some(close) => pos += close + 2,
            None => return bytes.len(),
        }
    }

    match bytes.get(pos) {
        Some(b'(') => {
            let end = matching_paren(text, pos).map(|c| c + 1).unwrap_or(bytes.len());
            found.push(ExprRef::Naked {
                pattern: seg.sub(caret, end),
            });
            pos
        }
        Some(b'@') => {
            let len = text[pos + 1..]
                .bytes()
                .take_while(|b| b.is_ascii_alphanumeric() || *b == b'%')
                .count();
            let end = pos + 1 + len;
            found.push(ExprRef::IndirectGlobal {
                pattern: seg.sub(caret, end),
            });
            end
        }
        _ => {
            let Some(m) = GLOBAL_NAME.find(&text[pos..]) else {
                return pos;
            };
            let name = &text[pos..pos + m.end()];
            let name_end = pos + m.end();
            let (subscripts, end) = if bytes.get(name_end) == Some(&b'(') {
                match matching_paren(text, name_end) {
                    Some(close) => (Some(seg.sub(name_end + 1, close)), close + 1),
                    None => (Some(seg.tail(name_end + 1)), bytes.len()),
                }
            } else {
                (None, name_end)
            };
            found.push(ExprRef::Global {
                name,
                subscripts,
                pattern: seg.sub(caret, end),
                wrapper,
            });
            name_end
        }
    }
}
