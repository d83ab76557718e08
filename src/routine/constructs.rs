//! Command-level construct recognition
//!
//! Turns the commands of a [`ParsedLine`] into calls, extrinsic invocations
//! and global accesses. Both the structure stage (data-store discovery) and
//! the relationship stage read routines through [`line_constructs`], so a
//! store referenced by an access edge is always a store that was registered.

use crate::model::{AccessMode, CallStyle};
use crate::routine::lexer::{
    find_top_level, parse_entry_ref, scan_expr, split_args, Command, EntryRef, ExprRef, Keyword,
    ParsedLine, Segment,
};

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Construct<'a> {
    Call {
        style: CallStyle,
        target: EntryRef<'a>,
    },
    Invoke {
        target: EntryRef<'a>,
        /// Left-hand side when the invocation is the whole right-hand side of a SET
        assigns_to: Option<&'a str>,
    },
    Access {
        name: &'a str,
        mode: AccessMode,
        /// Mode was decided by a command keyword or intrinsic function
        by_keyword: bool,
        pattern: Segment<'a>,
        subscripts: Option<Segment<'a>>,
    },
    NakedAccess {
        pattern: Segment<'a>,
    },
    IndirectAccess {
        pattern: Segment<'a>,
    },
}

impl Construct<'_> {
    /// Byte offset of the construct in its line
    pub fn offset(&self) -> usize {
        match self {
            Self::Call { target, .. } | Self::Invoke { target, .. } => target.span.start,
            Self::Access { pattern, .. }
            | Self::NakedAccess { pattern }
            | Self::IndirectAccess { pattern } => pattern.start,
        }
    }
}

#[derive(Clone, Copy, Default)]
struct ExprContext<'a> {
    by_keyword: bool,
    assigns_to: Option<&'a str>,
}

fn wrapper_mode(wrapper: &str) -> Option<AccessMode> {
    match wrapper.to_ascii_uppercase().as_str() {
        "D" | "DATA" => Some(AccessMode::Exists),
        "O" | "ORDER" | "Q" | "QUERY" | "G" | "GET" | "N" | "NEXT" => Some(AccessMode::Read),
        _ => None,
    }
}

fn push_expr<'a>(
    seg: Segment<'a>,
    ctx: ExprContext<'a>,
    writes: &[usize],
    write_mode: AccessMode,
    out: &mut Vec<Construct<'a>>,
) {
    for found in scan_expr(seg) {
        match found {
            ExprRef::Global {
                name,
                subscripts,
                pattern,
                wrapper,
            } => {
                let (mode, by_keyword) = if writes.contains(&pattern.start) {
                    (write_mode, true)
                } else if let Some(mode) = wrapper.and_then(wrapper_mode) {
                    (mode, true)
                } else {
                    (AccessMode::Read, ctx.by_keyword)
                };
                out.push(Construct::Access {
                    name,
                    mode,
                    by_keyword,
                    pattern,
                    subscripts,
                });
            }
            ExprRef::Naked { pattern } => out.push(Construct::NakedAccess { pattern }),
            ExprRef::IndirectGlobal { pattern } => out.push(Construct::IndirectAccess { pattern }),
            ExprRef::Extrinsic { target } => {
                let whole_rhs = target.span.start == seg.start + 2
                    && target.span.start + target.span.text.len() == seg.start + seg.text.len();
                out.push(Construct::Invoke {
                    assigns_to: if whole_rhs { ctx.assigns_to } else { None },
                    target,
                });
            }
        }
    }
}

fn read_expr<'a>(seg: Segment<'a>, ctx: ExprContext<'a>, out: &mut Vec<Construct<'a>>) {
    push_expr(seg, ctx, &[], AccessMode::Read, out);
}

/// Offsets of the globals an assignment target list writes to
fn assignment_targets(lhs: Segment<'_>) -> Vec<usize> {
    let targets = if lhs.text.starts_with('(') && lhs.text.ends_with(')') {
        split_args(lhs.sub(1, lhs.text.len() - 1))
    } else {
        vec![lhs]
    };
    targets
        .into_iter()
        .filter_map(|target| {
            let upper = target.text.to_ascii_uppercase();
            let inner = ["$PIECE(", "$P(", "$EXTRACT(", "$E("]
                .iter()
                .find(|prefix| upper.starts_with(*prefix))
                .map(|prefix| target.tail(prefix.len()))
                .unwrap_or(target);
            inner.text.starts_with('^').then_some(inner.start)
        })
        .collect()
}

fn entry_refs<'a>(
    args: Segment<'a>,
    style: CallStyle,
    out: &mut Vec<Construct<'a>>,
) {
    for arg in split_args(args) {
        match parse_entry_ref(arg) {
            Some(target) => {
                let consumed = target.span.text.len();
                let actuals = target.actuals;
                out.push(Construct::Call { style, target });
                if let Some(actuals) = actuals {
                    read_expr(actuals, ExprContext::default(), out);
                }
                let rest = arg.tail(consumed);
                if rest.text.starts_with(':') {
                    read_expr(rest.tail(1), ExprContext::default(), out);
                }
            }
            None => read_expr(arg, ExprContext::default(), out),
        }
    }
}

fn assignment<'a>(args: Segment<'a>, mode: AccessMode, out: &mut Vec<Construct<'a>>) {
    for arg in split_args(args) {
        let Some(eq) = find_top_level(arg, b'=') else {
            read_expr(arg, ExprContext::default(), out);
            continue;
        };
        let lhs = arg.sub(0, eq);
        let rhs = arg.tail(eq + 1);
        let writes = assignment_targets(lhs);
        let keyword = ExprContext {
            by_keyword: true,
            assigns_to: None,
        };
        push_expr(lhs, keyword, &writes, mode, out);
        let assigns_to = (!lhs.text.starts_with('(')).then_some(lhs.text);
        read_expr(
            rhs,
            ExprContext {
                by_keyword: true,
                assigns_to,
            },
            out,
        );
    }
}

fn kill<'a>(args: Segment<'a>, out: &mut Vec<Construct<'a>>) {
    for arg in split_args(args) {
        // exclusive kill lists only locals
        if arg.text.starts_with('(') {
            continue;
        }
        let writes = if arg.text.starts_with('^') {
            vec![arg.start]
        } else {
            Vec::new()
        };
        let keyword = ExprContext {
            by_keyword: true,
            assigns_to: None,
        };
        push_expr(arg, keyword, &writes, AccessMode::Kill, out);
    }
}

fn command_constructs<'a>(command: &Command<'a>, out: &mut Vec<Construct<'a>>) {
    if let Some(postcond) = command.postcond {
        read_expr(postcond, ExprContext::default(), out);
    }
    let Some(args) = command.args else {
        return;
    };
    match command.keyword {
        Keyword::Do => entry_refs(args, CallStyle::Direct, out),
        Keyword::Goto => entry_refs(args, CallStyle::Branch, out),
        Keyword::Job => entry_refs(args, CallStyle::Spawn, out),
        Keyword::Set => assignment(args, AccessMode::Write, out),
        Keyword::Merge => assignment(args, AccessMode::Write, out),
        Keyword::Kill => kill(args, out),
        // locks and NEW name resources and locals, not data
        Keyword::Lock | Keyword::New => {}
        _ => read_expr(args, ExprContext::default(), out),
    }
}

/// Every construct on a line, in order of appearance
pub fn line_constructs<'a>(line: &ParsedLine<'a>) -> Vec<Construct<'a>> {
    let mut out = Vec::new();
    for command in &line.commands {
        command_constructs(command, &mut out);
    }
    out
}
