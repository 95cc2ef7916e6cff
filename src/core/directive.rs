//! Edit-directive model and the markdown directive parser.
//!
//! Generated answers embed edit sections in free-form markdown: a
//! `###EDIT <path>` header introduces a file, followed by operation
//! headers (`#### Replace`, `#### Insert After`, `#### Insert Before`)
//! each carrying one or two backticked anchor lines and a fenced
//! replacement body.
//!
//! Two dialects share one model: anchor-span headers carry backticked
//! boundary-line texts, the older numeric dialect carries absolute 1-based
//! inclusive line ranges (`#### Replace 10-15`). Parsing is pure and
//! total: malformed or truncated sections are silently omitted, because
//! the input may be a snapshot of a still-growing stream.

use std::sync::LazyLock;

use regex::Regex;
use serde::Serialize;

/// Operation kind of a single block.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum EditOp {
    Replace,
    InsertAfter,
    InsertBefore,
}

impl EditOp {
    pub fn label(self) -> &'static str {
        match self {
            EditOp::Replace => "Replace",
            EditOp::InsertAfter => "Insert After",
            EditOp::InsertBefore => "Insert Before",
        }
    }
}

/// Where a block applies: exact boundary-line texts, or absolute lines.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum AnchorSpec {
    Text {
        start: String,
        end: String,
        /// Single-line form: start and end are the same line.
        single: bool,
    },
    Lines {
        start: usize,
        end: usize,
    },
}

/// One replace/insert block inside a directive.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ReplaceBlock {
    pub anchor: AnchorSpec,
    pub op: EditOp,
    pub replacement: String,
    pub lang: String,
}

/// One file's worth of requested edits.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct EditDirective {
    /// Raw, untrusted filename as written by the generator.
    pub filename: String,
    pub explanation: String,
    pub blocks: Vec<ReplaceBlock>,
}

static EDIT_HDR_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(?mi)^[ \t]*###[ \t]*edit[ \t]+(.+?)[ \t]*$").unwrap());

static REPLACE_HDR_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?mi)^[ \t]*####[ \t]*replace[ \t]+`([^\n`]*)`(?:[ \t]*-[ \t]*`([^\n`]*)`)?[ \t]*$")
        .unwrap()
});
static INSERT_AFTER_HDR_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(
        r"(?mi)^[ \t]*####[ \t]*insert[ \t]+after[ \t]+`([^\n`]*)`(?:[ \t]*-[ \t]*`([^\n`]*)`)?[ \t]*$",
    )
    .unwrap()
});
static INSERT_BEFORE_HDR_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(
        r"(?mi)^[ \t]*####[ \t]*insert[ \t]+before[ \t]+`([^\n`]*)`(?:[ \t]*-[ \t]*`([^\n`]*)`)?[ \t]*$",
    )
    .unwrap()
});

static REPLACE_LINES_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?mi)^[ \t]*####[ \t]*replace[ \t]+(\d+)(?:[ \t]*-[ \t]*(\d+))?[ \t]*:?[ \t]*$")
        .unwrap()
});
static INSERT_AFTER_LINES_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(
        r"(?mi)^[ \t]*####[ \t]*insert[ \t]+after[ \t]+(\d+)(?:[ \t]*-[ \t]*(\d+))?[ \t]*:?[ \t]*$",
    )
    .unwrap()
});
static INSERT_BEFORE_LINES_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(
        r"(?mi)^[ \t]*####[ \t]*insert[ \t]+before[ \t]+(\d+)(?:[ \t]*-[ \t]*(\d+))?[ \t]*:?[ \t]*$",
    )
    .unwrap()
});

pub(crate) static FENCE_OPEN_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(?m)^[ \t]*```[ \t]*([^\n`]*?)[ \t]*$").unwrap());
pub(crate) static FENCE_CLOSE_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(?m)^[ \t]*```[ \t]*$").unwrap());

/// An operation header located inside a directive section.
struct OpHeader {
    op: EditOp,
    anchor: Option<AnchorSpec>,
    start: usize,
    end: usize,
}

/// Earliest operation header at or after `at`, across both dialects.
fn next_op_header(section: &str, at: usize) -> Option<OpHeader> {
    let text_res = [
        (EditOp::Replace, &*REPLACE_HDR_RE),
        (EditOp::InsertAfter, &*INSERT_AFTER_HDR_RE),
        (EditOp::InsertBefore, &*INSERT_BEFORE_HDR_RE),
    ];
    let line_res = [
        (EditOp::Replace, &*REPLACE_LINES_RE),
        (EditOp::InsertAfter, &*INSERT_AFTER_LINES_RE),
        (EditOp::InsertBefore, &*INSERT_BEFORE_LINES_RE),
    ];

    let mut best: Option<OpHeader> = None;

    for (op, re) in text_res {
        if let Some(caps) = re.captures_at(section, at) {
            let m = caps.get(0).unwrap();
            if best.as_ref().is_none_or(|b| m.start() < b.start) {
                let x = caps.get(1).map_or("", |g| g.as_str()).to_string();
                let y = caps.get(2).map(|g| g.as_str().to_string());
                let single = y.is_none();
                let end_anchor = match y {
                    Some(s) if !s.is_empty() => s,
                    _ => x.clone(),
                };
                best = Some(OpHeader {
                    op,
                    anchor: Some(AnchorSpec::Text {
                        start: x,
                        end: end_anchor,
                        single,
                    }),
                    start: m.start(),
                    end: m.end(),
                });
            }
        }
    }

    for (op, re) in line_res {
        if let Some(caps) = re.captures_at(section, at) {
            let m = caps.get(0).unwrap();
            if best.as_ref().is_none_or(|b| m.start() < b.start) {
                let start_line: usize = caps[1].parse().unwrap_or(0);
                let end_line: usize = caps
                    .get(2)
                    .map_or(start_line, |g| g.as_str().parse().unwrap_or(0));
                // A nonsensical range is a malformed header; drop the block
                // but keep scanning after it.
                let anchor = (start_line >= 1 && end_line >= start_line)
                    .then_some(AnchorSpec::Lines {
                        start: start_line,
                        end: end_line,
                    });
                best = Some(OpHeader {
                    op,
                    anchor,
                    start: m.start(),
                    end: m.end(),
                });
            }
        }
    }

    best
}

/// First fenced block at or after `at`: (language, body, end offset).
pub(crate) fn parse_fence_from(text: &str, at: usize) -> Option<(String, String, usize)> {
    let open = FENCE_OPEN_RE.captures_at(text, at)?;
    let lang = open.get(1).map_or("", |g| g.as_str()).trim().to_string();
    let body_start = open.get(0).unwrap().end();
    let close = FENCE_CLOSE_RE.find_at(text, body_start)?;
    let mut body = &text[body_start..close.start()];
    if let Some(stripped) = body.strip_prefix('\n') {
        body = stripped;
    }
    Some((lang, body.to_string(), close.end()))
}

/// Parse one rendered line as a file header; returns the filename.
pub(crate) fn parse_edit_header_line(line: &str) -> Option<String> {
    EDIT_HDR_RE
        .captures(line)
        .map(|c| c[1].trim().replace('`', ""))
}

/// Parse one rendered line as an operation header of either dialect.
pub(crate) fn parse_op_header_line(line: &str) -> Option<(EditOp, AnchorSpec)> {
    let h = next_op_header(line, 0)?;
    Some((h.op, h.anchor?))
}

/// Byte offset where the explanation part of a section ends: the earliest
/// operation header or fence, or the section end.
fn explanation_cut(section: &str) -> usize {
    let mut cut = section.len();
    if let Some(h) = next_op_header(section, 0) {
        cut = cut.min(h.start);
    }
    if let Some(m) = FENCE_OPEN_RE.find(section) {
        cut = cut.min(m.start());
    }
    cut
}

/// Scan generated text for edit sections.
///
/// Pure and total: never errors, never panics. Sections without at least
/// one complete header-plus-fence block are dropped.
pub fn parse(text: &str) -> Vec<EditDirective> {
    if text.is_empty() {
        return Vec::new();
    }
    let text = crate::infra::io::normalize_newlines(text);

    let headers: Vec<(usize, usize, String)> = EDIT_HDR_RE
        .captures_iter(&text)
        .map(|caps| {
            let m = caps.get(0).unwrap();
            let filename = caps[1].trim().replace('`', "");
            (m.start(), m.end(), filename)
        })
        .collect();

    let mut out = Vec::new();

    for (i, (_, hdr_end, filename)) in headers.iter().enumerate() {
        let section_end = headers
            .get(i + 1)
            .map_or(text.len(), |(next_start, _, _)| *next_start);
        let section = &text[*hdr_end..section_end];

        let mut blocks = Vec::new();
        let mut pos = 0usize;

        while let Some(hdr) = next_op_header(section, pos) {
            let Some((lang, body, fence_end)) = parse_fence_from(section, hdr.end) else {
                // Truncated stream: header without a complete fenced body.
                break;
            };
            if let Some(anchor) = hdr.anchor {
                blocks.push(ReplaceBlock {
                    anchor,
                    op: hdr.op,
                    replacement: body,
                    lang,
                });
            }
            pos = fence_end;
        }

        if !blocks.is_empty() {
            let explanation = section[..explanation_cut(section)].trim().to_string();
            out.push(EditDirective {
                filename: filename.clone(),
                explanation,
                blocks,
            });
        }
    }

    out
}

/// CLI entry point: validate directive syntax without touching files.
pub fn parse_run(args: crate::cli::ParseArgs, ctx: &crate::cli::AppContext) -> anyhow::Result<()> {
    let input = crate::core::apply::read_input(args.edit_file.as_deref(), false)?;
    let directives = parse(&input);

    if args.json {
        println!("{}", serde_json::to_string_pretty(&directives)?);
        return Ok(());
    }
    if directives.is_empty() {
        if !ctx.quiet {
            println!("No edit directives found.");
        }
        return Ok(());
    }
    if !ctx.quiet {
        println!(
            "{} directive(s), {} operation(s)",
            directives.len(),
            directives.iter().map(|d| d.blocks.len()).sum::<usize>()
        );
        for d in &directives {
            println!("  • {} ({} block(s))", d.filename, d.blocks.len());
        }
    }
    Ok(())
}
