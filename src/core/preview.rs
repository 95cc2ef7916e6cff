//! Display-only preview expansion. Guaranteed to never write to storage.
//!
//! For human review, each operation header is rewritten with the span the
//! anchors currently resolve to, and the original lines of that span are
//! spliced in right after the header, before the generator's replacement
//! fence. Anything that cannot be resolved is passed through untouched —
//! preview degrades, it never fails.

use similar::TextDiff;
use tracing::trace;

use crate::core::anchor;
use crate::core::apply::ApplyEngine;
use crate::core::directive::{
    self, AnchorSpec, EditOp, FENCE_CLOSE_RE, FENCE_OPEN_RE,
};
use crate::core::session::Session;
use crate::infra::io;
use crate::infra::paths::PathResolver;

struct PendingOp {
    op: EditOp,
    anchor: AnchorSpec,
    hdr: String,
    between: Vec<String>,
}

/// Expand edit sections in `md` for display.
pub fn preview(session: &Session, md: &str) -> String {
    if !md.contains("####") {
        return md.to_string();
    }
    let text = io::normalize_newlines(md);
    let lines: Vec<&str> = text.split('\n').collect();

    let mut out: Vec<String> = Vec::with_capacity(lines.len());
    let mut cur_file: Option<String> = None;
    let mut pending: Option<PendingOp> = None;

    let flush = |out: &mut Vec<String>, pending: &mut Option<PendingOp>| {
        if let Some(p) = pending.take() {
            out.push(p.hdr);
            out.extend(p.between);
        }
    };

    for (idx, line) in lines.iter().enumerate() {
        if let Some(filename) = directive::parse_edit_header_line(line) {
            flush(&mut out, &mut pending);
            cur_file = Some(filename);
            out.push(line.to_string());
            continue;
        }

        let Some(file) = cur_file.as_deref() else {
            out.push(line.to_string());
            continue;
        };

        if pending.is_some() {
            if let Some(caps) = FENCE_OPEN_RE.captures(line) {
                let p = pending.take().unwrap();
                let lang = caps.get(1).map_or("", |g| g.as_str()).trim().to_string();

                let resolver = PathResolver::new(session.root(), session.context_attachments());
                let rel = resolver.resolve(file, false);
                let file_lines = rel
                    .as_ref()
                    .and_then(|r| session.line_cache.lines(session.root(), r));

                let mut span = file_lines
                    .as_ref()
                    .and_then(|fl| anchor::resolve(fl, &p.anchor, &[]).ok());
                if span.is_none() {
                    // Retry with the raw lines the generator wrote between
                    // this fence and its close as content hints.
                    let close = lines[idx + 1..]
                        .iter()
                        .position(|l| FENCE_CLOSE_RE.is_match(l))
                        .map(|k| idx + 1 + k);
                    if let (Some(fl), Some(close)) = (file_lines.as_ref(), close) {
                        let hints: Vec<String> =
                            lines[idx + 1..close].iter().map(|s| s.to_string()).collect();
                        span = anchor::resolve(fl, &p.anchor, &hints).ok();
                    }
                }
                trace!(file, resolved = span.is_some(), "preview span");

                let inject_ok = !lang.is_empty()
                    && file_lines.is_some()
                    && span.is_some()
                    && !p.between.iter().any(|z| z.trim_start().starts_with("```"));

                match span {
                    Some(sp) => out.push(format!("#### {} {}-{}", p.op.label(), sp.start, sp.end)),
                    None => out.push(p.hdr.clone()),
                }
                out.extend(p.between.iter().cloned());
                if inject_ok {
                    let fl = file_lines.unwrap();
                    let sp = span.unwrap();
                    out.push(format!("```{lang}"));
                    out.push(fl[sp.start - 1..sp.end].join("\n"));
                    out.push("```".to_string());
                    out.push(
                        if p.op == EditOp::Replace {
                            "#### WITH"
                        } else {
                            "#### ADD"
                        }
                        .to_string(),
                    );
                }
                out.push(line.to_string());
                continue;
            }

            if let Some((op, spec)) = directive::parse_op_header_line(line) {
                flush(&mut out, &mut pending);
                pending = Some(PendingOp {
                    op,
                    anchor: spec,
                    hdr: line.to_string(),
                    between: Vec::new(),
                });
                continue;
            }

            if let Some(p) = pending.as_mut() {
                p.between.push(line.to_string());
            }
            continue;
        }

        if let Some((op, spec)) = directive::parse_op_header_line(line) {
            pending = Some(PendingOp {
                op,
                anchor: spec,
                hdr: line.to_string(),
                between: Vec::new(),
            });
            continue;
        }

        out.push(line.to_string());
    }

    flush(&mut out, &mut pending);
    out.join("\n")
}

/// Unified diffs of what apply would do, computed without writing.
/// Directives that would fail render a note instead; anchor ambiguities
/// come back as labeled diagnostics over the target file.
pub fn preview_diff(session: &Session, md: &str) -> String {
    let engine = ApplyEngine::new();
    let mut out = String::new();

    for d in directive::parse(md) {
        let resolver = PathResolver::new(session.root(), session.context_attachments());
        let Some(rel) = resolver.resolve(&d.filename, false) else {
            out.push_str(&format!("# {}: invalid path\n", d.filename));
            continue;
        };
        match engine.plan(session, &rel, &d) {
            Ok(plan) => {
                let diff = TextDiff::from_lines(&plan.original, &plan.updated);
                out.push_str(
                    &diff
                        .unified_diff()
                        .context_radius(3)
                        .header(&format!("a/{rel}"), &format!("b/{rel}"))
                        .to_string(),
                );
            }
            Err(crate::core::apply::ApplyError::Anchor(e)) => {
                match std::fs::read_to_string(session.root().join(&rel).as_std_path()) {
                    Ok(content) => {
                        let report = anchor::diagnose(&e, &rel, &content);
                        out.push_str(&format!("{report:?}"));
                    }
                    Err(_) => out.push_str(&format!("# {rel}: {e}\n")),
                }
            }
            Err(e) => {
                out.push_str(&format!("# {rel}: {e}\n"));
            }
        }
    }
    out
}

/// CLI entry point: print the display expansion and optional diffs.
pub fn preview_run(
    args: crate::cli::PreviewArgs,
    _ctx: &crate::cli::AppContext,
) -> anyhow::Result<()> {
    let input =
        crate::core::apply::read_input(args.edit_file.as_deref(), args.from_clipboard)?;
    let root = crate::infra::paths::resolve_root(&args.root)?;
    let mut session = Session::new(&root)?;

    let attachments: Vec<camino::Utf8PathBuf> =
        args.attachments.iter().map(camino::Utf8PathBuf::from).collect();
    if !attachments.is_empty() {
        session.push_user(String::new(), attachments);
    }

    println!("{}", preview(&session, &input));
    if args.diff {
        let diff = preview_diff(&session, &input);
        if !diff.is_empty() {
            println!("{diff}");
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use camino::Utf8Path;
    use std::fs;

    fn sandbox() -> (tempfile::TempDir, Session) {
        let dir = tempfile::tempdir().unwrap();
        let root = Utf8Path::from_path(dir.path()).unwrap();
        let session = Session::new(root).unwrap();
        (dir, session)
    }

    #[test]
    fn expands_resolved_header_with_original_span() {
        let (_dir, s) = sandbox();
        fs::write(s.root().join("app.py"), "def f():\n    x = 1\n    return x\n").unwrap();

        let md = "###EDIT app.py\n#### Replace `    x = 1`\n```python\n    x = 2\n```\n";
        let shown = preview(&s, md);

        assert!(shown.contains("#### Replace 2-2"));
        assert!(shown.contains("#### WITH"));
        // Original span injected before the replacement fence.
        let original_pos = shown.find("    x = 1").unwrap();
        let replacement_pos = shown.find("    x = 2").unwrap();
        assert!(original_pos < replacement_pos);
    }

    #[test]
    fn unresolved_header_passes_through() {
        let (_dir, s) = sandbox();
        fs::write(s.root().join("app.py"), "a\nb\n").unwrap();

        let md = "###EDIT app.py\n#### Replace `missing line`\n```python\nnew\n```\n";
        let shown = preview(&s, md);
        assert!(shown.contains("#### Replace `missing line`"));
        assert!(!shown.contains("#### WITH"));
    }

    #[test]
    fn insert_uses_add_marker() {
        let (_dir, s) = sandbox();
        fs::write(s.root().join("app.py"), "start\nend\n").unwrap();

        let md = "###EDIT app.py\n#### Insert After `start`\n```python\nmiddle\n```\n";
        let shown = preview(&s, md);
        assert!(shown.contains("#### Insert After 1-1"));
        assert!(shown.contains("#### ADD"));
    }

    #[test]
    fn preview_never_writes() {
        let (_dir, s) = sandbox();
        let path = s.root().join("app.py");
        fs::write(&path, "def f():\n    x = 1\n").unwrap();
        let before = fs::read_to_string(&path).unwrap();

        let md = "###EDIT app.py\n#### Replace `    x = 1`\n```python\n    x = 2\n```\n";
        let _ = preview(&s, md);
        let _ = preview_diff(&s, md);
        assert_eq!(fs::read_to_string(&path).unwrap(), before);
    }

    #[test]
    fn diff_shows_change_and_failure_note() {
        let (_dir, s) = sandbox();
        fs::write(s.root().join("app.py"), "one\ntwo\n").unwrap();

        let md = concat!(
            "###EDIT app.py\n#### Replace `two`\n```\nTWO\n```\n",
            "###EDIT ghost.py\n#### Replace `x`\n```\ny\n```\n",
        );
        let diff = preview_diff(&s, md);
        assert!(diff.contains("-two"));
        assert!(diff.contains("+TWO"));
        assert!(diff.contains("ghost.py: invalid path"));
    }

    #[test]
    fn text_without_headers_is_untouched() {
        let (_dir, s) = sandbox();
        let md = "plain prose with `code` and\n\n```rust\nfences\n```\n";
        assert_eq!(preview(&s, md), md);
    }
}
