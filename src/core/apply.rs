//! Transactional apply engine.
//!
//! One call applies one finished turn's worth of directives. Every
//! directive is isolated: a failure produces an error outcome for that
//! file and never blocks its siblings. Within a directive the rule is
//! all-or-nothing — every block must resolve before a single byte is
//! written. Spans are computed against the pristine pre-edit line array
//! and splices applied from highest offset to lowest, so earlier offsets
//! stay valid without any shifting arithmetic.

use camino::{Utf8Path, Utf8PathBuf};
use indexmap::IndexMap;
use itertools::Itertools;
use serde::Serialize;
use thiserror::Error;
use tracing::debug;

use crate::core::anchor::{self, ResolveError};
use crate::core::directive::{self, EditDirective, EditOp};
use crate::core::session::{EditTransaction, Session};
use crate::infra::io;
use crate::infra::paths::PathResolver;

/// Per-directive failure taxonomy. Parse skips are not represented here:
/// malformed sections never reach the engine.
#[derive(Debug, Error)]
pub enum ApplyError {
    #[error("Invalid path (must exist, relative to sandbox root)")]
    PathInvalid,

    #[error("File does not exist (existing-file mode only)")]
    FileMissing,

    #[error("Could not uniquely match anchors: {0}")]
    Anchor(#[from] ResolveError),

    #[error(
        "Overlapping edit ranges: {a}-{b} and {c}-{d}",
        a = .first.0, b = .first.1, c = .second.0, d = .second.1
    )]
    RangeOverlap {
        first: (usize, usize),
        second: (usize, usize),
    },

    #[error("No changes applied")]
    NoOpChange,

    #[error("Read failed: {0}")]
    Read(#[source] anyhow::Error),

    #[error("Write failed: {0}")]
    Write(#[source] anyhow::Error),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ApplyStatus {
    Complete,
    Error,
}

/// One per directive, rendered by the presentation layer as a per-file
/// status indicator.
#[derive(Debug, Clone, Serialize)]
pub struct ApplyOutcome {
    /// Display name (final path component of the target).
    pub filename: String,
    pub status: ApplyStatus,
    pub detail: String,
    /// Sandbox-relative path, when resolution got that far.
    pub resolved: Option<Utf8PathBuf>,
}

impl ApplyOutcome {
    pub fn is_complete(&self) -> bool {
        self.status == ApplyStatus::Complete
    }
}

/// A half-open splice interval over the 0-based line array.
struct Splice {
    lo: usize,
    hi: usize,
    lines: Vec<String>,
}

#[derive(Debug, Clone)]
pub struct ApplyEngine {
    min_unique_hints: usize,
}

impl Default for ApplyEngine {
    fn default() -> Self {
        Self::new()
    }
}

impl ApplyEngine {
    pub fn new() -> Self {
        Self {
            min_unique_hints: anchor::MIN_UNIQUE_HINT_LINES,
        }
    }

    pub fn with_hint_threshold(mut self, min_unique: usize) -> Self {
        self.min_unique_hints = min_unique;
        self
    }

    /// Apply every directive found in `text`, tagging changes with `turn`.
    ///
    /// Returns one outcome per directive; never errors as a whole. If any
    /// file changed, the session gains one transaction covering all of
    /// them.
    pub fn apply(&self, session: &mut Session, text: &str, turn: usize) -> Vec<ApplyOutcome> {
        let directives = directive::parse(text);
        if directives.is_empty() {
            return Vec::new();
        }

        let mut tx = EditTransaction {
            turn,
            files: IndexMap::new(),
        };
        let mut outcomes = Vec::with_capacity(directives.len());

        for d in &directives {
            outcomes.push(self.apply_directive(session, &mut tx, d));
        }

        if !tx.files.is_empty() {
            session.commit_transaction(tx);
        }
        outcomes
    }

    fn apply_directive(
        &self,
        session: &Session,
        tx: &mut EditTransaction,
        d: &EditDirective,
    ) -> ApplyOutcome {
        let resolver = PathResolver::new(session.root(), session.context_attachments());
        let Some(rel) = resolver.resolve(&d.filename, false) else {
            return error_outcome(&d.filename, None, &ApplyError::PathInvalid);
        };

        match self.apply_to_file(session, tx, &rel, d) {
            Ok(detail) => ApplyOutcome {
                filename: display_name(rel.as_str()),
                status: ApplyStatus::Complete,
                detail,
                resolved: Some(rel),
            },
            Err(err) => error_outcome(&d.filename, Some(rel), &err),
        }
    }

    fn apply_to_file(
        &self,
        session: &Session,
        tx: &mut EditTransaction,
        rel: &Utf8Path,
        d: &EditDirective,
    ) -> Result<String, ApplyError> {
        let plan = self.plan(session, rel, d)?;
        let abs = session.root().join(rel);

        io::write_atomic(abs.as_std_path(), plan.updated.as_bytes()).map_err(ApplyError::Write)?;
        session.line_cache.invalidate(rel);

        // First successful write of this path in this call captures the
        // pre-edit content; a second directive hitting the same file keeps
        // the earliest pre-image.
        tx.files
            .entry(rel.to_path_buf())
            .or_insert_with(|| Some(plan.original.clone()));

        debug!(path = %rel, edits = plan.edits, "applied directive");
        Ok(format!(
            "applied {} edit(s): {} → {} lines",
            plan.edits,
            count_lines(&plan.original),
            count_lines(&plan.updated)
        ))
    }

    /// Read-only planning: resolve every block and compute the would-be
    /// content without touching the file. Shared by apply and the preview
    /// diff.
    pub(crate) fn plan(
        &self,
        session: &Session,
        rel: &Utf8Path,
        d: &EditDirective,
    ) -> Result<FilePlan, ApplyError> {
        let abs = session.root().join(rel);
        if !abs.as_std_path().is_file() {
            return Err(ApplyError::FileMissing);
        }

        let content = io::read_file_smart(abs.as_std_path()).map_err(ApplyError::Read)?;
        let original = content.as_str().map_err(ApplyError::Read)?.to_string();

        let (eol, had_final_nl) = io::detect_eol(&original);
        let lines = io::split_normalized(&original);

        // Resolve every block against the pristine array before touching
        // anything; one unresolved block fails the whole directive.
        let mut splices: Vec<Splice> = Vec::with_capacity(d.blocks.len());
        for blk in &d.blocks {
            let new_norm = io::normalize_newlines(&blk.replacement);
            let new_norm = new_norm.trim_end_matches('\n');
            let new_lines: Vec<String> = if new_norm.is_empty() {
                Vec::new()
            } else {
                new_norm.split('\n').map(str::to_string).collect()
            };
            let span =
                anchor::resolve_with(&lines, &blk.anchor, &new_lines, self.min_unique_hints)?;
            let (lo, hi) = match blk.op {
                EditOp::Replace => (span.start - 1, span.end),
                EditOp::InsertAfter => (span.end, span.end),
                EditOp::InsertBefore => (span.start - 1, span.start - 1),
            };
            splices.push(Splice {
                lo,
                hi,
                lines: new_lines,
            });
        }

        splices.sort_by_key(|s| (s.lo, s.hi));
        for (a, b) in splices.iter().tuple_windows() {
            if b.lo < a.hi {
                return Err(ApplyError::RangeOverlap {
                    first: (a.lo + 1, a.hi),
                    second: (b.lo + 1, b.hi),
                });
            }
        }

        let mut updated = lines;
        for s in splices.iter().rev() {
            updated.splice(s.lo..s.hi, s.lines.iter().cloned());
        }

        let updated_content = io::assemble(&updated, eol, had_final_nl);
        if updated_content == original {
            return Err(ApplyError::NoOpChange);
        }

        Ok(FilePlan {
            original,
            updated: updated_content,
            edits: splices.len(),
        })
    }
}

/// Outcome of read-only planning for one directive.
pub(crate) struct FilePlan {
    pub original: String,
    pub updated: String,
    pub edits: usize,
}

/// CLI entry point: read directives, preview or apply, report per file.
pub fn apply_run(args: crate::cli::ApplyArgs, ctx: &crate::cli::AppContext) -> anyhow::Result<()> {
    use owo_colors::OwoColorize;

    let input = read_input(args.edit_file.as_deref(), args.from_clipboard)?;
    let root = crate::infra::paths::resolve_root(&args.root)?;
    let cfg = crate::infra::config::load_config().unwrap_or_default();
    let (mut session, mut journal) =
        crate::core::journal::load_session(&root, &cfg, !args.no_journal)?;

    let attachments: Vec<Utf8PathBuf> =
        args.attachments.iter().map(Utf8PathBuf::from).collect();
    if !attachments.is_empty() {
        session.push_user(String::new(), attachments);
    }

    let write_mode = args.apply && !ctx.dry_run;
    if !write_mode {
        if !ctx.quiet && !args.json {
            eprintln!("Safety mode: showing preview only. Use --apply to write changes.");
        }
        let diff = crate::core::preview::preview_diff(&session, &input);
        if diff.is_empty() {
            if !ctx.quiet {
                println!("No edit directives found.");
            }
        } else {
            println!("{diff}");
        }
        return Ok(());
    }

    let turn = args.turn.unwrap_or_else(|| {
        session
            .transactions
            .iter()
            .map(|t| t.turn + 1)
            .max()
            .unwrap_or_else(|| session.next_turn_index())
    });
    let engine = ApplyEngine::new().with_hint_threshold(cfg.apply.hint_min_unique_lines);

    let before = session.transactions.len();
    let outcomes = engine.apply(&mut session, &input, turn);
    if session.transactions.len() > before {
        if let (Some(j), Some(tx)) = (journal.as_mut(), session.transactions.last()) {
            j.append(tx)?;
        }
    }

    if args.json {
        println!("{}", serde_json::to_string(&outcomes)?);
    } else if outcomes.is_empty() {
        if !ctx.quiet {
            println!("No edit directives found.");
        }
    } else {
        for o in &outcomes {
            if ctx.no_color {
                let mark = if o.is_complete() { "ok" } else { "failed" };
                println!("{mark:>6}  {}: {}", o.filename, o.detail);
            } else if o.is_complete() {
                println!("{} {}: {}", "✓".green(), o.filename.bold(), o.detail);
            } else {
                println!("{} {}: {}", "✗".red(), o.filename.bold(), o.detail);
            }
        }
    }

    if outcomes.iter().any(|o| !o.is_complete()) && !args.json {
        std::process::exit(2);
    }
    Ok(())
}

/// Read directive markdown from a file, the clipboard, or stdin.
pub(crate) fn read_input(
    edit_file: Option<&std::path::Path>,
    from_clipboard: bool,
) -> anyhow::Result<String> {
    use anyhow::Context;

    if from_clipboard {
        return get_clipboard_content();
    }
    match edit_file {
        Some(p) => std::fs::read_to_string(p)
            .with_context(|| format!("Failed to read edit file: {}", p.display())),
        None => {
            use std::io::Read;
            let mut buf = String::new();
            std::io::stdin()
                .read_to_string(&mut buf)
                .context("Failed to read stdin")?;
            Ok(buf)
        }
    }
}

/// Get content from system clipboard
fn get_clipboard_content() -> anyhow::Result<String> {
    use anyhow::Context;
    use arboard::Clipboard;
    let mut clipboard = Clipboard::new().context("Failed to access clipboard")?;
    clipboard
        .get_text()
        .context("Failed to get text from clipboard")
}

fn error_outcome(raw: &str, resolved: Option<Utf8PathBuf>, err: &ApplyError) -> ApplyOutcome {
    let shown = resolved
        .as_ref()
        .map_or_else(|| display_name(raw), |p| display_name(p.as_str()));
    ApplyOutcome {
        filename: shown,
        status: ApplyStatus::Error,
        detail: err.to_string(),
        resolved,
    }
}

fn display_name(path: &str) -> String {
    Utf8Path::new(path.trim())
        .file_name()
        .unwrap_or(path)
        .to_string()
}

/// Logical line count of normalized text; empty content counts zero.
fn count_lines(s: &str) -> usize {
    let t = io::normalize_newlines(s);
    let t = t.strip_suffix('\n').unwrap_or(&t);
    if t.is_empty() {
        0
    } else {
        t.matches('\n').count() + 1
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;

    fn sandbox() -> (tempfile::TempDir, Session) {
        let dir = tempfile::tempdir().unwrap();
        let root = Utf8Path::from_path(dir.path()).unwrap();
        let session = Session::new(root).unwrap();
        (dir, session)
    }

    fn write(session: &Session, rel: &str, body: &str) {
        let p = session.root().join(rel);
        fs::create_dir_all(p.parent().unwrap()).unwrap();
        fs::write(p, body).unwrap();
    }

    fn read(session: &Session, rel: &str) -> String {
        fs::read_to_string(session.root().join(rel)).unwrap()
    }

    #[test]
    fn single_anchor_replace() {
        let (_dir, mut s) = sandbox();
        write(&s, "app.py", "def f():\n    x = 1\n    return x\n");

        let md = "###EDIT app.py\n#### Replace `    x = 1`\n```python\n    x = 2\n```\n";
        let out = ApplyEngine::new().apply(&mut s, md, 1);
        assert_eq!(out.len(), 1);
        assert!(out[0].is_complete(), "{}", out[0].detail);
        assert_eq!(read(&s, "app.py"), "def f():\n    x = 2\n    return x\n");
        assert_eq!(s.transactions.len(), 1);
        assert!(s.is_pending(Utf8Path::new("app.py")));
    }

    #[test]
    fn ambiguous_anchor_leaves_file_untouched() {
        let (_dir, mut s) = sandbox();
        write(&s, "a.py", "pass\nx = 1\npass\n");

        let md = "###EDIT a.py\n#### Replace `pass`\n```python\nreturn\n```\n";
        let out = ApplyEngine::new().apply(&mut s, md, 1);
        assert_eq!(out[0].status, ApplyStatus::Error);
        assert!(out[0].detail.contains("anchors"));
        assert_eq!(read(&s, "a.py"), "pass\nx = 1\npass\n");
        assert!(s.transactions.is_empty());
    }

    #[test]
    fn overlap_fails_with_zero_writes() {
        let (_dir, mut s) = sandbox();
        write(&s, "a.txt", "one\ntwo\nthree\nfour\n");

        let md = concat!(
            "###EDIT a.txt\n",
            "#### Replace 1-3\n```\nX\n```\n",
            "#### Replace 2-4\n```\nY\n```\n",
        );
        let out = ApplyEngine::new().apply(&mut s, md, 1);
        assert_eq!(out[0].status, ApplyStatus::Error);
        assert!(out[0].detail.contains("Overlapping edit ranges"));
        assert_eq!(read(&s, "a.txt"), "one\ntwo\nthree\nfour\n");
    }

    #[test]
    fn insert_at_replace_boundary_is_legal() {
        let (_dir, mut s) = sandbox();
        write(&s, "a.txt", "one\ntwo\nthree\n");

        // Replace line 2, insert after line 2: intervals [1,2) and [2,2).
        let md = concat!(
            "###EDIT a.txt\n",
            "#### Replace 2\n```\nTWO\n```\n",
            "#### Insert After 2\n```\nTWO-AND-A-HALF\n```\n",
        );
        let out = ApplyEngine::new().apply(&mut s, md, 1);
        assert!(out[0].is_complete(), "{}", out[0].detail);
        assert_eq!(read(&s, "a.txt"), "one\nTWO\nTWO-AND-A-HALF\nthree\n");
    }

    #[test]
    fn noop_output_is_an_error() {
        let (_dir, mut s) = sandbox();
        write(&s, "a.txt", "same\n");

        let md = "###EDIT a.txt\n#### Replace `same`\n```\nsame\n```\n";
        let out = ApplyEngine::new().apply(&mut s, md, 1);
        assert_eq!(out[0].status, ApplyStatus::Error);
        assert_eq!(out[0].detail, "No changes applied");
        assert!(s.transactions.is_empty());
    }

    #[test]
    fn missing_file_and_bad_path_are_per_directive() {
        let (_dir, mut s) = sandbox();
        write(&s, "ok.txt", "hello\n");

        let md = concat!(
            "###EDIT ../escape.txt\n#### Replace `x`\n```\ny\n```\n",
            "###EDIT ok.txt\n#### Replace `hello`\n```\ngoodbye\n```\n",
        );
        let out = ApplyEngine::new().apply(&mut s, md, 1);
        assert_eq!(out.len(), 2);
        assert_eq!(out[0].status, ApplyStatus::Error);
        assert!(out[1].is_complete());
        assert_eq!(read(&s, "ok.txt"), "goodbye\n");
    }

    #[test]
    fn crlf_convention_is_preserved() {
        let (_dir, mut s) = sandbox();
        write(&s, "w.txt", "one\r\ntwo\r\nthree\r\n");

        let md = "###EDIT w.txt\n#### Replace `two`\n```\nTWO\n```\n";
        let out = ApplyEngine::new().apply(&mut s, md, 1);
        assert!(out[0].is_complete(), "{}", out[0].detail);
        assert_eq!(read(&s, "w.txt"), "one\r\nTWO\r\nthree\r\n");
    }

    #[test]
    fn empty_replacement_deletes_span() {
        let (_dir, mut s) = sandbox();
        write(&s, "a.txt", "keep\ndrop\nkeep2\n");

        let md = "###EDIT a.txt\n#### Replace `drop`\n```\n```\n";
        let out = ApplyEngine::new().apply(&mut s, md, 1);
        assert!(out[0].is_complete(), "{}", out[0].detail);
        assert_eq!(read(&s, "a.txt"), "keep\nkeep2\n");
    }

    #[test]
    fn two_directives_same_file_keep_earliest_preimage() {
        let (_dir, mut s) = sandbox();
        write(&s, "a.txt", "alpha\nbeta\n");

        let md = concat!(
            "###EDIT a.txt\n#### Replace `alpha`\n```\nALPHA\n```\n",
            "###EDIT a.txt\n#### Replace `beta`\n```\nBETA\n```\n",
        );
        let out = ApplyEngine::new().apply(&mut s, md, 3);
        assert!(out.iter().all(ApplyOutcome::is_complete));
        assert_eq!(read(&s, "a.txt"), "ALPHA\nBETA\n");
        assert_eq!(s.transactions.len(), 1);
        assert_eq!(
            s.transactions[0].files[Utf8Path::new("a.txt")],
            Some("alpha\nbeta\n".to_string())
        );
    }
}
