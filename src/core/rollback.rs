//! Rollback: reverse transactions by turn or by single file.
//!
//! Restores are best-effort per path — one unwritable file does not stop
//! the rest — and always end by rebuilding the pending-edit index from
//! the surviving transactions.

use camino::{Utf8Path, Utf8PathBuf};
use tracing::{debug, warn};

use crate::core::session::{Role, Session};
use crate::infra::io;
use crate::infra::paths;

/// Write back a recorded pre-image, or delete the file when the record
/// says it did not exist before the edit.
fn restore_path(session: &Session, rel: &Utf8Path, prev: &Option<String>) -> bool {
    let abs = session.root().join(rel);
    let ok = match prev {
        None => match std::fs::remove_file(abs.as_std_path()) {
            Ok(()) => true,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => true,
            Err(e) => {
                warn!(path = %rel, error = %e, "failed to delete during rollback");
                false
            }
        },
        Some(content) => match io::write_atomic(abs.as_std_path(), content.as_bytes()) {
            Ok(()) => true,
            Err(e) => {
                warn!(path = %rel, error = %e, "failed to restore during rollback");
                false
            }
        },
    };
    if ok {
        session.line_cache.invalidate(rel);
        debug!(path = %rel, "rolled back");
    }
    ok
}

/// Pop every transaction tagged with `turn` (newest first) and restore
/// each of its paths. Returns the restored paths.
pub fn rollback_turn(session: &mut Session, turn: usize) -> Vec<Utf8PathBuf> {
    let mut restored = Vec::new();
    let mut i = session.transactions.len();
    while i > 0 {
        i -= 1;
        if session.transactions[i].turn != turn {
            continue;
        }
        let tx = session.transactions.remove(i);
        for (rel, prev) in &tx.files {
            if restore_path(session, rel, prev) {
                restored.push(rel.clone());
            }
        }
    }
    session.rebuild_pending();
    restored
}

/// Restore one path from the most recent transaction containing it; the
/// transaction's other files are untouched. Returns false when the path
/// is invalid, untracked, or could not be restored.
pub fn rollback_file(session: &mut Session, raw: &str) -> bool {
    let cleaned = raw.trim().replace('\\', "/");
    if cleaned.is_empty() {
        return false;
    }
    let cand = Utf8PathBuf::from(cleaned);
    if cand.is_absolute() {
        return false;
    }
    let Some(rel) = paths::normalize_rel(&cand) else {
        return false;
    };

    for i in (0..session.transactions.len()).rev() {
        if !session.transactions[i].files.contains_key(&rel) {
            continue;
        }
        let prev = session.transactions[i].files[&rel].clone();
        if !restore_path(session, &rel, &prev) {
            return false;
        }
        session.transactions[i].files.shift_remove(&rel);
        if session.transactions[i].files.is_empty() {
            session.transactions.remove(i);
        }
        session.rebuild_pending();
        return true;
    }
    false
}

/// Undo the whole trailing exchange: roll back the last assistant turn's
/// edits, pop the assistant and user turns, and return the user turn's
/// original text (preamble and inlined attachments stripped) with its
/// attachment list so the driver can re-compose it.
pub fn undo_turn(session: &mut Session) -> Option<(String, Vec<Utf8PathBuf>)> {
    if session.turns.last()?.role != Role::Assistant {
        return None;
    }
    let assistant_index = session.turns.len() - 1;
    rollback_turn(session, assistant_index);
    session.turns.pop();

    for i in (0..session.turns.len()).rev() {
        if session.turns[i].role == Role::User {
            let turn = session.turns.remove(i);
            let text = session.recompose_user_text(&turn.text);
            return Some((text, turn.attachments));
        }
    }
    None
}

/// CLI entry point: roll back a journaled turn or a single file.
pub fn rollback_run(
    args: crate::cli::RollbackArgs,
    ctx: &crate::cli::AppContext,
) -> anyhow::Result<()> {
    let root = crate::infra::paths::resolve_root(&args.root)?;
    let cfg = crate::infra::config::load_config().unwrap_or_default();
    let (mut session, mut journal) = crate::core::journal::load_session(&root, &cfg, true)?;

    match (args.turn, args.file.as_deref()) {
        (Some(turn), _) => {
            if ctx.dry_run {
                let affected: Vec<&Utf8PathBuf> = session
                    .transactions
                    .iter()
                    .filter(|tx| tx.turn == turn)
                    .flat_map(|tx| tx.files.keys())
                    .collect();
                if !ctx.quiet {
                    println!("DRY RUN - would restore {} file(s)", affected.len());
                    for p in affected {
                        println!("  - {p}");
                    }
                }
                return Ok(());
            }
            let restored = rollback_turn(&mut session, turn);
            if let Some(j) = journal.as_mut() {
                j.replace_all(&session.transactions)?;
            }
            if args.json {
                println!("{}", serde_json::to_string(&restored)?);
            } else if restored.is_empty() {
                if !ctx.quiet {
                    println!("Nothing recorded for turn {turn}.");
                }
            } else if !ctx.quiet {
                println!("Restored {} file(s):", restored.len());
                for p in &restored {
                    println!("  - {p}");
                }
            }
        }
        (None, Some(file)) => {
            if ctx.dry_run {
                let tracked = session
                    .transactions
                    .iter()
                    .any(|tx| tx.files.keys().any(|p| p.as_str() == file));
                if !ctx.quiet {
                    println!(
                        "DRY RUN - {}",
                        if tracked {
                            "would restore 1 file"
                        } else {
                            "nothing to restore"
                        }
                    );
                }
                return Ok(());
            }
            let ok = rollback_file(&mut session, file);
            if let Some(j) = journal.as_mut() {
                j.replace_all(&session.transactions)?;
            }
            if args.json {
                println!("{}", serde_json::json!({ "restored": ok }));
            } else if ok {
                if !ctx.quiet {
                    println!("Restored {file}.");
                }
            } else {
                anyhow::bail!("nothing to restore for {file}");
            }
        }
        (None, None) => anyhow::bail!("specify --turn or --file"),
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::session::EditTransaction;
    use indexmap::IndexMap;
    use std::fs;

    fn sandbox() -> (tempfile::TempDir, Session) {
        let dir = tempfile::tempdir().unwrap();
        let root = Utf8Path::from_path(dir.path()).unwrap();
        let session = Session::new(root).unwrap();
        (dir, session)
    }

    fn tx(turn: usize, entries: &[(&str, Option<&str>)]) -> EditTransaction {
        let mut files = IndexMap::new();
        for (p, prev) in entries {
            files.insert(Utf8PathBuf::from(*p), prev.map(str::to_string));
        }
        EditTransaction { turn, files }
    }

    #[test]
    fn rollback_turn_restores_and_deletes() {
        let (_dir, mut s) = sandbox();
        fs::write(s.root().join("a.txt"), "edited").unwrap();
        fs::write(s.root().join("fresh.txt"), "created").unwrap();
        s.commit_transaction(tx(
            2,
            &[("a.txt", Some("original")), ("fresh.txt", None)],
        ));

        let restored = rollback_turn(&mut s, 2);
        assert_eq!(restored.len(), 2);
        assert_eq!(fs::read_to_string(s.root().join("a.txt")).unwrap(), "original");
        assert!(!s.root().join("fresh.txt").as_std_path().exists());
        assert!(s.transactions.is_empty());
        assert!(!s.is_pending(Utf8Path::new("a.txt")));
    }

    #[test]
    fn rollback_turn_ignores_other_turns() {
        let (_dir, mut s) = sandbox();
        fs::write(s.root().join("a.txt"), "two").unwrap();
        s.commit_transaction(tx(1, &[("a.txt", Some("one"))]));
        fs::write(s.root().join("b.txt"), "two").unwrap();
        s.commit_transaction(tx(3, &[("b.txt", Some("one"))]));

        rollback_turn(&mut s, 3);
        assert_eq!(fs::read_to_string(s.root().join("a.txt")).unwrap(), "two");
        assert_eq!(fs::read_to_string(s.root().join("b.txt")).unwrap(), "one");
        assert_eq!(s.transactions.len(), 1);
        assert!(s.is_pending(Utf8Path::new("a.txt")));
        assert!(!s.is_pending(Utf8Path::new("b.txt")));
    }

    #[test]
    fn rollback_file_is_surgical() {
        let (_dir, mut s) = sandbox();
        fs::write(s.root().join("a.txt"), "a2").unwrap();
        fs::write(s.root().join("b.txt"), "b2").unwrap();
        s.commit_transaction(tx(1, &[("a.txt", Some("a1")), ("b.txt", Some("b1"))]));

        assert!(rollback_file(&mut s, "a.txt"));
        assert_eq!(fs::read_to_string(s.root().join("a.txt")).unwrap(), "a1");
        // Sibling untouched, transaction still alive for it.
        assert_eq!(fs::read_to_string(s.root().join("b.txt")).unwrap(), "b2");
        assert_eq!(s.transactions.len(), 1);
        assert!(s.is_pending(Utf8Path::new("b.txt")));
        assert!(!s.is_pending(Utf8Path::new("a.txt")));

        // Second rollback drops the now-empty transaction.
        assert!(rollback_file(&mut s, "b.txt"));
        assert!(s.transactions.is_empty());
    }

    #[test]
    fn rollback_file_rejects_bad_paths() {
        let (_dir, mut s) = sandbox();
        assert!(!rollback_file(&mut s, "/abs/path.txt"));
        assert!(!rollback_file(&mut s, "../escape.txt"));
        assert!(!rollback_file(&mut s, "untracked.txt"));
    }

    #[test]
    fn undo_turn_returns_recomposed_user_text() {
        let (_dir, mut s) = sandbox();
        s.preamble = Some("PREAMBLE".to_string());
        fs::write(s.root().join("a.txt"), "new").unwrap();
        s.push_user(
            "PREAMBLE\n\nfix the bug\n\nAttached files:\n### a.txt\nnew",
            vec![Utf8PathBuf::from("a.txt")],
        );
        let assistant_turn = s.next_turn_index();
        s.push_assistant("###EDIT a.txt ...");
        s.commit_transaction(tx(assistant_turn, &[("a.txt", Some("old"))]));

        let (text, files) = undo_turn(&mut s).unwrap();
        assert_eq!(text, "fix the bug");
        assert_eq!(files, vec![Utf8PathBuf::from("a.txt")]);
        assert_eq!(fs::read_to_string(s.root().join("a.txt")).unwrap(), "old");
        assert!(s.turns.is_empty());
    }

    #[test]
    fn undo_without_assistant_tail_is_none() {
        let (_dir, mut s) = sandbox();
        s.push_user("hello", vec![]);
        assert!(undo_turn(&mut s).is_none());
    }
}
