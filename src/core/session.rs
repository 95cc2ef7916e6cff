//! Explicit session state: conversation, transactions, pending edits.
//!
//! Everything mutable lives here and is passed by reference into the
//! engine operations; there is no ambient or static state. The engine is
//! sequential: the surrounding driver allows at most one outstanding
//! apply-or-rollback call per sandbox root.

use anyhow::{Context, Result};
use camino::{Utf8Path, Utf8PathBuf};
use indexmap::{IndexMap, IndexSet};
use serde::{Deserialize, Serialize};

use crate::infra::line_cache::LineCache;

/// Marker the driver appends before inlined attachment contents.
pub const ATTACHMENTS_MARKER: &str = "\n\nAttached files:";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Role {
    System,
    User,
    Assistant,
}

/// One settled conversation turn. Partial or still-streaming text never
/// enters this model; the driver pushes a turn only once it is final.
#[derive(Debug, Clone)]
pub struct Turn {
    pub role: Role,
    pub text: String,
    /// Sandbox-relative paths attached when the turn was sent.
    pub attachments: Vec<Utf8PathBuf>,
}

/// Record of all files changed by one apply call, enabling exact rollback.
/// `None` records that the file did not exist before the edit.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EditTransaction {
    pub turn: usize,
    pub files: IndexMap<Utf8PathBuf, Option<String>>,
}

pub struct Session {
    root: Utf8PathBuf,
    pub turns: Vec<Turn>,
    /// One-time preamble the driver prefixes onto the first user message;
    /// stripped again when a turn is undone and re-composed.
    pub preamble: Option<String>,
    pub transactions: Vec<EditTransaction>,
    pending: IndexSet<Utf8PathBuf>,
    pub line_cache: LineCache,
}

impl Session {
    /// Open a session over a sandbox root; the root must exist.
    pub fn new(root: &Utf8Path) -> Result<Self> {
        let canon = dunce::canonicalize(root.as_std_path())
            .with_context(|| format!("sandbox root not accessible: {root}"))?;
        let root = Utf8PathBuf::from_path_buf(canon)
            .map_err(|p| anyhow::anyhow!("sandbox root is not UTF-8: {}", p.display()))?;
        Ok(Self {
            root,
            turns: Vec::new(),
            preamble: None,
            transactions: Vec::new(),
            pending: IndexSet::new(),
            line_cache: LineCache::new(),
        })
    }

    pub fn root(&self) -> &Utf8Path {
        &self.root
    }

    pub fn push_user(&mut self, text: impl Into<String>, attachments: Vec<Utf8PathBuf>) {
        self.turns.push(Turn {
            role: Role::User,
            text: text.into(),
            attachments,
        });
    }

    pub fn push_assistant(&mut self, text: impl Into<String>) {
        self.turns.push(Turn {
            role: Role::Assistant,
            text: text.into(),
            attachments: Vec::new(),
        });
    }

    /// Index the next assistant turn will occupy; used to tag transactions.
    pub fn next_turn_index(&self) -> usize {
        self.turns.len()
    }

    /// Attachment list of the most recent user turn that carried one.
    /// This is the context the path resolver recovers loose filenames
    /// against.
    pub fn context_attachments(&self) -> &[Utf8PathBuf] {
        self.turns
            .iter()
            .rev()
            .find(|t| t.role == Role::User && !t.attachments.is_empty())
            .map(|t| t.attachments.as_slice())
            .unwrap_or_default()
    }

    /// Record a finalized transaction and mark its paths pending.
    pub fn commit_transaction(&mut self, tx: EditTransaction) {
        for path in tx.files.keys() {
            self.pending.insert(path.clone());
        }
        self.transactions.push(tx);
    }

    /// Paths with at least one live transaction.
    pub fn pending_paths(&self) -> impl Iterator<Item = &Utf8PathBuf> {
        self.pending.iter()
    }

    pub fn is_pending(&self, path: &Utf8Path) -> bool {
        self.pending.contains(path)
    }

    /// Rebuild the pending index from surviving transactions. Called after
    /// every rollback; the index is derived state and is never maintained
    /// incrementally through removals.
    pub fn rebuild_pending(&mut self) {
        self.pending = self
            .transactions
            .iter()
            .flat_map(|tx| tx.files.keys().cloned())
            .collect();
    }

    /// Strip the inlined-attachments suffix and one-time preamble from a
    /// stored user message, recovering what the operator originally typed.
    pub fn recompose_user_text(&self, stored: &str) -> String {
        let mut text = stored
            .split(ATTACHMENTS_MARKER)
            .next()
            .unwrap_or(stored)
            .to_string();
        if let Some(preamble) = &self.preamble {
            if let Some(rest) = text.strip_prefix(preamble.as_str()) {
                text = rest.trim_start_matches('\n').to_string();
            }
        }
        text
    }
}
