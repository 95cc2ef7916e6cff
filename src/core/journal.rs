//! On-disk transaction journal for the CLI driver.
//!
//! The library session keeps its transaction log in memory. A one-shot
//! CLI invocation needs yesterday's transactions to roll them back, so
//! the driver mirrors the log under `<root>/.redline/`: one JSON record
//! per transaction plus an append-only `index.jsonl` for cheap listing.
//! Records are written atomically and fsynced; the reader tolerates
//! partial or corrupt entries. Cross-process locking is deliberately
//! absent (single-operator assumption).

use anyhow::{Context, Result};
use camino::{Utf8Path, Utf8PathBuf};
use chrono::Utc;
use indexmap::IndexMap;
use serde::{Deserialize, Serialize};
use std::fs;
use std::io::Write;
use tracing::debug;

use crate::core::session::EditTransaction;
use crate::infra::io;

/// One persisted pre-image.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FileSnapshot {
    /// Pre-edit content; `None` when the file did not exist.
    pub prev: Option<String>,
    /// xxh64 fingerprint of the pre-image, for status display.
    pub fingerprint: Option<String>,
}

/// Persisted form of one transaction.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TxnRecord {
    pub seq: u64,
    pub turn: usize,
    pub timestamp: String,
    pub files: IndexMap<Utf8PathBuf, FileSnapshot>,
}

/// Lightweight line in `index.jsonl`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct IndexEntry {
    pub seq: u64,
    pub turn: usize,
    pub timestamp: String,
    pub files: usize,
}

pub struct Journal {
    txns_dir: Utf8PathBuf,
    index_path: Utf8PathBuf,
    next_seq: u64,
}

impl Journal {
    /// Open (creating if needed) the journal under `root`/`dir`.
    pub fn open(root: &Utf8Path, dir: &str) -> Result<Self> {
        let base = root.join(dir);
        let txns_dir = base.join("txns");
        fs::create_dir_all(txns_dir.as_std_path())
            .with_context(|| format!("create journal dir: {txns_dir}"))?;
        let index_path = base.join("index.jsonl");

        let mut next_seq = 1u64;
        for entry in fs::read_dir(txns_dir.as_std_path())? {
            let entry = entry?;
            if let Some(seq) = entry
                .path()
                .file_stem()
                .and_then(|s| s.to_str())
                .and_then(|s| s.parse::<u64>().ok())
            {
                next_seq = next_seq.max(seq + 1);
            }
        }

        Ok(Self {
            txns_dir,
            index_path,
            next_seq,
        })
    }

    fn record_path(&self, seq: u64) -> Utf8PathBuf {
        self.txns_dir.join(format!("{seq:08}.json"))
    }

    /// Persist one finalized transaction and append it to the index.
    pub fn append(&mut self, tx: &EditTransaction) -> Result<u64> {
        let seq = self.next_seq;
        let record = TxnRecord {
            seq,
            turn: tx.turn,
            timestamp: Utc::now().to_rfc3339(),
            files: tx
                .files
                .iter()
                .map(|(p, prev)| (p.clone(), snapshot(prev)))
                .collect(),
        };

        let text = serde_json::to_string_pretty(&record).context("serialize txn record")?;
        io::write_atomic(self.record_path(seq).as_std_path(), text.as_bytes())?;

        let entry = IndexEntry {
            seq,
            turn: record.turn,
            timestamp: record.timestamp.clone(),
            files: record.files.len(),
        };
        let line = serde_json::to_string(&entry).context("serialize index entry")?;
        let mut f = fs::OpenOptions::new()
            .create(true)
            .append(true)
            .open(self.index_path.as_std_path())
            .with_context(|| format!("open index: {}", self.index_path))?;
        writeln!(f, "{line}").context("append index")?;
        f.sync_all().ok();

        self.next_seq += 1;
        debug!(seq, turn = record.turn, files = record.files.len(), "journaled");
        Ok(seq)
    }

    /// Load every readable record, sorted by sequence. Corrupt or partial
    /// records are skipped, not fatal.
    pub fn load(&self) -> Result<Vec<TxnRecord>> {
        let mut records = Vec::new();
        for entry in fs::read_dir(self.txns_dir.as_std_path())? {
            let entry = entry?;
            if entry.path().extension().and_then(|e| e.to_str()) != Some("json") {
                continue;
            }
            let Ok(text) = fs::read_to_string(entry.path()) else {
                continue;
            };
            match serde_json::from_str::<TxnRecord>(&text) {
                Ok(r) => records.push(r),
                Err(_) => continue, // tolerate partial/corrupt records
            }
        }
        records.sort_by_key(|r| r.seq);
        Ok(records)
    }

    /// Transactions reconstructed from the journal, oldest first, ready to
    /// seed a session's in-memory log.
    pub fn load_transactions(&self) -> Result<Vec<EditTransaction>> {
        Ok(self
            .load()?
            .into_iter()
            .map(|r| EditTransaction {
                turn: r.turn,
                files: r.files.into_iter().map(|(p, s)| (p, s.prev)).collect(),
            })
            .collect())
    }

    /// Rewrite the journal to mirror the surviving in-memory log. Called
    /// after rollback shrank or dropped transactions.
    pub fn replace_all(&mut self, transactions: &[EditTransaction]) -> Result<()> {
        for entry in fs::read_dir(self.txns_dir.as_std_path())? {
            let entry = entry?;
            let _ = fs::remove_file(entry.path());
        }
        let _ = fs::remove_file(self.index_path.as_std_path());
        self.next_seq = 1;
        for tx in transactions {
            self.append(tx)?;
        }
        Ok(())
    }

    /// Index entries for listing, newest first.
    pub fn index(&self) -> Result<Vec<IndexEntry>> {
        if !self.index_path.as_std_path().exists() {
            return Ok(Vec::new());
        }
        let text = fs::read_to_string(self.index_path.as_std_path())
            .with_context(|| format!("read index: {}", self.index_path))?;
        let mut out: Vec<IndexEntry> = text
            .lines()
            .filter(|l| !l.trim().is_empty())
            .filter_map(|l| serde_json::from_str(l).ok())
            .collect();
        out.sort_by_key(|e| std::cmp::Reverse(e.seq));
        Ok(out)
    }
}

/// Open a session over `root`, seeding its in-memory transaction log from
/// the journal when enabled.
pub fn load_session(
    root: &Utf8Path,
    cfg: &crate::infra::config::Config,
    use_journal: bool,
) -> Result<(crate::core::session::Session, Option<Journal>)> {
    let mut session = crate::core::session::Session::new(root)?;
    let journal = if use_journal && cfg.journal.enabled {
        let j = Journal::open(session.root(), &cfg.journal.dir)?;
        for tx in j.load_transactions()? {
            session.commit_transaction(tx);
        }
        Some(j)
    } else {
        None
    };
    Ok((session, journal))
}

/// CLI entry point: list pending files and journaled transactions.
pub fn status_run(args: crate::cli::StatusArgs, ctx: &crate::cli::AppContext) -> Result<()> {
    use tabled::{Table, Tabled, settings::Style};

    #[derive(Tabled)]
    struct StatusRow {
        #[tabled(rename = "seq")]
        seq: u64,
        #[tabled(rename = "turn")]
        turn: usize,
        #[tabled(rename = "path")]
        path: String,
        #[tabled(rename = "pre-image")]
        fingerprint: String,
        #[tabled(rename = "recorded")]
        timestamp: String,
    }

    let root = crate::infra::paths::resolve_root(&args.root)?;
    let cfg = crate::infra::config::load_config().unwrap_or_default();
    let journal = Journal::open(&root, &cfg.journal.dir)?;
    let records = journal.load()?;

    if args.json {
        println!("{}", serde_json::to_string_pretty(&records)?);
        return Ok(());
    }
    if records.is_empty() {
        if !ctx.quiet {
            println!("No pending edits.");
        }
        return Ok(());
    }

    let rows: Vec<StatusRow> = records
        .iter()
        .flat_map(|r| {
            r.files.iter().map(|(path, snap)| StatusRow {
                seq: r.seq,
                turn: r.turn,
                path: path.to_string(),
                fingerprint: snap
                    .fingerprint
                    .clone()
                    .unwrap_or_else(|| "absent".to_string()),
                timestamp: r.timestamp.clone(),
            })
        })
        .collect();
    println!("{}", Table::new(rows).with(Style::sharp()));
    Ok(())
}

fn snapshot(prev: &Option<String>) -> FileSnapshot {
    FileSnapshot {
        prev: prev.clone(),
        fingerprint: prev
            .as_ref()
            .map(|c| format!("{:016x}", xxhash_rust::xxh64::xxh64(c.as_bytes(), 0))),
    }
}
