//! File I/O primitives: smart reads, EOL bookkeeping, atomic writes.
//!
//! Every mutation of the sandbox goes through [`write_atomic`]: same-dir
//! temp file, flush + fsync, rename, best-effort parent-dir sync. Reads
//! above the mmap threshold are memory-mapped.

use anyhow::{Context, Result};
use memmap2::Mmap;
use std::fs::{self, File};
use std::io::Write;
use std::path::Path;

const MMAP_THRESHOLD: u64 = 1024 * 1024; // 1 MiB

pub enum FileContent {
    Mapped(Mmap),
    Buffered(String),
}

impl FileContent {
    /// Borrow the content as UTF-8 text; mapped bytes must be valid UTF-8.
    pub fn as_str(&self) -> Result<&str> {
        match self {
            FileContent::Mapped(mmap) => {
                std::str::from_utf8(mmap).context("file is not valid UTF-8")
            }
            FileContent::Buffered(s) => Ok(s.as_str()),
        }
    }
}

pub fn read_file_smart<P: AsRef<Path>>(path: P) -> Result<FileContent> {
    let path = path.as_ref();
    let metadata = fs::metadata(path)
        .with_context(|| format!("Failed to read metadata for {}", path.display()))?;

    if metadata.len() > MMAP_THRESHOLD {
        let file =
            File::open(path).with_context(|| format!("Failed to open file {}", path.display()))?;

        // Safety: we only read the mapping; the single-operator assumption
        // means nobody truncates the file underneath us.
        let mmap = unsafe { Mmap::map(&file) }
            .with_context(|| format!("Failed to memory-map {}", path.display()))?;

        Ok(FileContent::Mapped(mmap))
    } else {
        let content = fs::read_to_string(path)
            .with_context(|| format!("Failed to read file {}", path.display()))?;

        Ok(FileContent::Buffered(content))
    }
}

/// Line-ending convention of a file snapshot.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Eol {
    Lf,
    CrLf,
}

impl Eol {
    pub fn as_str(self) -> &'static str {
        match self {
            Eol::Lf => "\n",
            Eol::CrLf => "\r\n",
        }
    }
}

/// Detect the EOL convention and trailing-newline presence of `content`.
pub fn detect_eol(content: &str) -> (Eol, bool) {
    let eol = if memchr::memmem::find(content.as_bytes(), b"\r\n").is_some() {
        Eol::CrLf
    } else {
        Eol::Lf
    };
    let had_final_nl = content.ends_with('\n');
    (eol, had_final_nl)
}

/// Normalize CRLF/CR to LF and split into lines. A trailing newline does
/// not produce a final empty line.
pub fn split_normalized(content: &str) -> Vec<String> {
    let norm = normalize_newlines(content);
    let mut lines: Vec<String> = norm.split('\n').map(str::to_string).collect();
    if norm.ends_with('\n') {
        lines.pop();
    }
    lines
}

pub fn normalize_newlines(content: &str) -> String {
    content.replace("\r\n", "\n").replace('\r', "\n")
}

/// Reassemble lines with the original EOL convention and trailing-newline
/// state of the source file.
pub fn assemble(lines: &[String], eol: Eol, had_final_nl: bool) -> String {
    let mut out = lines.join("\n");
    if had_final_nl {
        out.push('\n');
    }
    match eol {
        Eol::Lf => out,
        Eol::CrLf => out.replace('\n', "\r\n"),
    }
}

/// Atomic write with robust temp file strategy.
pub fn write_atomic(path: &Path, data: &[u8]) -> Result<()> {
    let dir = path.parent().unwrap_or_else(|| Path::new("."));
    fs::create_dir_all(dir).with_context(|| format!("create parent dir: {}", dir.display()))?;

    // Preserve original permissions when the target already exists
    #[cfg(unix)]
    let perms = fs::metadata(path)
        .map(|m| m.permissions())
        .unwrap_or_else(|_| std::os::unix::fs::PermissionsExt::from_mode(0o644));
    #[cfg(not(unix))]
    let perms = fs::metadata(path).map(|m| m.permissions()).ok();

    let tmp = match tempfile::NamedTempFile::new_in(dir) {
        Ok(t) => t,
        Err(_) => tempfile::NamedTempFile::new()?, // fallback to OS temp
    };

    let mut file = tmp.as_file();
    file.set_len(0)?;
    file.write_all(data)?;
    file.sync_all()?;

    #[cfg(unix)]
    fs::set_permissions(tmp.path(), perms).context("set temp permissions")?;
    #[cfg(not(unix))]
    if let Some(perms) = perms {
        fs::set_permissions(tmp.path(), perms).context("set temp permissions")?;
    }

    match tmp.persist(path) {
        Ok(_) => {}
        Err(e) => {
            // Different filesystem? Fall back to copy.
            fs::copy(e.file.path(), path)?;
        }
    }

    // Durably record the rename.
    let _ = sync_dir(dir);

    Ok(())
}

/// Cross-platform directory fsync helper.
#[cfg(unix)]
pub fn sync_dir(p: &Path) -> std::io::Result<()> {
    use std::fs::OpenOptions;
    use std::os::unix::fs::OpenOptionsExt;
    let f = OpenOptions::new()
        .read(true)
        .custom_flags(libc::O_DIRECTORY)
        .open(p)?;
    f.sync_all()
}

#[cfg(windows)]
pub fn sync_dir(_p: &Path) -> std::io::Result<()> {
    // Windows does not expose a reliable directory fsync; best-effort no-op.
    Ok(())
}
