//! Sandbox path resolution for model-supplied filenames.
//!
//! Generated text names files loosely: bare filenames, partial suffixes,
//! stray backticks, backslashes. Resolution is a strict ranked fallback
//! chain that fails closed: any stage with more than one surviving
//! candidate yields no match, never a best guess.

use anyhow::Context;
use camino::{Utf8Component, Utf8Path, Utf8PathBuf};
use ignore::WalkBuilder;
use tracing::debug;

/// Expand `~`/env vars and canonicalize a user-supplied sandbox root.
pub fn resolve_root(raw: &str) -> anyhow::Result<Utf8PathBuf> {
    let expanded = shellexpand::tilde(raw);
    let canon = dunce::canonicalize(std::path::Path::new(expanded.as_ref()))
        .with_context(|| format!("sandbox root not accessible: {raw}"))?;
    Utf8PathBuf::from_path_buf(canon)
        .map_err(|p| anyhow::anyhow!("sandbox root is not UTF-8: {}", p.display()))
}

/// Resolver over one sandbox root plus the attachment context of the most
/// recent user turn.
pub struct PathResolver<'a> {
    root: &'a Utf8Path,
    context_files: &'a [Utf8PathBuf],
}

impl<'a> PathResolver<'a> {
    pub fn new(root: &'a Utf8Path, context_files: &'a [Utf8PathBuf]) -> Self {
        Self {
            root,
            context_files,
        }
    }

    /// Map a raw model-supplied filename to a sandbox-relative path.
    ///
    /// Absolute paths and anything escaping the root are rejected. A path
    /// that exists (or may be created) is accepted as-is; otherwise the
    /// attachment context and finally the whole tree are consulted, each
    /// stage accepting only a unique match.
    pub fn resolve(&self, raw: &str, create_if_missing: bool) -> Option<Utf8PathBuf> {
        let cleaned = raw.trim().replace('`', "").replace('\\', "/");
        if cleaned.is_empty() {
            return None;
        }
        let cand = Utf8PathBuf::from(cleaned);
        if cand.is_absolute() {
            return None;
        }
        let rel = normalize_rel(&cand)?;

        if self.root.join(&rel).as_std_path().exists() || create_if_missing {
            return Some(rel);
        }

        // Contextual recovery against the latest user turn's attachments.
        if !self.context_files.is_empty() {
            if rel.components().count() > 1 {
                let hits: Vec<&Utf8PathBuf> = self
                    .context_files
                    .iter()
                    .filter(|p| suffix_matches(p, &rel))
                    .collect();
                match hits.len() {
                    1 => {
                        debug!(path = %hits[0], "resolved by attachment suffix");
                        return Some(hits[0].clone());
                    }
                    n if n > 1 => return None,
                    _ => {}
                }
            }
            let name = rel.file_name()?;
            let hits: Vec<&Utf8PathBuf> = self
                .context_files
                .iter()
                .filter(|p| p.file_name() == Some(name))
                .collect();
            match hits.len() {
                1 => {
                    debug!(path = %hits[0], "resolved by attachment filename");
                    return Some(hits[0].clone());
                }
                n if n > 1 => return None,
                _ => {}
            }
        }

        // Last resort (existing-file mode only): scan the sandbox tree.
        self.scan_tree(&rel)
    }

    fn scan_tree(&self, rel: &Utf8Path) -> Option<Utf8PathBuf> {
        let name = rel.file_name()?;
        let multi = rel.components().count() > 1;
        let mut hits: Vec<Utf8PathBuf> = Vec::new();

        for entry in WalkBuilder::new(self.root.as_std_path()).build().flatten() {
            if !entry.file_type().is_some_and(|t| t.is_file()) {
                continue;
            }
            let Ok(found) = entry.path().strip_prefix(self.root.as_std_path()) else {
                continue;
            };
            let Some(found) = Utf8Path::from_path(found) else {
                continue;
            };
            if found.file_name() != Some(name) {
                continue;
            }
            if multi && !suffix_matches(found, rel) {
                continue;
            }
            hits.push(found.to_path_buf());
            if hits.len() > 1 {
                return None;
            }
        }

        match hits.len() {
            1 => {
                debug!(path = %hits[0], "resolved by sandbox scan");
                Some(hits.remove(0))
            }
            _ => None,
        }
    }
}

/// Lexically normalize a relative path, rejecting anything that escapes
/// the sandbox root.
pub fn normalize_rel(p: &Utf8Path) -> Option<Utf8PathBuf> {
    let mut out = Utf8PathBuf::new();
    for c in p.components() {
        match c {
            Utf8Component::ParentDir => {
                if !out.pop() {
                    return None; // escapes the root
                }
            }
            Utf8Component::CurDir => {}
            Utf8Component::Prefix(_) | Utf8Component::RootDir => return None,
            Utf8Component::Normal(seg) => out.push(seg),
        }
    }
    if out.as_str().is_empty() {
        return None;
    }
    Some(out)
}

/// True when `p` ends with every component of `suffix`, in order.
fn suffix_matches(p: &Utf8Path, suffix: &Utf8Path) -> bool {
    let pp: Vec<&str> = p.components().map(|c| c.as_str()).collect();
    let sp: Vec<&str> = suffix.components().map(|c| c.as_str()).collect();
    pp.len() >= sp.len() && pp[pp.len() - sp.len()..] == sp[..]
}
