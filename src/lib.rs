//! **redline** - Safe markdown edit-directive engine for LLM workflows
//!
//! Recognizes `###EDIT` sections embedded in generated markdown, locates
//! the lines they refer to by exact anchor-text resolution instead of
//! trusting model-supplied line numbers, and applies the edits atomically
//! inside a sandboxed file tree with exact per-turn rollback.

/// Command-line interface with clap integration
pub mod cli;

/// Shell completion generation
pub mod completion;

/// Core engine - parsing, resolution, transactional apply and rollback
pub mod core {
    /// Edit-directive model and the pure markdown parser (both dialects)
    pub mod directive;
    pub use directive::{AnchorSpec, EditDirective, EditOp, ReplaceBlock, parse};

    /// Anchor resolution: unique spans from exact boundary-line texts
    pub mod anchor;
    pub use anchor::{ResolveError, Span, resolve};

    /// Transactional apply engine with atomic writes
    pub mod apply;
    pub use apply::{ApplyEngine, ApplyOutcome, ApplyStatus, apply_run};

    /// Display-only preview expansion and would-be diffs
    pub mod preview;
    pub use preview::{preview, preview_diff, preview_run};

    /// Explicit session state: conversation, transactions, pending edits
    pub mod session;
    pub use session::{EditTransaction, Role, Session, Turn};

    /// Rollback by turn, by file, or of the whole trailing exchange
    pub mod rollback;
    pub use rollback::{rollback_file, rollback_run, rollback_turn, undo_turn};

    /// On-disk transaction journal for the CLI driver
    pub mod journal;
    pub use journal::{Journal, status_run};
}

/// Infrastructure - configuration, I/O, caching, path resolution
pub mod infra {
    /// Configuration management with TOML support
    pub mod config;
    pub use config::{Config, init as config_init, load_config};

    /// Smart reads, EOL bookkeeping, atomic writes
    pub mod io;
    pub use io::{Eol, FileContent, read_file_smart, write_atomic};

    /// (mtime, size)-validated memoized line arrays
    pub mod line_cache;
    pub use line_cache::LineCache;

    /// Sandbox path resolution with ranked fail-closed fallback
    pub mod paths;
    pub use paths::PathResolver;
}

// Strategic re-exports for clean library consumption
pub use cli::{AppContext, Cli, Commands};
pub use core::{
    ApplyEngine, ApplyOutcome, ApplyStatus, EditDirective, ResolveError, Session, Span, parse,
    preview, resolve, rollback_file, rollback_turn, undo_turn,
};
pub use infra::{Config, LineCache, PathResolver, load_config};
