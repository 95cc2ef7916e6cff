use clap::{Parser, Subcommand, ValueEnum};
use std::path::PathBuf;

/// Shared application context for global flags
#[derive(Clone, Debug)]
pub struct AppContext {
    pub quiet: bool,    // global --quiet
    pub no_color: bool, // global --no-color
    pub dry_run: bool,  // global --dry-run
}

#[derive(Parser)]
#[command(name = "redline")]
#[command(
    about = "Safe markdown edit-directive engine: parse, anchor-resolve and transactionally apply LLM-proposed source edits"
)]
#[command(version, long_about = None)]
pub struct Cli {
    #[command(subcommand)]
    pub command: Commands,

    /// Disable colored output
    #[arg(long, global = true)]
    pub no_color: bool,

    /// Suppress non-essential output
    #[arg(long, global = true)]
    pub quiet: bool,

    /// Show what would be done without executing
    #[arg(long, global = true)]
    pub dry_run: bool,
}

#[derive(Subcommand)]
pub enum Commands {
    /// Apply edit directives from generated markdown
    Apply(ApplyArgs),

    /// Render the human preview expansion without writing
    Preview(PreviewArgs),

    /// Validate directive syntax without touching files
    Parse(ParseArgs),

    /// Roll back a recorded turn or a single file
    Rollback(RollbackArgs),

    /// Show pending edits and journaled transactions
    Status(StatusArgs),

    /// Initialize a redline.toml config file
    Init(InitArgs),

    /// Generate shell completions
    Completions(CompletionsArgs),
}

#[derive(Parser)]
pub struct ApplyArgs {
    /// Markdown file carrying edit directives (stdin if omitted)
    pub edit_file: Option<PathBuf>,

    /// Read the markdown from the system clipboard
    #[arg(long, conflicts_with = "edit_file")]
    pub from_clipboard: bool,

    /// Sandbox root no edit may escape
    #[arg(long, default_value = ".")]
    pub root: String,

    /// Apply changes to files (default is a preview-only safety mode)
    #[arg(long)]
    pub apply: bool,

    /// Turn index to tag the transaction with (next free index if omitted)
    #[arg(long)]
    pub turn: Option<usize>,

    /// Attachment context for loose-filename recovery (repeatable)
    #[arg(long = "attach")]
    pub attachments: Vec<String>,

    /// Skip the on-disk transaction journal
    #[arg(long)]
    pub no_journal: bool,

    /// Machine-readable JSON output
    #[arg(long)]
    pub json: bool,
}

#[derive(Parser)]
pub struct PreviewArgs {
    /// Markdown file carrying edit directives (stdin if omitted)
    pub edit_file: Option<PathBuf>,

    /// Read the markdown from the system clipboard
    #[arg(long, conflicts_with = "edit_file")]
    pub from_clipboard: bool,

    /// Sandbox root no edit may escape
    #[arg(long, default_value = ".")]
    pub root: String,

    /// Attachment context for loose-filename recovery (repeatable)
    #[arg(long = "attach")]
    pub attachments: Vec<String>,

    /// Also render unified diffs of what apply would change
    #[arg(long)]
    pub diff: bool,
}

#[derive(Parser)]
pub struct ParseArgs {
    /// Markdown file carrying edit directives (stdin if omitted)
    pub edit_file: Option<PathBuf>,

    /// Machine-readable JSON output
    #[arg(long)]
    pub json: bool,
}

#[derive(Parser)]
pub struct RollbackArgs {
    /// Roll back every transaction of this turn
    #[arg(long, conflicts_with = "file")]
    pub turn: Option<usize>,

    /// Roll back a single file from its most recent transaction
    #[arg(long)]
    pub file: Option<String>,

    /// Sandbox root no edit may escape
    #[arg(long, default_value = ".")]
    pub root: String,

    /// Machine-readable JSON output
    #[arg(long)]
    pub json: bool,
}

#[derive(Parser)]
pub struct StatusArgs {
    /// Sandbox root no edit may escape
    #[arg(long, default_value = ".")]
    pub root: String,

    /// Machine-readable JSON output
    #[arg(long)]
    pub json: bool,
}

#[derive(Parser)]
pub struct InitArgs {
    /// Directory to place redline.toml in
    #[arg(default_value = ".")]
    pub path: PathBuf,

    /// Overwrite an existing config file
    #[arg(long)]
    pub force: bool,
}

#[derive(Debug, Clone, Copy, ValueEnum)]
pub enum Shell {
    Bash,
    Zsh,
    Fish,
    PowerShell,
    Elvish,
}

#[derive(Parser)]
pub struct CompletionsArgs {
    /// Target shell
    #[arg(value_enum)]
    pub shell: Shell,

    /// Write the script to stdout
    #[arg(long)]
    pub stdout: bool,

    /// Directory to write the completion file into
    #[arg(long)]
    pub out_dir: Option<PathBuf>,
}
