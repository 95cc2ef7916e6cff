use anyhow::Result;
use clap::Parser;
use redline::cli::{AppContext, Cli, Commands};
use tracing_subscriber::EnvFilter;

fn main() -> Result<()> {
    // Logs go to stderr so stdout stays clean for previews and JSON.
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_env("REDLINE_LOG").unwrap_or_else(|_| EnvFilter::new("warn")),
        )
        .with_writer(std::io::stderr)
        .init();

    let cli = Cli::parse();

    // Build a context once, pass everywhere
    let ctx = AppContext {
        quiet: cli.quiet,
        no_color: cli.no_color,
        dry_run: cli.dry_run,
    };

    match cli.command {
        Commands::Apply(args) => redline::core::apply::apply_run(args, &ctx),
        Commands::Preview(args) => redline::core::preview::preview_run(args, &ctx),
        Commands::Parse(args) => redline::core::directive::parse_run(args, &ctx),
        Commands::Rollback(args) => redline::core::rollback::rollback_run(args, &ctx),
        Commands::Status(args) => redline::core::journal::status_run(args, &ctx),
        Commands::Init(args) => redline::infra::config::init(args, &ctx),
        Commands::Completions(args) => redline::completion::run(args),
    }
}
