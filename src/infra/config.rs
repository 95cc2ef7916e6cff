use std::path::Path;

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};

use crate::cli::{AppContext, InitArgs};

#[derive(Debug, Serialize, Deserialize)]
pub struct Config {
    /// Apply-engine settings
    pub apply: ApplyConfig,

    /// Transaction journal settings
    pub journal: JournalConfig,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct ApplyConfig {
    /// Minimum distinct replacement lines required for hint disambiguation
    pub hint_min_unique_lines: usize,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct JournalConfig {
    /// Persist transactions for cross-invocation rollback
    pub enabled: bool,
    /// Journal directory, relative to the sandbox root
    pub dir: String,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            apply: ApplyConfig {
                hint_min_unique_lines: 2,
            },
            journal: JournalConfig {
                enabled: true,
                dir: ".redline".to_string(),
            },
        }
    }
}

pub fn load_config() -> Result<Config> {
    let mut builder = config::Config::builder();

    // Load from config files in priority order
    let config_paths = ["redline.toml", ".redline.toml"];

    for path in &config_paths {
        if Path::new(path).exists() {
            builder = builder.add_source(config::File::with_name(path));
            break;
        }
    }

    // Add environment variables with REDLINE_ prefix
    builder = builder.add_source(config::Environment::with_prefix("REDLINE").separator("_"));

    let cfg = builder.build().context("Failed to load configuration")?;
    let parsed: Config = cfg
        .try_deserialize()
        .context("Failed to parse configuration")?;

    Ok(parsed)
}

pub fn init(args: InitArgs, ctx: &AppContext) -> Result<()> {
    let config_path = args.path.join("redline.toml");

    if config_path.exists() && !args.force {
        anyhow::bail!(
            "Config file already exists at {}. Use --force to overwrite.",
            config_path.display()
        );
    }

    let config = Config::default();
    let toml_string =
        toml::to_string_pretty(&config).context("Failed to serialize default config")?;

    std::fs::write(&config_path, toml_string).context("Failed to write config file")?;

    if !ctx.quiet {
        println!("Created config file at {}", config_path.display());
    }
    Ok(())
}
