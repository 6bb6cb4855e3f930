//! Configuration view and validation commands (`taskboard config`).

use std::path::Path;

use anyhow::{Context, Result};

use super::super::ConfigCommands;
use taskboard::config::BoardConfig;

pub fn cmd_config(config_path: &Path, command: Option<ConfigCommands>) -> Result<()> {
    match command {
        None | Some(ConfigCommands::Show) => {
            if config_path.exists() {
                println!("# Config file: {}", config_path.display());
            } else {
                println!(
                    "# No board.toml at {}; showing defaults",
                    config_path.display()
                );
            }
            println!("# Effective values (with env overrides)");
            println!();

            let config = BoardConfig::resolve(config_path)?;
            let shown = toml::to_string_pretty(&config.redacted())
                .context("Failed to serialize configuration")?;
            print!("{}", shown);
        }
        Some(ConfigCommands::Validate) => {
            let config = BoardConfig::resolve(config_path)?;
            let warnings = config.validate();

            if warnings.is_empty() {
                println!("Configuration is valid.");
            } else {
                println!("Configuration warnings:");
                for warning in warnings {
                    println!("  - {}", warning);
                }
            }
        }
        Some(ConfigCommands::Init) => {
            if config_path.exists() {
                println!("board.toml already exists at {}", config_path.display());
                println!("Delete it first if you want to recreate it.");
                return Ok(());
            }

            BoardConfig::default().save(config_path)?;

            println!("Created board.toml at {}", config_path.display());
            println!();
            println!("Next:");
            println!("  - set [github] owner and repo (or [storage] backend = \"file\")");
            println!("  - export BOARD_PASSWORD and GITHUB_TOKEN, or put them in .env");
        }
    }

    Ok(())
}
