//! `reviewforge config`: show and validate configuration.

use anyhow::{Context, Result};
use reviewforge::config::ReviewforgeConfig;

use super::super::ConfigCommands;

pub fn cmd_config(config: &ReviewforgeConfig, command: Option<ConfigCommands>) -> Result<()> {
    match command {
        None | Some(ConfigCommands::Show) => {
            println!();
            println!("Reviewforge Configuration");
            println!("=========================");
            println!();
            println!("Project dir: {}", config.project_dir.display());
            println!("Database:    {}", config.db_path().display());
            println!("Rules file:  {}", config.default_rules_file().display());
            println!("Workspace:   {}", config.workspace().root.display());
            println!();

            let rendered =
                toml::to_string_pretty(&config.toml).context("Failed to render configuration")?;
            println!("{}", rendered);
        }
        Some(ConfigCommands::Validate) => {
            let problems = config.toml.validate();
            if problems.is_empty() {
                println!("Configuration is valid.");
            } else {
                println!("Configuration problems:");
                for problem in &problems {
                    println!("  - {}", problem);
                }
                anyhow::bail!("{} configuration problem(s)", problems.len());
            }
        }
    }
    Ok(())
}
