//! CLI subcommand implementations.

pub mod run;
pub mod try_animation;

use anyhow::Result;

use crate::config::Config;

/// Print the effective configuration as JSON.
pub fn check_config(config: &Config) -> Result<()> {
    println!("{}", serde_json::to_string_pretty(config)?);
    println!("Configuration OK");
    Ok(())
}
