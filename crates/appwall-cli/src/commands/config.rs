use std::path::PathBuf;

use anyhow::{Context, Result};

use appwall_core::config::{Config, ConfigPaths};

pub fn print_effective(config_path: Option<PathBuf>) -> Result<()> {
    let paths = ConfigPaths::resolve()?;
    let config_path = config_path.unwrap_or(paths.config_path);
    let config = Config::load_or_default(&config_path)
        .with_context(|| format!("load config {}", config_path.display()))?;
    if !config_path.exists() {
        println!("# no config at {}, showing defaults", config_path.display());
    }
    let output = config.to_toml_string()?;
    println!("{}", output);
    Ok(())
}
