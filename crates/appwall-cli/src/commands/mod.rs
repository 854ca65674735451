use std::path::PathBuf;

use anyhow::{Context, Result};

use appwall_core::config::{Config, ConfigPaths};
use appwall_core::store::JsonPolicyStore;
use policy_engine::FirewallController;

pub mod anticensor;
pub mod apps;
pub mod bulk;
pub mod config;
pub mod status;

/// Resolved paths, effective config and a controller over the state file.
pub struct Session {
    pub paths: ConfigPaths,
    pub config_path: PathBuf,
    pub config: Config,
    pub controller: FirewallController<JsonPolicyStore>,
}

pub fn open(config_path: Option<PathBuf>) -> Result<Session> {
    let paths = ConfigPaths::resolve()?;
    let config_path = config_path.unwrap_or_else(|| paths.config_path.clone());
    let config = Config::load_or_default(&config_path)
        .with_context(|| format!("load config {}", config_path.display()))?;
    let store = JsonPolicyStore::open(&paths.state_path)?;
    let controller = FirewallController::from_config(&config, store)?;
    Ok(Session {
        paths,
        config_path,
        config,
        controller,
    })
}
