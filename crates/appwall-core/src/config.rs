use std::fs;
use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use directories::ProjectDirs;
use serde::{Deserialize, Serialize};

use crate::anticensor::PlatformVersion;
use crate::error::AppwallError;

pub const DESYNC_SUPPORTED_VERSION: PlatformVersion = PlatformVersion::new(4, 12, 0);

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    pub controller: ControllerConfig,
    pub anti_censorship: AntiCensorshipConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ControllerConfig {
    /// Package of the controller itself; firewall actions on it are refused.
    pub self_package: String,
    /// Always-on VPN with lockdown. Exclusion cannot be toggled while set.
    pub vpn_lockdown: bool,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AntiCensorshipConfig {
    pub desync_min_version: String,
    /// Overrides kernel release detection when set.
    pub platform_version: Option<String>,
}

#[derive(Debug, Clone)]
pub struct ConfigPaths {
    pub config_path: PathBuf,
    pub data_dir: PathBuf,
    pub state_path: PathBuf,
    pub session_path: PathBuf,
}

impl Config {
    pub fn default_config() -> Self {
        Self {
            controller: ControllerConfig {
                self_package: "io.appwall".to_string(),
                vpn_lockdown: false,
            },
            anti_censorship: AntiCensorshipConfig {
                desync_min_version: DESYNC_SUPPORTED_VERSION.to_string(),
                platform_version: None,
            },
        }
    }

    pub fn from_toml_str(contents: &str) -> Result<Self> {
        let config: Config = toml::from_str(contents).context("parse config TOML")?;
        config.validate()?;
        Ok(config)
    }

    pub fn to_toml_string(&self) -> Result<String> {
        let output = toml::to_string_pretty(self).context("render config TOML")?;
        Ok(output)
    }

    pub fn load(path: &Path) -> Result<Self> {
        let contents = fs::read_to_string(path)
            .with_context(|| format!("read config at {}", path.display()))?;
        Self::from_toml_str(&contents)
    }

    /// Loads the config at `path`, or the defaults when no file exists yet.
    pub fn load_or_default(path: &Path) -> Result<Self> {
        if !path.exists() {
            return Ok(Self::default_config());
        }
        Self::load(path)
    }

    pub fn save(&self, path: &Path) -> Result<()> {
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent)
                .with_context(|| format!("create config dir {}", parent.display()))?;
        }
        let contents = self.to_toml_string()?;
        fs::write(path, contents).with_context(|| format!("write config at {}", path.display()))?;
        Ok(())
    }

    pub fn validate(&self) -> Result<(), AppwallError> {
        self.desync_min_version()?;
        self.platform_override()?;
        Ok(())
    }

    pub fn desync_min_version(&self) -> Result<PlatformVersion, AppwallError> {
        let raw = &self.anti_censorship.desync_min_version;
        PlatformVersion::parse(raw)
            .ok_or_else(|| AppwallError::InvalidConfig(format!("desync_min_version: {raw}")))
    }

    pub fn platform_override(&self) -> Result<Option<PlatformVersion>, AppwallError> {
        match &self.anti_censorship.platform_version {
            Some(raw) => PlatformVersion::parse(raw)
                .map(Some)
                .ok_or_else(|| AppwallError::InvalidConfig(format!("platform_version: {raw}"))),
            None => Ok(None),
        }
    }

    /// Platform version to gate capabilities on: the configured override,
    /// otherwise the detected kernel release.
    pub fn platform_version(&self) -> Result<Option<PlatformVersion>, AppwallError> {
        match self.platform_override()? {
            Some(version) => Ok(Some(version)),
            None => Ok(PlatformVersion::detect()),
        }
    }
}

impl ConfigPaths {
    pub fn resolve() -> Result<Self> {
        let project_dirs = ProjectDirs::from("io", "appwall", "appwall")
            .ok_or_else(|| anyhow::anyhow!("unable to determine project directories"))?;
        let config_dir = project_dirs.config_dir();
        let data_dir = project_dirs.data_dir();
        Ok(Self::under(config_dir, data_dir))
    }

    pub fn under(config_dir: &Path, data_dir: &Path) -> Self {
        Self {
            config_path: config_dir.join("config.toml"),
            data_dir: data_dir.to_path_buf(),
            state_path: data_dir.join("state.json"),
            session_path: data_dir.join("session.json"),
        }
    }
}
