//! Load config from file and environment.

use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use vent_core::SyncConfig;

/// Host configuration. File: ~/.config/ventserver/config.toml or /etc/ventserver/config.toml.
/// Env overrides: VENT_LOG_LEVEL, VENT_STATE_DIR.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct Config {
    /// Log level used when no `-v` is given (default "info").
    #[serde(default = "default_log_level")]
    pub log_level: String,
    /// Directory holding persisted state files.
    #[serde(default = "default_state_dir")]
    pub state_dir: PathBuf,
    #[serde(default)]
    pub sync: SyncConfig,
}

fn default_log_level() -> String {
    "info".to_string()
}
fn default_state_dir() -> PathBuf {
    PathBuf::from("/var/lib/ventserver")
}

impl Default for Config {
    fn default() -> Self {
        Self {
            log_level: default_log_level(),
            state_dir: default_state_dir(),
            sync: SyncConfig::default(),
        }
    }
}

impl Config {
    /// Parse one config file and check its sync settings.
    pub fn from_file(path: &Path) -> Result<Self> {
        let text = std::fs::read_to_string(path)
            .with_context(|| format!("reading {}", path.display()))?;
        let config: Config =
            toml::from_str(&text).with_context(|| format!("parsing {}", path.display()))?;
        config
            .sync
            .validate()
            .with_context(|| format!("invalid [sync] in {}", path.display()))?;
        Ok(config)
    }

    /// Apply overrides looked up by variable name.
    pub fn apply_env(&mut self, var: impl Fn(&str) -> Option<String>) {
        if let Some(level) = var("VENT_LOG_LEVEL") {
            self.log_level = level;
        }
        if let Some(dir) = var("VENT_STATE_DIR") {
            self.state_dir = PathBuf::from(dir);
        }
    }

    pub fn log_filter(&self) -> log::LevelFilter {
        self.log_level.parse().unwrap_or(log::LevelFilter::Info)
    }
}

/// Load config: an explicit file if given, else the first existing default
/// path, else defaults; then env vars.
pub fn load(explicit: Option<&Path>) -> Result<Config> {
    let mut config = match explicit {
        Some(path) => Config::from_file(path)?,
        None => match config_paths().into_iter().find(|p| p.exists()) {
            Some(path) => Config::from_file(&path)?,
            None => Config::default(),
        },
    };
    config.apply_env(|name| std::env::var(name).ok());
    Ok(config)
}

fn config_paths() -> Vec<PathBuf> {
    let home = std::env::var_os("HOME").map(PathBuf::from);
    let mut out = Vec::new();
    if let Some(h) = home {
        out.push(h.join(".config/ventserver/config.toml"));
    }
    out.push(PathBuf::from("/etc/ventserver/config.toml"));
    out
}
