//! Configuration file – reads/writes `~/.tetra/config.toml`.

use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::{Deserialize, Serialize};
use tetra_types::TrainingConfig;

/// Persisted settings for `tetra serve` and `tetra train`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Config {
    /// Port of the dashboard / control surface.
    #[serde(default = "default_port")]
    pub port: u16,

    /// Root of `latest/`, `final/`, `best/` and `slots/`.
    #[serde(default = "default_checkpoint_dir")]
    pub checkpoint_dir: PathBuf,

    /// Grace period for a worker to stop before it is abandoned.
    #[serde(default = "default_stop_timeout_secs")]
    pub stop_timeout_secs: f64,

    /// Defaults for sessions started without an explicit config.
    #[serde(default)]
    pub training: TrainingConfig,
}

fn default_port() -> u16 {
    tetra_cockpit::DEFAULT_PORT
}
fn default_checkpoint_dir() -> PathBuf {
    PathBuf::from("./checkpoints")
}
fn default_stop_timeout_secs() -> f64 {
    5.0
}

impl Default for Config {
    fn default() -> Self {
        Self {
            port: default_port(),
            checkpoint_dir: default_checkpoint_dir(),
            stop_timeout_secs: default_stop_timeout_secs(),
            training: TrainingConfig::default(),
        }
    }
}

impl Config {
    pub fn stop_timeout(&self) -> Duration {
        Duration::try_from_secs_f64(self.stop_timeout_secs)
            .unwrap_or(tetra_runtime::DEFAULT_STOP_TIMEOUT)
    }
}

/// `$TETRA_CONFIG`, or `~/.tetra/config.toml`.
pub fn config_path() -> PathBuf {
    if let Ok(path) = std::env::var("TETRA_CONFIG") {
        return PathBuf::from(path);
    }
    config_path_for_home(
        &std::env::var("HOME")
            .or_else(|_| std::env::var("USERPROFILE"))
            .unwrap_or_else(|_| ".".to_string()),
    )
}

pub(crate) fn config_path_for_home(home: &str) -> PathBuf {
    PathBuf::from(home).join(".tetra").join("config.toml")
}

/// Load the config, writing the defaults first when the file is missing.
///
/// Returns the config and whether it was just created.
pub fn load_or_init(path: &Path) -> Result<(Config, bool), String> {
    let (mut cfg, created) = match load_from(path)? {
        Some(cfg) => (cfg, false),
        None => {
            let cfg = Config::default();
            save_to(&cfg, path)?;
            (cfg, true)
        }
    };
    apply_overrides(&mut cfg, |key| std::env::var(key).ok());
    Ok((cfg, created))
}

/// Load the config from `path`.  Returns `None` if the file does not exist.
pub(crate) fn load_from(path: &Path) -> Result<Option<Config>, String> {
    if !path.exists() {
        return Ok(None);
    }
    let raw = fs::read_to_string(path)
        .map_err(|e| format!("Failed to read config at {}: {e}", path.display()))?;
    let cfg: Config =
        toml::from_str(&raw).map_err(|e| format!("Failed to parse config: {e}"))?;
    cfg.training
        .validate()
        .map_err(|e| format!("Invalid [training] section: {e}"))?;
    Ok(Some(cfg))
}

/// Apply `TETRA_*` overrides, looked up through `var`.
///
/// | Variable | Config field |
/// |---|---|
/// | `TETRA_PORT` | `port` |
/// | `TETRA_CHECKPOINT_DIR` | `checkpoint_dir` |
pub fn apply_overrides(cfg: &mut Config, var: impl Fn(&str) -> Option<String>) {
    if let Some(v) = var("TETRA_PORT")
        && let Ok(port) = v.parse::<u16>()
    {
        cfg.port = port;
    }
    if let Some(v) = var("TETRA_CHECKPOINT_DIR") {
        cfg.checkpoint_dir = PathBuf::from(v);
    }
}

pub(crate) fn save_to(cfg: &Config, path: &Path) -> Result<(), String> {
    if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
        fs::create_dir_all(parent)
            .map_err(|e| format!("Failed to create config directory: {e}"))?;
    }
    let raw =
        toml::to_string_pretty(cfg).map_err(|e| format!("Failed to serialize config: {e}"))?;
    fs::write(path, raw)
        .map_err(|e| format!("Failed to write config at {}: {e}", path.display()))
}
