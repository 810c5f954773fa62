use std::net::SocketAddr;
use std::path::{Path, PathBuf};
use std::time::Duration;

use anyhow::{Result, bail, ensure};
use config::{Config, ConfigError, Environment, File};
use serde::Deserialize;

use crate::cli::{Cli, LogFormat};

/// Name of the command socket inside the cache directory. Never 40
/// characters, so the scanner ignores it by construction.
pub const SOCKET_FILE_NAME: &str = "cachewarden.sock";

fn default_max_cache_size() -> u64 {
    50 * 1024 * 1024
}

fn default_eviction_command_interval() -> u32 {
    50
}

fn default_maintenance_interval() -> u64 {
    300
}

fn default_log_format() -> LogFormat {
    LogFormat::Json
}

#[derive(Debug, Clone, Deserialize)]
pub struct Settings {
    /// Directory of cache entries this daemon owns eviction for.
    pub cache_dir: PathBuf,
    /// Size budget in bytes; eviction runs only while the total exceeds it.
    #[serde(default = "default_max_cache_size")]
    pub max_cache_size: u64,
    /// A maintenance pass fires after this many dispatched commands.
    #[serde(default = "default_eviction_command_interval")]
    pub eviction_command_interval: u32,
    /// Idle fallback: seconds between timer-driven maintenance checks.
    #[serde(default = "default_maintenance_interval")]
    pub maintenance_interval: u64,
    #[serde(default = "default_log_format")]
    pub log: LogFormat,
    #[serde(default)]
    pub metrics_listen: Option<SocketAddr>,
}

impl Settings {
    pub fn load(cli: &Cli) -> Result<Self> {
        let mut builder = Config::builder();
        let config_path = resolve_config_path(cli)?;

        builder = builder.add_source(File::from(config_path.clone()).required(true));

        builder = builder.add_source(
            Environment::with_prefix("CACHEWARDEN")
                .separator("__")
                .try_parsing(true),
        );

        let cfg = builder.build().map_err(to_anyhow)?;
        let mut settings: Settings = cfg.try_deserialize().map_err(to_anyhow)?;
        settings.apply_base_dir(&config_path);
        settings.validate()?;
        Ok(settings)
    }

    pub fn socket_path(&self) -> PathBuf {
        self.cache_dir.join(SOCKET_FILE_NAME)
    }

    pub fn maintenance_interval(&self) -> Duration {
        Duration::from_secs(self.maintenance_interval)
    }

    fn apply_base_dir(&mut self, config_path: &Path) {
        let base_dir = config_path
            .parent()
            .filter(|dir| !dir.as_os_str().is_empty())
            .unwrap_or_else(|| Path::new("."));

        self.cache_dir = absolutize(&self.cache_dir, base_dir);
    }

    pub fn validate(&self) -> Result<()> {
        ensure!(
            !self.cache_dir.as_os_str().is_empty(),
            "cache_dir must not be empty"
        );
        ensure!(
            self.max_cache_size > 0,
            "max_cache_size must be greater than 0 (got {})",
            self.max_cache_size
        );
        ensure!(
            self.eviction_command_interval > 0,
            "eviction_command_interval must be at least 1 (got {})",
            self.eviction_command_interval
        );
        ensure!(
            self.maintenance_interval > 0,
            "maintenance_interval must be at least 1 second (got {})",
            self.maintenance_interval
        );
        Ok(())
    }
}

fn to_anyhow(err: ConfigError) -> anyhow::Error {
    anyhow::anyhow!(err)
}

fn resolve_config_path(cli: &Cli) -> Result<PathBuf> {
    if let Some(path) = cli.config.as_deref() {
        return Ok(path.to_path_buf());
    }

    for candidate in default_config_candidates() {
        if candidate.exists() {
            return Ok(candidate);
        }
    }

    bail!(
        "no configuration file provided via --config and none found in default locations: {}",
        default_config_candidates()
            .iter()
            .map(|p| p.display().to_string())
            .collect::<Vec<_>>()
            .join(", ")
    );
}

fn default_config_candidates() -> [PathBuf; 2] {
    [
        PathBuf::from("/etc/cachewarden/cachewarden.toml"),
        PathBuf::from("cachewarden.toml"),
    ]
}

fn absolutize(path: &Path, base_dir: &Path) -> PathBuf {
    if path.is_absolute() {
        path.to_path_buf()
    } else {
        base_dir.join(path)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn settings_with_dir(dir: &str) -> Settings {
        Settings {
            cache_dir: PathBuf::from(dir),
            max_cache_size: default_max_cache_size(),
            eviction_command_interval: default_eviction_command_interval(),
            maintenance_interval: default_maintenance_interval(),
            log: LogFormat::Text,
            metrics_listen: None,
        }
    }

    #[test]
    fn validate_rejects_zero_budget() {
        let mut settings = settings_with_dir("/var/cache/http");
        settings.max_cache_size = 0;
        assert!(settings.validate().is_err());
    }

    #[test]
    fn validate_rejects_zero_command_interval() {
        let mut settings = settings_with_dir("/var/cache/http");
        settings.eviction_command_interval = 0;
        assert!(settings.validate().is_err());
    }

    #[test]
    fn relative_cache_dir_resolves_against_config_file() {
        let mut settings = settings_with_dir("cache");
        settings.apply_base_dir(Path::new("/etc/cachewarden/cachewarden.toml"));
        assert_eq!(settings.cache_dir, PathBuf::from("/etc/cachewarden/cache"));
    }

    #[test]
    fn socket_path_lives_inside_cache_dir() {
        let settings = settings_with_dir("/var/cache/http");
        assert_eq!(
            settings.socket_path(),
            PathBuf::from("/var/cache/http").join(SOCKET_FILE_NAME)
        );
    }
}
