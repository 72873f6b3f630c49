//! Configuration loading
//!
//! A config file (TOML by default) holds an optional `[supervisor]` table,
//! an optional `log_dir` and a `[[services]]` array. `CONDUCTOR__*`
//! environment variables override scalar settings, e.g.
//! `CONDUCTOR__SUPERVISOR__GRACE_PERIOD_MS=10000`.

use anyhow::{Context, Result};
use serde::Deserialize;
use std::path::{Path, PathBuf};

use conductor_core::application::SupervisorSettings;
use conductor_core::domain::ServiceSpec;

pub const DEFAULT_CONFIG_PATH: &str = "conductor.toml";
const DEFAULT_LOG_DIR: &str = "logs";
const ENV_PREFIX: &str = "CONDUCTOR";

fn default_log_dir() -> PathBuf {
    PathBuf::from(DEFAULT_LOG_DIR)
}

#[derive(Debug, Clone, Deserialize)]
pub struct ConductorConfig {
    #[serde(default)]
    pub supervisor: SupervisorSettings,
    /// Base directory for relative service log paths
    #[serde(default = "default_log_dir")]
    pub log_dir: PathBuf,
    #[serde(default)]
    pub services: Vec<ServiceSpec>,
}

impl ConductorConfig {
    /// Load a config file plus environment overrides, with paths resolved
    pub fn load(path: &Path) -> Result<Self> {
        let expanded = expand(path);
        let source = config::File::from(expanded.as_path());
        Self::build(source).with_context(|| format!("Failed to load config {}", expanded.display()))
    }

    /// Parse TOML text (environment overrides still apply)
    pub fn from_toml(text: &str) -> Result<Self> {
        Self::build(config::File::from_str(text, config::FileFormat::Toml))
    }

    fn build<S>(source: S) -> Result<Self>
    where
        S: config::Source + Send + Sync + 'static,
    {
        let raw = config::Config::builder()
            .add_source(source)
            .add_source(
                config::Environment::with_prefix(ENV_PREFIX)
                    .separator("__")
                    .try_parsing(true),
            )
            .build()
            .context("Invalid configuration")?;

        let config: ConductorConfig = raw
            .try_deserialize()
            .context("Configuration does not match the expected schema")?;
        Ok(config.resolve_paths())
    }

    /// Expand `~` everywhere and anchor relative log paths at `log_dir`
    fn resolve_paths(mut self) -> Self {
        self.log_dir = expand(&self.log_dir);
        for service in &mut self.services {
            let log_path = expand(&service.log_path);
            service.log_path = if log_path.is_relative() {
                self.log_dir.join(log_path)
            } else {
                log_path
            };
            service.working_dir = service.working_dir.as_deref().map(expand);
            service.command = shellexpand::tilde(&service.command).into_owned();
        }
        self
    }
}

fn expand(path: &Path) -> PathBuf {
    PathBuf::from(shellexpand::tilde(&path.to_string_lossy()).into_owned())
}
