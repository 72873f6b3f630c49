// Service Specification Domain Model

use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use std::time::Duration;

use crate::domain::error::{DomainError, Result};

/// Service name (unique key within one supervisor run)
pub type ServiceName = String;

/// How a service's log file is opened at launch
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum LogMode {
    #[default]
    Append,
    Truncate,
}

/// Extra environment variable for a service process
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EnvVar {
    pub name: String,
    pub value: String,
}

/// Readiness check evaluated by the readiness probe port
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum ReadinessCheck {
    /// Ready as soon as the process is spawned and alive
    #[default]
    Immediate,
    /// A TCP connect to host:port succeeds
    Tcp { host: String, port: u16 },
    /// An HTTP GET returns `expect_status` (any 2xx when unset)
    Http {
        url: String,
        #[serde(default)]
        expect_status: Option<u16>,
    },
    /// Pattern appears in the log output written since this launch
    LogLine { pattern: String },
    /// External check command exits with status 0
    Command {
        program: String,
        #[serde(default)]
        args: Vec<String>,
    },
}

impl std::fmt::Display for ReadinessCheck {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ReadinessCheck::Immediate => write!(f, "immediate"),
            ReadinessCheck::Tcp { host, port } => write!(f, "tcp {}:{}", host, port),
            ReadinessCheck::Http { url, .. } => write!(f, "http {}", url),
            ReadinessCheck::LogLine { pattern } => write!(f, "log \"{}\"", pattern),
            ReadinessCheck::Command { program, .. } => write!(f, "command {}", program),
        }
    }
}

/// Delay schedule between readiness probe attempts
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum Backoff {
    Fixed {
        interval_ms: u64,
    },
    Exponential {
        initial_ms: u64,
        factor: f64,
        max_ms: u64,
    },
}

impl Backoff {
    /// Base delay before the given attempt (0-based), without jitter
    ///
    /// Exponential formula: initial * factor^attempt, capped at max
    pub fn base_delay(&self, attempt: u32) -> Duration {
        match self {
            Backoff::Fixed { interval_ms } => Duration::from_millis(*interval_ms),
            Backoff::Exponential {
                initial_ms,
                factor,
                max_ms,
            } => {
                let exponent = attempt.min(i32::MAX as u32) as i32;
                let delay = (*initial_ms as f64) * factor.powi(exponent);
                let capped = delay.min(*max_ms as f64).max(0.0);
                Duration::from_millis(capped as u64)
            }
        }
    }

    fn validate(&self, service: &str) -> Result<()> {
        match self {
            Backoff::Fixed { interval_ms } if *interval_ms == 0 => Err(
                DomainError::ValidationError(format!("{}: backoff interval must be > 0", service)),
            ),
            Backoff::Exponential {
                initial_ms,
                factor,
                max_ms,
            } => {
                if *initial_ms == 0 || *max_ms < *initial_ms {
                    return Err(DomainError::ValidationError(format!(
                        "{}: backoff requires 0 < initial_ms <= max_ms",
                        service
                    )));
                }
                if !factor.is_finite() || *factor < 1.0 {
                    return Err(DomainError::ValidationError(format!(
                        "{}: backoff factor must be >= 1.0",
                        service
                    )));
                }
                Ok(())
            }
            _ => Ok(()),
        }
    }
}

/// Immutable service descriptor
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ServiceSpec {
    pub name: ServiceName,
    pub command: String,
    #[serde(default)]
    pub args: Vec<String>,
    #[serde(default)]
    pub working_dir: Option<PathBuf>,
    #[serde(default)]
    pub env: Vec<EnvVar>,
    pub log_path: PathBuf,
    #[serde(default)]
    pub log_mode: LogMode,
    #[serde(default)]
    pub depends_on: Vec<ServiceName>,
    #[serde(default)]
    pub readiness: ReadinessCheck,
    #[serde(default)]
    pub startup_timeout_ms: Option<u64>,
    #[serde(default)]
    pub backoff: Option<Backoff>,
}

impl ServiceSpec {
    /// Create a spec with defaults: no args, append logging, immediate readiness
    ///
    /// # Example
    /// ```text
    /// let spec = ServiceSpec::new("webhook", "python", "logs/webhook.log")
    ///     .with_args(["whatsapp_webhook.py"])
    ///     .with_dependency("rasa");
    /// ```
    pub fn new(
        name: impl Into<String>,
        command: impl Into<String>,
        log_path: impl Into<PathBuf>,
    ) -> Self {
        Self {
            name: name.into(),
            command: command.into(),
            args: Vec::new(),
            working_dir: None,
            env: Vec::new(),
            log_path: log_path.into(),
            log_mode: LogMode::default(),
            depends_on: Vec::new(),
            readiness: ReadinessCheck::default(),
            startup_timeout_ms: None,
            backoff: None,
        }
    }

    pub fn with_args<I, S>(mut self, args: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.args = args.into_iter().map(Into::into).collect();
        self
    }

    pub fn with_dependency(mut self, name: impl Into<String>) -> Self {
        self.depends_on.push(name.into());
        self
    }

    pub fn with_readiness(mut self, readiness: ReadinessCheck) -> Self {
        self.readiness = readiness;
        self
    }

    pub fn with_startup_timeout(mut self, timeout: Duration) -> Self {
        self.startup_timeout_ms = Some(timeout.as_millis() as u64);
        self
    }

    pub fn with_backoff(mut self, backoff: Backoff) -> Self {
        self.backoff = Some(backoff);
        self
    }

    pub fn with_log_mode(mut self, mode: LogMode) -> Self {
        self.log_mode = mode;
        self
    }

    pub fn with_working_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.working_dir = Some(dir.into());
        self
    }

    pub fn with_env(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.env.push(EnvVar {
            name: name.into(),
            value: value.into(),
        });
        self
    }

    pub fn startup_timeout(&self) -> Option<Duration> {
        self.startup_timeout_ms.map(Duration::from_millis)
    }

    /// Validate fields that do not depend on other specs
    pub fn validate(&self) -> Result<()> {
        if self.name.trim().is_empty() {
            return Err(DomainError::ValidationError(
                "Service name cannot be empty".to_string(),
            ));
        }
        if self.command.trim().is_empty() {
            return Err(DomainError::ValidationError(format!(
                "{}: command cannot be empty",
                self.name
            )));
        }
        if self.startup_timeout_ms == Some(0) {
            return Err(DomainError::ValidationError(format!(
                "{}: startup timeout must be > 0",
                self.name
            )));
        }
        if let Some(backoff) = &self.backoff {
            backoff.validate(&self.name)?;
        }
        Ok(())
    }
}
