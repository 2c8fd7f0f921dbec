//! ProgramSpec entity
//! Desired configuration of one supervised program

use crate::constants::program::*;
use crate::domain::DomainError;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::time::Duration;

fn default_max_retries() -> u32 {
    DEFAULT_MAX_RETRIES
}

fn default_start_secs() -> f64 {
    DEFAULT_START_SECS
}

fn default_backoff_secs() -> f64 {
    DEFAULT_BACKOFF_SECS
}

fn default_stop_timeout_secs() -> f64 {
    DEFAULT_STOP_TIMEOUT_SECS
}

/// User-authored program definition
///
/// Two specs compare equal field-for-field; a reload only restarts a program
/// whose spec is no longer equal to the stored one.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ProgramSpec {
    pub name: String,
    pub command: String,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub args: Vec<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub working_dir: Option<String>,
    #[serde(default)]
    pub auto_start: bool,
    #[serde(default = "default_max_retries")]
    pub max_retries: u32,
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub env: BTreeMap<String, String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub environment_file: Option<String>,
    /// File path, "inherit", or "null"
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub stdout: Option<String>,
    /// File path, "inherit", or "null"
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub stderr: Option<String>,
    #[serde(default = "default_start_secs")]
    pub start_secs: f64,
    #[serde(default = "default_backoff_secs")]
    pub backoff_secs: f64,
    #[serde(default = "default_stop_timeout_secs")]
    pub stop_timeout_secs: f64,
}

impl ProgramSpec {
    /// Create a builder with defaults for everything but name and command
    pub fn builder(name: impl Into<String>, command: impl Into<String>) -> ProgramSpecBuilder {
        ProgramSpecBuilder::new(name, command)
    }

    /// Check the spec before it is allowed anywhere near the program table
    pub fn validate(&self) -> Result<(), DomainError> {
        if self.name.is_empty() {
            return Err(DomainError::InvalidName(
                "Program name cannot be empty".to_string(),
            ));
        }
        if self.name.contains(char::is_whitespace) || self.name.contains('/') {
            return Err(DomainError::InvalidName(format!(
                "Program name '{}' cannot contain whitespace or '/'",
                self.name
            )));
        }
        if self.command.trim().is_empty() {
            return Err(DomainError::InvalidCommand(format!(
                "Program '{}' has an empty command",
                self.name
            )));
        }
        for (field, value) in [
            ("start_secs", self.start_secs),
            ("backoff_secs", self.backoff_secs),
            ("stop_timeout_secs", self.stop_timeout_secs),
        ] {
            if !value.is_finite() || value < 0.0 {
                return Err(DomainError::InvalidConfiguration(format!(
                    "Program '{}': {field} must be a non-negative number, got {value}",
                    self.name
                )));
            }
        }
        Ok(())
    }

    pub fn start_grace(&self) -> Duration {
        Duration::from_secs_f64(self.start_secs)
    }

    pub fn backoff(&self) -> Duration {
        Duration::from_secs_f64(self.backoff_secs)
    }

    pub fn stop_timeout(&self) -> Duration {
        Duration::from_secs_f64(self.stop_timeout_secs)
    }
}

/// Fluent construction of a [`ProgramSpec`]
pub struct ProgramSpecBuilder {
    spec: ProgramSpec,
}

impl ProgramSpecBuilder {
    fn new(name: impl Into<String>, command: impl Into<String>) -> Self {
        Self {
            spec: ProgramSpec {
                name: name.into(),
                command: command.into(),
                args: Vec::new(),
                working_dir: None,
                auto_start: false,
                max_retries: DEFAULT_MAX_RETRIES,
                env: BTreeMap::new(),
                environment_file: None,
                stdout: None,
                stderr: None,
                start_secs: DEFAULT_START_SECS,
                backoff_secs: DEFAULT_BACKOFF_SECS,
                stop_timeout_secs: DEFAULT_STOP_TIMEOUT_SECS,
            },
        }
    }

    pub fn args<I, S>(mut self, args: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.spec.args = args.into_iter().map(Into::into).collect();
        self
    }

    pub fn working_dir(mut self, dir: impl Into<String>) -> Self {
        self.spec.working_dir = Some(dir.into());
        self
    }

    pub fn auto_start(mut self, auto_start: bool) -> Self {
        self.spec.auto_start = auto_start;
        self
    }

    pub fn max_retries(mut self, max_retries: u32) -> Self {
        self.spec.max_retries = max_retries;
        self
    }

    pub fn env(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.spec.env.insert(key.into(), value.into());
        self
    }

    pub fn environment_file(mut self, path: impl Into<String>) -> Self {
        self.spec.environment_file = Some(path.into());
        self
    }

    pub fn stdout(mut self, target: impl Into<String>) -> Self {
        self.spec.stdout = Some(target.into());
        self
    }

    pub fn stderr(mut self, target: impl Into<String>) -> Self {
        self.spec.stderr = Some(target.into());
        self
    }

    pub fn start_secs(mut self, secs: f64) -> Self {
        self.spec.start_secs = secs;
        self
    }

    pub fn backoff_secs(mut self, secs: f64) -> Self {
        self.spec.backoff_secs = secs;
        self
    }

    pub fn stop_timeout_secs(mut self, secs: f64) -> Self {
        self.spec.stop_timeout_secs = secs;
        self
    }

    /// Validate and return the spec
    pub fn build(self) -> Result<ProgramSpec, DomainError> {
        self.spec.validate()?;
        Ok(self.spec)
    }
}
