//! Configuration for image rendering and harness execution.
//!
//! Two layers of configuration exist:
//! - [`Config`] is supplied per evaluation and changes what gets rendered
//!   into Dockerfiles and scripts (clone vs. staged source, injected setup
//!   commands, environment blocks).
//! - [`HarnessConfig`] controls how the harness drives the container engine
//!   (workspace location, timeouts, rebuild policy, command overrides).

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Default image namespace for rendered layers.
pub const DEFAULT_IMAGE_PREFIX: &str = "swe-harness";

/// Errors that can occur during configuration operations.
#[derive(Debug, Error)]
pub enum ConfigError {
    /// An environment variable has an invalid value.
    #[error("Invalid value for {key}: {message}")]
    InvalidValue { key: String, message: String },

    /// Configuration validation failed.
    #[error("Configuration validation failed: {0}")]
    ValidationFailed(String),

    /// The configuration file could not be parsed.
    #[error("Failed to parse config file {path}: {source}")]
    Parse {
        path: String,
        #[source]
        source: serde_yaml::Error,
    },

    /// IO error while reading configuration.
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

/// Per-evaluation rendering options.
///
/// `need_clone` has no default: whether the base layer clones from GitHub or
/// copies a staged source tree must always be chosen by the caller.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Config {
    /// Clone `https://github.com/<org>/<repo>.git` in the base layer instead of
    /// copying a staged source tree.
    pub need_clone: bool,
    /// Shell commands injected into `prepare.sh` before the pre-test pass.
    #[serde(default)]
    pub setup_commands: Vec<String>,
    /// Environment set at the top of every layer.
    #[serde(default)]
    pub global_env: BTreeMap<String, String>,
    /// Reset every `global_env` key at the bottom of every layer.
    #[serde(default)]
    pub clear_env: bool,
    /// Namespace of rendered image names.
    #[serde(default = "default_image_prefix")]
    pub image_prefix: String,
}

fn default_image_prefix() -> String {
    DEFAULT_IMAGE_PREFIX.to_string()
}

impl Config {
    /// Creates a configuration with the given source mode and no extras.
    pub fn new(need_clone: bool) -> Self {
        Self {
            need_clone,
            setup_commands: Vec::new(),
            global_env: BTreeMap::new(),
            clear_env: false,
            image_prefix: default_image_prefix(),
        }
    }

    /// Loads a configuration from a YAML file.
    pub fn from_yaml_file(path: &Path) -> Result<Self, ConfigError> {
        let content = std::fs::read_to_string(path)?;
        let config: Config = serde_yaml::from_str(&content).map_err(|source| ConfigError::Parse {
            path: path.display().to_string(),
            source,
        })?;
        config.validate()?;
        Ok(config)
    }

    pub fn with_setup_commands(mut self, commands: Vec<String>) -> Self {
        self.setup_commands = commands;
        self
    }

    pub fn with_global_env(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.global_env.insert(key.into(), value.into());
        self
    }

    pub fn with_clear_env(mut self, clear_env: bool) -> Self {
        self.clear_env = clear_env;
        self
    }

    /// Validates values that end up inside Dockerfiles.
    pub fn validate(&self) -> Result<(), ConfigError> {
        for key in self.global_env.keys() {
            let valid = !key.is_empty()
                && !key.starts_with(|c: char| c.is_ascii_digit())
                && key.chars().all(|c| c.is_ascii_alphanumeric() || c == '_');
            if !valid {
                return Err(ConfigError::ValidationFailed(format!(
                    "global_env key '{key}' is not a valid environment variable name"
                )));
            }
        }
        if self.image_prefix.is_empty()
            || !self
                .image_prefix
                .chars()
                .all(|c| c.is_ascii_lowercase() || c.is_ascii_digit() || matches!(c, '-' | '_' | '.' | '/'))
        {
            return Err(ConfigError::ValidationFailed(format!(
                "image_prefix '{}' must be a lowercase docker repository path",
                self.image_prefix
            )));
        }
        if self.setup_commands.iter().any(|c| c.contains('\0')) {
            return Err(ConfigError::ValidationFailed(
                "setup_commands must not contain NUL bytes".to_string(),
            ));
        }
        Ok(())
    }
}

/// Options controlling how the harness drives the container engine.
#[derive(Debug, Clone)]
pub struct HarnessConfig {
    /// Root directory for build contexts, logs and reports.
    pub workspace_dir: PathBuf,
    /// Root of staged sources (`<repo_dir>/<org>/<repo>`), used when
    /// `Config::need_clone` is false.
    pub repo_dir: PathBuf,
    /// Deadline for each image build.
    pub build_timeout: Duration,
    /// Deadline for each phase run.
    pub run_timeout: Duration,
    /// Rebuild images even if a tag with the same name already exists.
    pub force_build: bool,
    /// Leave phase containers behind for debugging.
    pub keep_containers: bool,
    /// Replaces `bash /home/run.sh`.
    pub run_cmd: Option<String>,
    /// Replaces `bash /home/test-run.sh`.
    pub test_patch_run_cmd: Option<String>,
    /// Replaces `bash /home/fix-run.sh`.
    pub fix_patch_run_cmd: Option<String>,
}

impl Default for HarnessConfig {
    fn default() -> Self {
        Self {
            workspace_dir: PathBuf::from("./harness-workspace"),
            repo_dir: PathBuf::from("./repos"),
            build_timeout: Duration::from_secs(3600),
            run_timeout: Duration::from_secs(1800),
            force_build: false,
            keep_containers: false,
            run_cmd: None,
            test_patch_run_cmd: None,
            fix_patch_run_cmd: None,
        }
    }
}

impl HarnessConfig {
    /// Creates configuration from environment variables on top of defaults.
    ///
    /// # Environment Variables
    ///
    /// - `HARNESS_WORKSPACE_DIR`: workspace root (default: ./harness-workspace)
    /// - `HARNESS_REPO_DIR`: staged source root (default: ./repos)
    /// - `HARNESS_BUILD_TIMEOUT_SECS`: image build deadline (default: 3600)
    /// - `HARNESS_RUN_TIMEOUT_SECS`: phase run deadline (default: 1800)
    /// - `HARNESS_FORCE_BUILD`: rebuild existing images (default: false)
    /// - `HARNESS_KEEP_CONTAINERS`: keep phase containers (default: false)
    pub fn from_env() -> Result<Self, ConfigError> {
        let mut config = Self::default();

        if let Ok(val) = std::env::var("HARNESS_WORKSPACE_DIR") {
            config.workspace_dir = PathBuf::from(val);
        }
        if let Ok(val) = std::env::var("HARNESS_REPO_DIR") {
            config.repo_dir = PathBuf::from(val);
        }
        if let Ok(val) = std::env::var("HARNESS_BUILD_TIMEOUT_SECS") {
            let secs: u64 = parse_env_value(&val, "HARNESS_BUILD_TIMEOUT_SECS")?;
            config.build_timeout = Duration::from_secs(secs);
        }
        if let Ok(val) = std::env::var("HARNESS_RUN_TIMEOUT_SECS") {
            let secs: u64 = parse_env_value(&val, "HARNESS_RUN_TIMEOUT_SECS")?;
            config.run_timeout = Duration::from_secs(secs);
        }
        if let Ok(val) = std::env::var("HARNESS_FORCE_BUILD") {
            config.force_build = parse_env_bool(&val, "HARNESS_FORCE_BUILD")?;
        }
        if let Ok(val) = std::env::var("HARNESS_KEEP_CONTAINERS") {
            config.keep_containers = parse_env_bool(&val, "HARNESS_KEEP_CONTAINERS")?;
        }

        config.validate()?;
        Ok(config)
    }

    /// Validates the configuration values.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.build_timeout.as_secs() == 0 {
            return Err(ConfigError::ValidationFailed(
                "build_timeout must be greater than 0".to_string(),
            ));
        }
        if self.run_timeout.as_secs() == 0 {
            return Err(ConfigError::ValidationFailed(
                "run_timeout must be greater than 0".to_string(),
            ));
        }
        if self.workspace_dir.as_os_str().is_empty() {
            return Err(ConfigError::ValidationFailed(
                "workspace_dir cannot be empty".to_string(),
            ));
        }
        Ok(())
    }
}

fn parse_env_value<T: std::str::FromStr>(value: &str, key: &str) -> Result<T, ConfigError>
where
    T::Err: std::fmt::Display,
{
    value.trim().parse().map_err(|e: T::Err| ConfigError::InvalidValue {
        key: key.to_string(),
        message: e.to_string(),
    })
}

fn parse_env_bool(value: &str, key: &str) -> Result<bool, ConfigError> {
    match value.trim().to_lowercase().as_str() {
        "1" | "true" | "yes" | "on" => Ok(true),
        "0" | "false" | "no" | "off" => Ok(false),
        other => Err(ConfigError::InvalidValue {
            key: key.to_string(),
            message: format!("expected a boolean, got '{other}'"),
        }),
    }
}
