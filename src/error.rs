//! Error types for swe-harness operations.
//!
//! Defines error types for each subsystem of the harness:
//! - Dataset loading and pull request validation
//! - Image chain rendering and build-context materialization
//! - Instance registry lookups
//! - Docker image builds and container runs
//! - Whole-evaluation aborts

use thiserror::Error;

/// Errors that can occur while loading pull request records.
#[derive(Debug, Error)]
pub enum DatasetError {
    #[error("Failed to parse record at {path}:{line}: {source}")]
    Parse {
        path: String,
        line: usize,
        #[source]
        source: serde_json::Error,
    },

    #[error("Invalid pull request record '{id}': {reason}")]
    InvalidRecord { id: String, reason: String },

    #[error("Dataset path is neither a .jsonl file nor a directory: {0}")]
    UnsupportedPath(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

/// Errors that can occur while rendering or materializing an image layer.
#[derive(Debug, Error)]
pub enum ImageError {
    #[error("Invalid file name '{name}' in image '{image}': {reason}")]
    InvalidFileName {
        image: String,
        name: String,
        reason: String,
    },

    #[error("File '{name}' is staged more than once in image '{image}'")]
    DuplicateFile { image: String, name: String },

    #[error("Dockerfile of image '{image}' copies '{name}' but no such file is staged")]
    MissingFile { image: String, name: String },

    #[error("Dependency chain of '{image}' exceeds {max} layers")]
    ChainTooDeep { image: String, max: usize },

    #[error("Staged source for {repo} not found at {path}")]
    MissingSource { repo: String, path: String },

    #[error("fix-run.sh of image '{image}' applies {found}; expected {expected}")]
    PatchOrder {
        image: String,
        found: String,
        expected: String,
    },

    #[error("Invalid pull request: {0}")]
    InvalidPullRequest(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

/// Errors that can occur during instance registry operations.
#[derive(Debug, Error)]
pub enum RegistryError {
    #[error("No instance registered for {org}/{repo}")]
    NotRegistered { org: String, repo: String },

    #[error("Instance for {org}/{repo} is already registered")]
    DuplicateInstance { org: String, repo: String },
}

/// Errors that can occur during Docker operations.
#[derive(Debug, Error)]
pub enum DockerError {
    #[error("Docker build failed: {0}")]
    BuildFailed(String),

    #[error("Docker run failed: {0}")]
    RunFailed(String),

    #[error("Container execution timed out after {seconds} seconds")]
    Timeout { seconds: u64 },

    #[error("Docker daemon not available: {0}")]
    DaemonUnavailable(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

/// Fatal errors that abort a whole evaluation before or while its
/// environment is constructed. Phase-level failures are not errors; they are
/// reported as undetermined phase outcomes.
#[derive(Debug, Error)]
pub enum HarnessError {
    #[error("Invalid configuration: {0}")]
    Config(#[from] crate::config::ConfigError),

    #[error("Instance lookup failed: {0}")]
    Registry(#[from] RegistryError),

    #[error("Environment could not be constructed: {0}")]
    Materialize(#[from] ImageError),

    #[error("Building image '{image}' failed: {source}")]
    Build {
        image: String,
        #[source]
        source: DockerError,
    },

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

impl HarnessError {
    /// Short name of the stage that aborted the evaluation.
    pub fn stage(&self) -> &'static str {
        match self {
            Self::Config(_) => "config",
            Self::Registry(_) => "registry",
            Self::Materialize(_) => "materialize",
            Self::Build { .. } => "build",
            Self::Io(_) => "io",
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_harness_error_stage() {
        let err = HarnessError::from(RegistryError::NotRegistered {
            org: "octo".to_string(),
            repo: "cat".to_string(),
        });
        assert_eq!(err.stage(), "registry");
        assert!(err.to_string().contains("octo/cat"));

        let err = HarnessError::Build {
            image: "swe-harness/octo_m_cat:base".to_string(),
            source: DockerError::Timeout { seconds: 30 },
        };
        assert_eq!(err.stage(), "build");
        assert!(err.to_string().contains("30 seconds"));
    }

    #[test]
    fn test_image_error_messages() {
        let err = ImageError::MissingFile {
            image: "img:pr-1".to_string(),
            name: "prepare.sh".to_string(),
        };
        assert!(err.to_string().contains("prepare.sh"));
    }
}
