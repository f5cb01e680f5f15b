//! swe-harness: multi-language pull request evaluation harness.
//!
//! For each pull request in a dataset the harness renders a chain of
//! container images, runs the test suite at the base commit, with the test
//! patch, and with the test and fix patches, then certifies whether the fix
//! turns the tests broken by the test patch green without regressions.

pub mod cli;
pub mod config;
pub mod dataset;
pub mod docker;
pub mod error;
pub mod execution;
pub mod harness;
pub mod image;
pub mod instance;
pub mod verdict;

// Re-export commonly used error types
pub use config::ConfigError;
pub use error::{DatasetError, DockerError, HarnessError, ImageError, RegistryError};
