//! Container execution layer.
//!
//! The harness only needs three primitives from a container engine: check
//! whether an image exists, build an image from a context directory, and run
//! one command in a fresh container of an image. [`ContainerBackend`] is that
//! seam; [`DockerClient`] implements it against the local Docker daemon.
//!
//! Deadlines are not part of the trait. The harness wraps every call in
//! `tokio::time::timeout` and calls [`ContainerBackend::remove_container`]
//! when a run is cut short.

use std::path::Path;

use async_trait::async_trait;

use crate::error::DockerError;

pub mod docker_client;

pub use docker_client::DockerClient;

/// Result of running one command to completion.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RunOutput {
    pub exit_code: i64,
    /// Interleaved stdout and stderr.
    pub log: String,
}

/// A container engine.
#[async_trait]
pub trait ContainerBackend: Send + Sync {
    /// Whether `image` (`name:tag`) is present locally.
    async fn image_exists(&self, image: &str) -> bool;

    /// Builds `image` from the Dockerfile in `context_dir`.
    async fn build_image(&self, image: &str, context_dir: &Path) -> Result<(), DockerError>;

    /// Runs `bash -c <command>` in a new container named `container_name`
    /// and waits for it to exit. The container is removed afterwards unless
    /// `keep` is set.
    async fn run(
        &self,
        image: &str,
        container_name: &str,
        command: &str,
        keep: bool,
    ) -> Result<RunOutput, DockerError>;

    /// Force-removes a container, ignoring containers that do not exist.
    async fn remove_container(&self, container_name: &str) -> Result<(), DockerError>;
}
