//! Docker API wrapper using the bollard crate.
//!
//! Runs go through the Docker API (create → start → wait → logs → remove).
//! Builds shell out to `docker build` so directory contexts do not have to be
//! tarred by hand.

use std::future::Future;
use std::path::Path;
use std::process::Stdio;

use async_trait::async_trait;
use bollard::container::{
    Config, CreateContainerOptions, LogOutput, LogsOptions, RemoveContainerOptions,
    StartContainerOptions, WaitContainerOptions,
};
use bollard::errors::Error as BollardError;
use bollard::models::HostConfig;
use bollard::Docker;
use futures::StreamExt;
use tokio::process::Command;
use tracing::{debug, info, warn};

use super::{ContainerBackend, RunOutput};
use crate::error::DockerError;

/// Lines of build output kept in a build error.
const BUILD_ERROR_TAIL_LINES: usize = 40;

/// Configuration for creating a new container.
#[derive(Debug, Clone)]
pub struct ContainerConfig {
    /// Unique name for the container.
    pub name: String,
    /// Docker image to use.
    pub image: String,
    /// `bash -c <command>`.
    pub cmd: Vec<String>,
    /// Network mode (e.g., "none", "bridge", "host").
    pub network_mode: String,
}

impl ContainerConfig {
    /// A container of `image` that runs `command` through `bash -c`.
    pub fn shell(name: impl Into<String>, image: impl Into<String>, command: &str) -> Self {
        Self {
            name: name.into(),
            image: image.into(),
            cmd: vec!["bash".to_string(), "-c".to_string(), command.to_string()],
            network_mode: "bridge".to_string(),
        }
    }
}

/// Docker client wrapper for container operations.
pub struct DockerClient {
    docker: Docker,
}

impl DockerClient {
    /// Creates a new Docker client connecting to the local Docker daemon.
    ///
    /// # Errors
    ///
    /// Returns `DockerError::DaemonUnavailable` if the Docker daemon is not accessible.
    pub fn new() -> Result<Self, DockerError> {
        let docker = Docker::connect_with_local_defaults()
            .map_err(|e| DockerError::DaemonUnavailable(format!("Failed to connect: {e}")))?;

        Ok(Self { docker })
    }

    /// Creates a new Docker client from an existing bollard Docker instance.
    pub fn from_docker(docker: Docker) -> Self {
        Self { docker }
    }

    /// Fails unless the daemon answers a ping.
    pub async fn ping(&self) -> Result<(), DockerError> {
        self.docker
            .ping()
            .await
            .map_err(|e| DockerError::DaemonUnavailable(e.to_string()))?;
        Ok(())
    }

    /// Creates a new container with the given configuration.
    ///
    /// # Returns
    ///
    /// The container ID on success.
    pub async fn create_container(&self, config: ContainerConfig) -> Result<String, DockerError> {
        let host_config = HostConfig {
            network_mode: Some(config.network_mode),
            ..Default::default()
        };

        let container_config = Config {
            image: Some(config.image),
            cmd: Some(config.cmd),
            host_config: Some(host_config),
            tty: Some(false),
            attach_stdin: Some(false),
            attach_stdout: Some(true),
            attach_stderr: Some(true),
            ..Default::default()
        };

        let options = CreateContainerOptions {
            name: config.name,
            platform: None,
        };

        let response = self
            .docker
            .create_container(Some(options), container_config)
            .await
            .map_err(|e| DockerError::RunFailed(format!("Failed to create container: {e}")))?;

        Ok(response.id)
    }

    /// Starts a container by ID.
    pub async fn start_container(&self, id: &str) -> Result<(), DockerError> {
        self.docker
            .start_container(id, None::<StartContainerOptions<String>>)
            .await
            .map_err(|e| DockerError::RunFailed(format!("Failed to start container: {e}")))?;

        Ok(())
    }

    /// Waits for a container to stop and returns its exit code.
    pub async fn wait_container(&self, id: &str) -> Result<i64, DockerError> {
        let options = WaitContainerOptions {
            condition: "not-running",
        };

        let mut stream = self.docker.wait_container(id, Some(options));

        match stream.next().await {
            Some(Ok(response)) => Ok(response.status_code),
            // bollard reports a non-zero exit status as an error.
            Some(Err(BollardError::DockerContainerWaitError { code, .. })) => Ok(code),
            Some(Err(e)) => Err(DockerError::RunFailed(format!(
                "Error waiting for container: {e}"
            ))),
            None => {
                let info = self
                    .docker
                    .inspect_container(id, None)
                    .await
                    .map_err(|e| DockerError::RunFailed(format!("Failed to inspect container: {e}")))?;
                info.state
                    .and_then(|s| s.exit_code)
                    .ok_or_else(|| DockerError::RunFailed("Container did not exit normally".to_string()))
            }
        }
    }

    /// Gets logs from a container.
    ///
    /// # Returns
    ///
    /// Combined stdout and stderr logs as a string.
    pub async fn get_logs(&self, id: &str) -> Result<String, DockerError> {
        let options = LogsOptions::<String> {
            stdout: true,
            stderr: true,
            follow: false,
            timestamps: false,
            ..Default::default()
        };

        let mut logs = self.docker.logs(id, Some(options));
        let mut output = String::new();

        while let Some(chunk) = logs.next().await {
            match chunk {
                Ok(LogOutput::StdOut { message })
                | Ok(LogOutput::StdErr { message })
                | Ok(LogOutput::Console { message }) => {
                    output.push_str(&String::from_utf8_lossy(&message));
                }
                Ok(_) => {}
                Err(e) => {
                    return Err(DockerError::RunFailed(format!("Error reading logs: {e}")));
                }
            }
        }

        Ok(output)
    }

    /// Removes a container by ID or name.
    ///
    /// # Arguments
    ///
    /// * `id` - Container ID or name
    /// * `force` - Force removal even if running
    pub async fn delete_container(&self, id: &str, force: bool) -> Result<(), DockerError> {
        let options = RemoveContainerOptions {
            force,
            v: true,
            ..Default::default()
        };

        match self.docker.remove_container(id, Some(options)).await {
            Ok(()) => Ok(()),
            Err(BollardError::DockerResponseServerError {
                status_code: 404, ..
            }) => Ok(()),
            Err(e) => Err(DockerError::RunFailed(format!(
                "Failed to remove container: {e}"
            ))),
        }
    }
}

#[async_trait]
impl ContainerBackend for DockerClient {
    async fn image_exists(&self, image: &str) -> bool {
        self.docker.inspect_image(image).await.is_ok()
    }

    async fn build_image(&self, image: &str, context_dir: &Path) -> Result<(), DockerError> {
        info!(image = %image, context = %context_dir.display(), "Building image");
        let output = Command::new("docker")
            .arg("build")
            .arg("--tag")
            .arg(image)
            .arg(context_dir)
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true)
            .output()
            .await?;

        if !output.status.success() {
            let mut combined = String::from_utf8_lossy(&output.stdout).into_owned();
            combined.push_str(&String::from_utf8_lossy(&output.stderr));
            return Err(DockerError::BuildFailed(format!(
                "{image} (exit {}):\n{}",
                output.status.code().unwrap_or(-1),
                tail(&combined, BUILD_ERROR_TAIL_LINES)
            )));
        }
        Ok(())
    }

    async fn run(
        &self,
        image: &str,
        container_name: &str,
        command: &str,
        keep: bool,
    ) -> Result<RunOutput, DockerError> {
        let config = ContainerConfig::shell(container_name, image, command);
        let id = self.create_container(config).await?;
        debug!(container = %container_name, image = %image, "Created container");

        let work = async {
            self.start_container(&id).await?;
            let exit_code = self.wait_container(&id).await?;
            let log = self.get_logs(&id).await?;
            Ok::<_, DockerError>(RunOutput { exit_code, log })
        };
        let cleanup = (!keep).then(|| self.delete_container(&id, true));
        run_then_cleanup(container_name, work, cleanup).await
    }

    async fn remove_container(&self, container_name: &str) -> Result<(), DockerError> {
        self.delete_container(container_name, true).await
    }
}

/// Awaits `work`, then `cleanup`. A failed cleanup is logged and never
/// replaces the result of `work`.
async fn run_then_cleanup<T>(
    container: &str,
    work: impl Future<Output = Result<T, DockerError>>,
    cleanup: Option<impl Future<Output = Result<(), DockerError>>>,
) -> Result<T, DockerError> {
    let result = work.await;
    if let Some(cleanup) = cleanup {
        if let Err(e) = cleanup.await {
            warn!(container = %container, error = %e, "Failed to remove container");
        }
    }
    result
}

/// Last `max_lines` lines of `s`.
fn tail(s: &str, max_lines: usize) -> String {
    let lines: Vec<&str> = s.lines().collect();
    let start = lines.len().saturating_sub(max_lines);
    let mut out = String::new();
    if start > 0 {
        out.push_str(&format!("... [{start} lines truncated]\n"));
    }
    out.push_str(&lines[start..].join("\n"));
    out
}
