//! Docker Engine access for running a command inside a running container
//!
//! Only three calls are needed: list containers, create an exec session, start
//! it detached. `SocketRuntime` issues them through bollard over the daemon's
//! Unix socket.

use bollard::container::ListContainersOptions;
use bollard::errors::Error as DockerError;
use bollard::exec::{CreateExecOptions, StartExecOptions};
use bollard::Docker;
use std::future::Future;
use std::path::Path;
use std::time::Duration;
use thiserror::Error;
use tracing::{debug, info};

/// Default per-call timeout; the local socket should answer near-instantly
pub const DEFAULT_TIMEOUT_SECS: u64 = 10;

/// Which Docker API call failed
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Step {
    ListContainers,
    CreateExec,
    StartExec,
}

impl std::fmt::Display for Step {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Step::ListContainers => write!(f, "list containers"),
            Step::CreateExec => write!(f, "create exec"),
            Step::StartExec => write!(f, "start exec"),
        }
    }
}

/// Errors from talking to the container runtime
#[derive(Debug, Error)]
pub enum RuntimeError {
    #[error("connect to docker socket {socket}: {source}")]
    Connect { socket: String, source: DockerError },

    #[error("docker {step}: {source}")]
    Docker { step: Step, source: DockerError },

    #[error("docker {step}: timed out after {timeout:?}")]
    Timeout { step: Step, timeout: Duration },

    #[error("docker {step} failed ({status}): {message}")]
    Status {
        step: Step,
        status: u16,
        message: String,
    },

    #[error("container {0:?} not found")]
    ContainerNotFound(String),

    #[error("docker create exec returned an empty exec id")]
    EmptyExecId,
}

impl RuntimeError {
    /// The API call that failed, if the error came from one
    pub fn step(&self) -> Option<Step> {
        match self {
            RuntimeError::Docker { step, .. }
            | RuntimeError::Timeout { step, .. }
            | RuntimeError::Status { step, .. } => Some(*step),
            RuntimeError::EmptyExecId => Some(Step::CreateExec),
            RuntimeError::Connect { .. } | RuntimeError::ContainerNotFound(_) => None,
        }
    }

    fn from_docker(step: Step, timeout: Duration, err: DockerError) -> Self {
        match err {
            DockerError::DockerResponseServerError {
                status_code,
                message,
            } => RuntimeError::Status {
                step,
                status: status_code,
                message,
            },
            DockerError::RequestTimeoutError => RuntimeError::Timeout { step, timeout },
            source => RuntimeError::Docker { step, source },
        }
    }
}

/// A running container as far as name resolution cares
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ContainerSummary {
    pub id: String,
    /// Runtime names, customarily prefixed with `/`
    pub names: Vec<String>,
}

impl From<bollard::models::ContainerSummary> for ContainerSummary {
    fn from(summary: bollard::models::ContainerSummary) -> Self {
        Self {
            id: summary.id.unwrap_or_default(),
            names: summary.names.unwrap_or_default(),
        }
    }
}

/// Exec session to create inside a container
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CreateExecRequest {
    pub attach_stdout: bool,
    pub attach_stderr: bool,
    pub cmd: Vec<String>,
}

impl CreateExecRequest {
    /// A fire-and-forget exec: no output streams attached
    pub fn detached(cmd: Vec<String>) -> Self {
        Self {
            attach_stdout: false,
            attach_stderr: false,
            cmd,
        }
    }
}

impl From<&CreateExecRequest> for CreateExecOptions<String> {
    fn from(request: &CreateExecRequest) -> Self {
        CreateExecOptions {
            attach_stdout: Some(request.attach_stdout),
            attach_stderr: Some(request.attach_stderr),
            cmd: Some(request.cmd.clone()),
            ..Default::default()
        }
    }
}

/// `caddy reload --config <path> --adapter <adapter>`
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ReloadCommand {
    pub binary: String,
    pub config_path: String,
    pub adapter: String,
}

impl ReloadCommand {
    pub fn argv(&self) -> Vec<String> {
        vec![
            self.binary.clone(),
            "reload".to_string(),
            "--config".to_string(),
            self.config_path.clone(),
            "--adapter".to_string(),
            self.adapter.clone(),
        ]
    }
}

/// The subset of the container runtime API the reload needs
pub trait ContainerRuntime: Send + Sync {
    /// `GET /containers/json`
    fn list_containers(
        &self,
    ) -> impl Future<Output = Result<Vec<ContainerSummary>, RuntimeError>> + Send;

    /// `POST /containers/{id}/exec`, returning the exec session id
    fn create_exec(
        &self,
        container_id: &str,
        request: &CreateExecRequest,
    ) -> impl Future<Output = Result<String, RuntimeError>> + Send;

    /// `POST /exec/{id}/start` with `{"Detach":true,"Tty":false}`
    fn start_exec(&self, exec_id: &str) -> impl Future<Output = Result<(), RuntimeError>> + Send;
}

/// Find the id of the first container carrying `name`.
///
/// One leading `/` is stripped from each runtime name before an exact,
/// case-sensitive comparison.
pub fn resolve_container_id<'a>(containers: &'a [ContainerSummary], name: &str) -> Option<&'a str> {
    containers
        .iter()
        .find(|c| {
            c.names
                .iter()
                .any(|n| n.strip_prefix('/').unwrap_or(n) == name)
        })
        .map(|c| c.id.as_str())
}

/// Run `command` inside the container named `container_name`, detached.
pub async fn reload_service<R: ContainerRuntime>(
    runtime: &R,
    container_name: &str,
    command: &ReloadCommand,
) -> Result<(), RuntimeError> {
    let containers = runtime.list_containers().await?;

    let container_id = resolve_container_id(&containers, container_name)
        .ok_or_else(|| RuntimeError::ContainerNotFound(container_name.to_string()))?;

    debug!(container = container_name, id = container_id, "Resolved container");

    let exec_id = runtime
        .create_exec(container_id, &CreateExecRequest::detached(command.argv()))
        .await?;
    if exec_id.is_empty() {
        return Err(RuntimeError::EmptyExecId);
    }

    runtime.start_exec(&exec_id).await?;

    info!(
        container = container_name,
        exec_id = %exec_id,
        command = ?command.argv(),
        "Reload command started"
    );
    Ok(())
}

/// Docker Engine API client bound to a Unix socket
#[derive(Clone)]
pub struct SocketRuntime {
    client: Docker,
    timeout: Duration,
}

impl SocketRuntime {
    /// Build a client for the daemon listening on `socket_path`.
    ///
    /// Every API call is bounded by `timeout_secs`.
    pub fn connect(socket_path: impl AsRef<Path>, timeout_secs: u64) -> Result<Self, RuntimeError> {
        let socket = socket_path.as_ref().to_string_lossy().into_owned();
        let client = Docker::connect_with_socket(&socket, timeout_secs, bollard::API_DEFAULT_VERSION)
            .map_err(|source| RuntimeError::Connect {
                socket: socket.clone(),
                source,
            })?;

        debug!(socket = %socket, timeout_secs, "Docker client ready");

        Ok(Self {
            client,
            timeout: Duration::from_secs(timeout_secs),
        })
    }
}

impl ContainerRuntime for SocketRuntime {
    async fn list_containers(&self) -> Result<Vec<ContainerSummary>, RuntimeError> {
        let containers = self
            .client
            .list_containers(None::<ListContainersOptions<String>>)
            .await
            .map_err(|e| RuntimeError::from_docker(Step::ListContainers, self.timeout, e))?;

        debug!(count = containers.len(), "Listed containers");
        Ok(containers.into_iter().map(ContainerSummary::from).collect())
    }

    async fn create_exec(
        &self,
        container_id: &str,
        request: &CreateExecRequest,
    ) -> Result<String, RuntimeError> {
        let created = self
            .client
            .create_exec(container_id, CreateExecOptions::from(request))
            .await
            .map_err(|e| RuntimeError::from_docker(Step::CreateExec, self.timeout, e))?;

        debug!(container = container_id, exec_id = %created.id, "Created exec session");
        Ok(created.id)
    }

    async fn start_exec(&self, exec_id: &str) -> Result<(), RuntimeError> {
        let options = StartExecOptions {
            detach: true,
            tty: false,
            ..Default::default()
        };

        self.client
            .start_exec(exec_id, Some(options))
            .await
            .map_err(|e| RuntimeError::from_docker(Step::StartExec, self.timeout, e))?;
        Ok(())
    }
}
