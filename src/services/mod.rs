//! Collaborators the execution stages depend on.
//!
//! Each trait covers one capability so a stage, and its test double, only
//! deals with what it actually calls. Implementations backed by the local
//! machine live in the submodules; the control-plane backed ones live in
//! [`crate::control_plane`].

mod error;
pub mod file_stream;
pub mod heartbeat;
pub mod kill;
pub mod process;
pub mod setup;
#[cfg(test)]
pub mod testing;

use std::path::PathBuf;

use async_trait::async_trait;
use tokio_util::sync::CancellationToken;

use crate::control_plane::{ControlPlaneError, JobManifest};
use crate::state_machine::{
    AgentClientMetadata, JobRequest, JobSpecification, JobStatus, ProcessResult, ServiceKind,
};

pub use error::{ClaimError, FileStreamError, ProcessError, ServiceError, SetupError};
pub use file_stream::ManifestStreamer;
pub use heartbeat::HeartbeatService;
pub use kill::KillService;
pub use process::LocalProcessManager;
pub use setup::LocalJobSetup;

#[async_trait]
pub trait JobReservationService: Send + Sync {
    /// Reserve a job id for `request`.
    async fn reserve_job_id(
        &self,
        request: &JobRequest,
        metadata: &AgentClientMetadata,
    ) -> Result<String, ControlPlaneError>;
}

#[async_trait]
pub trait JobSpecificationService: Send + Sync {
    async fn resolve_job_specification(
        &self,
        job_id: &str,
    ) -> Result<JobSpecification, ControlPlaneError>;
}

#[async_trait]
pub trait JobClaimService: Send + Sync {
    /// Claim a reserved job so no other agent executes it.
    async fn claim_job(&self, job_id: &str, metadata: &AgentClientMetadata)
    -> Result<(), ClaimError>;
}

/// Sink for job status changes.
#[async_trait]
pub trait JobStatusService: Send + Sync {
    async fn change_job_status(
        &self,
        job_id: &str,
        current: Option<JobStatus>,
        next: JobStatus,
        message: &str,
    ) -> Result<(), ControlPlaneError>;
}

/// Where the manifest streamer pushes file listings.
#[async_trait]
pub trait ManifestSink: Send + Sync {
    async fn push_manifest(&self, job_id: &str, manifest: &JobManifest)
    -> Result<(), ControlPlaneError>;
}

/// Where the heartbeat service sends its pings.
#[async_trait]
pub trait HeartbeatSink: Send + Sync {
    async fn heartbeat(&self, job_id: &str) -> Result<(), ControlPlaneError>;
}

/// What to run and how it can be interrupted.
#[derive(Debug, Clone)]
pub struct LaunchRequest {
    pub job_id: String,
    pub executable: String,
    pub args: Vec<String>,
    pub environment: Vec<(String, String)>,
    pub working_directory: PathBuf,
    /// Cancelling this token kills the process and interrupts any wait.
    pub kill_token: CancellationToken,
}

#[async_trait]
pub trait ProcessManager: Send + Sync {
    async fn launch(&self, request: LaunchRequest) -> Result<(), ProcessError>;

    fn is_launched(&self) -> bool;

    /// Block until the launched process exits. Returns
    /// [`ProcessError::Interrupted`] if the kill token fires first.
    async fn wait_for_completion(&self) -> Result<ProcessResult, ProcessError>;

    /// Kill the process if it is still running.
    async fn kill(&self) -> Result<(), ProcessError>;
}

/// Output file listing kept in sync with the control plane.
#[async_trait]
pub trait FileStreamService: Send + Sync {
    /// Push the current manifest and wait for the acknowledgement.
    async fn force_sync(&self) -> Result<(), FileStreamError>;
}

/// Job the background services are started for.
#[derive(Debug, Clone)]
pub struct ServiceTarget {
    pub job_id: String,
    pub job_directory: Option<PathBuf>,
    pub kill_token: CancellationToken,
}

/// A background service started and stopped around the job.
#[async_trait]
pub trait ManagedService: Send + Sync {
    fn kind(&self) -> ServiceKind;

    async fn start(&self, target: &ServiceTarget) -> Result<(), ServiceError>;

    async fn stop(&self) -> Result<(), ServiceError>;
}

#[async_trait]
pub trait JobSetupService: Send + Sync {
    /// Create the job's working directory and return its path.
    async fn create_job_directory(&self, spec: &JobSpecification) -> Result<PathBuf, SetupError>;
}
