use thiserror::Error;

use crate::control_plane::ControlPlaneError;
use crate::state_machine::ServiceKind;

#[derive(Debug, Error)]
pub enum ClaimError {
    /// The job is reserved for, or already claimed by, someone else.
    #[error("job {job_id} cannot be claimed: {message}")]
    ReservationConflict { job_id: String, message: String },

    #[error(transparent)]
    ControlPlane(#[from] ControlPlaneError),
}

#[derive(Debug, Error)]
pub enum ProcessError {
    #[error("failed to launch {executable}: {source}")]
    Launch {
        executable: String,
        #[source]
        source: std::io::Error,
    },

    #[error("a process was already launched for this job")]
    AlreadyLaunched,

    #[error("no process was launched")]
    NotLaunched,

    #[error("wait for job completion was interrupted")]
    Interrupted,

    #[error("process supervisor exited without a result")]
    SupervisorLost,

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

#[derive(Debug, Error)]
pub enum FileStreamError {
    #[error("manifest sync failed: {0}")]
    Sync(#[from] ControlPlaneError),

    #[error("failed to scan job directory: {0}")]
    Scan(#[from] std::io::Error),
}

#[derive(Debug, Error)]
pub enum ServiceError {
    #[error("{service} service failed to start: {message}")]
    Start {
        service: ServiceKind,
        message: String,
    },

    #[error("{service} service failed to stop: {message}")]
    Stop {
        service: ServiceKind,
        message: String,
    },
}

#[derive(Debug, Error)]
pub enum SetupError {
    #[error("invalid job specification: {0}")]
    InvalidSpecification(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
}
