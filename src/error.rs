use thiserror::Error;

use crate::control_plane::ControlPlaneError;
use crate::state_machine::{ExecutionReport, JobStatus, MachineError};

/// Failures that stop the agent before or around a job run. Failures inside
/// the run itself end up in the [`ExecutionReport`] instead.
#[derive(Debug, Error)]
pub enum AgentError {
    #[error("Config error: {0}")]
    Config(String),

    #[error("Control plane error: {0}")]
    ControlPlane(#[from] ControlPlaneError),

    #[error("State machine error: {0}")]
    Machine(#[from] MachineError),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

/// Process exit code for a finished run: 0 succeeded, 130 killed, 1 for
/// everything else.
pub fn exit_code(report: &ExecutionReport) -> u8 {
    match report.final_status {
        Some(JobStatus::Killed) => 130,
        _ if report.succeeded() => 0,
        _ => 1,
    }
}
