//! One [`Stage`](crate::state_machine::Stage) per lifecycle state.

mod claim;
mod directory;
mod kill;
mod launch;
mod manifest;
mod reserve;
mod resolve;
mod services;
mod status;
mod wait;

pub use claim::ClaimJobStage;
pub use directory::CreateJobDirectoryStage;
pub use kill::KillJobProcessStage;
pub use launch::{JOB_DIRECTORY_ENV, JOB_ID_ENV, KillRequested, LaunchJobStage};
pub use manifest::RefreshManifestStage;
pub use reserve::ReserveJobIdStage;
pub use resolve::{InvalidSpecification, ResolveJobSpecificationStage};
pub use services::{StartServiceStage, StopServiceStage};
pub use status::{DetermineFinalStatusStage, ReportFinalStatusStage, SetJobStatusStage};
pub use wait::WaitJobCompletionStage;

use crate::control_plane::ControlPlaneError;
use crate::state_machine::{MissingContext, State, TransitionError};

/// Transient control-plane errors are worth another attempt; anything else
/// means the request itself is wrong.
fn classify(state: State, err: ControlPlaneError) -> TransitionError {
    if err.is_transient() {
        TransitionError::retryable(state, err)
    } else {
        TransitionError::fatal(state, err)
    }
}

fn require<'a, T>(
    state: State,
    value: &'a Option<T>,
    field: &'static str,
) -> Result<&'a T, TransitionError> {
    value
        .as_ref()
        .ok_or_else(|| TransitionError::fatal(state, MissingContext(field)))
}
