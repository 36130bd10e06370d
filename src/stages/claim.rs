use std::sync::Arc;

use async_trait::async_trait;

use super::require;
use crate::services::{ClaimError, JobClaimService};
use crate::state_machine::{
    ExecutionContext, JobStatus, Stage, State, TransitionError, TransitionResult, status_messages,
};
use crate::ui::UserConsole;

/// Claim the job, so no other agent can execute it.
///
/// Reads the reserved job id and agent metadata. On success the job is
/// `CLAIMED` and the next status to report is `INIT`.
pub struct ClaimJobStage {
    claims: Arc<dyn JobClaimService>,
    console: Arc<dyn UserConsole>,
}

impl ClaimJobStage {
    pub fn new(claims: Arc<dyn JobClaimService>, console: Arc<dyn UserConsole>) -> Self {
        Self { claims, console }
    }
}

#[async_trait]
impl Stage for ClaimJobStage {
    fn state(&self) -> State {
        State::ClaimJob
    }

    async fn attempt_transition(&self, ctx: &mut ExecutionContext) -> TransitionResult {
        let job_id = require(self.state(), &ctx.reserved_job_id, "reserved_job_id")?.clone();

        tracing::info!(%job_id, "claiming job");
        match self.claims.claim_job(&job_id, &ctx.agent_client_metadata).await {
            Ok(()) => {}
            Err(e @ ClaimError::ReservationConflict { .. }) => {
                return Err(TransitionError::fatal(self.state(), e));
            }
            Err(ClaimError::ControlPlane(e)) if !e.is_transient() => {
                return Err(TransitionError::fatal(self.state(), ClaimError::ControlPlane(e)));
            }
            Err(e) => return Err(TransitionError::retryable(self.state(), e)),
        }

        self.console.info(&format!("Successfully claimed job: {job_id}"));

        ctx.set_current_job_status(JobStatus::Claimed);
        ctx.claimed_job_id = Some(job_id);
        ctx.set_next_job_status(JobStatus::Init, status_messages::JOB_INITIALIZING);
        Ok(())
    }
}
