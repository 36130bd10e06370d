use std::sync::Arc;

use async_trait::async_trait;

use super::classify;
use crate::services::JobReservationService;
use crate::state_machine::{ExecutionContext, JobStatus, Stage, State, TransitionResult};

/// Obtain the id of the job to run.
///
/// Jobs submitted through the API arrive with their id already reserved;
/// the stage adopts it without calling the control plane.
pub struct ReserveJobIdStage {
    reservations: Arc<dyn JobReservationService>,
}

impl ReserveJobIdStage {
    pub fn new(reservations: Arc<dyn JobReservationService>) -> Self {
        Self { reservations }
    }
}

#[async_trait]
impl Stage for ReserveJobIdStage {
    fn state(&self) -> State {
        State::ReserveJobId
    }

    async fn attempt_transition(&self, ctx: &mut ExecutionContext) -> TransitionResult {
        let pre_reserved = ctx
            .job_request
            .requested_id
            .as_ref()
            .filter(|id| !id.trim().is_empty())
            .cloned();

        let job_id = match pre_reserved {
            Some(id) => {
                tracing::info!(job_id = %id, "using pre-reserved job id");
                id
            }
            None => {
                tracing::info!(name = %ctx.job_request.name, "reserving job id");
                self.reservations
                    .reserve_job_id(&ctx.job_request, &ctx.agent_client_metadata)
                    .await
                    .map_err(|e| classify(self.state(), e))?
            }
        };

        ctx.reserved_job_id = Some(job_id);
        ctx.set_current_job_status(JobStatus::Reserved);
        Ok(())
    }
}
