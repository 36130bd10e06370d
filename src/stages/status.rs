use std::sync::Arc;

use async_trait::async_trait;

use super::{classify, require};
use crate::services::JobStatusService;
use crate::state_machine::{
    ExecutionContext, JobStatus, Stage, State, TransitionError, TransitionResult, status_messages,
};

/// Report the pending `next_job_status` to the control plane.
///
/// Registered twice: as `SetStatusInit` after setup and as
/// `SetStatusRunning` after launch.
pub struct SetJobStatusStage {
    state: State,
    statuses: Arc<dyn JobStatusService>,
}

impl SetJobStatusStage {
    pub fn new(state: State, statuses: Arc<dyn JobStatusService>) -> Self {
        Self { state, statuses }
    }
}

#[async_trait]
impl Stage for SetJobStatusStage {
    fn state(&self) -> State {
        self.state
    }

    async fn attempt_transition(&self, ctx: &mut ExecutionContext) -> TransitionResult {
        let job_id = require(self.state, &ctx.claimed_job_id, "claimed_job_id")?;
        let next = *require(self.state, &ctx.next_job_status, "next_job_status")?;
        let message = ctx.next_job_status_message.clone().unwrap_or_default();
        let current = ctx.current_job_status();

        tracing::info!(%job_id, from = ?current, to = %next, "changing job status");
        self.statuses
            .change_job_status(job_id, current, next, &message)
            .await
            .map_err(|e| classify(self.state, e))?;

        ctx.set_current_job_status(next);
        ctx.next_job_status = None;
        ctx.next_job_status_message = None;
        Ok(())
    }
}

/// Decide what the job ended as. Never fails.
pub struct DetermineFinalStatusStage;

#[async_trait]
impl Stage for DetermineFinalStatusStage {
    fn state(&self) -> State {
        State::DetermineFinalStatus
    }

    async fn attempt_transition(&self, ctx: &mut ExecutionContext) -> TransitionResult {
        let (status, message) = if ctx.is_kill_requested() {
            (JobStatus::Killed, status_messages::JOB_KILLED.to_string())
        } else if let Some(cause) = ctx.failure_cause() {
            (JobStatus::Failed, failure_message(cause))
        } else if let Some(result) = ctx.process_result {
            (result.final_status(), result.status_message())
        } else {
            (
                JobStatus::Failed,
                "Job failed: no process result was recorded".to_string(),
            )
        };

        tracing::info!(status = %status, %message, "final job status determined");
        ctx.final_job_status = Some(status);
        ctx.final_job_status_message = Some(message);
        Ok(())
    }
}

fn failure_message(cause: &TransitionError) -> String {
    format!("Job failed: {}", cause.cause())
}

/// Tell the control plane how the job ended.
///
/// A job that was never claimed is not ours to report on. A SUCCEEDED
/// status determined before a cleanup step failed is reported as FAILED
/// with that cause.
pub struct ReportFinalStatusStage {
    statuses: Arc<dyn JobStatusService>,
}

impl ReportFinalStatusStage {
    pub fn new(statuses: Arc<dyn JobStatusService>) -> Self {
        Self { statuses }
    }
}

#[async_trait]
impl Stage for ReportFinalStatusStage {
    fn state(&self) -> State {
        State::ReportFinalStatus
    }

    async fn attempt_transition(&self, ctx: &mut ExecutionContext) -> TransitionResult {
        if ctx.claimed_job_id.is_none() {
            tracing::debug!("job was never claimed, skipping final status report");
            return Ok(());
        }
        if ctx.final_job_status == Some(JobStatus::Succeeded)
            && let Some(cause) = ctx.failure_cause()
        {
            let message = failure_message(cause);
            tracing::warn!(%message, "run failed after the job succeeded");
            ctx.final_job_status = Some(JobStatus::Failed);
            ctx.final_job_status_message = Some(message);
        }

        let job_id = require(self.state(), &ctx.claimed_job_id, "claimed_job_id")?;
        let final_status = *require(self.state(), &ctx.final_job_status, "final_job_status")?;
        let current = ctx.current_job_status();
        if current == Some(final_status) {
            return Ok(());
        }
        let message = ctx.final_job_status_message.clone().unwrap_or_default();

        tracing::info!(%job_id, status = %final_status, "reporting final job status");
        self.statuses
            .change_job_status(job_id, current, final_status, &message)
            .await
            .map_err(|e| classify(self.state(), e))?;

        ctx.set_current_job_status(final_status);
        Ok(())
    }
}
