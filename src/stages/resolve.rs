use std::sync::Arc;

use async_trait::async_trait;
use thiserror::Error;

use super::{classify, require};
use crate::services::JobSpecificationService;
use crate::state_machine::{
    ExecutionContext, JobStatus, Stage, State, TransitionError, TransitionResult,
};

/// The control plane handed out a specification the agent cannot run.
#[derive(Debug, Error)]
#[error("job specification for {job_id} is invalid: {reason}")]
pub struct InvalidSpecification {
    pub job_id: String,
    pub reason: String,
}

/// Fetch the resolved job specification for the reserved id.
pub struct ResolveJobSpecificationStage {
    specifications: Arc<dyn JobSpecificationService>,
}

impl ResolveJobSpecificationStage {
    pub fn new(specifications: Arc<dyn JobSpecificationService>) -> Self {
        Self { specifications }
    }
}

#[async_trait]
impl Stage for ResolveJobSpecificationStage {
    fn state(&self) -> State {
        State::ResolveJobSpecification
    }

    async fn attempt_transition(&self, ctx: &mut ExecutionContext) -> TransitionResult {
        let job_id = require(self.state(), &ctx.reserved_job_id, "reserved_job_id")?.clone();

        let spec = self
            .specifications
            .resolve_job_specification(&job_id)
            .await
            .map_err(|e| classify(self.state(), e))?;

        let invalid = |reason: String| {
            TransitionError::fatal(
                self.state(),
                InvalidSpecification {
                    job_id: job_id.clone(),
                    reason,
                },
            )
        };
        spec.validate().map_err(invalid)?;
        if spec.job_id != job_id {
            return Err(invalid(format!("specification is for job {}", spec.job_id)));
        }

        tracing::info!(%job_id, executable = %spec.executable, "job specification resolved");
        ctx.job_specification = Some(spec);
        ctx.set_current_job_status(JobStatus::Resolved);
        Ok(())
    }
}
