use std::sync::Arc;

use async_trait::async_trait;

use super::require;
use crate::services::JobSetupService;
use crate::state_machine::{ExecutionContext, Stage, State, TransitionError, TransitionResult};

/// Lay out the job's working directory.
pub struct CreateJobDirectoryStage {
    setup: Arc<dyn JobSetupService>,
}

impl CreateJobDirectoryStage {
    pub fn new(setup: Arc<dyn JobSetupService>) -> Self {
        Self { setup }
    }
}

#[async_trait]
impl Stage for CreateJobDirectoryStage {
    fn state(&self) -> State {
        State::CreateJobDirectory
    }

    async fn attempt_transition(&self, ctx: &mut ExecutionContext) -> TransitionResult {
        require(self.state(), &ctx.claimed_job_id, "claimed_job_id")?;
        let spec = require(self.state(), &ctx.job_specification, "job_specification")?;

        let directory = self
            .setup
            .create_job_directory(spec)
            .await
            .map_err(|e| TransitionError::fatal(self.state(), e))?;

        ctx.job_directory = Some(directory);
        Ok(())
    }
}
