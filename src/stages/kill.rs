use std::sync::Arc;

use async_trait::async_trait;

use crate::services::ProcessManager;
use crate::state_machine::{ExecutionContext, Stage, State, TransitionError, TransitionResult};

/// First step of the cleanup chain: make sure a launched process that never
/// reported a result is not left running.
pub struct KillJobProcessStage {
    processes: Arc<dyn ProcessManager>,
}

impl KillJobProcessStage {
    pub fn new(processes: Arc<dyn ProcessManager>) -> Self {
        Self { processes }
    }
}

#[async_trait]
impl Stage for KillJobProcessStage {
    fn state(&self) -> State {
        State::KillJobProcess
    }

    async fn attempt_transition(&self, ctx: &mut ExecutionContext) -> TransitionResult {
        if !ctx.job_launched || ctx.process_result.is_some() {
            return Ok(());
        }

        tracing::warn!(job_id = ?ctx.claimed_job_id, "killing job process");
        self.processes
            .kill()
            .await
            .map_err(|e| TransitionError::fatal(self.state(), e))
    }
}
