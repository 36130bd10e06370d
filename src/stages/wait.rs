use std::sync::Arc;

use async_trait::async_trait;

use crate::services::ProcessManager;
use crate::state_machine::{ExecutionContext, Stage, State, TransitionError, TransitionResult};

/// Block until the user process exits.
///
/// The wait ends early if the kill token fires; that interruption is
/// fatal so the run moves straight into the cleanup chain.
pub struct WaitJobCompletionStage {
    processes: Arc<dyn ProcessManager>,
}

impl WaitJobCompletionStage {
    pub fn new(processes: Arc<dyn ProcessManager>) -> Self {
        Self { processes }
    }
}

#[async_trait]
impl Stage for WaitJobCompletionStage {
    fn state(&self) -> State {
        State::WaitJobCompletion
    }

    async fn attempt_transition(&self, ctx: &mut ExecutionContext) -> TransitionResult {
        if !ctx.job_launched {
            tracing::debug!("no process launched, nothing to wait for");
            return Ok(());
        }

        let result = self
            .processes
            .wait_for_completion()
            .await
            .map_err(|e| TransitionError::fatal(self.state(), e))?;

        tracing::info!(
            exit_code = ?result.exit_code,
            killed = result.killed,
            "job process finished"
        );
        ctx.process_result = Some(result);
        Ok(())
    }
}
