use std::sync::Arc;

use async_trait::async_trait;
use thiserror::Error;

use super::require;
use crate::services::{LaunchRequest, ProcessManager};
use crate::state_machine::{
    ExecutionContext, JobStatus, Stage, State, TransitionError, TransitionResult, status_messages,
};
use crate::ui::UserConsole;

/// Environment variable carrying the job id into the user process.
pub const JOB_ID_ENV: &str = "JOB_AGENT_JOB_ID";
/// Environment variable carrying the job directory into the user process.
pub const JOB_DIRECTORY_ENV: &str = "JOB_AGENT_JOB_DIRECTORY";

/// A kill arrived before the process could be started.
#[derive(Debug, Error)]
#[error("kill requested before job {0} was launched")]
pub struct KillRequested(pub String);

/// Start the user process in the job directory.
pub struct LaunchJobStage {
    processes: Arc<dyn ProcessManager>,
    console: Arc<dyn UserConsole>,
}

impl LaunchJobStage {
    pub fn new(processes: Arc<dyn ProcessManager>, console: Arc<dyn UserConsole>) -> Self {
        Self { processes, console }
    }
}

#[async_trait]
impl Stage for LaunchJobStage {
    fn state(&self) -> State {
        State::LaunchJob
    }

    async fn attempt_transition(&self, ctx: &mut ExecutionContext) -> TransitionResult {
        let spec = require(self.state(), &ctx.job_specification, "job_specification")?;
        let directory = require(self.state(), &ctx.job_directory, "job_directory")?;

        if ctx.is_kill_requested() {
            return Err(TransitionError::fatal(
                self.state(),
                KillRequested(spec.job_id.clone()),
            ));
        }

        let mut environment: Vec<(String, String)> = spec
            .environment
            .iter()
            .map(|(k, v)| (k.clone(), v.clone()))
            .collect();
        environment.push((JOB_ID_ENV.to_string(), spec.job_id.clone()));
        environment.push((
            JOB_DIRECTORY_ENV.to_string(),
            directory.display().to_string(),
        ));

        let request = LaunchRequest {
            job_id: spec.job_id.clone(),
            executable: spec.executable.clone(),
            args: spec.args.clone(),
            environment,
            working_directory: directory.clone(),
            kill_token: ctx.kill_token(),
        };

        tracing::info!(job_id = %request.job_id, executable = %request.executable, "launching job");
        let command_line = format!("{} {}", request.executable, request.args.join(" "));
        self.console.info(&format!("Launching {}", command_line.trim_end()));
        self.processes
            .launch(request)
            .await
            .map_err(|e| TransitionError::fatal(self.state(), e))?;

        ctx.job_launched = true;
        ctx.set_next_job_status(JobStatus::Running, status_messages::JOB_RUNNING);
        Ok(())
    }
}
