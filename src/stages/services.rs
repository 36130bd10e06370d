use std::sync::Arc;

use async_trait::async_trait;

use super::require;
use crate::services::{ManagedService, ServiceTarget};
use crate::state_machine::{
    ExecutionContext, ServiceKind, Stage, State, TransitionError, TransitionResult,
};

fn start_state(kind: ServiceKind) -> State {
    match kind {
        ServiceKind::Heartbeat => State::StartHeartbeatService,
        ServiceKind::Kill => State::StartKillService,
        ServiceKind::FileStream => State::StartFileStreamService,
    }
}

fn stop_state(kind: ServiceKind) -> State {
    match kind {
        ServiceKind::Heartbeat => State::StopHeartbeatService,
        ServiceKind::Kill => State::StopKillService,
        ServiceKind::FileStream => State::StopFileStreamService,
    }
}

/// Start a background service for the claimed job.
pub struct StartServiceStage {
    service: Arc<dyn ManagedService>,
}

impl StartServiceStage {
    pub fn new(service: Arc<dyn ManagedService>) -> Self {
        Self { service }
    }
}

#[async_trait]
impl Stage for StartServiceStage {
    fn state(&self) -> State {
        start_state(self.service.kind())
    }

    async fn attempt_transition(&self, ctx: &mut ExecutionContext) -> TransitionResult {
        let kind = self.service.kind();
        let job_id = require(self.state(), &ctx.claimed_job_id, "claimed_job_id")?;
        if kind == ServiceKind::FileStream {
            require(self.state(), &ctx.job_directory, "job_directory")?;
        }
        let target = ServiceTarget {
            job_id: job_id.clone(),
            job_directory: ctx.job_directory.clone(),
            kill_token: ctx.kill_token(),
        };

        tracing::info!(service = %kind, "starting service");
        self.service
            .start(&target)
            .await
            .map_err(|e| TransitionError::fatal(self.state(), e))?;

        ctx.started_services.insert(kind);
        Ok(())
    }
}

/// Stop a service started by the matching [`StartServiceStage`].
///
/// Does nothing if the service was never started. A failure to stop is
/// always fatal: the agent does not keep trying, it finishes the shutdown
/// sequence and surfaces the failure.
pub struct StopServiceStage {
    service: Arc<dyn ManagedService>,
}

impl StopServiceStage {
    pub fn new(service: Arc<dyn ManagedService>) -> Self {
        Self { service }
    }
}

#[async_trait]
impl Stage for StopServiceStage {
    fn state(&self) -> State {
        stop_state(self.service.kind())
    }

    async fn attempt_transition(&self, ctx: &mut ExecutionContext) -> TransitionResult {
        let kind = self.service.kind();
        if !ctx.started_services.contains(&kind) {
            tracing::debug!(service = %kind, "service not started, nothing to stop");
            return Ok(());
        }

        tracing::info!(service = %kind, "stopping service");
        self.service
            .stop()
            .await
            .map_err(|e| TransitionError::fatal(self.state(), e))?;

        ctx.started_services.remove(&kind);
        Ok(())
    }
}
