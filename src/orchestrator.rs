use std::sync::Arc;

use tokio_util::sync::CancellationToken;
use tracing::Instrument;

use crate::services::{
    FileStreamService, JobClaimService, JobReservationService, JobSetupService,
    JobSpecificationService, JobStatusService, ManagedService, ProcessManager,
};
use crate::stages::{
    ClaimJobStage, CreateJobDirectoryStage, DetermineFinalStatusStage, KillJobProcessStage,
    LaunchJobStage, RefreshManifestStage, ReportFinalStatusStage, ReserveJobIdStage,
    ResolveJobSpecificationStage, SetJobStatusStage, StartServiceStage, StopServiceStage,
    WaitJobCompletionStage,
};
use crate::state_machine::{
    AgentClientMetadata, ExecutionContext, ExecutionReport, JobRequest, MachineError, RetryConfig,
    State, StateMachine, TransitionGraph,
};
use crate::ui::UserConsole;

/// Every lifecycle starts here.
pub const INITIAL_STATE: State = State::ReserveJobId;

/// Everything the stages talk to.
#[derive(Clone)]
pub struct Collaborators {
    pub reservations: Arc<dyn JobReservationService>,
    pub specifications: Arc<dyn JobSpecificationService>,
    pub claims: Arc<dyn JobClaimService>,
    pub statuses: Arc<dyn JobStatusService>,
    pub setup: Arc<dyn JobSetupService>,
    pub processes: Arc<dyn ProcessManager>,
    /// Forced manifest syncs for the three refresh states.
    pub file_stream: Arc<dyn FileStreamService>,
    /// Background manifest streaming started and stopped around the job.
    pub file_stream_service: Arc<dyn ManagedService>,
    pub heartbeat: Arc<dyn ManagedService>,
    pub kill: Arc<dyn ManagedService>,
}

/// Runs one job through the full lifecycle.
pub struct JobAgent {
    machine: StateMachine,
    console: Arc<dyn UserConsole>,
}

impl JobAgent {
    /// Register one stage per state on the standard transition graph.
    pub fn new(
        collaborators: Collaborators,
        retry: RetryConfig,
        console: Arc<dyn UserConsole>,
    ) -> Self {
        let c = collaborators;
        let machine = StateMachine::new(TransitionGraph::standard(), retry)
            .with_console(console.clone())
            .register(Box::new(ReserveJobIdStage::new(c.reservations)))
            .register(Box::new(ResolveJobSpecificationStage::new(c.specifications)))
            .register(Box::new(ClaimJobStage::new(c.claims, console.clone())))
            .register(Box::new(StartServiceStage::new(c.heartbeat.clone())))
            .register(Box::new(StartServiceStage::new(c.kill.clone())))
            .register(Box::new(CreateJobDirectoryStage::new(c.setup)))
            .register(Box::new(StartServiceStage::new(c.file_stream_service.clone())))
            .register(Box::new(SetJobStatusStage::new(
                State::SetStatusInit,
                c.statuses.clone(),
            )))
            .register(Box::new(RefreshManifestStage::new(
                State::PostSetupManifestRefresh,
                c.file_stream.clone(),
            )))
            .register(Box::new(LaunchJobStage::new(c.processes.clone(), console.clone())))
            .register(Box::new(SetJobStatusStage::new(
                State::SetStatusRunning,
                c.statuses.clone(),
            )))
            .register(Box::new(RefreshManifestStage::new(
                State::PostLaunchManifestRefresh,
                c.file_stream.clone(),
            )))
            .register(Box::new(WaitJobCompletionStage::new(c.processes.clone())))
            .register(Box::new(KillJobProcessStage::new(c.processes)))
            .register(Box::new(RefreshManifestStage::new(
                State::PostExecutionManifestRefresh,
                c.file_stream,
            )))
            .register(Box::new(DetermineFinalStatusStage))
            .register(Box::new(StopServiceStage::new(c.file_stream_service)))
            .register(Box::new(StopServiceStage::new(c.kill)))
            .register(Box::new(StopServiceStage::new(c.heartbeat)))
            .register(Box::new(ReportFinalStatusStage::new(c.statuses)));

        Self { machine, console }
    }

    pub fn machine(&self) -> &StateMachine {
        &self.machine
    }

    /// Execute `request` on this host. Cancelling `kill_token` kills the job.
    pub async fn run(
        &self,
        metadata: AgentClientMetadata,
        request: JobRequest,
        kill_token: CancellationToken,
    ) -> Result<ExecutionReport, MachineError> {
        let mut ctx = ExecutionContext::new(metadata, request).with_kill_token(kill_token);
        self.execute(&mut ctx).await
    }

    /// Drive an already built context; useful when the caller wants to
    /// watch its status while the job runs.
    pub async fn execute(
        &self,
        ctx: &mut ExecutionContext,
    ) -> Result<ExecutionReport, MachineError> {
        let span = tracing::info_span!("job", execution_id = %ctx.execution_id());
        tracing::info!(parent: &span, name = %ctx.job_request.name, "starting job execution");
        let report = self.machine.run(ctx, INITIAL_STATE).instrument(span).await?;
        self.console.finished(&report);
        Ok(report)
    }
}

#[cfg(test)]
mod tests {
    use std::path::PathBuf;
    use std::sync::Mutex;
    use std::sync::atomic::{AtomicU32, Ordering};

    use async_trait::async_trait;

    use super::*;
    use crate::services::testing::{
        FakeControlPlane, FakeFileStream, FakeProcessManager, FakeService, FakeSetup, ServiceLog,
        conflict, unavailable,
    };
    use crate::services::{LaunchRequest, ProcessError};
    use crate::stages::test_support::metadata;
    use crate::state_machine::{JobStatus, ProcessResult, ServiceKind, status_messages};
    use crate::ui::NoopConsole;

    struct Harness {
        control_plane: Arc<FakeControlPlane>,
        files: Arc<FakeFileStream>,
        service_log: ServiceLog,
        heartbeat: Arc<FakeService>,
        setup: Arc<FakeSetup>,
    }

    impl Harness {
        fn new(control_plane: FakeControlPlane) -> Self {
            let service_log = ServiceLog::default();
            Self {
                control_plane: Arc::new(control_plane),
                files: Arc::new(FakeFileStream::default()),
                heartbeat: Arc::new(FakeService::new(ServiceKind::Heartbeat, service_log.clone())),
                service_log,
                setup: Arc::new(FakeSetup::new("/jobs")),
            }
        }

        fn agent(&self, processes: Arc<dyn ProcessManager>) -> JobAgent {
            let collaborators = Collaborators {
                reservations: self.control_plane.clone(),
                specifications: self.control_plane.clone(),
                claims: self.control_plane.clone(),
                statuses: self.control_plane.clone(),
                setup: self.setup.clone(),
                processes,
                file_stream: self.files.clone(),
                file_stream_service: Arc::new(FakeService::new(
                    ServiceKind::FileStream,
                    self.service_log.clone(),
                )),
                heartbeat: self.heartbeat.clone(),
                kill: Arc::new(FakeService::new(ServiceKind::Kill, self.service_log.clone())),
            };
            JobAgent::new(collaborators, no_delay(), Arc::new(NoopConsole))
        }

        fn services(&self) -> Vec<String> {
            self.service_log.lock().unwrap().clone()
        }

        fn reported_statuses(&self) -> Vec<JobStatus> {
            self.control_plane
                .status_changes()
                .into_iter()
                .map(|(_, _, next, _)| next)
                .collect()
        }
    }

    fn no_delay() -> RetryConfig {
        RetryConfig {
            max_attempts: 3,
            base_delay_ms: 0,
            max_delay_ms: 0,
        }
    }

    fn request() -> JobRequest {
        JobRequest {
            requested_id: None,
            name: "nightly".into(),
            command: vec!["true".into()],
        }
    }

    async fn run(agent: &JobAgent) -> ExecutionReport {
        agent
            .run(metadata(), request(), CancellationToken::new())
            .await
            .unwrap()
    }

    /// Process that gets killed while the agent waits on it.
    #[derive(Default)]
    struct KilledDuringWait {
        kill_token: Mutex<Option<CancellationToken>>,
        kills: AtomicU32,
    }

    #[async_trait]
    impl ProcessManager for KilledDuringWait {
        async fn launch(&self, request: LaunchRequest) -> Result<(), ProcessError> {
            *self.kill_token.lock().unwrap() = Some(request.kill_token);
            Ok(())
        }

        fn is_launched(&self) -> bool {
            self.kill_token.lock().unwrap().is_some()
        }

        async fn wait_for_completion(&self) -> Result<ProcessResult, ProcessError> {
            if let Some(token) = self.kill_token.lock().unwrap().as_ref() {
                token.cancel();
            }
            Err(ProcessError::Interrupted)
        }

        async fn kill(&self) -> Result<(), ProcessError> {
            self.kills.fetch_add(1, Ordering::SeqCst);
            Ok(())
        }
    }

    #[test]
    fn every_reachable_state_has_a_stage() {
        let harness = Harness::new(FakeControlPlane::default());
        let agent = harness.agent(Arc::new(FakeProcessManager::default()));

        assert_eq!(agent.machine().validate(INITIAL_STATE), Ok(()));
    }

    #[tokio::test]
    async fn successful_job_runs_happy_path() {
        let harness = Harness::new(FakeControlPlane::default());
        let processes = Arc::new(FakeProcessManager::default());
        let agent = harness.agent(processes.clone());

        let report = run(&agent).await;

        assert_eq!(report.terminal_state, State::Done);
        assert!(report.succeeded());
        assert_eq!(report.job_id.as_deref(), Some("nightly-id"));
        assert_eq!(
            report.final_status_message.as_deref(),
            Some(status_messages::JOB_FINISHED_SUCCESSFULLY)
        );
        assert!(report.failure_cause.is_none());
        assert!(!report.state_transitions.contains(&State::KillJobProcess));
        assert!(!report.state_transitions.contains(&State::Failed));
        assert_eq!(report.state_transitions.first(), Some(&State::ReserveJobId));
        assert_eq!(report.state_transitions.last(), Some(&State::Done));

        assert_eq!(
            harness.reported_statuses(),
            vec![JobStatus::Init, JobStatus::Running, JobStatus::Succeeded]
        );
        assert_eq!(
            harness.services(),
            vec![
                "start heartbeat",
                "start kill",
                "start file stream",
                "stop file stream",
                "stop kill",
                "stop heartbeat",
            ]
        );
        assert_eq!(harness.files.syncs(), 3);
        assert_eq!(processes.launches().len(), 1);
        assert_eq!(processes.launches()[0].working_directory, PathBuf::from("/jobs/nightly-id"));
        assert_eq!(processes.kills(), 0);
    }

    #[tokio::test]
    async fn failing_exit_code_is_reported_but_run_completes() {
        let harness = Harness::new(FakeControlPlane::default());
        let agent = harness.agent(Arc::new(FakeProcessManager::exiting_with(4)));

        let report = run(&agent).await;

        assert_eq!(report.terminal_state, State::Done);
        assert_eq!(report.final_status, Some(JobStatus::Failed));
        assert_eq!(
            report.final_status_message.as_deref(),
            Some("Job failed with exit code 4")
        );
        assert!(!report.succeeded());
    }

    #[tokio::test]
    async fn claim_conflict_never_launches_and_cleans_up() {
        let harness =
            Harness::new(FakeControlPlane::with_claim_results(vec![Err(conflict("nightly-id"))]));
        let processes = Arc::new(FakeProcessManager::default());
        let agent = harness.agent(processes.clone());

        let report = run(&agent).await;

        assert_eq!(report.terminal_state, State::Failed);
        assert_eq!(report.final_status, Some(JobStatus::Failed));
        assert_eq!(
            report.final_status_message.as_deref(),
            Some("Job failed: job nightly-id cannot be claimed: already claimed")
        );
        assert!(
            report
                .failure_cause
                .as_deref()
                .is_some_and(|cause| cause.contains("cannot be claimed"))
        );
        assert_eq!(report.attempts.get(&State::ClaimJob), Some(&1));
        assert!(processes.launches().is_empty());
        assert!(harness.services().is_empty());
        // Never claimed, so no status is reported for it.
        assert!(harness.control_plane.status_changes().is_empty());
        assert_eq!(
            &report.state_transitions[3..],
            &[
                State::KillJobProcess,
                State::PostExecutionManifestRefresh,
                State::DetermineFinalStatus,
                State::StopFileStreamService,
                State::StopKillService,
                State::StopHeartbeatService,
                State::ReportFinalStatus,
                State::Failed,
            ]
        );
    }

    #[tokio::test]
    async fn transient_status_failure_is_retried() {
        let control_plane = FakeControlPlane::default();
        control_plane
            .status_results
            .lock()
            .unwrap()
            .push_back(Err(unavailable()));
        let harness = Harness::new(control_plane);
        let agent = harness.agent(Arc::new(FakeProcessManager::default()));

        let report = run(&agent).await;

        assert!(report.succeeded());
        assert_eq!(report.attempts.get(&State::SetStatusInit), Some(&2));
        assert_eq!(
            harness.reported_statuses(),
            vec![JobStatus::Init, JobStatus::Running, JobStatus::Succeeded]
        );
    }

    #[tokio::test]
    async fn kill_during_wait_reports_killed() {
        let harness = Harness::new(FakeControlPlane::default());
        let processes = Arc::new(KilledDuringWait::default());
        let agent = harness.agent(processes.clone());

        let report = run(&agent).await;

        assert_eq!(report.terminal_state, State::Failed);
        assert_eq!(report.final_status, Some(JobStatus::Killed));
        assert_eq!(
            report.final_status_message.as_deref(),
            Some(status_messages::JOB_KILLED)
        );
        assert!(report.process_result.is_none());
        assert_eq!(processes.kills.load(Ordering::SeqCst), 1);
        assert_eq!(
            harness.reported_statuses(),
            vec![JobStatus::Init, JobStatus::Running, JobStatus::Killed]
        );
        assert_eq!(
            harness.services(),
            vec![
                "start heartbeat",
                "start kill",
                "start file stream",
                "stop file stream",
                "stop kill",
                "stop heartbeat",
            ]
        );
    }

    #[tokio::test]
    async fn failed_stop_is_reported_as_failure() {
        let harness = Harness::new(FakeControlPlane::default());
        harness.heartbeat.fail_stop.store(true, Ordering::SeqCst);
        let agent = harness.agent(Arc::new(FakeProcessManager::default()));

        let report = run(&agent).await;

        assert_eq!(report.terminal_state, State::Failed);
        assert_eq!(report.final_status, Some(JobStatus::Failed));
        assert_eq!(report.attempts.get(&State::StopHeartbeatService), Some(&1));
        assert!(
            report
                .failure_cause
                .as_deref()
                .is_some_and(|cause| cause.contains("heartbeat service failed to stop"))
        );
        assert_eq!(
            harness.reported_statuses(),
            vec![JobStatus::Init, JobStatus::Running, JobStatus::Failed]
        );
        assert!(
            report
                .final_status_message
                .as_deref()
                .is_some_and(|m| m.starts_with("Job failed: heartbeat service failed to stop"))
        );
    }

    #[tokio::test]
    async fn setup_failure_skips_launch() {
        let harness = Harness::new(FakeControlPlane::default());
        harness.setup.fail.store(true, Ordering::SeqCst);
        let processes = Arc::new(FakeProcessManager::default());
        let agent = harness.agent(processes.clone());

        let report = run(&agent).await;

        assert_eq!(report.terminal_state, State::Failed);
        assert_eq!(report.final_status, Some(JobStatus::Failed));
        assert!(processes.launches().is_empty());
        assert_eq!(processes.kills(), 0);
        assert_eq!(harness.reported_statuses(), vec![JobStatus::Failed]);
        assert_eq!(
            harness.services(),
            vec!["start heartbeat", "start kill", "stop kill", "stop heartbeat"]
        );
    }

    #[tokio::test]
    async fn status_is_observable_while_running() {
        let harness = Harness::new(FakeControlPlane::default());
        let agent = harness.agent(Arc::new(FakeProcessManager::default()));
        let mut ctx = ExecutionContext::new(metadata(), request());
        let status = ctx.subscribe_status();

        agent.execute(&mut ctx).await.unwrap();

        assert_eq!(*status.borrow(), Some(JobStatus::Succeeded));
    }
}
