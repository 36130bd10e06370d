//! In-memory collaborators for stage and driver tests.

use std::collections::VecDeque;
use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, AtomicU32, Ordering};
use std::sync::{Arc, Mutex};

use async_trait::async_trait;

use super::{
    ClaimError, FileStreamError, FileStreamService, HeartbeatSink, JobClaimService,
    JobReservationService, JobSetupService, JobSpecificationService, JobStatusService,
    LaunchRequest, ManagedService, ManifestSink, ProcessError, ProcessManager, ServiceError,
    ServiceTarget, SetupError,
};
use crate::control_plane::{ControlPlaneError, JobManifest};
use crate::state_machine::{
    AgentClientMetadata, JobRequest, JobSpecification, JobStatus, ProcessResult, ServiceKind,
};

pub fn unavailable() -> ControlPlaneError {
    ControlPlaneError::Status {
        status: 503,
        message: "service unavailable".into(),
    }
}

pub fn conflict(job_id: &str) -> ClaimError {
    ClaimError::ReservationConflict {
        job_id: job_id.into(),
        message: "already claimed".into(),
    }
}

pub fn specification(job_id: &str) -> JobSpecification {
    JobSpecification {
        job_id: job_id.into(),
        executable: "true".into(),
        args: vec![],
        environment: Default::default(),
    }
}

/// A recorded status change: job id, current, next, message.
pub type StatusChange = (String, Option<JobStatus>, JobStatus, String);

/// Control plane double. Each call pops its next scripted result; an empty
/// script means success.
#[derive(Default)]
pub struct FakeControlPlane {
    pub reserve_results: Mutex<VecDeque<Result<String, ControlPlaneError>>>,
    pub resolve_results: Mutex<VecDeque<Result<JobSpecification, ControlPlaneError>>>,
    pub claim_results: Mutex<VecDeque<Result<(), ClaimError>>>,
    pub status_results: Mutex<VecDeque<Result<(), ControlPlaneError>>>,
    reservations: AtomicU32,
    claims: Mutex<Vec<(String, AgentClientMetadata)>>,
    status_changes: Mutex<Vec<StatusChange>>,
    manifests: Mutex<Vec<(String, JobManifest)>>,
    heartbeats: AtomicU32,
}

impl FakeControlPlane {
    pub fn with_claim_results(results: Vec<Result<(), ClaimError>>) -> Self {
        Self {
            claim_results: Mutex::new(results.into()),
            ..Self::default()
        }
    }

    pub fn reservations(&self) -> u32 {
        self.reservations.load(Ordering::SeqCst)
    }

    pub fn claims(&self) -> Vec<(String, AgentClientMetadata)> {
        self.claims.lock().unwrap().clone()
    }

    pub fn status_changes(&self) -> Vec<StatusChange> {
        self.status_changes.lock().unwrap().clone()
    }

    pub fn manifests(&self) -> Vec<(String, JobManifest)> {
        self.manifests.lock().unwrap().clone()
    }

    pub fn heartbeats(&self) -> u32 {
        self.heartbeats.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl JobReservationService for FakeControlPlane {
    async fn reserve_job_id(
        &self,
        request: &JobRequest,
        _metadata: &AgentClientMetadata,
    ) -> Result<String, ControlPlaneError> {
        self.reservations.fetch_add(1, Ordering::SeqCst);
        self.reserve_results
            .lock()
            .unwrap()
            .pop_front()
            .unwrap_or_else(|| Ok(format!("{}-id", request.name)))
    }
}

#[async_trait]
impl JobSpecificationService for FakeControlPlane {
    async fn resolve_job_specification(
        &self,
        job_id: &str,
    ) -> Result<JobSpecification, ControlPlaneError> {
        self.resolve_results
            .lock()
            .unwrap()
            .pop_front()
            .unwrap_or_else(|| Ok(specification(job_id)))
    }
}

#[async_trait]
impl JobClaimService for FakeControlPlane {
    async fn claim_job(
        &self,
        job_id: &str,
        metadata: &AgentClientMetadata,
    ) -> Result<(), ClaimError> {
        self.claims
            .lock()
            .unwrap()
            .push((job_id.to_string(), metadata.clone()));
        self.claim_results.lock().unwrap().pop_front().unwrap_or(Ok(()))
    }
}

#[async_trait]
impl JobStatusService for FakeControlPlane {
    async fn change_job_status(
        &self,
        job_id: &str,
        current: Option<JobStatus>,
        next: JobStatus,
        message: &str,
    ) -> Result<(), ControlPlaneError> {
        let result = self.status_results.lock().unwrap().pop_front().unwrap_or(Ok(()));
        if result.is_ok() {
            self.status_changes.lock().unwrap().push((
                job_id.to_string(),
                current,
                next,
                message.to_string(),
            ));
        }
        result
    }
}

#[async_trait]
impl ManifestSink for FakeControlPlane {
    async fn push_manifest(
        &self,
        job_id: &str,
        manifest: &JobManifest,
    ) -> Result<(), ControlPlaneError> {
        self.manifests
            .lock()
            .unwrap()
            .push((job_id.to_string(), manifest.clone()));
        Ok(())
    }
}

#[async_trait]
impl HeartbeatSink for FakeControlPlane {
    async fn heartbeat(&self, _job_id: &str) -> Result<(), ControlPlaneError> {
        self.heartbeats.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }
}

/// How [`FakeProcessManager::wait_for_completion`] behaves.
#[derive(Debug, Clone, Copy)]
pub enum WaitBehavior {
    Exit(ProcessResult),
    Interrupt,
}

pub struct FakeProcessManager {
    pub fail_launch: AtomicBool,
    pub wait_behavior: Mutex<WaitBehavior>,
    launched: AtomicBool,
    launches: Mutex<Vec<LaunchRequest>>,
    waits: AtomicU32,
    kills: AtomicU32,
}

impl Default for FakeProcessManager {
    fn default() -> Self {
        Self::exiting_with(0)
    }
}

impl FakeProcessManager {
    pub fn exiting_with(code: i32) -> Self {
        Self::with_wait(WaitBehavior::Exit(ProcessResult::exited(code)))
    }

    pub fn with_wait(behavior: WaitBehavior) -> Self {
        Self {
            fail_launch: AtomicBool::new(false),
            wait_behavior: Mutex::new(behavior),
            launched: AtomicBool::new(false),
            launches: Mutex::new(Vec::new()),
            waits: AtomicU32::new(0),
            kills: AtomicU32::new(0),
        }
    }

    /// Pretend a process was launched earlier.
    pub fn already_launched(self) -> Self {
        self.launched.store(true, Ordering::SeqCst);
        self
    }

    pub fn launches(&self) -> Vec<LaunchRequest> {
        self.launches.lock().unwrap().clone()
    }

    pub fn waits(&self) -> u32 {
        self.waits.load(Ordering::SeqCst)
    }

    pub fn kills(&self) -> u32 {
        self.kills.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl ProcessManager for FakeProcessManager {
    async fn launch(&self, request: LaunchRequest) -> Result<(), ProcessError> {
        if self.fail_launch.load(Ordering::SeqCst) {
            return Err(ProcessError::Launch {
                executable: request.executable,
                source: std::io::Error::new(std::io::ErrorKind::NotFound, "no such file"),
            });
        }
        self.launches.lock().unwrap().push(request);
        self.launched.store(true, Ordering::SeqCst);
        Ok(())
    }

    fn is_launched(&self) -> bool {
        self.launched.load(Ordering::SeqCst)
    }

    async fn wait_for_completion(&self) -> Result<ProcessResult, ProcessError> {
        self.waits.fetch_add(1, Ordering::SeqCst);
        match *self.wait_behavior.lock().unwrap() {
            WaitBehavior::Exit(result) => Ok(result),
            WaitBehavior::Interrupt => Err(ProcessError::Interrupted),
        }
    }

    async fn kill(&self) -> Result<(), ProcessError> {
        self.kills.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }
}

#[derive(Default)]
pub struct FakeFileStream {
    pub fail: AtomicBool,
    syncs: AtomicU32,
}

impl FakeFileStream {
    pub fn failing() -> Self {
        Self {
            fail: AtomicBool::new(true),
            syncs: AtomicU32::new(0),
        }
    }

    pub fn syncs(&self) -> u32 {
        self.syncs.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl FileStreamService for FakeFileStream {
    async fn force_sync(&self) -> Result<(), FileStreamError> {
        self.syncs.fetch_add(1, Ordering::SeqCst);
        if self.fail.load(Ordering::SeqCst) {
            return Err(FileStreamError::Sync(ControlPlaneError::Status {
                status: 502,
                message: "bad gateway".into(),
            }));
        }
        Ok(())
    }
}

/// Shared log of service starts and stops, e.g. `"start heartbeat"`.
pub type ServiceLog = Arc<Mutex<Vec<String>>>;

pub struct FakeService {
    kind: ServiceKind,
    pub fail_start: AtomicBool,
    pub fail_stop: AtomicBool,
    log: ServiceLog,
    targets: Mutex<Vec<ServiceTarget>>,
}

impl FakeService {
    pub fn new(kind: ServiceKind, log: ServiceLog) -> Self {
        Self {
            kind,
            fail_start: AtomicBool::new(false),
            fail_stop: AtomicBool::new(false),
            log,
            targets: Mutex::new(Vec::new()),
        }
    }

    pub fn targets(&self) -> Vec<ServiceTarget> {
        self.targets.lock().unwrap().clone()
    }
}

#[async_trait]
impl ManagedService for FakeService {
    fn kind(&self) -> ServiceKind {
        self.kind
    }

    async fn start(&self, target: &ServiceTarget) -> Result<(), ServiceError> {
        self.log.lock().unwrap().push(format!("start {}", self.kind));
        self.targets.lock().unwrap().push(target.clone());
        if self.fail_start.load(Ordering::SeqCst) {
            return Err(ServiceError::Start {
                service: self.kind,
                message: "refused".into(),
            });
        }
        Ok(())
    }

    async fn stop(&self) -> Result<(), ServiceError> {
        self.log.lock().unwrap().push(format!("stop {}", self.kind));
        if self.fail_stop.load(Ordering::SeqCst) {
            return Err(ServiceError::Stop {
                service: self.kind,
                message: "stuck".into(),
            });
        }
        Ok(())
    }
}

pub struct FakeSetup {
    root: PathBuf,
    pub fail: AtomicBool,
    created: AtomicU32,
}

impl FakeSetup {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self {
            root: root.into(),
            fail: AtomicBool::new(false),
            created: AtomicU32::new(0),
        }
    }

    pub fn created(&self) -> u32 {
        self.created.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl JobSetupService for FakeSetup {
    async fn create_job_directory(&self, spec: &JobSpecification) -> Result<PathBuf, SetupError> {
        if self.fail.load(Ordering::SeqCst) {
            return Err(SetupError::Io(std::io::Error::new(
                std::io::ErrorKind::PermissionDenied,
                "read-only file system",
            )));
        }
        self.created.fetch_add(1, Ordering::SeqCst);
        Ok(self.root.join(&spec.job_id))
    }
}
