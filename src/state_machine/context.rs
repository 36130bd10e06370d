use std::collections::{BTreeMap, BTreeSet};
use std::fmt;
use std::path::PathBuf;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tokio::sync::watch;
use tokio_util::sync::CancellationToken;
use uuid::Uuid;

use super::job::{
    AgentClientMetadata, ExecutionReport, JobRequest, JobSpecification, JobStatus, ProcessResult,
};
use super::outcome::TransitionError;
use super::state::State;

/// Background services the agent starts for the duration of a job.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub enum ServiceKind {
    Heartbeat,
    Kill,
    FileStream,
}

impl fmt::Display for ServiceKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ServiceKind::Heartbeat => write!(f, "heartbeat"),
            ServiceKind::Kill => write!(f, "kill"),
            ServiceKind::FileStream => write!(f, "file stream"),
        }
    }
}

/// State shared by all stages of one job execution.
///
/// Owned by the driver and lent to one stage at a time. Fields are filled in
/// lifecycle order; each stage documents what it reads and what it produces.
/// The current job status is also published on a watch channel so tasks
/// outside the driver can observe it.
#[derive(Debug)]
pub struct ExecutionContext {
    pub agent_client_metadata: AgentClientMetadata,
    pub job_request: JobRequest,
    pub reserved_job_id: Option<String>,
    pub job_specification: Option<JobSpecification>,
    pub claimed_job_id: Option<String>,
    pub job_directory: Option<PathBuf>,
    pub next_job_status: Option<JobStatus>,
    pub next_job_status_message: Option<String>,
    pub job_launched: bool,
    pub process_result: Option<ProcessResult>,
    pub started_services: BTreeSet<ServiceKind>,
    pub final_job_status: Option<JobStatus>,
    pub final_job_status_message: Option<String>,
    execution_id: Uuid,
    status: watch::Sender<Option<JobStatus>>,
    kill_token: CancellationToken,
    state_history: Vec<State>,
    attempts: BTreeMap<State, u32>,
    fatal_errors: Vec<TransitionError>,
    aborted: bool,
    started_at: DateTime<Utc>,
}

impl ExecutionContext {
    pub fn new(agent_client_metadata: AgentClientMetadata, job_request: JobRequest) -> Self {
        let (status, _) = watch::channel(None);
        Self {
            agent_client_metadata,
            job_request,
            reserved_job_id: None,
            job_specification: None,
            claimed_job_id: None,
            job_directory: None,
            next_job_status: None,
            next_job_status_message: None,
            job_launched: false,
            process_result: None,
            started_services: BTreeSet::new(),
            final_job_status: None,
            final_job_status_message: None,
            execution_id: Uuid::new_v4(),
            status,
            kill_token: CancellationToken::new(),
            state_history: Vec::new(),
            attempts: BTreeMap::new(),
            fatal_errors: Vec::new(),
            aborted: false,
            started_at: Utc::now(),
        }
    }

    /// Use an externally owned kill token, e.g. one shared with a signal handler.
    pub fn with_kill_token(mut self, token: CancellationToken) -> Self {
        self.kill_token = token;
        self
    }

    /// Identifies this run in logs and in the report, before any job id exists.
    pub fn execution_id(&self) -> Uuid {
        self.execution_id
    }

    pub fn current_job_status(&self) -> Option<JobStatus> {
        *self.status.borrow()
    }

    pub fn set_current_job_status(&self, status: JobStatus) {
        self.status.send_replace(Some(status));
    }

    /// Observe status changes from another task.
    pub fn subscribe_status(&self) -> watch::Receiver<Option<JobStatus>> {
        self.status.subscribe()
    }

    pub fn set_next_job_status(&mut self, status: JobStatus, message: impl Into<String>) {
        self.next_job_status = Some(status);
        self.next_job_status_message = Some(message.into());
    }

    pub fn kill_token(&self) -> CancellationToken {
        self.kill_token.clone()
    }

    pub fn is_kill_requested(&self) -> bool {
        self.kill_token.is_cancelled()
    }

    pub fn is_aborted(&self) -> bool {
        self.aborted
    }

    /// Record a fatal failure. The first one recorded is the run's failure cause.
    pub(crate) fn record_fatal(&mut self, error: TransitionError) {
        self.aborted = true;
        self.fatal_errors.push(error);
    }

    pub fn fatal_errors(&self) -> &[TransitionError] {
        &self.fatal_errors
    }

    pub fn failure_cause(&self) -> Option<&TransitionError> {
        self.fatal_errors.first()
    }

    pub(crate) fn enter_state(&mut self, state: State) {
        if self.state_history.last() != Some(&state) {
            self.state_history.push(state);
        }
    }

    pub fn state_history(&self) -> &[State] {
        &self.state_history
    }

    /// Count an attempt at `state`, returning the attempt number.
    pub(crate) fn count_attempt(&mut self, state: State) -> u32 {
        let attempts = self.attempts.entry(state).or_insert(0);
        *attempts += 1;
        *attempts
    }

    pub fn attempts(&self, state: State) -> u32 {
        self.attempts.get(&state).copied().unwrap_or(0)
    }

    /// Build the record returned once the driver stops.
    pub fn report(&self, terminal_state: State) -> ExecutionReport {
        let now = Utc::now();
        ExecutionReport {
            execution_id: self.execution_id,
            job_id: self
                .claimed_job_id
                .clone()
                .or_else(|| self.reserved_job_id.clone()),
            terminal_state,
            final_status: self.final_job_status,
            final_status_message: self.final_job_status_message.clone(),
            state_transitions: self.state_history.clone(),
            attempts: self.attempts.clone(),
            failure_cause: self.failure_cause().map(|e| e.to_string()),
            process_result: self.process_result,
            started_at: self.started_at,
            completed_at: now,
            duration_ms: (now - self.started_at).num_milliseconds(),
        }
    }
}
