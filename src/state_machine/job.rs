use std::collections::BTreeMap;
use std::fmt;
use std::time::Duration;

use chrono::{DateTime, Utc};
use rand::Rng;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use super::state::State;

/// Status of a job as tracked by the control plane.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum JobStatus {
    Reserved,
    Resolved,
    Claimed,
    Init,
    Running,
    Succeeded,
    Killed,
    Failed,
    Invalid,
}

impl JobStatus {
    /// Whether the job has reached a user-visible final status.
    pub fn is_finished(&self) -> bool {
        matches!(
            self,
            JobStatus::Succeeded | JobStatus::Killed | JobStatus::Failed | JobStatus::Invalid
        )
    }
}

impl fmt::Display for JobStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            JobStatus::Reserved => "RESERVED",
            JobStatus::Resolved => "RESOLVED",
            JobStatus::Claimed => "CLAIMED",
            JobStatus::Init => "INIT",
            JobStatus::Running => "RUNNING",
            JobStatus::Succeeded => "SUCCEEDED",
            JobStatus::Killed => "KILLED",
            JobStatus::Failed => "FAILED",
            JobStatus::Invalid => "INVALID",
        };
        f.write_str(s)
    }
}

/// Fixed status messages sent alongside status changes.
pub mod status_messages {
    pub const JOB_INITIALIZING: &str = "Job is initializing";
    pub const JOB_RUNNING: &str = "Job is running";
    pub const JOB_FINISHED_SUCCESSFULLY: &str = "Job finished successfully";
    pub const JOB_KILLED: &str = "Job was killed";
}

/// Identifies the agent towards the control plane.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AgentClientMetadata {
    pub hostname: String,
    pub version: String,
    pub pid: u32,
}

impl AgentClientMetadata {
    /// Metadata describing the current process.
    pub fn current() -> Self {
        let hostname = std::env::var("HOSTNAME")
            .ok()
            .filter(|h| !h.is_empty())
            .unwrap_or_else(|| "localhost".to_string());
        Self {
            hostname,
            version: env!("CARGO_PKG_VERSION").to_string(),
            pid: std::process::id(),
        }
    }
}

/// What the agent was asked to run.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct JobRequest {
    /// Id reserved ahead of time by an API submission. When present, the
    /// agent adopts it instead of reserving a new one.
    #[serde(default)]
    pub requested_id: Option<String>,
    pub name: String,
    #[serde(default)]
    pub command: Vec<String>,
}

/// The resolved definition of a job, as handed out by the control plane.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct JobSpecification {
    pub job_id: String,
    pub executable: String,
    #[serde(default)]
    pub args: Vec<String>,
    #[serde(default)]
    pub environment: BTreeMap<String, String>,
}

impl JobSpecification {
    /// Check the specification is runnable.
    pub fn validate(&self) -> Result<(), String> {
        if self.job_id.trim().is_empty() {
            return Err("job specification has an empty job id".to_string());
        }
        if self.executable.trim().is_empty() {
            return Err("job specification has an empty executable".to_string());
        }
        Ok(())
    }
}

/// How the user process exited.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProcessResult {
    /// `None` when the process was terminated by a signal.
    pub exit_code: Option<i32>,
    /// Set when the process was stopped on request rather than exiting on its own.
    pub killed: bool,
}

impl ProcessResult {
    pub fn exited(code: i32) -> Self {
        Self {
            exit_code: Some(code),
            killed: false,
        }
    }

    pub fn killed() -> Self {
        Self {
            exit_code: None,
            killed: true,
        }
    }

    /// The final job status this process outcome maps to.
    pub fn final_status(&self) -> JobStatus {
        if self.killed {
            JobStatus::Killed
        } else if self.exit_code == Some(0) {
            JobStatus::Succeeded
        } else {
            JobStatus::Failed
        }
    }

    pub fn status_message(&self) -> String {
        match (self.killed, self.exit_code) {
            (true, _) => status_messages::JOB_KILLED.to_string(),
            (false, Some(0)) => status_messages::JOB_FINISHED_SUCCESSFULLY.to_string(),
            (false, Some(code)) => format!("Job failed with exit code {code}"),
            (false, None) => "Job process terminated by a signal".to_string(),
        }
    }
}

/// Configuration for retry behavior.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RetryConfig {
    /// Attempts allowed per state before a retryable failure becomes fatal.
    pub max_attempts: u32,
    /// Base delay in milliseconds for exponential backoff.
    pub base_delay_ms: u64,
    /// Upper bound for a single backoff delay.
    pub max_delay_ms: u64,
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            max_attempts: 5,
            base_delay_ms: 500,
            max_delay_ms: 10_000,
        }
    }
}

impl RetryConfig {
    /// Calculate the delay for a given retry attempt using exponential backoff.
    /// delay = min(base_delay_ms * 2^(attempt - 1), max_delay_ms)
    pub fn delay_for_attempt(&self, attempt: u32) -> u64 {
        let exp = attempt.saturating_sub(1).min(32);
        self.base_delay_ms
            .saturating_mul(2u64.saturating_pow(exp))
            .min(self.max_delay_ms)
    }

    /// Backoff with equal jitter: half the exponential delay, plus a random
    /// share of the other half.
    pub fn jittered_delay(&self, attempt: u32) -> Duration {
        let ceiling = self.delay_for_attempt(attempt);
        let half = ceiling / 2;
        let jitter = if ceiling > half {
            rand::rng().random_range(0..=ceiling - half)
        } else {
            0
        };
        Duration::from_millis(half + jitter)
    }
}

/// Structured record produced when the state machine stops.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ExecutionReport {
    pub execution_id: Uuid,
    pub job_id: Option<String>,
    pub terminal_state: State,
    pub final_status: Option<JobStatus>,
    pub final_status_message: Option<String>,
    pub state_transitions: Vec<State>,
    pub attempts: BTreeMap<State, u32>,
    /// First fatal cause recorded during the run, rendered as text.
    pub failure_cause: Option<String>,
    pub process_result: Option<ProcessResult>,
    pub started_at: DateTime<Utc>,
    pub completed_at: DateTime<Utc>,
    pub duration_ms: i64,
}

impl ExecutionReport {
    pub fn succeeded(&self) -> bool {
        self.terminal_state == State::Done && self.final_status == Some(JobStatus::Succeeded)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn retry_config_exponential_backoff() {
        let config = RetryConfig {
            max_attempts: 5,
            base_delay_ms: 1000,
            max_delay_ms: 60_000,
        };
        assert_eq!(config.delay_for_attempt(1), 1000);
        assert_eq!(config.delay_for_attempt(2), 2000);
        assert_eq!(config.delay_for_attempt(3), 4000);
        assert_eq!(config.delay_for_attempt(4), 8000);
    }

    #[test]
    fn retry_delay_is_capped() {
        let config = RetryConfig {
            max_attempts: 50,
            base_delay_ms: 1000,
            max_delay_ms: 5000,
        };
        assert_eq!(config.delay_for_attempt(4), 5000);
        assert_eq!(config.delay_for_attempt(40), 5000);
        for attempt in 1..20 {
            let delay = config.jittered_delay(attempt);
            assert!(delay <= Duration::from_millis(5000), "{delay:?}");
            assert!(delay >= Duration::from_millis(config.delay_for_attempt(attempt) / 2));
        }
    }

    #[test]
    fn zero_base_delay_never_sleeps() {
        let config = RetryConfig {
            max_attempts: 3,
            base_delay_ms: 0,
            max_delay_ms: 0,
        };
        assert_eq!(config.jittered_delay(3), Duration::ZERO);
    }

    #[test]
    fn process_result_maps_to_final_status() {
        assert_eq!(ProcessResult::exited(0).final_status(), JobStatus::Succeeded);
        assert_eq!(ProcessResult::exited(3).final_status(), JobStatus::Failed);
        assert_eq!(ProcessResult::killed().final_status(), JobStatus::Killed);
        assert_eq!(
            ProcessResult::exited(3).status_message(),
            "Job failed with exit code 3"
        );
    }

    #[test]
    fn job_status_wire_names() {
        let json = serde_json::to_string(&JobStatus::Succeeded).unwrap();
        assert_eq!(json, r#""SUCCEEDED""#);
        assert_eq!(JobStatus::Init.to_string(), "INIT");
        assert!(JobStatus::Killed.is_finished());
        assert!(!JobStatus::Running.is_finished());
    }

    #[test]
    fn specification_validation() {
        let spec = JobSpecification {
            job_id: "job-1".into(),
            executable: " ".into(),
            args: vec![],
            environment: BTreeMap::new(),
        };
        assert!(spec.validate().is_err());
    }
}
