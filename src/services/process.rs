//! Launches the job's command as a local child process.

use std::process::Stdio;
use std::sync::Mutex;
use std::sync::atomic::{AtomicBool, Ordering};

use async_trait::async_trait;
use tokio::process::{Child, Command};
use tokio::sync::watch;
use tokio_util::sync::CancellationToken;

use super::{LaunchRequest, ProcessError, ProcessManager};
use crate::state_machine::ProcessResult;

pub const STDOUT_FILE: &str = "stdout";
pub const STDERR_FILE: &str = "stderr";

/// Handle on the supervisor task that owns the child.
#[derive(Debug, Clone)]
struct Supervised {
    /// Cancelling kills the child.
    kill: CancellationToken,
    /// The job's kill token; interrupts waits.
    interrupt: CancellationToken,
    result: watch::Receiver<Option<ProcessResult>>,
}

/// Runs the job as a child process of the agent.
///
/// A supervisor task owns the child, so waiting and killing never contend
/// for it: the task reports the exit through a watch channel and kills the
/// child when either the job's kill token or [`ProcessManager::kill`] fires.
#[derive(Debug, Default)]
pub struct LocalProcessManager {
    launched: AtomicBool,
    supervised: Mutex<Option<Supervised>>,
}

impl LocalProcessManager {
    pub fn new() -> Self {
        Self::default()
    }

    /// Clone the handles out so no lock is held across an await.
    fn supervised(&self) -> Result<Supervised, ProcessError> {
        let guard = self
            .supervised
            .lock()
            .map_err(|_| ProcessError::SupervisorLost)?;
        guard.clone().ok_or(ProcessError::NotLaunched)
    }
}

fn spawn(request: &LaunchRequest) -> Result<Child, ProcessError> {
    let stdout = std::fs::File::create(request.working_directory.join(STDOUT_FILE))?;
    let stderr = std::fs::File::create(request.working_directory.join(STDERR_FILE))?;

    let mut cmd = Command::new(&request.executable);
    cmd.args(&request.args)
        .envs(request.environment.iter().map(|(k, v)| (k.as_str(), v.as_str())))
        .current_dir(&request.working_directory)
        .stdin(Stdio::null())
        .stdout(Stdio::from(stdout))
        .stderr(Stdio::from(stderr))
        .kill_on_drop(true);

    cmd.spawn().map_err(|source| ProcessError::Launch {
        executable: request.executable.clone(),
        source,
    })
}

#[async_trait]
impl ProcessManager for LocalProcessManager {
    async fn launch(&self, request: LaunchRequest) -> Result<(), ProcessError> {
        if self.launched.swap(true, Ordering::SeqCst) {
            return Err(ProcessError::AlreadyLaunched);
        }

        let mut child = match spawn(&request) {
            Ok(child) => child,
            Err(e) => {
                self.launched.store(false, Ordering::SeqCst);
                return Err(e);
            }
        };
        let pid = child.id();
        tracing::info!(
            job_id = %request.job_id,
            executable = %request.executable,
            ?pid,
            "job process launched"
        );

        let kill = request.kill_token.child_token();
        let (tx, rx) = watch::channel(None);
        let job_id = request.job_id.clone();
        let supervisor_kill = kill.clone();
        tokio::spawn(async move {
            let result = tokio::select! {
                status = child.wait() => match status {
                    Ok(status) => ProcessResult {
                        exit_code: status.code(),
                        killed: false,
                    },
                    Err(e) => {
                        tracing::error!(%job_id, error = %e, "failed to wait on job process");
                        ProcessResult { exit_code: None, killed: false }
                    }
                },
                _ = supervisor_kill.cancelled() => {
                    if let Err(e) = child.kill().await {
                        tracing::warn!(%job_id, error = %e, "failed to kill job process");
                    }
                    ProcessResult::killed()
                }
            };
            tracing::info!(
                %job_id,
                exit_code = ?result.exit_code,
                killed = result.killed,
                "job process exited"
            );
            tx.send_replace(Some(result));
        });

        let mut guard = self
            .supervised
            .lock()
            .map_err(|_| ProcessError::SupervisorLost)?;
        *guard = Some(Supervised {
            kill,
            interrupt: request.kill_token,
            result: rx,
        });
        Ok(())
    }

    fn is_launched(&self) -> bool {
        self.launched.load(Ordering::SeqCst)
    }

    async fn wait_for_completion(&self) -> Result<ProcessResult, ProcessError> {
        let Supervised {
            interrupt,
            mut result,
            ..
        } = self.supervised()?;
        tokio::select! {
            biased;
            _ = interrupt.cancelled() => Err(ProcessError::Interrupted),
            done = result.wait_for(Option::is_some) => match done {
                Ok(r) => (*r).ok_or(ProcessError::SupervisorLost),
                Err(_) => Err(ProcessError::SupervisorLost),
            },
        }
    }

    async fn kill(&self) -> Result<(), ProcessError> {
        let Supervised {
            kill, mut result, ..
        } = self.supervised()?;
        kill.cancel();
        result
            .wait_for(Option::is_some)
            .await
            .map_err(|_| ProcessError::SupervisorLost)?;
        Ok(())
    }
}
