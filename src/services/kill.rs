use std::sync::Mutex;

use async_trait::async_trait;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

use super::{ManagedService, ServiceError, ServiceTarget};
use crate::state_machine::ServiceKind;

/// Turns operator kill requests (SIGINT, SIGTERM) into a cancelled job kill
/// token for as long as the job runs.
#[derive(Default)]
pub struct KillService {
    running: Mutex<Option<(CancellationToken, JoinHandle<()>)>>,
}

impl KillService {
    pub fn new() -> Self {
        Self::default()
    }
}

#[cfg(unix)]
async fn kill_requested() -> std::io::Result<&'static str> {
    use tokio::signal::unix::{SignalKind, signal};

    let mut sigterm = signal(SignalKind::terminate())?;
    let mut sigint = signal(SignalKind::interrupt())?;
    tokio::select! {
        _ = sigterm.recv() => Ok("SIGTERM"),
        _ = sigint.recv() => Ok("SIGINT"),
    }
}

#[cfg(not(unix))]
async fn kill_requested() -> std::io::Result<&'static str> {
    tokio::signal::ctrl_c().await?;
    Ok("ctrl-c")
}

#[async_trait]
impl ManagedService for KillService {
    fn kind(&self) -> ServiceKind {
        ServiceKind::Kill
    }

    async fn start(&self, target: &ServiceTarget) -> Result<(), ServiceError> {
        let mut running = self.running.lock().map_err(|_| ServiceError::Start {
            service: ServiceKind::Kill,
            message: "state lock poisoned".to_string(),
        })?;
        if running.is_some() {
            return Err(ServiceError::Start {
                service: ServiceKind::Kill,
                message: "already started".to_string(),
            });
        }

        let stop = CancellationToken::new();
        let task = {
            let stop = stop.clone();
            let kill_token = target.kill_token.clone();
            let job_id = target.job_id.clone();
            tokio::spawn(async move {
                tokio::select! {
                    _ = stop.cancelled() => {}
                    signal = kill_requested() => match signal {
                        Ok(name) => {
                            tracing::warn!(%job_id, signal = name, "kill requested, stopping job");
                            kill_token.cancel();
                        }
                        Err(e) => {
                            tracing::error!(
                                %job_id,
                                error = %e,
                                "failed to install kill signal handler"
                            );
                        }
                    },
                }
            })
        };
        tracing::info!(job_id = %target.job_id, "kill service started");
        *running = Some((stop, task));
        Ok(())
    }

    async fn stop(&self) -> Result<(), ServiceError> {
        let running = self
            .running
            .lock()
            .map_err(|_| ServiceError::Stop {
                service: ServiceKind::Kill,
                message: "state lock poisoned".to_string(),
            })?
            .take();
        if let Some((stop, task)) = running {
            stop.cancel();
            task.await.map_err(|e| ServiceError::Stop {
                service: ServiceKind::Kill,
                message: e.to_string(),
            })?;
            tracing::info!("kill service stopped");
        }
        Ok(())
    }
}
