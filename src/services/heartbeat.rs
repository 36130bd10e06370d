use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

use super::{HeartbeatSink, ManagedService, ServiceError, ServiceTarget};
use crate::state_machine::ServiceKind;

/// Tells the control plane the agent is alive while the job runs.
///
/// Ping failures are logged and otherwise ignored; the control plane decides
/// what a silent agent means.
pub struct HeartbeatService {
    sink: Arc<dyn HeartbeatSink>,
    interval: Duration,
    running: Mutex<Option<(CancellationToken, JoinHandle<()>)>>,
}

impl HeartbeatService {
    pub fn new(sink: Arc<dyn HeartbeatSink>, interval: Duration) -> Self {
        Self {
            sink,
            interval,
            running: Mutex::new(None),
        }
    }
}

#[async_trait]
impl ManagedService for HeartbeatService {
    fn kind(&self) -> ServiceKind {
        ServiceKind::Heartbeat
    }

    async fn start(&self, target: &ServiceTarget) -> Result<(), ServiceError> {
        let mut running = self.running.lock().map_err(|_| ServiceError::Start {
            service: ServiceKind::Heartbeat,
            message: "state lock poisoned".to_string(),
        })?;
        if running.is_some() {
            return Err(ServiceError::Start {
                service: ServiceKind::Heartbeat,
                message: "already started".to_string(),
            });
        }
        if self.interval.is_zero() {
            return Err(ServiceError::Start {
                service: ServiceKind::Heartbeat,
                message: "interval must be greater than zero".to_string(),
            });
        }

        let stop = CancellationToken::new();
        let task = {
            let sink = self.sink.clone();
            let stop = stop.clone();
            let job_id = target.job_id.clone();
            let period = self.interval;
            tokio::spawn(async move {
                let mut ticker = tokio::time::interval(period);
                loop {
                    tokio::select! {
                        _ = stop.cancelled() => break,
                        _ = ticker.tick() => {
                            if let Err(e) = sink.heartbeat(&job_id).await {
                                tracing::warn!(%job_id, error = %e, "heartbeat failed");
                            }
                        }
                    }
                }
            })
        };
        tracing::info!(
            job_id = %target.job_id,
            interval_ms = self.interval.as_millis() as u64,
            "heartbeat service started"
        );
        *running = Some((stop, task));
        Ok(())
    }

    async fn stop(&self) -> Result<(), ServiceError> {
        let running = self
            .running
            .lock()
            .map_err(|_| ServiceError::Stop {
                service: ServiceKind::Heartbeat,
                message: "state lock poisoned".to_string(),
            })?
            .take();
        if let Some((stop, task)) = running {
            stop.cancel();
            task.await.map_err(|e| ServiceError::Stop {
                service: ServiceKind::Heartbeat,
                message: e.to_string(),
            })?;
            tracing::info!("heartbeat service stopped");
        }
        Ok(())
    }
}
