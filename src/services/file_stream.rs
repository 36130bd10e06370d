//! Keeps the control plane's view of the job's output files current.

use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

use super::{
    FileStreamError, FileStreamService, ManagedService, ManifestSink, ServiceError, ServiceTarget,
};
use crate::control_plane::{JobManifest, ManifestEntry};
use crate::state_machine::ServiceKind;

#[derive(Debug)]
struct Streaming {
    job_id: String,
    directory: PathBuf,
    stop: CancellationToken,
    task: JoinHandle<()>,
}

/// Pushes the job directory's file listing to the control plane on a fixed
/// schedule, and on demand through [`FileStreamService::force_sync`].
pub struct ManifestStreamer {
    sink: Arc<dyn ManifestSink>,
    interval: Duration,
    streaming: Mutex<Option<Streaming>>,
}

impl ManifestStreamer {
    pub fn new(sink: Arc<dyn ManifestSink>, interval: Duration) -> Self {
        Self {
            sink,
            interval,
            streaming: Mutex::new(None),
        }
    }

    fn target(&self) -> Option<(String, PathBuf)> {
        self.streaming
            .lock()
            .ok()?
            .as_ref()
            .map(|s| (s.job_id.clone(), s.directory.clone()))
    }
}

/// List every regular file under `root`, with paths relative to it.
pub async fn scan_directory(root: &Path) -> std::io::Result<JobManifest> {
    let mut entries = Vec::new();
    let mut pending = vec![root.to_path_buf()];
    while let Some(dir) = pending.pop() {
        let mut read_dir = tokio::fs::read_dir(&dir).await?;
        while let Some(entry) = read_dir.next_entry().await? {
            let metadata = entry.metadata().await?;
            let path = entry.path();
            if metadata.is_dir() {
                pending.push(path);
            } else if metadata.is_file() {
                let relative = path.strip_prefix(root).unwrap_or(&path);
                entries.push(ManifestEntry {
                    path: relative.to_string_lossy().replace('\\', "/"),
                    size: metadata.len(),
                    modified: metadata.modified().ok().map(DateTime::<Utc>::from),
                });
            }
        }
    }
    entries.sort_by(|a, b| a.path.cmp(&b.path));
    Ok(JobManifest { entries })
}

async fn sync_once(
    sink: &dyn ManifestSink,
    job_id: &str,
    directory: &Path,
) -> Result<(), FileStreamError> {
    let manifest = scan_directory(directory).await?;
    sink.push_manifest(job_id, &manifest).await?;
    tracing::debug!(
        job_id,
        files = manifest.entries.len(),
        bytes = manifest.total_size(),
        "manifest pushed"
    );
    Ok(())
}

#[async_trait]
impl ManagedService for ManifestStreamer {
    fn kind(&self) -> ServiceKind {
        ServiceKind::FileStream
    }

    async fn start(&self, target: &ServiceTarget) -> Result<(), ServiceError> {
        let directory = target.job_directory.clone().ok_or_else(|| ServiceError::Start {
            service: ServiceKind::FileStream,
            message: "no job directory to stream".to_string(),
        })?;
        let mut guard = self.streaming.lock().map_err(|_| ServiceError::Start {
            service: ServiceKind::FileStream,
            message: "state lock poisoned".to_string(),
        })?;
        if guard.is_some() {
            return Err(ServiceError::Start {
                service: ServiceKind::FileStream,
                message: "already started".to_string(),
            });
        }
        if self.interval.is_zero() {
            return Err(ServiceError::Start {
                service: ServiceKind::FileStream,
                message: "interval must be greater than zero".to_string(),
            });
        }

        let stop = CancellationToken::new();
        let task = {
            let sink = self.sink.clone();
            let stop = stop.clone();
            let job_id = target.job_id.clone();
            let directory = directory.clone();
            let period = self.interval;
            tokio::spawn(async move {
                let mut ticker = tokio::time::interval(period);
                ticker.tick().await;
                loop {
                    tokio::select! {
                        _ = stop.cancelled() => break,
                        _ = ticker.tick() => {
                            if let Err(e) = sync_once(sink.as_ref(), &job_id, &directory).await {
                                tracing::warn!(
                                    %job_id,
                                    error = %e,
                                    "periodic manifest sync failed"
                                );
                            }
                        }
                    }
                }
            })
        };

        tracing::info!(
            job_id = %target.job_id,
            directory = %directory.display(),
            "file stream service started"
        );
        *guard = Some(Streaming {
            job_id: target.job_id.clone(),
            directory,
            stop,
            task,
        });
        Ok(())
    }

    async fn stop(&self) -> Result<(), ServiceError> {
        let streaming = self
            .streaming
            .lock()
            .map_err(|_| ServiceError::Stop {
                service: ServiceKind::FileStream,
                message: "state lock poisoned".to_string(),
            })?
            .take();
        let Some(streaming) = streaming else {
            return Ok(());
        };
        streaming.stop.cancel();
        streaming.task.await.map_err(|e| ServiceError::Stop {
            service: ServiceKind::FileStream,
            message: e.to_string(),
        })?;
        tracing::info!(job_id = %streaming.job_id, "file stream service stopped");
        Ok(())
    }
}

#[async_trait]
impl FileStreamService for ManifestStreamer {
    /// Nothing to push before the service is started; that counts as synced.
    async fn force_sync(&self) -> Result<(), FileStreamError> {
        let Some((job_id, directory)) = self.target() else {
            tracing::debug!("force sync requested before file stream start, nothing to push");
            return Ok(());
        };
        sync_once(self.sink.as_ref(), &job_id, &directory).await
    }
}
