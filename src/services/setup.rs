use std::path::PathBuf;

use async_trait::async_trait;

use super::{JobSetupService, SetupError};
use crate::state_machine::JobSpecification;

/// File the resolved specification is saved to, inside the job directory.
pub const SPECIFICATION_FILE: &str = "job.json";
pub const LOGS_DIR: &str = "logs";

/// Creates job directories under a local root.
#[derive(Debug, Clone)]
pub struct LocalJobSetup {
    jobs_root: PathBuf,
}

impl LocalJobSetup {
    pub fn new(jobs_root: impl Into<PathBuf>) -> Self {
        Self {
            jobs_root: jobs_root.into(),
        }
    }
}

#[async_trait]
impl JobSetupService for LocalJobSetup {
    async fn create_job_directory(&self, spec: &JobSpecification) -> Result<PathBuf, SetupError> {
        spec.validate().map_err(SetupError::InvalidSpecification)?;
        if spec.job_id.contains(['/', '\\']) || spec.job_id == ".." || spec.job_id == "." {
            return Err(SetupError::InvalidSpecification(format!(
                "job id {:?} is not a valid directory name",
                spec.job_id
            )));
        }

        let dir = self.jobs_root.join(&spec.job_id);
        tokio::fs::create_dir_all(dir.join(LOGS_DIR)).await?;
        let snapshot = serde_json::to_vec_pretty(spec)?;
        tokio::fs::write(dir.join(SPECIFICATION_FILE), snapshot).await?;

        tracing::info!(job_id = %spec.job_id, directory = %dir.display(), "job directory created");
        Ok(dir)
    }
}
