use std::time::Duration;

use async_trait::async_trait;
use reqwest::{Client, RequestBuilder, Response, StatusCode};

use super::error::ControlPlaneError;
use super::types::{
    ChangeJobStatusRequest, ClaimJobRequest, JobManifest, ReserveJobRequest, ReserveJobResponse,
};
use crate::services::{
    ClaimError, HeartbeatSink, JobClaimService, JobReservationService, JobSpecificationService,
    JobStatusService, ManifestSink,
};
use crate::state_machine::{AgentClientMetadata, JobRequest, JobSpecification, JobStatus};

const API_PREFIX: &str = "/api/v4/agent/jobs";

/// HTTP client for the control plane's agent API.
#[derive(Debug, Clone)]
pub struct ControlPlaneClient {
    client: Client,
    base_url: String,
}

impl ControlPlaneClient {
    pub fn new(
        base_url: &str,
        connect_timeout: Duration,
        request_timeout: Duration,
    ) -> Result<Self, ControlPlaneError> {
        let client = Client::builder()
            .connect_timeout(connect_timeout)
            .timeout(request_timeout)
            .build()?;
        Ok(Self {
            client,
            base_url: base_url.trim_end_matches('/').to_string(),
        })
    }

    fn jobs_url(&self) -> String {
        format!("{}{API_PREFIX}", self.base_url)
    }

    fn job_url(&self, job_id: &str, action: &str) -> String {
        format!("{}{API_PREFIX}/{job_id}/{action}", self.base_url)
    }

    /// Send a request, turning non-success statuses into errors.
    async fn send(&self, req: RequestBuilder, job_id: &str) -> Result<Response, ControlPlaneError> {
        let response = req.send().await?;
        let status = response.status();
        if status.is_success() {
            return Ok(response);
        }
        if status == StatusCode::NOT_FOUND {
            return Err(ControlPlaneError::NotFound(job_id.to_string()));
        }
        let message = response
            .text()
            .await
            .unwrap_or_else(|_| "unknown error".to_string());
        Err(ControlPlaneError::Status {
            status: status.as_u16(),
            message,
        })
    }
}

#[async_trait]
impl JobReservationService for ControlPlaneClient {
    async fn reserve_job_id(
        &self,
        request: &JobRequest,
        metadata: &AgentClientMetadata,
    ) -> Result<String, ControlPlaneError> {
        let body = ReserveJobRequest {
            requested_id: request.requested_id.clone(),
            name: request.name.clone(),
            command: request.command.clone(),
            agent_metadata: metadata.clone(),
        };
        let response = self
            .send(self.client.post(self.jobs_url()).json(&body), &request.name)
            .await?;
        let reserved = response
            .json::<ReserveJobResponse>()
            .await
            .map_err(|e| ControlPlaneError::InvalidResponse(e.to_string()))?;
        if reserved.id.trim().is_empty() {
            return Err(ControlPlaneError::InvalidResponse(
                "reservation returned an empty job id".to_string(),
            ));
        }
        Ok(reserved.id)
    }
}

#[async_trait]
impl JobSpecificationService for ControlPlaneClient {
    async fn resolve_job_specification(
        &self,
        job_id: &str,
    ) -> Result<JobSpecification, ControlPlaneError> {
        let response = self
            .send(self.client.get(self.job_url(job_id, "specification")), job_id)
            .await?;
        response
            .json::<JobSpecification>()
            .await
            .map_err(|e| ControlPlaneError::InvalidResponse(e.to_string()))
    }
}

#[async_trait]
impl JobClaimService for ControlPlaneClient {
    async fn claim_job(
        &self,
        job_id: &str,
        metadata: &AgentClientMetadata,
    ) -> Result<(), ClaimError> {
        let body = ClaimJobRequest {
            agent_metadata: metadata.clone(),
        };
        match self
            .send(self.client.put(self.job_url(job_id, "claim")).json(&body), job_id)
            .await
        {
            Ok(_) => Ok(()),
            Err(ControlPlaneError::Status { status, message })
                if status == StatusCode::CONFLICT.as_u16() =>
            {
                Err(ClaimError::ReservationConflict {
                    job_id: job_id.to_string(),
                    message,
                })
            }
            Err(e) => Err(e.into()),
        }
    }
}

#[async_trait]
impl JobStatusService for ControlPlaneClient {
    async fn change_job_status(
        &self,
        job_id: &str,
        current: Option<JobStatus>,
        next: JobStatus,
        message: &str,
    ) -> Result<(), ControlPlaneError> {
        let body = ChangeJobStatusRequest {
            current_status: current,
            new_status: next,
            message: message.to_string(),
        };
        self.send(self.client.put(self.job_url(job_id, "status")).json(&body), job_id)
            .await?;
        Ok(())
    }
}

#[async_trait]
impl ManifestSink for ControlPlaneClient {
    async fn push_manifest(
        &self,
        job_id: &str,
        manifest: &JobManifest,
    ) -> Result<(), ControlPlaneError> {
        self.send(
            self.client.put(self.job_url(job_id, "manifest")).json(manifest),
            job_id,
        )
        .await?;
        Ok(())
    }
}

#[async_trait]
impl HeartbeatSink for ControlPlaneClient {
    async fn heartbeat(&self, job_id: &str) -> Result<(), ControlPlaneError> {
        self.send(self.client.put(self.job_url(job_id, "heartbeat")), job_id)
            .await?;
        Ok(())
    }
}
