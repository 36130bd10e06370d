//! Tipos de dados trocados com o control plane.
//!
//! Todas as structs derivam `Serialize` e `Deserialize` e usam `camelCase`
//! no JSON, conforme a API de agentes do control plane.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::state_machine::{AgentClientMetadata, JobStatus};

/// Corpo da requisição de reserva de um job.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ReserveJobRequest {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub requested_id: Option<String>,
    pub name: String,
    pub command: Vec<String>,
    pub agent_metadata: AgentClientMetadata,
}

/// Resposta da reserva: o id atribuído ao job.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ReserveJobResponse {
    pub id: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ClaimJobRequest {
    pub agent_metadata: AgentClientMetadata,
}

/// Mudança de status reportada pelo agente.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ChangeJobStatusRequest {
    pub current_status: Option<JobStatus>,
    pub new_status: JobStatus,
    pub message: String,
}

/// Listagem dos arquivos de saída de um job.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct JobManifest {
    pub entries: Vec<ManifestEntry>,
}

impl JobManifest {
    pub fn total_size(&self) -> u64 {
        self.entries.iter().map(|e| e.size).sum()
    }
}

/// Um arquivo do diretório do job, com caminho relativo à raiz do diretório.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ManifestEntry {
    pub path: String,
    pub size: u64,
    pub modified: Option<DateTime<Utc>>,
}
