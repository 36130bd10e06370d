//! Tipos de erro para o cliente do control plane.
//!
//! Define [`ControlPlaneError`] e a classificação entre falhas transitórias
//! (vale a pena tentar de novo) e permanentes.

use thiserror::Error;

/// Erros que podem ocorrer ao falar com o control plane.
#[derive(Debug, Error)]
pub enum ControlPlaneError {
    /// Falha de rede subjacente (DNS, conexão recusada, timeout).
    #[error("network error: {0}")]
    Network(#[from] reqwest::Error),

    /// O servidor respondeu com um status HTTP de erro.
    #[error("control plane error (status {status}): {message}")]
    Status { status: u16, message: String },

    #[error("job {0} not found")]
    NotFound(String),

    /// Resposta recebida mas inutilizável.
    #[error("invalid response: {0}")]
    InvalidResponse(String),
}

impl ControlPlaneError {
    /// Whether retrying the same call may succeed.
    pub fn is_transient(&self) -> bool {
        match self {
            ControlPlaneError::Network(e) => e.is_timeout() || e.is_connect() || e.is_request(),
            ControlPlaneError::Status { status, .. } => *status >= 500 || *status == 429,
            ControlPlaneError::NotFound(_) | ControlPlaneError::InvalidResponse(_) => false,
        }
    }
}
