//! Configuração do agente carregada a partir de `job-agent.toml`.
//!
//! A struct [`AgentConfig`] contém todos os parâmetros configuráveis.
//! Valores não presentes no arquivo usam defaults sensíveis.
//! A variável de ambiente `JOB_AGENT_SERVER_URL` tem precedência sobre o arquivo.

use std::path::{Path, PathBuf};
use std::time::Duration;

use anyhow::{Context, Result, bail};
use serde::Deserialize;

use crate::state_machine::RetryConfig;

/// Nome padrão do arquivo de configuração.
pub const DEFAULT_CONFIG_FILE: &str = "job-agent.toml";

/// Variável de ambiente que sobrescreve `server_url`.
pub const SERVER_URL_ENV: &str = "JOB_AGENT_SERVER_URL";

/// Configuração de nível superior carregada de `job-agent.toml`.
#[derive(Debug, Clone, Deserialize)]
pub struct AgentConfig {
    /// URL base do control plane.
    #[serde(default = "default_server_url")]
    pub server_url: String,

    /// Diretório onde os diretórios de cada job são criados.
    #[serde(default = "default_jobs_root")]
    pub jobs_root: PathBuf,

    /// Timeout total de cada requisição HTTP.
    #[serde(default = "default_request_timeout_ms")]
    pub request_timeout_ms: u64,

    #[serde(default = "default_connect_timeout_ms")]
    pub connect_timeout_ms: u64,

    /// Tentativas por estado antes de uma falha retentável virar fatal.
    #[serde(default = "default_max_attempts")]
    pub max_attempts: u32,

    /// Atraso base em milissegundos para backoff exponencial.
    #[serde(default = "default_base_delay_ms")]
    pub base_delay_ms: u64,

    #[serde(default = "default_max_delay_ms")]
    pub max_delay_ms: u64,

    #[serde(default = "default_heartbeat_interval_ms")]
    pub heartbeat_interval_ms: u64,

    /// Intervalo entre envios periódicos do manifesto de arquivos.
    #[serde(default = "default_manifest_sync_interval_ms")]
    pub manifest_sync_interval_ms: u64,
}

fn default_server_url() -> String {
    "http://localhost:8080".to_string()
}

fn default_jobs_root() -> PathBuf {
    std::env::temp_dir().join("job-agent").join("jobs")
}

// 30s por requisição.
fn default_request_timeout_ms() -> u64 {
    30_000
}

fn default_connect_timeout_ms() -> u64 {
    5_000
}

fn default_max_attempts() -> u32 {
    RetryConfig::default().max_attempts
}

fn default_base_delay_ms() -> u64 {
    RetryConfig::default().base_delay_ms
}

fn default_max_delay_ms() -> u64 {
    RetryConfig::default().max_delay_ms
}

fn default_heartbeat_interval_ms() -> u64 {
    10_000
}

fn default_manifest_sync_interval_ms() -> u64 {
    30_000
}

impl Default for AgentConfig {
    fn default() -> Self {
        Self {
            server_url: default_server_url(),
            jobs_root: default_jobs_root(),
            request_timeout_ms: default_request_timeout_ms(),
            connect_timeout_ms: default_connect_timeout_ms(),
            max_attempts: default_max_attempts(),
            base_delay_ms: default_base_delay_ms(),
            max_delay_ms: default_max_delay_ms(),
            heartbeat_interval_ms: default_heartbeat_interval_ms(),
            manifest_sync_interval_ms: default_manifest_sync_interval_ms(),
        }
    }
}

impl AgentConfig {
    /// Carrega a configuração de `path`.
    /// Usa valores padrão se o arquivo não existir.
    pub fn load(path: &Path) -> Result<Self> {
        let config = if path.exists() {
            let contents = std::fs::read_to_string(path)
                .with_context(|| format!("failed to read {}", path.display()))?;
            toml::from_str::<AgentConfig>(&contents)
                .with_context(|| format!("failed to parse {}", path.display()))?
        } else {
            Self::default()
        };

        config.validate()?;

        // Variável de ambiente tem precedência sobre o arquivo de configuração.
        Ok(config.with_server_override(std::env::var(SERVER_URL_ENV).ok()))
    }

    /// Rejeita valores que os serviços em segundo plano não aceitam.
    pub fn validate(&self) -> Result<()> {
        if self.heartbeat_interval_ms == 0 {
            bail!("heartbeat_interval_ms must be greater than zero");
        }
        if self.manifest_sync_interval_ms == 0 {
            bail!("manifest_sync_interval_ms must be greater than zero");
        }
        Ok(())
    }

    /// Substitui `server_url` quando `url` estiver presente e não vazia.
    pub fn with_server_override(mut self, url: Option<String>) -> Self {
        if let Some(url) = url
            && !url.trim().is_empty()
        {
            self.server_url = url;
        }
        self
    }

    pub fn retry(&self) -> RetryConfig {
        RetryConfig {
            max_attempts: self.max_attempts,
            base_delay_ms: self.base_delay_ms,
            max_delay_ms: self.max_delay_ms,
        }
    }

    pub fn request_timeout(&self) -> Duration {
        Duration::from_millis(self.request_timeout_ms)
    }

    pub fn connect_timeout(&self) -> Duration {
        Duration::from_millis(self.connect_timeout_ms)
    }

    pub fn heartbeat_interval(&self) -> Duration {
        Duration::from_millis(self.heartbeat_interval_ms)
    }

    pub fn manifest_sync_interval(&self) -> Duration {
        Duration::from_millis(self.manifest_sync_interval_ms)
    }
}
