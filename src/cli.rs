//! Interface de linha de comando do agente baseada em clap.
//!
//! Define a struct [`Cli`] com subcomandos [`Command`] (exec, states)
//! e flags globais (--config, --server, --verbose).

use std::path::PathBuf;

use clap::{Parser, Subcommand};

use crate::config::DEFAULT_CONFIG_FILE;

/// Agente que executa um job do início ao fim: reserva, claim, execução e
/// relatório final.
#[derive(Debug, Parser)]
#[command(name = "job-agent", version, about)]
pub struct Cli {
    #[command(subcommand)]
    pub command: Command,

    /// Caminho do arquivo de configuração.
    #[arg(long, global = true, default_value = DEFAULT_CONFIG_FILE)]
    pub config: PathBuf,

    /// URL do control plane; sobrescreve a configuração.
    #[arg(long, global = true)]
    pub server: Option<String>,

    /// Habilita saída detalhada (verbose).
    #[arg(long, short, global = true, default_value_t = false)]
    pub verbose: bool,
}

#[derive(Debug, Subcommand)]
pub enum Command {
    /// Executa um comando como job.
    Exec {
        /// Id já reservado pelo control plane.
        #[arg(long)]
        job_id: Option<String>,

        /// Nome do job; por padrão, o nome do executável.
        #[arg(long)]
        name: Option<String>,

        /// Comando e argumentos a executar.
        #[arg(last = true, required = true, num_args = 1..)]
        command: Vec<String>,
    },

    /// Mostra o grafo de estados do ciclo de vida.
    States,
}

impl Command {
    /// Nome do job para `exec`: `--name`, ou o nome do executável.
    pub fn job_name(name: Option<&str>, command: &[String]) -> String {
        if let Some(name) = name
            && !name.trim().is_empty()
        {
            return name.to_string();
        }
        command
            .first()
            .map(|exe| {
                std::path::Path::new(exe)
                    .file_name()
                    .map(|n| n.to_string_lossy().into_owned())
                    .unwrap_or_else(|| exe.clone())
            })
            .unwrap_or_else(|| "job".to_string())
    }
}
