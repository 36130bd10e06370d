use std::process::ExitCode;
use std::sync::Arc;

use anyhow::Result;
use clap::Parser;
use tokio_util::sync::CancellationToken;
use tracing_subscriber::EnvFilter;

use job_agent::cli::{Cli, Command};
use job_agent::config::AgentConfig;
use job_agent::control_plane::ControlPlaneClient;
use job_agent::error::{AgentError, exit_code};
use job_agent::orchestrator::{Collaborators, JobAgent};
use job_agent::services::{
    HeartbeatService, KillService, LocalJobSetup, LocalProcessManager, ManifestStreamer,
};
use job_agent::state_machine::{AgentClientMetadata, JobRequest, TransitionGraph};
use job_agent::ui::{TerminalConsole, print_report};

#[tokio::main]
async fn main() -> Result<ExitCode> {
    let cli = Cli::parse();

    let default_level = if cli.verbose { "debug" } else { "info" };
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_level)),
        )
        .with_writer(std::io::stderr)
        .init();

    match cli.command {
        Command::States => {
            print_states();
            Ok(ExitCode::SUCCESS)
        }
        Command::Exec {
            job_id,
            name,
            command,
        } => {
            let config = AgentConfig::load(&cli.config)?.with_server_override(cli.server);
            let request = JobRequest {
                requested_id: job_id,
                name: Command::job_name(name.as_deref(), &command),
                command,
            };
            let code = exec(&config, request, cli.verbose).await?;
            Ok(ExitCode::from(code))
        }
    }
}

async fn exec(config: &AgentConfig, request: JobRequest, verbose: bool) -> Result<u8, AgentError> {
    if !config.server_url.starts_with("http://") && !config.server_url.starts_with("https://") {
        return Err(AgentError::Config(format!(
            "server_url must be an http(s) URL, got {:?}",
            config.server_url
        )));
    }
    tokio::fs::create_dir_all(&config.jobs_root).await?;

    let client = Arc::new(ControlPlaneClient::new(
        &config.server_url,
        config.connect_timeout(),
        config.request_timeout(),
    )?);
    let streamer = Arc::new(ManifestStreamer::new(
        client.clone(),
        config.manifest_sync_interval(),
    ));
    let collaborators = Collaborators {
        reservations: client.clone(),
        specifications: client.clone(),
        claims: client.clone(),
        statuses: client.clone(),
        setup: Arc::new(LocalJobSetup::new(&config.jobs_root)),
        processes: Arc::new(LocalProcessManager::new()),
        file_stream: streamer.clone(),
        file_stream_service: streamer,
        heartbeat: Arc::new(HeartbeatService::new(
            client.clone(),
            config.heartbeat_interval(),
        )),
        kill: Arc::new(KillService::new()),
    };

    let console = Arc::new(TerminalConsole::start(&request.name));
    let agent = JobAgent::new(collaborators, config.retry(), console);

    tracing::info!(server = %config.server_url, name = %request.name, "executing job");
    let report = agent
        .run(AgentClientMetadata::current(), request, CancellationToken::new())
        .await?;

    if verbose {
        print_report(&report);
    }
    Ok(exit_code(&report))
}

fn print_states() {
    let graph = TransitionGraph::standard();
    for (state, edges) in graph.states() {
        println!(
            "{state:<32} ok -> {:<32} aborted -> {:<32} fatal -> {}",
            edges.on_success, edges.on_success_aborted, edges.on_fatal
        );
    }
}
