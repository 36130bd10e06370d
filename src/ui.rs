//! Console do usuário — spinners e saída colorida.
//!
//! Os estágios e o driver não escrevem diretamente no terminal: recebem um
//! [`UserConsole`] injetado. [`TerminalConsole`] usa as crates `indicatif`
//! para o spinner e `console` para as cores; [`NoopConsole`] descarta tudo
//! e é usado nos testes.

use std::time::Duration;

use console::Style;
use indicatif::{ProgressBar, ProgressStyle};

use crate::state_machine::{ExecutionReport, JobStatus, State};

/// Mensagens destinadas a quem acompanha o job no terminal.
pub trait UserConsole: Send + Sync {
    fn info(&self, message: &str);

    fn state_changed(&self, _state: State) {}

    fn retry(&self, _state: State, _attempt: u32, _max: u32, _reason: &str) {}

    fn finished(&self, _report: &ExecutionReport) {}
}

/// Console que descarta todas as mensagens.
#[derive(Debug, Default, Clone, Copy)]
pub struct NoopConsole;

impl UserConsole for NoopConsole {
    fn info(&self, _message: &str) {}
}

/// Indicador visual de progresso da execução de um job no terminal.
///
/// Exibe um spinner com o estado atual e mensagens coloridas para sucesso
/// (verde), falha (vermelho) e retentativa (amarelo).
pub struct TerminalConsole {
    // Barra de progresso/spinner do indicatif.
    pb: ProgressBar,
    green: Style,
    red: Style,
    yellow: Style,
}

impl TerminalConsole {
    /// Inicia o spinner com o nome do job.
    pub fn start(job_name: &str) -> Self {
        let pb = ProgressBar::new_spinner();
        let style = ProgressStyle::default_spinner()
            .template("{spinner:.cyan} {msg}")
            .unwrap_or_else(|_| ProgressStyle::default_spinner());
        pb.set_style(style);
        pb.set_message(format!("{job_name}: starting"));
        pb.enable_steady_tick(Duration::from_millis(100));

        Self {
            pb,
            green: Style::new().green().bold(),
            red: Style::new().red().bold(),
            yellow: Style::new().yellow(),
        }
    }
}

impl UserConsole for TerminalConsole {
    fn info(&self, message: &str) {
        self.pb.println(format!("  {message}"));
    }

    fn state_changed(&self, state: State) {
        self.pb.set_message(format!("{state}"));
    }

    fn retry(&self, state: State, attempt: u32, max: u32, reason: &str) {
        self.pb.println(format!(
            "  {} {state} retry {attempt}/{max}: {reason}",
            self.yellow.apply_to("↻")
        ));
    }

    /// Finaliza o spinner e exibe o resultado final do job.
    fn finished(&self, report: &ExecutionReport) {
        self.pb.finish_and_clear();
        let status = report
            .final_status
            .map(|s| s.to_string())
            .unwrap_or_else(|| "unknown".to_string());
        match (report.terminal_state, report.final_status) {
            (State::Done, Some(JobStatus::Succeeded)) => {
                println!("  {} Job finished: {status}", self.green.apply_to("✓"));
            }
            (State::Done, _) => {
                println!("  {} Job finished: {status}", self.yellow.apply_to("!"));
            }
            _ => {
                let cause = report.failure_cause.as_deref().unwrap_or("unknown cause");
                println!("  {} Job failed ({status}): {cause}", self.red.apply_to("✗"));
            }
        }
    }
}

/// Imprime o relatório de execução em JSON.
pub fn print_report(report: &ExecutionReport) {
    let style = if report.succeeded() {
        Style::new().green()
    } else {
        Style::new().red()
    };
    println!();
    println!("{}", style.apply_to("─── Execution Report ───"));
    println!(
        "{}",
        serde_json::to_string_pretty(report).unwrap_or_default()
    );
}
