use std::collections::BTreeMap;
use std::sync::Arc;

use thiserror::Error;
use tokio::time::sleep;

use super::context::ExecutionContext;
use super::job::{ExecutionReport, RetryConfig};
use super::stage::Stage;
use super::state::{State, TransitionGraph};
use crate::ui::{NoopConsole, UserConsole};

/// Problems with how the machine was assembled. Stage failures are never
/// reported through this type; they end up in the [`ExecutionReport`].
#[derive(Debug, Error, PartialEq, Eq)]
pub enum MachineError {
    #[error("no stage registered for state {0}")]
    MissingStage(State),

    #[error("no transitions defined for state {0}")]
    MissingEdges(State),
}

/// Drives one job execution through the transition graph.
///
/// Stages run one at a time, in graph order. A retryable failure re-runs
/// the same stage after a backoff until the per-state attempt limit is
/// reached, then counts as fatal. A fatal failure is recorded on the
/// context and execution continues on the graph's error branch, which runs
/// the cleanup stages and ends in [`State::Failed`]. Once aborted, failing
/// cleanup stages are recorded and skipped over, never retried.
pub struct StateMachine {
    graph: TransitionGraph,
    stages: BTreeMap<State, Box<dyn Stage>>,
    retry: RetryConfig,
    console: Arc<dyn UserConsole>,
}

impl StateMachine {
    pub fn new(graph: TransitionGraph, retry: RetryConfig) -> Self {
        Self {
            graph,
            stages: BTreeMap::new(),
            retry,
            console: Arc::new(NoopConsole),
        }
    }

    pub fn with_console(mut self, console: Arc<dyn UserConsole>) -> Self {
        self.console = console;
        self
    }

    /// Bind a stage to the state it declares. A later registration for the
    /// same state replaces the earlier one.
    pub fn register(mut self, stage: Box<dyn Stage>) -> Self {
        self.stages.insert(stage.state(), stage);
        self
    }

    pub fn graph(&self) -> &TransitionGraph {
        &self.graph
    }

    /// Check every non-terminal state reachable from `initial` has both a
    /// stage and outgoing edges.
    pub fn validate(&self, initial: State) -> Result<(), MachineError> {
        for state in self.graph.reachable_from(initial) {
            if self.graph.edges(state).is_none() {
                return Err(MachineError::MissingEdges(state));
            }
            if !self.stages.contains_key(&state) {
                return Err(MachineError::MissingStage(state));
            }
        }
        Ok(())
    }

    /// Run from `initial` until a terminal state is reached.
    pub async fn run(
        &self,
        ctx: &mut ExecutionContext,
        initial: State,
    ) -> Result<ExecutionReport, MachineError> {
        self.validate(initial)?;

        let mut state = initial;
        while !state.is_terminal() {
            let stage = self
                .stages
                .get(&state)
                .ok_or(MachineError::MissingStage(state))?;

            if ctx.state_history().last() != Some(&state) {
                self.console.state_changed(state);
            }
            ctx.enter_state(state);
            let attempt = ctx.count_attempt(state);
            tracing::debug!(%state, attempt, aborted = ctx.is_aborted(), "attempting transition");

            state = match stage.attempt_transition(ctx).await {
                Ok(()) => {
                    let next = self
                        .graph
                        .next_on_success(state, ctx.is_aborted())
                        .ok_or(MachineError::MissingEdges(state))?;
                    tracing::info!(from = %state, to = %next, "transition");
                    next
                }
                Err(err)
                    if err.is_retryable()
                        && !ctx.is_aborted()
                        && attempt < self.retry.max_attempts =>
                {
                    let delay = self.retry.jittered_delay(attempt);
                    tracing::warn!(
                        %state,
                        attempt,
                        max_attempts = self.retry.max_attempts,
                        delay_ms = delay.as_millis() as u64,
                        error = %err,
                        "retryable failure, backing off"
                    );
                    let reason = err.to_string();
                    self.console.retry(state, attempt, self.retry.max_attempts, &reason);
                    sleep(delay).await;
                    state
                }
                Err(err) => {
                    let err = if !err.is_retryable() {
                        err
                    } else if ctx.is_aborted() {
                        err.into_fatal()
                    } else {
                        err.exhausted(attempt)
                    };
                    let next = self
                        .graph
                        .error_branch_for(state)
                        .ok_or(MachineError::MissingEdges(state))?;
                    tracing::error!(%state, next = %next, error = %err, "fatal failure");
                    ctx.record_fatal(err);
                    next
                }
            };
        }

        ctx.enter_state(state);
        tracing::info!(terminal = %state, "state machine stopped");
        Ok(ctx.report(state))
    }
}
