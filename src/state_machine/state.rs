use std::collections::BTreeMap;
use std::fmt;

use serde::{Deserialize, Serialize};

/// Lifecycle states of a job execution, in lifecycle order.
///
/// The happy path runs from `ReserveJobId` to `ReportFinalStatus` and ends in
/// `Done`. `KillJobProcess` and `Failed` are only reachable through the error
/// branch.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub enum State {
    ReserveJobId,
    ResolveJobSpecification,
    ClaimJob,
    StartHeartbeatService,
    StartKillService,
    CreateJobDirectory,
    StartFileStreamService,
    SetStatusInit,
    PostSetupManifestRefresh,
    LaunchJob,
    SetStatusRunning,
    PostLaunchManifestRefresh,
    WaitJobCompletion,
    KillJobProcess,
    PostExecutionManifestRefresh,
    DetermineFinalStatus,
    StopFileStreamService,
    StopKillService,
    StopHeartbeatService,
    ReportFinalStatus,
    Done,
    Failed,
}

impl State {
    pub const ALL: [State; 22] = [
        State::ReserveJobId,
        State::ResolveJobSpecification,
        State::ClaimJob,
        State::StartHeartbeatService,
        State::StartKillService,
        State::CreateJobDirectory,
        State::StartFileStreamService,
        State::SetStatusInit,
        State::PostSetupManifestRefresh,
        State::LaunchJob,
        State::SetStatusRunning,
        State::PostLaunchManifestRefresh,
        State::WaitJobCompletion,
        State::KillJobProcess,
        State::PostExecutionManifestRefresh,
        State::DetermineFinalStatus,
        State::StopFileStreamService,
        State::StopKillService,
        State::StopHeartbeatService,
        State::ReportFinalStatus,
        State::Done,
        State::Failed,
    ];

    pub fn is_terminal(&self) -> bool {
        matches!(self, State::Done | State::Failed)
    }
}

impl fmt::Display for State {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            State::ReserveJobId => "RESERVE_JOB_ID",
            State::ResolveJobSpecification => "RESOLVE_JOB_SPECIFICATION",
            State::ClaimJob => "CLAIM_JOB",
            State::StartHeartbeatService => "START_HEARTBEAT_SERVICE",
            State::StartKillService => "START_KILL_SERVICE",
            State::CreateJobDirectory => "CREATE_JOB_DIRECTORY",
            State::StartFileStreamService => "START_FILE_STREAM_SERVICE",
            State::SetStatusInit => "SET_STATUS_INIT",
            State::PostSetupManifestRefresh => "POST_SETUP_MANIFEST_REFRESH",
            State::LaunchJob => "LAUNCH_JOB",
            State::SetStatusRunning => "SET_STATUS_RUNNING",
            State::PostLaunchManifestRefresh => "POST_LAUNCH_MANIFEST_REFRESH",
            State::WaitJobCompletion => "WAIT_JOB_COMPLETION",
            State::KillJobProcess => "KILL_JOB_PROCESS",
            State::PostExecutionManifestRefresh => "POST_EXECUTION_MANIFEST_REFRESH",
            State::DetermineFinalStatus => "DETERMINE_FINAL_STATUS",
            State::StopFileStreamService => "STOP_FILE_STREAM_SERVICE",
            State::StopKillService => "STOP_KILL_SERVICE",
            State::StopHeartbeatService => "STOP_HEARTBEAT_SERVICE",
            State::ReportFinalStatus => "REPORT_FINAL_STATUS",
            State::Done => "DONE",
            State::Failed => "FAILED",
        };
        f.pad(s)
    }
}

/// Outgoing edges of one non-terminal state.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Edges {
    /// Next state after a success on the happy path.
    pub on_success: State,
    /// Next state after a success once the run has been aborted.
    pub on_success_aborted: State,
    /// Where a fatal failure in this state leads.
    pub on_fatal: State,
}

/// The transition graph driving a job execution.
///
/// Happy path and error branch live in the same table so cleanup ordering is
/// declared, not coded.
#[derive(Debug, Clone)]
pub struct TransitionGraph {
    edges: BTreeMap<State, Edges>,
}

/// Cleanup chain entered on a fatal failure. Services are stopped in
/// reverse of the order they were started in.
const CLEANUP_CHAIN: [State; 7] = [
    State::KillJobProcess,
    State::PostExecutionManifestRefresh,
    State::DetermineFinalStatus,
    State::StopFileStreamService,
    State::StopKillService,
    State::StopHeartbeatService,
    State::ReportFinalStatus,
];

const HAPPY_PATH: [State; 20] = [
    State::ReserveJobId,
    State::ResolveJobSpecification,
    State::ClaimJob,
    State::StartHeartbeatService,
    State::StartKillService,
    State::CreateJobDirectory,
    State::StartFileStreamService,
    State::SetStatusInit,
    State::PostSetupManifestRefresh,
    State::LaunchJob,
    State::SetStatusRunning,
    State::PostLaunchManifestRefresh,
    State::WaitJobCompletion,
    State::PostExecutionManifestRefresh,
    State::DetermineFinalStatus,
    State::StopFileStreamService,
    State::StopKillService,
    State::StopHeartbeatService,
    State::ReportFinalStatus,
    State::Done,
];

impl TransitionGraph {
    /// An empty graph; edges are added with [`TransitionGraph::with_edges`].
    pub fn empty() -> Self {
        Self {
            edges: BTreeMap::new(),
        }
    }

    pub fn with_edges(mut self, state: State, edges: Edges) -> Self {
        self.edges.insert(state, edges);
        self
    }

    /// The full job lifecycle.
    pub fn standard() -> Self {
        let mut graph = Self::empty();

        for pair in HAPPY_PATH.windows(2) {
            let (state, next) = (pair[0], pair[1]);
            // Fatal failures on the happy path enter the cleanup chain at the
            // top; cleanup states are rewired below.
            graph.edges.insert(
                state,
                Edges {
                    on_success: next,
                    on_success_aborted: next,
                    on_fatal: CLEANUP_CHAIN[0],
                },
            );
        }

        for (i, state) in CLEANUP_CHAIN.iter().enumerate() {
            let next_cleanup = CLEANUP_CHAIN.get(i + 1).copied().unwrap_or(State::Failed);
            let on_success = match state {
                State::ReportFinalStatus => State::Done,
                State::KillJobProcess => State::PostExecutionManifestRefresh,
                _ => graph
                    .edges
                    .get(state)
                    .map(|e| e.on_success)
                    .unwrap_or(next_cleanup),
            };
            graph.edges.insert(
                *state,
                Edges {
                    on_success,
                    on_success_aborted: next_cleanup,
                    on_fatal: next_cleanup,
                },
            );
        }

        graph
    }

    pub fn edges(&self, state: State) -> Option<&Edges> {
        self.edges.get(&state)
    }

    /// Next state after `state` succeeds.
    pub fn next_on_success(&self, state: State, aborted: bool) -> Option<State> {
        self.edges.get(&state).map(|e| {
            if aborted {
                e.on_success_aborted
            } else {
                e.on_success
            }
        })
    }

    /// Where execution continues after a fatal failure in `state`.
    pub fn error_branch_for(&self, state: State) -> Option<State> {
        self.edges.get(&state).map(|e| e.on_fatal)
    }

    /// Whether `state` belongs to the cleanup chain.
    pub fn is_cleanup(state: State) -> bool {
        CLEANUP_CHAIN.contains(&state)
    }

    /// Every non-terminal state reachable from `initial`.
    pub fn reachable_from(&self, initial: State) -> Vec<State> {
        let mut seen = Vec::new();
        let mut pending = vec![initial];
        while let Some(state) = pending.pop() {
            if state.is_terminal() || seen.contains(&state) {
                continue;
            }
            seen.push(state);
            if let Some(e) = self.edges.get(&state) {
                pending.extend([e.on_success, e.on_success_aborted, e.on_fatal]);
            }
        }
        seen.sort();
        seen
    }

    /// All states with edges, in lifecycle order.
    pub fn states(&self) -> impl Iterator<Item = (&State, &Edges)> {
        self.edges.iter()
    }
}

impl Default for TransitionGraph {
    fn default() -> Self {
        Self::standard()
    }
}
