mod context;
mod driver;
mod job;
mod outcome;
mod stage;
mod state;

pub use context::{ExecutionContext, ServiceKind};
pub use driver::{MachineError, StateMachine};
pub use job::{
    AgentClientMetadata, ExecutionReport, JobRequest, JobSpecification, JobStatus, ProcessResult,
    RetryConfig, status_messages,
};
pub use outcome::{
    BoxError, FailureKind, MissingContext, RetriesExhausted, TransitionError, TransitionResult,
};
pub use stage::Stage;
pub use state::{Edges, State, TransitionGraph};
