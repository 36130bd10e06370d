use async_trait::async_trait;

use super::context::ExecutionContext;
use super::outcome::TransitionResult;
use super::state::State;

/// The unit of work bound to one lifecycle state.
///
/// Implementations hold only the collaborator handles they were built with.
/// An attempt either succeeds, having updated the context, or returns a
/// classified [`TransitionError`](super::TransitionError). Retrying is the
/// driver's job: a stage never loops on its own failures.
#[async_trait]
pub trait Stage: Send + Sync {
    /// The state this stage is bound to.
    fn state(&self) -> State;

    async fn attempt_transition(&self, ctx: &mut ExecutionContext) -> TransitionResult;
}
