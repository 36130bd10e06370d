use std::sync::Arc;

use async_trait::async_trait;

use crate::services::FileStreamService;
use crate::state_machine::{ExecutionContext, Stage, State, TransitionError, TransitionResult};

/// Force one manifest sync with the control plane.
///
/// Used for `PostSetupManifestRefresh`, `PostLaunchManifestRefresh` and
/// `PostExecutionManifestRefresh`. Every error is fatal, transient or not.
pub struct RefreshManifestStage {
    state: State,
    file_stream: Arc<dyn FileStreamService>,
}

impl RefreshManifestStage {
    pub fn new(state: State, file_stream: Arc<dyn FileStreamService>) -> Self {
        Self { state, file_stream }
    }
}

#[async_trait]
impl Stage for RefreshManifestStage {
    fn state(&self) -> State {
        self.state
    }

    async fn attempt_transition(&self, _ctx: &mut ExecutionContext) -> TransitionResult {
        self.file_stream
            .force_sync()
            .await
            .map_err(|e| TransitionError::fatal(self.state, e))
    }
}
