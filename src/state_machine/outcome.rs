use std::error::Error as StdError;
use std::fmt;

use thiserror::Error;

use super::state::State;

pub type BoxError = Box<dyn StdError + Send + Sync + 'static>;

/// Result of one attempt at a state transition. `Ok(())` means the stage
/// succeeded and the driver may advance.
pub type TransitionResult = Result<(), TransitionError>;

/// How a failed transition attempt must be handled.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FailureKind {
    /// Transient; the same state is attempted again after a backoff.
    Retryable,
    /// Unrecoverable; the run leaves the happy path for the cleanup chain.
    Fatal,
}

impl fmt::Display for FailureKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            FailureKind::Retryable => write!(f, "retryable"),
            FailureKind::Fatal => write!(f, "fatal"),
        }
    }
}

/// A classified stage failure, wrapping its cause.
#[derive(Debug)]
pub struct TransitionError {
    kind: FailureKind,
    state: State,
    context: Option<String>,
    cause: BoxError,
}

impl fmt::Display for TransitionError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} failure in {}", self.kind, self.state)?;
        if let Some(context) = &self.context {
            write!(f, " ({context})")?;
        }
        write!(f, ": {}", self.cause)
    }
}

impl StdError for TransitionError {
    fn source(&self) -> Option<&(dyn StdError + 'static)> {
        Some(self.cause.as_ref())
    }
}

impl TransitionError {
    pub fn retryable(state: State, cause: impl Into<BoxError>) -> Self {
        Self {
            kind: FailureKind::Retryable,
            state,
            context: None,
            cause: cause.into(),
        }
    }

    pub fn fatal(state: State, cause: impl Into<BoxError>) -> Self {
        Self {
            kind: FailureKind::Fatal,
            state,
            context: None,
            cause: cause.into(),
        }
    }

    /// Attach a human-readable note about what the stage was doing.
    pub fn with_context(mut self, context: impl Into<String>) -> Self {
        self.context = Some(context.into());
        self
    }

    /// Reclassify as fatal, keeping the cause.
    pub fn into_fatal(mut self) -> Self {
        self.kind = FailureKind::Fatal;
        self
    }

    /// Turn a retryable failure that ran out of attempts into a fatal one
    /// whose cause is [`RetriesExhausted`].
    pub fn exhausted(self, attempts: u32) -> Self {
        Self {
            kind: FailureKind::Fatal,
            state: self.state,
            context: self.context,
            cause: Box::new(RetriesExhausted {
                attempts,
                last: self.cause,
            }),
        }
    }

    pub fn kind(&self) -> FailureKind {
        self.kind
    }

    pub fn is_retryable(&self) -> bool {
        self.kind == FailureKind::Retryable
    }

    pub fn is_fatal(&self) -> bool {
        self.kind == FailureKind::Fatal
    }

    pub fn state(&self) -> State {
        self.state
    }

    pub fn context(&self) -> Option<&str> {
        self.context.as_deref()
    }

    pub fn cause(&self) -> &(dyn StdError + Send + Sync + 'static) {
        self.cause.as_ref()
    }

    /// Downcast the wrapped cause to a concrete error type.
    pub fn cause_as<E: StdError + 'static>(&self) -> Option<&E> {
        self.cause.downcast_ref::<E>()
    }
}

/// Raised when a stage runs without the context it depends on.
#[derive(Debug, Error)]
#[error("missing execution context field: {0}")]
pub struct MissingContext(pub &'static str);

/// Cause recorded when a retryable failure used up its attempts.
#[derive(Debug, Error)]
#[error("gave up after {attempts} attempts: {last}")]
pub struct RetriesExhausted {
    pub attempts: u32,
    #[source]
    pub last: BoxError,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[derive(Debug, Error)]
    #[error("boom")]
    struct Boom;

    #[test]
    fn display_includes_kind_state_and_context() {
        let err = TransitionError::retryable(State::ClaimJob, Boom).with_context("claiming");
        assert_eq!(err.to_string(), "retryable failure in CLAIM_JOB (claiming): boom");

        let err = TransitionError::fatal(State::LaunchJob, Boom);
        assert_eq!(err.to_string(), "fatal failure in LAUNCH_JOB: boom");
    }

    #[test]
    fn cause_is_preserved_and_downcastable() {
        let err = TransitionError::fatal(State::ClaimJob, Boom);
        assert!(err.cause_as::<Boom>().is_some());
        assert!(err.cause_as::<MissingContext>().is_none());
        assert!(err.source().is_some());
    }

    #[test]
    fn into_fatal_keeps_cause() {
        let err = TransitionError::retryable(State::ReportFinalStatus, Boom).into_fatal();
        assert!(err.is_fatal());
        assert!(!err.is_retryable());
        assert!(err.cause_as::<Boom>().is_some());
    }

    #[test]
    fn exhausted_wraps_last_cause() {
        let err = TransitionError::retryable(State::ClaimJob, Boom).exhausted(3);
        assert!(err.is_fatal());
        let cause = err.cause_as::<RetriesExhausted>().unwrap();
        assert_eq!(cause.attempts, 3);
        assert_eq!(cause.last.to_string(), "boom");
    }

    #[test]
    fn error_is_send_sync() {
        fn assert_send_sync<T: Send + Sync>() {}
        assert_send_sync::<TransitionError>();
    }
}
