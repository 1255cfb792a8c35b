use thiserror::Error;

use crate::vm::error::{ExceptionKind, RuntimeError};

#[derive(Error, Debug, Clone, PartialEq)]
pub enum CoroutineError {
    #[error("coroutine is already closed")]
    AlreadyClosed,
    #[error("coroutine has finished")]
    Finished,
    #[error("coroutine is already running")]
    AlreadyRunning,
    #[error(transparent)]
    Runtime(#[from] RuntimeError),
}

/// How a handle failure surfaces inside running code: a finished coroutine
/// reads as exhaustion, misuse as a `ValueError`.
impl From<CoroutineError> for RuntimeError {
    fn from(err: CoroutineError) -> Self {
        match err {
            CoroutineError::Finished => RuntimeError::stop_iteration(),
            CoroutineError::AlreadyClosed | CoroutineError::AlreadyRunning => {
                RuntimeError::new(ExceptionKind::ValueError, err.to_string())
            }
            CoroutineError::Runtime(err) => err,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rstest::rstest;

    #[rstest]
    #[case(CoroutineError::Finished, ExceptionKind::StopIteration)]
    #[case(CoroutineError::AlreadyClosed, ExceptionKind::ValueError)]
    #[case(CoroutineError::AlreadyRunning, ExceptionKind::ValueError)]
    #[case(CoroutineError::Runtime(RuntimeError::type_error("x")), ExceptionKind::TypeError)]
    fn test_into_runtime_error(#[case] err: CoroutineError, #[case] expected: ExceptionKind) {
        assert_eq!(RuntimeError::from(err).kind, expected);
    }
}
