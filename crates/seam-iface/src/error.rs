use std::any::Any;
use std::fmt;

/// Boxed error returned by an application's main future.
pub type BoxError = Box<dyn std::error::Error + Send + Sync + 'static>;

/// Errors from running an application with [`AppTemplate`](crate::AppTemplate).
#[derive(Debug, thiserror::Error)]
pub enum Error {
    #[error(transparent)]
    Args(#[from] clap::Error),

    #[error("engine failure")]
    Engine(#[from] seam_rt::Error),

    #[error("application failed")]
    App(#[source] BoxError),

    #[error("the main task was dropped before it completed")]
    Cancelled,
}

pub type Result<T, E = Error> = std::result::Result<T, E>;

/// Why a task did not deliver its output.
#[derive(thiserror::Error)]
pub enum JoinError {
    /// The task was dropped before completing, e.g. because its engine
    /// stopped.
    #[error("task was cancelled")]
    Cancelled,

    #[error("task panicked")]
    Panic(Box<dyn Any + Send + 'static>),
}

impl JoinError {
    pub fn is_panic(&self) -> bool {
        matches!(self, JoinError::Panic(_))
    }

    /// Re-raises the task's panic on the current thread; returns `self`
    /// back if it was not a panic.
    pub fn resume_panic(self) -> Self {
        match self {
            JoinError::Panic(payload) => std::panic::resume_unwind(payload),
            other => other,
        }
    }
}

impl fmt::Debug for JoinError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            JoinError::Cancelled => f.write_str("Cancelled"),
            JoinError::Panic(payload) => {
                let message = payload
                    .downcast_ref::<&str>()
                    .copied()
                    .or_else(|| payload.downcast_ref::<String>().map(String::as_str));
                f.debug_tuple("Panic").field(&message).finish()
            }
        }
    }
}
