use thiserror::Error;

/// Failure reported by a backend device, queue, or command buffer.
///
/// Carried as the "underlying" cause by the session-level error types.
#[derive(Debug, Clone, Eq, PartialEq, Error)]
pub enum BackendError {
    #[error("validation error: {0}")]
    Validation(String),
    #[error("out of device memory: {0}")]
    OutOfMemory(String),
    #[error("device lost: {0}")]
    DeviceLost(String),
    #[error("{0}")]
    Other(String),
}
