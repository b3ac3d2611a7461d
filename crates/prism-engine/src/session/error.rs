use thiserror::Error;

use crate::device::BackendError;
use crate::pipeline::{CompileError, LibraryError};
use crate::strategy::{EncodingFailure, StrategyKind};
use crate::surface::SurfaceAllocationFailure;

/// Session construction failure. No partial session is ever returned.
#[derive(Debug, Error)]
pub enum SessionError {
    #[error("no usable GPU device: {0}")]
    DeviceUnavailable(String),

    #[error("device could not create a command queue")]
    QueueUnavailable,

    #[error("shader library is invalid: {0}")]
    ShaderLibrary(#[from] LibraryError),

    #[error("pipeline compilation failed for {strategy} strategy: {source}")]
    Compile {
        strategy: StrategyKind,
        #[source]
        source: CompileError,
    },
}

/// Per-submission failure. The session stays usable afterwards.
#[derive(Debug, Clone, Error)]
pub enum SubmitError {
    #[error("{0} strategy was not compiled for this session")]
    StrategyUnavailable(StrategyKind),

    #[error("source texture is {actual_width}x{actual_height}, submission requested {width}x{height}")]
    SourceDimensionMismatch {
        width: u32,
        height: u32,
        actual_width: u32,
        actual_height: u32,
    },

    #[error("destination allocation failed: {0}")]
    DestinationAllocationFailure(#[from] SurfaceAllocationFailure),

    #[error("queue could not create a command buffer")]
    CommandBufferCreationFailure,

    #[error("encoding failed: {0}")]
    Encoding(#[from] EncodingFailure),

    #[error("GPU execution failed: {0}")]
    GpuExecutionFailure(#[source] BackendError),

    #[error("submission was dropped before completing")]
    Disconnected,
}
