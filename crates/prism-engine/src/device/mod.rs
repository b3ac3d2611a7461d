//! GPU device layer.
//!
//! This module is responsible for:
//! - the backend contract strategies encode against (`Device`, queues, command
//!   buffers, pass encoders)
//! - the wgpu implementation of that contract
//! - an in-memory recording implementation for tests (`testing` feature)

mod backend;
mod command;
mod completion;
mod error;
mod gpu;
mod init;
#[cfg(any(test, feature = "testing"))]
mod recording;

pub use backend::{
    BlendMode, ColorAttachment, CommandBuffer, CommandBufferDescriptor, CommandQueue,
    CompletionHandler, CompletionStatus, ComputeEncoder, ComputePipelineDesc, Device, Extent3d,
    LoadAction, RenderEncoder, RenderPassDescriptor, RenderPipelineDesc, StoreAction, Texture,
    DESTINATION_TEXTURE_INDEX, SOURCE_TEXTURE_INDEX,
};
pub use command::{WgpuCommandBuffer, WgpuComputePass, WgpuRenderPass};
pub use error::BackendError;
pub use gpu::{WgpuComputePipeline, WgpuDevice, WgpuQueue, WgpuRenderPipeline, WgpuTexture};
pub use init::DeviceInit;
#[cfg(any(test, feature = "testing"))]
pub use recording::{
    AttachmentRecord, Faults, Kernel, KernelInvocation, RecordedCommand, RecordingCommandBuffer,
    RecordingComputePass, RecordingComputePipeline, RecordingDevice, RecordingQueue,
    RecordingRenderPass, RecordingRenderPipeline, RecordingStats, RecordingTexture, TextureId,
    RECORDING_MAX_TEXTURE_DIMENSION,
};
