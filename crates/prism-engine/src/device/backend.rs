use crate::pipeline::{EntryPoint, ShaderLibrary};
use crate::surface::{PixelFormat, SharedSurface, TextureDescriptor};
use crate::time::GpuTimestamps;

use super::BackendError;

/// Binding index of the optional source texture (fragment and compute).
pub const SOURCE_TEXTURE_INDEX: u32 = 0;

/// Binding index of the writable destination texture (compute only).
pub const DESTINATION_TEXTURE_INDEX: u32 = 1;

/// 3D extent in texels or threads.
#[derive(Debug, Copy, Clone, Eq, PartialEq, Hash)]
pub struct Extent3d {
    pub width: u32,
    pub height: u32,
    pub depth: u32,
}

impl Extent3d {
    pub const fn new_2d(width: u32, height: u32) -> Self {
        Self { width, height, depth: 1 }
    }
}

/// Fixed-function blending applied to color attachment 0.
#[derive(Debug, Copy, Clone, Eq, PartialEq, Hash)]
pub enum BlendMode {
    /// Fragment output replaces the attachment.
    Replace,
    /// Premultiplied-alpha "over" onto what earlier draws left.
    PremultipliedOver,
}

/// Everything a backend needs to build a full-screen render pipeline.
#[derive(Debug, Clone)]
pub struct RenderPipelineDesc<'a> {
    pub label: &'a str,
    pub vertex: &'a EntryPoint,
    pub fragment: &'a EntryPoint,
    /// One format per color attachment; index 0 is the destination.
    pub color_formats: &'a [PixelFormat],
    pub blend: BlendMode,
}

#[derive(Debug, Clone)]
pub struct ComputePipelineDesc<'a> {
    pub label: &'a str,
    pub kernel: &'a EntryPoint,
}

#[derive(Debug, Copy, Clone, PartialEq)]
pub enum LoadAction {
    /// Previous contents are irrelevant.
    DontCare,
    Load,
    Clear([f64; 4]),
}

#[derive(Debug, Copy, Clone, Eq, PartialEq)]
pub enum StoreAction {
    Store,
    /// Contents are discarded at the end of the pass.
    DontCare,
}

pub struct ColorAttachment<'a, T> {
    pub texture: &'a T,
    pub load: LoadAction,
    pub store: StoreAction,
}

pub struct RenderPassDescriptor<'a, T> {
    pub label: &'a str,
    pub color_attachments: &'a [ColorAttachment<'a, T>],
    pub render_target_width: u32,
    pub render_target_height: u32,
}

#[derive(Debug, Clone)]
pub struct CommandBufferDescriptor<'a> {
    pub label: &'a str,
    /// Ask the backend for detailed per-encoder execution status.
    pub report_execution_status: bool,
}

/// Terminal outcome of a committed command buffer.
#[derive(Debug, Clone)]
pub enum CompletionStatus {
    Completed(GpuTimestamps),
    Failed(BackendError),
}

/// One-shot completion callback, invoked off the committing thread.
pub type CompletionHandler = Box<dyn FnOnce(CompletionStatus) + Send + 'static>;

/// A texture created by a backend.
pub trait Texture: Send + Sync + 'static {
    fn descriptor(&self) -> &TextureDescriptor;

    fn width(&self) -> u32 {
        self.descriptor().width
    }

    fn height(&self) -> u32 {
        self.descriptor().height
    }

    fn format(&self) -> PixelFormat {
        self.descriptor().format
    }
}

/// GPU device contract.
///
/// A device owns compiled pipelines and allocated resources. It is shared by
/// reference across strategies and submissions and must be safe to use from
/// several encoding threads at once.
pub trait Device: Send + Sync + Sized + 'static {
    type Texture: Texture;
    type RenderPipeline: Send + Sync + 'static;
    type ComputePipeline: Send + Sync + 'static;
    type Queue: CommandQueue<Self>;
    type CommandBuffer: CommandBuffer<Self>;

    fn name(&self) -> &str;

    /// Whether the device can back textures with tile-only memory.
    fn supports_memoryless(&self) -> bool;

    /// Largest width or height of a 2D texture.
    fn max_texture_dimension(&self) -> u32;

    fn library(&self) -> &ShaderLibrary;

    fn make_command_queue(&self, label: &str) -> Option<Self::Queue>;

    fn make_render_pipeline(
        &self,
        desc: &RenderPipelineDesc<'_>,
    ) -> Result<Self::RenderPipeline, BackendError>;

    fn make_compute_pipeline(
        &self,
        desc: &ComputePipelineDesc<'_>,
    ) -> Result<Self::ComputePipeline, BackendError>;

    /// Creates a texture with its own (non-shared) storage.
    fn make_texture(&self, desc: &TextureDescriptor) -> Option<Self::Texture>;

    /// Creates a texture aliasing `surface`'s memory.
    ///
    /// `desc` always has shared storage and the surface's extent and format.
    fn make_texture_aliasing(
        &self,
        desc: &TextureDescriptor,
        surface: &SharedSurface,
    ) -> Option<Self::Texture>;

    /// Creates a sampled texture initialised from tightly packed rows.
    fn make_texture_with_data(&self, desc: &TextureDescriptor, data: &[u8])
    -> Option<Self::Texture>;

    /// Marks the start of a diagnostic capture region. Default: unsupported.
    fn begin_capture(&self, label: &str) {
        let _ = label;
    }

    /// Marks the end of a diagnostic capture region. Default: unsupported.
    fn end_capture(&self, label: &str) {
        let _ = label;
    }
}

pub trait CommandQueue<D: Device>: Send + Sync {
    fn make_command_buffer(&self, desc: &CommandBufferDescriptor<'_>) -> Option<D::CommandBuffer>;
}

/// In-flight unit of work.
///
/// Dropping a command buffer without calling [`CommandBuffer::commit`]
/// discards it; its completion handler never fires.
pub trait CommandBuffer<D: Device>: Send + Sized {
    type RenderPass<'a>: RenderEncoder<D>
    where
        Self: 'a;

    type ComputePass<'a>: ComputeEncoder<D>
    where
        Self: 'a;

    fn label(&self) -> &str;

    /// Opens a render pass; `None` if the pass cannot be constructed.
    fn begin_render_pass<'a>(
        &'a mut self,
        desc: &RenderPassDescriptor<'_, D::Texture>,
    ) -> Option<Self::RenderPass<'a>>;

    /// Opens a compute pass; `None` if the pass cannot be constructed.
    fn begin_compute_pass<'a>(&'a mut self, label: &str) -> Option<Self::ComputePass<'a>>;

    /// Registers the completion handler. Only the last registered handler is kept.
    fn add_completed_handler(&mut self, handler: CompletionHandler);

    /// Submits the buffer to its queue. Never blocks on GPU completion.
    fn commit(self);
}

pub trait RenderEncoder<D: Device> {
    fn set_pipeline(&mut self, pipeline: &D::RenderPipeline) -> Result<(), BackendError>;

    fn set_fragment_texture(
        &mut self,
        texture: Option<&D::Texture>,
        index: u32,
    ) -> Result<(), BackendError>;

    /// Non-indexed triangle draw without vertex buffers.
    fn draw_primitives(&mut self, vertex_start: u32, vertex_count: u32);

    fn end_encoding(self);
}

pub trait ComputeEncoder<D: Device> {
    fn set_pipeline(&mut self, pipeline: &D::ComputePipeline) -> Result<(), BackendError>;

    fn set_texture(&mut self, texture: Option<&D::Texture>, index: u32) -> Result<(), BackendError>;

    /// Requests exactly `threads` invocations, grouped by `threads_per_group`.
    ///
    /// Backends without exact-thread dispatch round up to whole groups; kernels
    /// clamp to their bounds.
    fn dispatch_threads(&mut self, threads: Extent3d, threads_per_group: Extent3d);

    fn end_encoding(self);
}
