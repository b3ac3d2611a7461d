use std::collections::{HashMap, HashSet};
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError, RwLock};
use std::time::Instant;

use anyhow::{Context, Result};

use crate::pipeline::ShaderLibrary;
use crate::surface::{
    decode_rgba16f, encode_rgba16f, ColorSpace, SharedSurface, StorageMode, TextureDescriptor,
    TextureUsage,
};
use crate::time::GpuTimestamps;

use super::backend::{
    BlendMode, CommandBuffer, CommandBufferDescriptor, CommandQueue, CompletionHandler,
    CompletionStatus, ComputeEncoder, ComputePipelineDesc, Device, Extent3d, LoadAction,
    RenderEncoder, RenderPassDescriptor, RenderPipelineDesc, StoreAction, Texture,
    DESTINATION_TEXTURE_INDEX, SOURCE_TEXTURE_INDEX,
};
use super::completion::CompletionWorker;
use super::BackendError;

pub type TextureId = u64;

/// Largest texture edge the recording device accepts.
pub const RECORDING_MAX_TEXTURE_DIMENSION: u32 = 16384;

/// What an emulated shader invocation sees.
#[derive(Debug, Copy, Clone, PartialEq)]
pub struct KernelInvocation {
    pub x: u32,
    pub y: u32,
    /// Destination extent.
    pub width: u32,
    pub height: u32,
    /// Source texel at `(x, y)` (clamped), if a source is bound.
    pub source: Option<[f32; 4]>,
}

/// CPU stand-in for a shader entry point. `None` leaves the texel untouched.
pub type Kernel = Arc<dyn Fn(&KernelInvocation) -> Option<[f32; 4]> + Send + Sync>;

#[derive(Debug, Clone, PartialEq)]
pub struct AttachmentRecord {
    pub texture: TextureId,
    pub storage: StorageMode,
    pub load: LoadAction,
    pub store: StoreAction,
}

/// One command as seen by the device, in encoding order.
#[derive(Debug, Clone, PartialEq)]
pub enum RecordedCommand {
    BeginCapture { label: String },
    EndCapture { label: String },
    CreateCommandBuffer { label: String, report_execution_status: bool },
    BeginRenderPass { label: String, attachments: Vec<AttachmentRecord> },
    SetRenderPipeline { name: String },
    SetFragmentTexture { index: u32, texture: Option<TextureId> },
    Draw { vertex_start: u32, vertex_count: u32 },
    EndRenderPass,
    BeginComputePass { label: String },
    SetComputePipeline { name: String },
    SetTexture { index: u32, texture: Option<TextureId> },
    DispatchThreads { threads: Extent3d, threads_per_group: Extent3d },
    EndComputePass,
    Commit { label: String },
    Discard { label: String },
}

impl RecordedCommand {
    /// Same command with texture ids zeroed, for comparing encodings across
    /// submissions that allocate fresh textures.
    pub fn without_ids(&self) -> RecordedCommand {
        match self {
            RecordedCommand::BeginRenderPass { label, attachments } => RecordedCommand::BeginRenderPass {
                label: label.clone(),
                attachments: attachments
                    .iter()
                    .map(|a| AttachmentRecord { texture: 0, ..a.clone() })
                    .collect(),
            },
            RecordedCommand::SetFragmentTexture { index, texture } => RecordedCommand::SetFragmentTexture {
                index: *index,
                texture: texture.map(|_| 0),
            },
            RecordedCommand::SetTexture { index, texture } => RecordedCommand::SetTexture {
                index: *index,
                texture: texture.map(|_| 0),
            },
            other => other.clone(),
        }
    }
}

/// Failures to inject. Counters fail that many upcoming operations.
#[derive(Debug, Clone, Default)]
pub struct Faults {
    pub no_queue: bool,
    pub fail_command_buffers: usize,
    pub fail_render_passes: usize,
    pub fail_pipeline_bindings: usize,
    pub fail_textures: usize,
    /// Reported by the next committed command buffer's completion.
    pub gpu_error: Option<String>,
    /// Entry points whose pipelines the device refuses to build.
    pub reject_pipelines: HashSet<String>,
}

#[derive(Debug, Copy, Clone, Default, Eq, PartialEq)]
pub struct RecordingStats {
    pub command_buffers: usize,
    pub commits: usize,
    pub discarded: usize,
    pub completions: usize,
    pub failed_completions: usize,
    pub captures_begun: usize,
    pub captures_ended: usize,
    pub kernel_invocations: u64,
    pub out_of_bounds_writes: u64,
}

struct RecorderState {
    log: Vec<RecordedCommand>,
    stats: RecordingStats,
    faults: Faults,
}

struct RecorderShared {
    library: ShaderLibrary,
    memoryless: AtomicBool,
    kernels: RwLock<HashMap<String, Kernel>>,
    state: Mutex<RecorderState>,
    worker: CompletionWorker,
    origin: Instant,
    next_texture: AtomicU64,
}

impl RecorderShared {
    fn lock(&self) -> MutexGuard<'_, RecorderState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn now(&self) -> f64 {
        self.origin.elapsed().as_secs_f64()
    }

    fn kernel(&self, name: &str) -> Option<Kernel> {
        self.kernels
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .get(name)
            .cloned()
    }
}

/// In-memory [`Device`] that records what it is asked to do.
///
/// Textures live in CPU memory (shared textures alias their surface directly),
/// registered kernels emulate shader entry points, and completions run on a
/// worker thread in commit order. Dispatches run whole workgroups, so kernels
/// see the same overhang threads they would on hardware and must clamp.
#[derive(Clone)]
pub struct RecordingDevice {
    shared: Arc<RecorderShared>,
}

impl RecordingDevice {
    pub fn new(library: ShaderLibrary) -> Result<Self> {
        let worker = CompletionWorker::spawn("prism recording completion")
            .context("failed to spawn completion worker")?;
        Ok(Self {
            shared: Arc::new(RecorderShared {
                library,
                memoryless: AtomicBool::new(true),
                kernels: RwLock::new(HashMap::new()),
                state: Mutex::new(RecorderState {
                    log: Vec::new(),
                    stats: RecordingStats::default(),
                    faults: Faults::default(),
                }),
                worker,
                origin: Instant::now(),
                next_texture: AtomicU64::new(1),
            }),
        })
    }

    /// Device over the bundled shader library.
    pub fn bundled() -> Result<Self> {
        let library = ShaderLibrary::bundled().context("bundled shader library")?;
        Self::new(library)
    }

    /// Toggles tile-memory support (on by default, like unified-memory GPUs).
    pub fn set_memoryless(&self, supported: bool) {
        self.shared.memoryless.store(supported, Ordering::Relaxed);
    }

    /// Emulates entry point `name` with `kernel` from now on.
    pub fn register_kernel(
        &self,
        name: &str,
        kernel: impl Fn(&KernelInvocation) -> Option<[f32; 4]> + Send + Sync + 'static,
    ) {
        self.shared
            .kernels
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .insert(name.to_string(), Arc::new(kernel));
    }

    pub fn inject(&self, f: impl FnOnce(&mut Faults)) {
        f(&mut self.shared.lock().faults);
    }

    pub fn stats(&self) -> RecordingStats {
        self.shared.lock().stats
    }

    /// Commands of every committed or discarded command buffer, plus capture
    /// markers, in the order they reached the device.
    pub fn commands(&self) -> Vec<RecordedCommand> {
        self.shared.lock().log.clone()
    }

    pub fn clear_commands(&self) {
        self.shared.lock().log.clear();
    }

    fn take_fault(counter: &mut usize) -> bool {
        if *counter > 0 {
            *counter -= 1;
            true
        } else {
            false
        }
    }

    fn texture(&self, desc: &TextureDescriptor, memory: SharedSurface) -> RecordingTexture {
        RecordingTexture {
            desc: *desc,
            id: self.shared.next_texture.fetch_add(1, Ordering::Relaxed),
            memory,
        }
    }

    fn texture_allowed(&self, desc: &TextureDescriptor) -> bool {
        let max = RECORDING_MAX_TEXTURE_DIMENSION;
        if desc.width == 0 || desc.height == 0 || desc.width > max || desc.height > max {
            return false;
        }
        !Self::take_fault(&mut self.shared.lock().faults.fail_textures)
    }
}

#[derive(Debug, Clone)]
pub struct RecordingTexture {
    desc: TextureDescriptor,
    id: TextureId,
    memory: SharedSurface,
}

impl RecordingTexture {
    /// Backing memory; for shared textures this is the aliased surface.
    pub fn memory(&self) -> &SharedSurface {
        &self.memory
    }
}

impl Texture for RecordingTexture {
    fn descriptor(&self) -> &TextureDescriptor {
        &self.desc
    }
}

#[derive(Clone)]
pub struct RecordingRenderPipeline {
    name: String,
    blend: BlendMode,
    attachments: usize,
    kernel: Option<Kernel>,
}

impl RecordingRenderPipeline {
    pub fn blend(&self) -> BlendMode {
        self.blend
    }

    pub fn attachment_count(&self) -> usize {
        self.attachments
    }
}

#[derive(Clone)]
pub struct RecordingComputePipeline {
    name: String,
    kernel: Option<Kernel>,
}

pub struct RecordingQueue {
    label: String,
    device: RecordingDevice,
}

impl Device for RecordingDevice {
    type Texture = RecordingTexture;
    type RenderPipeline = RecordingRenderPipeline;
    type ComputePipeline = RecordingComputePipeline;
    type Queue = RecordingQueue;
    type CommandBuffer = RecordingCommandBuffer;

    fn name(&self) -> &str {
        "recording"
    }

    fn supports_memoryless(&self) -> bool {
        self.shared.memoryless.load(Ordering::Relaxed)
    }

    fn max_texture_dimension(&self) -> u32 {
        RECORDING_MAX_TEXTURE_DIMENSION
    }

    fn library(&self) -> &ShaderLibrary {
        &self.shared.library
    }

    fn make_command_queue(&self, label: &str) -> Option<RecordingQueue> {
        if self.shared.lock().faults.no_queue {
            return None;
        }
        Some(RecordingQueue {
            label: label.to_string(),
            device: self.clone(),
        })
    }

    fn make_render_pipeline(&self, desc: &RenderPipelineDesc<'_>) -> Result<RecordingRenderPipeline, BackendError> {
        let name = &desc.fragment.name;
        if self.shared.lock().faults.reject_pipelines.contains(name) {
            return Err(BackendError::Validation(format!("device rejected pipeline '{name}'")));
        }
        if desc.color_formats.is_empty() {
            return Err(BackendError::Validation(format!(
                "render pipeline '{}' has no color attachments",
                desc.label
            )));
        }
        Ok(RecordingRenderPipeline {
            name: name.clone(),
            blend: desc.blend,
            attachments: desc.color_formats.len(),
            kernel: self.shared.kernel(name),
        })
    }

    fn make_compute_pipeline(&self, desc: &ComputePipelineDesc<'_>) -> Result<RecordingComputePipeline, BackendError> {
        let name = &desc.kernel.name;
        if self.shared.lock().faults.reject_pipelines.contains(name) {
            return Err(BackendError::Validation(format!("device rejected pipeline '{name}'")));
        }
        Ok(RecordingComputePipeline {
            name: name.clone(),
            kernel: self.shared.kernel(name),
        })
    }

    fn make_texture(&self, desc: &TextureDescriptor) -> Option<RecordingTexture> {
        if !self.texture_allowed(desc) {
            return None;
        }
        let memory = SharedSurface::zeroed(desc.width, desc.height, desc.format, ColorSpace::ExtendedLinearDisplayP3);
        Some(self.texture(desc, memory))
    }

    fn make_texture_aliasing(&self, desc: &TextureDescriptor, surface: &SharedSurface) -> Option<RecordingTexture> {
        if desc.storage != StorageMode::Shared
            || desc.format != surface.format()
            || desc.width != surface.width()
            || desc.height != surface.height()
            || !self.texture_allowed(desc)
        {
            return None;
        }
        Some(self.texture(desc, surface.clone()))
    }

    fn make_texture_with_data(&self, desc: &TextureDescriptor, data: &[u8]) -> Option<RecordingTexture> {
        if data.len() != desc.bytes_per_row() * desc.height as usize {
            return None;
        }
        let desc = desc.with(desc.usage | TextureUsage::SHADER_READ, StorageMode::Private);
        let texture = self.make_texture(&desc)?;
        texture.memory.with_bytes_mut(|bytes| bytes.copy_from_slice(data));
        Some(texture)
    }

    fn begin_capture(&self, label: &str) {
        let mut state = self.shared.lock();
        state.stats.captures_begun += 1;
        state.log.push(RecordedCommand::BeginCapture { label: label.to_string() });
    }

    fn end_capture(&self, label: &str) {
        let mut state = self.shared.lock();
        state.stats.captures_ended += 1;
        state.log.push(RecordedCommand::EndCapture { label: label.to_string() });
    }
}

impl CommandQueue<RecordingDevice> for RecordingQueue {
    fn make_command_buffer(&self, desc: &CommandBufferDescriptor<'_>) -> Option<RecordingCommandBuffer> {
        {
            let mut state = self.device.shared.lock();
            if RecordingDevice::take_fault(&mut state.faults.fail_command_buffers) {
                log::debug!("queue '{}' refused a command buffer (injected)", self.label);
                return None;
            }
            state.stats.command_buffers += 1;
        }
        Some(RecordingCommandBuffer {
            shared: Arc::clone(&self.device.shared),
            label: desc.label.to_string(),
            commands: vec![RecordedCommand::CreateCommandBuffer {
                label: desc.label.to_string(),
                report_execution_status: desc.report_execution_status,
            }],
            work: Vec::new(),
            handler: None,
            committed: false,
        })
    }
}

enum Work {
    Draw {
        pipeline: RecordingRenderPipeline,
        target: RecordingTexture,
        source: Option<RecordingTexture>,
    },
    Dispatch {
        pipeline: RecordingComputePipeline,
        destination: RecordingTexture,
        source: Option<RecordingTexture>,
        threads: Extent3d,
        threads_per_group: Extent3d,
    },
}

pub struct RecordingCommandBuffer {
    shared: Arc<RecorderShared>,
    label: String,
    commands: Vec<RecordedCommand>,
    work: Vec<Work>,
    handler: Option<CompletionHandler>,
    committed: bool,
}

impl RecordingCommandBuffer {
    fn take_fault(&self, pick: impl FnOnce(&mut Faults) -> &mut usize) -> bool {
        let mut state = self.shared.lock();
        RecordingDevice::take_fault(pick(&mut state.faults))
    }
}

impl CommandBuffer<RecordingDevice> for RecordingCommandBuffer {
    type RenderPass<'a> = RecordingRenderPass<'a>;
    type ComputePass<'a> = RecordingComputePass<'a>;

    fn label(&self) -> &str {
        &self.label
    }

    fn begin_render_pass<'a>(
        &'a mut self,
        desc: &RenderPassDescriptor<'_, RecordingTexture>,
    ) -> Option<RecordingRenderPass<'a>> {
        if self.take_fault(|f| &mut f.fail_render_passes) {
            return None;
        }
        let first = desc.color_attachments.first()?;
        let valid = desc.color_attachments.iter().all(|att| {
            let d = att.texture.descriptor();
            d.usage.contains(TextureUsage::RENDER_TARGET)
                && d.width == desc.render_target_width
                && d.height == desc.render_target_height
        });
        if !valid {
            return None;
        }

        self.commands.push(RecordedCommand::BeginRenderPass {
            label: desc.label.to_string(),
            attachments: desc
                .color_attachments
                .iter()
                .map(|att| AttachmentRecord {
                    texture: att.texture.id,
                    storage: att.texture.desc.storage,
                    load: att.load,
                    store: att.store,
                })
                .collect(),
        });

        Some(RecordingRenderPass {
            target: first.texture.clone(),
            buffer: self,
            pipeline: None,
            source: None,
        })
    }

    fn begin_compute_pass<'a>(&'a mut self, label: &str) -> Option<RecordingComputePass<'a>> {
        self.commands.push(RecordedCommand::BeginComputePass { label: label.to_string() });
        Some(RecordingComputePass {
            buffer: self,
            pipeline: None,
            destination: None,
            source: None,
        })
    }

    fn add_completed_handler(&mut self, handler: CompletionHandler) {
        self.handler = Some(handler);
    }

    fn commit(mut self) {
        self.committed = true;
        self.commands.push(RecordedCommand::Commit { label: self.label.clone() });

        let gpu_error = {
            let mut state = self.shared.lock();
            state.stats.commits += 1;
            state.log.append(&mut self.commands);
            state.faults.gpu_error.take()
        };

        let shared = Arc::clone(&self.shared);
        let work = std::mem::take(&mut self.work);
        let handler = self.handler.take();
        let job = Box::new(move || {
            let status = match gpu_error {
                Some(message) => CompletionStatus::Failed(BackendError::Other(message)),
                None => {
                    let gpu_start = shared.now();
                    let kernel_start = shared.now();
                    let (invocations, oob) = execute(&work);
                    let kernel_end = shared.now();
                    let gpu_end = shared.now();
                    let mut state = shared.lock();
                    state.stats.kernel_invocations += invocations;
                    state.stats.out_of_bounds_writes += oob;
                    CompletionStatus::Completed(GpuTimestamps {
                        gpu_start,
                        gpu_end,
                        kernel_start,
                        kernel_end,
                    })
                }
            };
            {
                let mut state = shared.lock();
                match status {
                    CompletionStatus::Completed(_) => state.stats.completions += 1,
                    CompletionStatus::Failed(_) => state.stats.failed_completions += 1,
                }
            }
            if let Some(handler) = handler {
                handler(status);
            }
        });

        if let Err(job) = self.shared.worker.enqueue(job) {
            log::warn!("completion worker gone; completing '{}' inline", self.label);
            job();
        }
    }
}

impl Drop for RecordingCommandBuffer {
    fn drop(&mut self) {
        if self.committed {
            return;
        }
        self.commands.push(RecordedCommand::Discard { label: self.label.clone() });
        let mut state = self.shared.lock();
        state.stats.discarded += 1;
        state.log.append(&mut self.commands);
    }
}

pub struct RecordingRenderPass<'a> {
    buffer: &'a mut RecordingCommandBuffer,
    target: RecordingTexture,
    pipeline: Option<RecordingRenderPipeline>,
    source: Option<RecordingTexture>,
}

impl RenderEncoder<RecordingDevice> for RecordingRenderPass<'_> {
    fn set_pipeline(&mut self, pipeline: &RecordingRenderPipeline) -> Result<(), BackendError> {
        if self.buffer.take_fault(|f| &mut f.fail_pipeline_bindings) {
            return Err(BackendError::Validation(format!(
                "injected binding failure for '{}'",
                pipeline.name
            )));
        }
        self.buffer.commands.push(RecordedCommand::SetRenderPipeline {
            name: pipeline.name.clone(),
        });
        self.pipeline = Some(pipeline.clone());
        Ok(())
    }

    fn set_fragment_texture(&mut self, texture: Option<&RecordingTexture>, index: u32) -> Result<(), BackendError> {
        if index != SOURCE_TEXTURE_INDEX {
            return Err(BackendError::Validation(format!(
                "render bindings expose only index {SOURCE_TEXTURE_INDEX}, got {index}"
            )));
        }
        if texture.is_some_and(|t| !t.desc.usage.contains(TextureUsage::SHADER_READ)) {
            return Err(BackendError::Validation(
                "fragment texture lacks shader-read usage".to_string(),
            ));
        }
        self.buffer.commands.push(RecordedCommand::SetFragmentTexture {
            index,
            texture: texture.map(|t| t.id),
        });
        self.source = texture.cloned();
        Ok(())
    }

    fn draw_primitives(&mut self, vertex_start: u32, vertex_count: u32) {
        self.buffer.commands.push(RecordedCommand::Draw {
            vertex_start,
            vertex_count,
        });
        match &self.pipeline {
            Some(pipeline) => self.buffer.work.push(Work::Draw {
                pipeline: pipeline.clone(),
                target: self.target.clone(),
                source: self.source.clone(),
            }),
            None => log::warn!("draw without a bound pipeline ignored"),
        }
    }

    fn end_encoding(self) {
        self.buffer.commands.push(RecordedCommand::EndRenderPass);
    }
}

pub struct RecordingComputePass<'a> {
    buffer: &'a mut RecordingCommandBuffer,
    pipeline: Option<RecordingComputePipeline>,
    destination: Option<RecordingTexture>,
    source: Option<RecordingTexture>,
}

impl ComputeEncoder<RecordingDevice> for RecordingComputePass<'_> {
    fn set_pipeline(&mut self, pipeline: &RecordingComputePipeline) -> Result<(), BackendError> {
        if self.buffer.take_fault(|f| &mut f.fail_pipeline_bindings) {
            return Err(BackendError::Validation(format!(
                "injected binding failure for '{}'",
                pipeline.name
            )));
        }
        self.buffer.commands.push(RecordedCommand::SetComputePipeline {
            name: pipeline.name.clone(),
        });
        self.pipeline = Some(pipeline.clone());
        Ok(())
    }

    fn set_texture(&mut self, texture: Option<&RecordingTexture>, index: u32) -> Result<(), BackendError> {
        match index {
            SOURCE_TEXTURE_INDEX => {
                if texture.is_some_and(|t| !t.desc.usage.contains(TextureUsage::SHADER_READ)) {
                    return Err(BackendError::Validation(
                        "source texture lacks shader-read usage".to_string(),
                    ));
                }
                self.source = texture.cloned();
            }
            DESTINATION_TEXTURE_INDEX => {
                let Some(t) = texture else {
                    return Err(BackendError::Validation(
                        "compute destination cannot be unbound".to_string(),
                    ));
                };
                if !t.desc.usage.contains(TextureUsage::SHADER_WRITE) {
                    return Err(BackendError::Validation(
                        "destination texture lacks shader-write usage".to_string(),
                    ));
                }
                self.destination = Some(t.clone());
            }
            other => {
                return Err(BackendError::Validation(format!("no compute binding at index {other}")));
            }
        }
        self.buffer.commands.push(RecordedCommand::SetTexture {
            index,
            texture: texture.map(|t| t.id),
        });
        Ok(())
    }

    fn dispatch_threads(&mut self, threads: Extent3d, threads_per_group: Extent3d) {
        self.buffer.commands.push(RecordedCommand::DispatchThreads {
            threads,
            threads_per_group,
        });
        match (&self.pipeline, &self.destination) {
            (Some(pipeline), Some(destination)) => self.buffer.work.push(Work::Dispatch {
                pipeline: pipeline.clone(),
                destination: destination.clone(),
                source: self.source.clone(),
                threads,
                threads_per_group,
            }),
            _ => log::warn!("dispatch without pipeline or destination ignored"),
        }
    }

    fn end_encoding(self) {
        self.buffer.commands.push(RecordedCommand::EndComputePass);
    }
}

/// Tightly packed copy of a source texture, sampled with clamped coordinates.
struct SourceSnapshot {
    width: u32,
    height: u32,
    bytes: Vec<u8>,
}

impl SourceSnapshot {
    fn take(texture: &RecordingTexture) -> Self {
        Self {
            width: texture.desc.width,
            height: texture.desc.height,
            bytes: texture.memory.with_bytes(|b| b.to_vec()),
        }
    }

    fn sample(&self, x: u32, y: u32) -> [f32; 4] {
        let x = x.min(self.width - 1) as usize;
        let y = y.min(self.height - 1) as usize;
        let offset = (y * self.width as usize + x) * 8;
        decode_rgba16f(&self.bytes[offset..offset + 8])
    }
}

/// Emulates recorded work in order. Returns (invocations, out-of-bounds writes).
fn execute(work: &[Work]) -> (u64, u64) {
    let mut invocations = 0u64;
    let mut oob = 0u64;

    for item in work {
        match item {
            Work::Draw { pipeline, target, source } => {
                let Some(kernel) = pipeline.kernel.as_ref() else { continue };
                let source = source.as_ref().map(SourceSnapshot::take);
                let (width, height) = (target.desc.width, target.desc.height);
                let row = target.desc.bytes_per_row();
                target.memory.with_bytes_mut(|bytes| {
                    for y in 0..height {
                        for x in 0..width {
                            invocations += 1;
                            let inv = KernelInvocation {
                                x,
                                y,
                                width,
                                height,
                                source: source.as_ref().map(|s| s.sample(x, y)),
                            };
                            let Some(color) = kernel(&inv) else { continue };
                            let offset = y as usize * row + x as usize * 8;
                            let texel = &mut bytes[offset..offset + 8];
                            let out = match pipeline.blend {
                                BlendMode::Replace => color,
                                BlendMode::PremultipliedOver => {
                                    let dst = decode_rgba16f(texel);
                                    let k = 1.0 - color[3];
                                    [
                                        color[0] + dst[0] * k,
                                        color[1] + dst[1] * k,
                                        color[2] + dst[2] * k,
                                        color[3] + dst[3] * k,
                                    ]
                                }
                            };
                            encode_rgba16f(out, texel);
                        }
                    }
                });
            }
            Work::Dispatch {
                pipeline,
                destination,
                source,
                threads,
                threads_per_group,
            } => {
                let Some(kernel) = pipeline.kernel.as_ref() else { continue };
                let source = source.as_ref().map(SourceSnapshot::take);
                let (width, height) = (destination.desc.width, destination.desc.height);
                let row = destination.desc.bytes_per_row();
                let grid_w = whole_groups(threads.width, threads_per_group.width);
                let grid_h = whole_groups(threads.height, threads_per_group.height);
                destination.memory.with_bytes_mut(|bytes| {
                    for y in 0..grid_h {
                        for x in 0..grid_w {
                            invocations += 1;
                            let inv = KernelInvocation {
                                x,
                                y,
                                width,
                                height,
                                source: source.as_ref().map(|s| s.sample(x, y)),
                            };
                            let Some(color) = kernel(&inv) else { continue };
                            if x >= width || y >= height {
                                oob += 1;
                                continue;
                            }
                            let offset = y as usize * row + x as usize * 8;
                            encode_rgba16f(color, &mut bytes[offset..offset + 8]);
                        }
                    }
                });
            }
        }
    }

    (invocations, oob)
}

/// Threads actually launched along one axis: `threads` rounded up to whole groups.
fn whole_groups(threads: u32, group: u32) -> u32 {
    let group = group.max(1);
    threads.div_ceil(group) * group
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::mpsc;

    fn shared_target(device: &RecordingDevice, w: u32, h: u32) -> RecordingTexture {
        let desc = TextureDescriptor::new_2d(w, h, TextureUsage::RENDER_TARGET, StorageMode::Shared);
        let surface = SharedSurface::zeroed(w, h, desc.format, ColorSpace::ExtendedLinearDisplayP3);
        device.make_texture_aliasing(&desc, &surface).unwrap()
    }

    #[test]
    fn aliasing_texture_shares_surface_memory() {
        let device = RecordingDevice::bundled().unwrap();
        let t = shared_target(&device, 4, 4);
        assert!(t.memory().write_pixel(1, 1, [1.0, 0.0, 0.0, 1.0]));
        let other = t.clone();
        assert_eq!(other.memory().read_pixel(1, 1), Some([1.0, 0.0, 0.0, 1.0]));
    }

    #[test]
    fn dropped_buffer_is_logged_as_discarded() {
        let device = RecordingDevice::bundled().unwrap();
        let queue = device.make_command_queue("q").unwrap();
        let buf = queue
            .make_command_buffer(&CommandBufferDescriptor {
                label: "dropped",
                report_execution_status: true,
            })
            .unwrap();
        drop(buf);
        let stats = device.stats();
        assert_eq!((stats.command_buffers, stats.commits, stats.discarded), (1, 0, 1));
        assert_eq!(
            device.commands().last(),
            Some(&RecordedCommand::Discard { label: "dropped".to_string() })
        );
    }

    #[test]
    fn injected_faults_are_consumed_once() {
        let device = RecordingDevice::bundled().unwrap();
        device.inject(|f| f.fail_command_buffers = 1);
        let queue = device.make_command_queue("q").unwrap();
        let desc = CommandBufferDescriptor {
            label: "b",
            report_execution_status: false,
        };
        assert!(queue.make_command_buffer(&desc).is_none());
        assert!(queue.make_command_buffer(&desc).is_some());
    }

    fn dispatch_grid(device: &RecordingDevice, kernel: &str, w: u32, h: u32) -> RecordingStats {
        let queue = device.make_command_queue("q").unwrap();
        let desc = TextureDescriptor::new_2d(w, h, TextureUsage::SHADER_WRITE, StorageMode::Shared);
        let surface = SharedSurface::zeroed(w, h, desc.format, ColorSpace::ExtendedLinearDisplayP3);
        let destination = device.make_texture_aliasing(&desc, &surface).unwrap();
        let pipeline = RecordingComputePipeline {
            name: kernel.to_string(),
            kernel: device.shared.kernel(kernel),
        };

        let mut buf = queue
            .make_command_buffer(&CommandBufferDescriptor {
                label: "dispatch",
                report_execution_status: true,
            })
            .unwrap();
        {
            let mut pass = buf.begin_compute_pass("grid").unwrap();
            pass.set_texture(Some(&destination), DESTINATION_TEXTURE_INDEX).unwrap();
            pass.set_pipeline(&pipeline).unwrap();
            pass.dispatch_threads(Extent3d::new_2d(w, h), Extent3d::new_2d(32, 32));
            pass.end_encoding();
        }
        let (tx, rx) = mpsc::channel();
        buf.add_completed_handler(Box::new(move |_| {
            let _ = tx.send(());
        }));
        buf.commit();
        rx.recv().unwrap();
        device.stats()
    }

    #[test]
    fn dispatch_launches_whole_groups() {
        let device = RecordingDevice::bundled().unwrap();
        device.register_kernel("unclamped", |_| Some([1.0; 4]));
        let stats = dispatch_grid(&device, "unclamped", 33, 40);
        assert_eq!(stats.kernel_invocations, 64 * 64);
        assert_eq!(stats.out_of_bounds_writes, 64 * 64 - 33 * 40);
    }

    #[test]
    fn clamping_kernel_writes_nothing_out_of_bounds() {
        let device = RecordingDevice::bundled().unwrap();
        device.register_kernel("clamped", |inv| {
            (inv.x < inv.width && inv.y < inv.height).then_some([1.0; 4])
        });
        let stats = dispatch_grid(&device, "clamped", 33, 40);
        assert_eq!(stats.kernel_invocations, 64 * 64);
        assert_eq!(stats.out_of_bounds_writes, 0);
    }

    #[test]
    fn textures_beyond_the_dimension_limit_are_refused() {
        let device = RecordingDevice::bundled().unwrap();
        let desc = TextureDescriptor::new_2d(
            RECORDING_MAX_TEXTURE_DIMENSION + 1,
            1,
            TextureUsage::RENDER_TARGET,
            StorageMode::Private,
        );
        assert!(device.make_texture(&desc).is_none());
    }

    #[test]
    fn empty_commit_completes_with_ordered_timestamps() {
        let device = RecordingDevice::bundled().unwrap();
        let queue = device.make_command_queue("q").unwrap();
        let mut buf = queue
            .make_command_buffer(&CommandBufferDescriptor {
                label: "empty",
                report_execution_status: true,
            })
            .unwrap();
        let (tx, rx) = mpsc::channel();
        buf.add_completed_handler(Box::new(move |status| {
            let _ = tx.send(status);
        }));
        buf.commit();
        match rx.recv().unwrap() {
            CompletionStatus::Completed(ts) => {
                assert!(ts.gpu_start <= ts.kernel_start);
                assert!(ts.kernel_end <= ts.gpu_end);
            }
            CompletionStatus::Failed(e) => panic!("unexpected failure: {e}"),
        }
    }
}
