use std::sync::Arc;

use anyhow::{Context, Result};

use crate::pipeline::ShaderLibrary;
use crate::surface::{SharedSurface, StorageMode, TextureDescriptor, TextureUsage, DESTINATION_FORMAT};

use super::backend::{
    BlendMode, CommandBufferDescriptor, CommandQueue, ComputePipelineDesc, Device,
    RenderPipelineDesc, Texture, SOURCE_TEXTURE_INDEX,
};
use super::command::WgpuCommandBuffer;
use super::completion::CompletionWorker;
use super::{BackendError, DeviceInit};

/// Workgroup invocations needed by 32×32 compute kernels.
const COMPUTE_INVOCATIONS: u32 = 32 * 32;

/// How much timing the device can measure on the GPU itself.
#[derive(Debug, Copy, Clone, Eq, PartialEq)]
pub(super) enum TimingSupport {
    /// CPU-measured submit→completion only.
    None,
    /// Pass-level timestamps (kernel time); GPU time equals kernel time.
    Passes,
    /// Pass-level plus encoder-level timestamps.
    PassesAndEncoder,
}

/// State shared by the device, its queues, and in-flight command buffers.
pub(super) struct GpuShared {
    /// Logical device.
    pub(super) device: wgpu::Device,

    /// The device's only queue; every command buffer submits here.
    pub(super) queue: wgpu::Queue,

    /// Group 0 layout of render pipelines: binding 0 = source texture.
    pub(super) render_bind_layout: wgpu::BindGroupLayout,

    /// Group 0 layout of compute pipelines: binding 0 = source, binding 1 = destination.
    pub(super) compute_bind_layout: wgpu::BindGroupLayout,

    /// 1×1 transparent texture bound when no source is provided.
    pub(super) placeholder: wgpu::TextureView,

    /// Render group 0 over `placeholder`, used until a source is bound.
    pub(super) placeholder_render_group: wgpu::BindGroup,

    pub(super) timing: TimingSupport,

    /// Nanoseconds per timestamp tick.
    pub(super) timestamp_period: f32,

    /// Polls the device and runs completion handlers in submission order.
    pub(super) worker: CompletionWorker,
}

/// wgpu-backed [`Device`].
///
/// This type is the default backend:
/// - creates and stores Instance/Adapter/Device/Queue (headless, no surface)
/// - compiles the WGSL shader library once
/// - owns the fixed bind group layouts every pipeline shares
pub struct WgpuDevice {
    name: String,
    shared: Arc<GpuShared>,
    library: ShaderLibrary,
    module: wgpu::ShaderModule,
    render_pipeline_layout: wgpu::PipelineLayout,
    compute_pipeline_layout: wgpu::PipelineLayout,
}

pub struct WgpuQueue {
    label: String,
    shared: Arc<GpuShared>,
}

/// Texture created by [`WgpuDevice`].
///
/// Shared-storage textures remember their surface; the command buffer that
/// writes them copies the result into it before completion fires.
#[derive(Clone)]
pub struct WgpuTexture {
    desc: TextureDescriptor,
    pub(super) texture: wgpu::Texture,
    pub(super) view: wgpu::TextureView,
    pub(super) surface: Option<SharedSurface>,
}

pub struct WgpuRenderPipeline {
    pub(super) pipeline: wgpu::RenderPipeline,
}

pub struct WgpuComputePipeline {
    pub(super) pipeline: wgpu::ComputePipeline,
    pub(super) workgroup_size: [u32; 3],
}

impl Texture for WgpuTexture {
    fn descriptor(&self) -> &TextureDescriptor {
        &self.desc
    }
}

impl WgpuDevice {
    /// Creates a headless device.
    ///
    /// Adapter/device acquisition is asynchronous under wgpu.
    pub async fn new(init: DeviceInit) -> Result<Self> {
        let DeviceInit {
            power_preference,
            force_fallback_adapter,
            required_features,
            required_limits,
            timestamp_queries,
            shader_source,
        } = init;

        let library = match shader_source.as_deref() {
            Some(src) => ShaderLibrary::from_wgsl(src),
            None => ShaderLibrary::bundled(),
        }
        .context("failed to reflect shader library")?;

        let instance = wgpu::Instance::new(&wgpu::InstanceDescriptor {
            backends: wgpu::Backends::all(),
            ..Default::default()
        });

        let adapter = instance
            .request_adapter(&wgpu::RequestAdapterOptions {
                power_preference,
                compatible_surface: None,
                force_fallback_adapter,
            })
            .await
            .context("failed to find a suitable GPU adapter")?;

        let info = adapter.get_info();
        let available = adapter.features();

        let mut features = required_features;
        let mut timing = TimingSupport::None;
        if timestamp_queries && available.contains(wgpu::Features::TIMESTAMP_QUERY) {
            features |= wgpu::Features::TIMESTAMP_QUERY;
            timing = TimingSupport::Passes;
            if available.contains(wgpu::Features::TIMESTAMP_QUERY_INSIDE_ENCODERS) {
                features |= wgpu::Features::TIMESTAMP_QUERY_INSIDE_ENCODERS;
                timing = TimingSupport::PassesAndEncoder;
            }
        }

        let adapter_limits = adapter.limits();
        let mut limits = required_limits;
        limits.max_compute_invocations_per_workgroup = limits
            .max_compute_invocations_per_workgroup
            .max(adapter_limits.max_compute_invocations_per_workgroup.min(COMPUTE_INVOCATIONS));
        if limits.max_compute_invocations_per_workgroup < COMPUTE_INVOCATIONS {
            log::warn!(
                "adapter allows {} invocations per workgroup; 32x32 compute kernels will fail to compile",
                limits.max_compute_invocations_per_workgroup
            );
        }

        let (device, queue) = adapter
            .request_device(&wgpu::DeviceDescriptor {
                label: Some("prism device"),
                required_features: features,
                required_limits: limits,
                experimental_features: wgpu::ExperimentalFeatures::disabled(),
                memory_hints: wgpu::MemoryHints::Performance,
                trace: wgpu::Trace::Off,
            })
            .await
            .context("failed to create wgpu device/queue")?;

        let source = library.source();
        let module = device.create_shader_module(wgpu::ShaderModuleDescriptor {
            label: Some("prism shader library"),
            source: wgpu::ShaderSource::Wgsl(source.into()),
        });

        let render_bind_layout = device.create_bind_group_layout(&wgpu::BindGroupLayoutDescriptor {
            label: Some("prism render bgl"),
            entries: &[source_entry(wgpu::ShaderStages::FRAGMENT)],
        });

        let compute_bind_layout = device.create_bind_group_layout(&wgpu::BindGroupLayoutDescriptor {
            label: Some("prism compute bgl"),
            entries: &[
                source_entry(wgpu::ShaderStages::COMPUTE),
                wgpu::BindGroupLayoutEntry {
                    binding: 1,
                    visibility: wgpu::ShaderStages::COMPUTE,
                    ty: wgpu::BindingType::StorageTexture {
                        access: wgpu::StorageTextureAccess::WriteOnly,
                        format: DESTINATION_FORMAT.to_wgpu(),
                        view_dimension: wgpu::TextureViewDimension::D2,
                    },
                    count: None,
                },
            ],
        });

        let render_pipeline_layout = device.create_pipeline_layout(&wgpu::PipelineLayoutDescriptor {
            label: Some("prism render pipeline layout"),
            bind_group_layouts: &[&render_bind_layout],
            immediate_size: 0,
        });

        let compute_pipeline_layout = device.create_pipeline_layout(&wgpu::PipelineLayoutDescriptor {
            label: Some("prism compute pipeline layout"),
            bind_group_layouts: &[&compute_bind_layout],
            immediate_size: 0,
        });

        // wgpu zero-initialises textures, so this reads as transparent black.
        let placeholder = device
            .create_texture(&wgpu::TextureDescriptor {
                label: Some("prism placeholder source"),
                size: wgpu::Extent3d { width: 1, height: 1, depth_or_array_layers: 1 },
                mip_level_count: 1,
                sample_count: 1,
                dimension: wgpu::TextureDimension::D2,
                format: DESTINATION_FORMAT.to_wgpu(),
                usage: wgpu::TextureUsages::TEXTURE_BINDING,
                view_formats: &[],
            })
            .create_view(&wgpu::TextureViewDescriptor::default());

        let placeholder_render_group = device.create_bind_group(&wgpu::BindGroupDescriptor {
            label: Some("prism placeholder render bind group"),
            layout: &render_bind_layout,
            entries: &[wgpu::BindGroupEntry {
                binding: SOURCE_TEXTURE_INDEX,
                resource: wgpu::BindingResource::TextureView(&placeholder),
            }],
        });

        let worker = CompletionWorker::spawn("prism wgpu completion")
            .context("failed to spawn completion worker")?;

        log::info!(
            "wgpu device ready: {} ({:?}), timing={timing:?}",
            info.name,
            info.backend
        );

        let timestamp_period = queue.get_timestamp_period();

        Ok(Self {
            name: info.name,
            shared: Arc::new(GpuShared {
                device,
                queue,
                render_bind_layout,
                compute_bind_layout,
                placeholder,
                placeholder_render_group,
                timing,
                timestamp_period,
                worker,
            }),
            library,
            module,
            render_pipeline_layout,
            compute_pipeline_layout,
        })
    }

    /// Blocking variant of [`WgpuDevice::new`].
    pub fn new_blocking(init: DeviceInit) -> Result<Self> {
        pollster::block_on(Self::new(init))
    }

    /// Underlying wgpu device, for callers that need to create their own resources.
    pub fn raw(&self) -> &wgpu::Device {
        &self.shared.device
    }

    fn create_texture(&self, desc: &TextureDescriptor, extra: wgpu::TextureUsages) -> Option<wgpu::Texture> {
        let max = self.max_texture_dimension();
        if desc.width == 0 || desc.height == 0 || desc.width > max || desc.height > max {
            log::debug!("texture {}x{} outside device limits (max {max})", desc.width, desc.height);
            return None;
        }
        let descriptor = wgpu::TextureDescriptor {
            label: Some("prism texture"),
            size: wgpu::Extent3d {
                width: desc.width,
                height: desc.height,
                depth_or_array_layers: 1,
            },
            mip_level_count: 1,
            sample_count: 1,
            dimension: wgpu::TextureDimension::D2,
            format: desc.format.to_wgpu(),
            usage: wgpu_usage(desc) | extra,
            view_formats: &[],
        };
        let created = self.shared.scoped(|| self.shared.device.create_texture(&descriptor));
        match created {
            Ok(texture) => Some(texture),
            Err(e) => {
                log::warn!("device rejected {}x{} texture: {e}", desc.width, desc.height);
                None
            }
        }
    }

    fn wrap(&self, desc: &TextureDescriptor, texture: wgpu::Texture, surface: Option<SharedSurface>) -> WgpuTexture {
        let view = texture.create_view(&wgpu::TextureViewDescriptor::default());
        WgpuTexture {
            desc: *desc,
            texture,
            view,
            surface,
        }
    }

}

impl GpuShared {
    /// Runs `create` inside validation and out-of-memory scopes and reports
    /// what they caught. Resource creation outside a scope would reach the
    /// device's uncaptured-error handler, which panics.
    pub(super) fn scoped<T>(&self, create: impl FnOnce() -> T) -> Result<T, BackendError> {
        let validation = self.device.push_error_scope(wgpu::ErrorFilter::Validation);
        let oom = self.device.push_error_scope(wgpu::ErrorFilter::OutOfMemory);
        let value = create();
        // Scopes are popped innermost first.
        let oom = pollster::block_on(oom.pop());
        let validation = pollster::block_on(validation.pop());
        match oom.or(validation) {
            Some(err) => Err(map_wgpu_error(&err)),
            None => Ok(value),
        }
    }
}

impl Device for WgpuDevice {
    type Texture = WgpuTexture;
    type RenderPipeline = WgpuRenderPipeline;
    type ComputePipeline = WgpuComputePipeline;
    type Queue = WgpuQueue;
    type CommandBuffer = WgpuCommandBuffer;

    fn name(&self) -> &str {
        &self.name
    }

    fn supports_memoryless(&self) -> bool {
        false
    }

    fn max_texture_dimension(&self) -> u32 {
        self.shared.device.limits().max_texture_dimension_2d
    }

    fn library(&self) -> &ShaderLibrary {
        &self.library
    }

    fn make_command_queue(&self, label: &str) -> Option<WgpuQueue> {
        Some(WgpuQueue {
            label: label.to_string(),
            shared: Arc::clone(&self.shared),
        })
    }

    fn make_render_pipeline(&self, desc: &RenderPipelineDesc<'_>) -> Result<WgpuRenderPipeline, BackendError> {
        if desc.color_formats.is_empty() {
            return Err(BackendError::Validation(format!(
                "render pipeline '{}' has no color attachments",
                desc.label
            )));
        }

        let targets = desc
            .color_formats
            .iter()
            .enumerate()
            .map(|(i, format)| {
                Some(wgpu::ColorTargetState {
                    format: format.to_wgpu(),
                    blend: if i == 0 { blend_state(desc.blend) } else { None },
                    write_mask: wgpu::ColorWrites::ALL,
                })
            })
            .collect::<Vec<_>>();

        let pipeline = self.shared.scoped(|| {
            self.shared.device.create_render_pipeline(&wgpu::RenderPipelineDescriptor {
                label: Some(desc.label),
                layout: Some(&self.render_pipeline_layout),

                vertex: wgpu::VertexState {
                    module: &self.module,
                    entry_point: Some(&desc.vertex.name),
                    compilation_options: Default::default(),
                    buffers: &[],
                },

                fragment: Some(wgpu::FragmentState {
                    module: &self.module,
                    entry_point: Some(&desc.fragment.name),
                    compilation_options: Default::default(),
                    targets: &targets,
                }),

                primitive: wgpu::PrimitiveState {
                    topology: wgpu::PrimitiveTopology::TriangleList,
                    strip_index_format: None,
                    front_face: wgpu::FrontFace::Ccw,
                    cull_mode: None,
                    polygon_mode: wgpu::PolygonMode::Fill,
                    unclipped_depth: false,
                    conservative: false,
                },

                depth_stencil: None,
                multisample: wgpu::MultisampleState::default(),
                multiview_mask: None,
                cache: None,
            })
        })?;

        Ok(WgpuRenderPipeline { pipeline })
    }

    fn make_compute_pipeline(&self, desc: &ComputePipelineDesc<'_>) -> Result<WgpuComputePipeline, BackendError> {
        let pipeline = self.shared.scoped(|| {
            self.shared.device.create_compute_pipeline(&wgpu::ComputePipelineDescriptor {
                label: Some(desc.label),
                layout: Some(&self.compute_pipeline_layout),
                module: &self.module,
                entry_point: Some(&desc.kernel.name),
                compilation_options: Default::default(),
                cache: None,
            })
        })?;

        Ok(WgpuComputePipeline {
            pipeline,
            workgroup_size: desc.kernel.workgroup_size,
        })
    }

    fn make_texture(&self, desc: &TextureDescriptor) -> Option<WgpuTexture> {
        let texture = self.create_texture(desc, wgpu::TextureUsages::empty())?;
        Some(self.wrap(desc, texture, None))
    }

    fn make_texture_aliasing(&self, desc: &TextureDescriptor, surface: &SharedSurface) -> Option<WgpuTexture> {
        if desc.storage != StorageMode::Shared
            || desc.format != surface.format()
            || desc.width != surface.width()
            || desc.height != surface.height()
        {
            return None;
        }
        // Aliasing is emulated: results are copied into the surface at completion.
        let texture = self.create_texture(desc, wgpu::TextureUsages::COPY_SRC)?;
        Some(self.wrap(desc, texture, Some(surface.clone())))
    }

    fn make_texture_with_data(&self, desc: &TextureDescriptor, data: &[u8]) -> Option<WgpuTexture> {
        if data.len() != desc.bytes_per_row() * desc.height as usize {
            log::debug!(
                "texture upload has {} bytes, expected {}",
                data.len(),
                desc.bytes_per_row() * desc.height as usize
            );
            return None;
        }
        let desc = desc.with(desc.usage | TextureUsage::SHADER_READ, StorageMode::Private);
        let texture = self.create_texture(&desc, wgpu::TextureUsages::COPY_DST)?;
        let uploaded = self.shared.scoped(|| {
            self.shared.queue.write_texture(
                wgpu::TexelCopyTextureInfo {
                    texture: &texture,
                    mip_level: 0,
                    origin: wgpu::Origin3d::ZERO,
                    aspect: wgpu::TextureAspect::All,
                },
                data,
                wgpu::TexelCopyBufferLayout {
                    offset: 0,
                    bytes_per_row: Some(desc.bytes_per_row() as u32),
                    rows_per_image: Some(desc.height),
                },
                wgpu::Extent3d {
                    width: desc.width,
                    height: desc.height,
                    depth_or_array_layers: 1,
                },
            )
        });
        if let Err(e) = uploaded {
            log::warn!("texture upload rejected: {e}");
            return None;
        }
        Some(self.wrap(&desc, texture, None))
    }

    fn begin_capture(&self, label: &str) {
        log::trace!("capture scope '{label}' begin on {}", self.name);
    }

    fn end_capture(&self, label: &str) {
        log::trace!("capture scope '{label}' end on {}", self.name);
    }
}

impl CommandQueue<WgpuDevice> for WgpuQueue {
    fn make_command_buffer(&self, desc: &CommandBufferDescriptor<'_>) -> Option<WgpuCommandBuffer> {
        log::trace!("queue '{}' creating command buffer '{}'", self.label, desc.label);
        Some(WgpuCommandBuffer::new(Arc::clone(&self.shared), desc))
    }
}

fn source_entry(visibility: wgpu::ShaderStages) -> wgpu::BindGroupLayoutEntry {
    wgpu::BindGroupLayoutEntry {
        binding: 0,
        visibility,
        ty: wgpu::BindingType::Texture {
            sample_type: wgpu::TextureSampleType::Float { filterable: false },
            view_dimension: wgpu::TextureViewDimension::D2,
            multisampled: false,
        },
        count: None,
    }
}

fn wgpu_usage(desc: &TextureDescriptor) -> wgpu::TextureUsages {
    let mut usage = wgpu::TextureUsages::empty();
    if desc.usage.contains(TextureUsage::RENDER_TARGET) {
        usage |= wgpu::TextureUsages::RENDER_ATTACHMENT;
    }
    if desc.usage.contains(TextureUsage::SHADER_READ) {
        usage |= wgpu::TextureUsages::TEXTURE_BINDING;
    }
    if desc.usage.contains(TextureUsage::SHADER_WRITE) {
        usage |= wgpu::TextureUsages::STORAGE_BINDING;
    }
    usage
}

fn blend_state(mode: BlendMode) -> Option<wgpu::BlendState> {
    match mode {
        BlendMode::Replace => None,
        BlendMode::PremultipliedOver => Some(wgpu::BlendState {
            color: wgpu::BlendComponent {
                src_factor: wgpu::BlendFactor::One,
                dst_factor: wgpu::BlendFactor::OneMinusSrcAlpha,
                operation: wgpu::BlendOperation::Add,
            },
            alpha: wgpu::BlendComponent {
                src_factor: wgpu::BlendFactor::One,
                dst_factor: wgpu::BlendFactor::OneMinusSrcAlpha,
                operation: wgpu::BlendOperation::Add,
            },
        }),
    }
}

pub(super) fn map_wgpu_error(err: &wgpu::Error) -> BackendError {
    match err {
        wgpu::Error::OutOfMemory { .. } => BackendError::OutOfMemory(err.to_string()),
        wgpu::Error::Validation { description, .. } => BackendError::Validation(description.clone()),
        other => BackendError::Other(other.to_string()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn usage_flags_map_to_wgpu() {
        let d = TextureDescriptor::new_2d(
            4,
            4,
            TextureUsage::RENDER_TARGET | TextureUsage::SHADER_READ,
            StorageMode::Shared,
        );
        let u = wgpu_usage(&d);
        assert!(u.contains(wgpu::TextureUsages::RENDER_ATTACHMENT));
        assert!(u.contains(wgpu::TextureUsages::TEXTURE_BINDING));
        assert!(!u.contains(wgpu::TextureUsages::STORAGE_BINDING));
    }

    #[test]
    fn replace_blend_has_no_state() {
        assert!(blend_state(BlendMode::Replace).is_none());
        let over = blend_state(BlendMode::PremultipliedOver).unwrap();
        assert_eq!(over.color.dst_factor, wgpu::BlendFactor::OneMinusSrcAlpha);
    }
}
