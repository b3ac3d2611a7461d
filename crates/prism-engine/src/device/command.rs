use std::sync::{mpsc, Arc};
use std::time::Instant;

use crate::surface::{SharedSurface, TextureUsage};
use crate::time::GpuTimestamps;

use super::backend::{
    CommandBuffer, CommandBufferDescriptor, CompletionHandler, CompletionStatus, ComputeEncoder,
    Extent3d, LoadAction, RenderEncoder, RenderPassDescriptor, StoreAction, Texture,
    DESTINATION_TEXTURE_INDEX, SOURCE_TEXTURE_INDEX,
};
use super::gpu::{map_wgpu_error, GpuShared, TimingSupport, WgpuComputePipeline, WgpuRenderPipeline, WgpuTexture};
use super::{BackendError, WgpuDevice};

// Query slots: kernel begin/end come from pass timestamp writes, gpu
// begin/end from encoder-level writes when the device supports them.
const KERNEL_BEGIN: u32 = 0;
const KERNEL_END: u32 = 1;
const GPU_BEGIN: u32 = 2;
const GPU_END: u32 = 3;

struct TimestampQueries {
    query_set: wgpu::QuerySet,
    resolve: wgpu::Buffer,
    count: u32,
    encoder_level: bool,
}

/// Shared texture whose contents must reach its surface at completion.
struct Readback {
    texture: wgpu::Texture,
    surface: SharedSurface,
}

/// Where each readback (and the timestamps) landed in the staging buffer.
struct StagingPlan {
    buffer: wgpu::Buffer,
    rows: Vec<RowCopy>,
    timestamps: Option<(u64, u32, bool)>,
}

struct RowCopy {
    surface: SharedSurface,
    offset: usize,
    padded_bytes_per_row: usize,
}

/// wgpu command buffer: one `CommandEncoder` plus the bookkeeping needed to
/// emulate shared-surface aliasing and report timing at completion.
pub struct WgpuCommandBuffer {
    shared: Arc<GpuShared>,
    label: String,
    encoder: wgpu::CommandEncoder,
    timestamps: Option<TimestampQueries>,
    readbacks: Vec<Readback>,
    handler: Option<CompletionHandler>,
    passes: u32,
}

impl WgpuCommandBuffer {
    pub(super) fn new(shared: Arc<GpuShared>, desc: &CommandBufferDescriptor<'_>) -> Self {
        let mut encoder = shared
            .device
            .create_command_encoder(&wgpu::CommandEncoderDescriptor {
                label: Some(desc.label),
            });

        let timestamps = match (shared.timing, desc.report_execution_status) {
            (TimingSupport::None, _) | (_, false) => None,
            (timing, true) => {
                let encoder_level = timing == TimingSupport::PassesAndEncoder;
                let count = if encoder_level { 4 } else { 2 };
                let query_set = shared.device.create_query_set(&wgpu::QuerySetDescriptor {
                    label: Some("prism timestamps"),
                    ty: wgpu::QueryType::Timestamp,
                    count,
                });
                let resolve = shared.device.create_buffer(&wgpu::BufferDescriptor {
                    label: Some("prism timestamp resolve"),
                    size: u64::from(count) * 8,
                    usage: wgpu::BufferUsages::QUERY_RESOLVE | wgpu::BufferUsages::COPY_SRC,
                    mapped_at_creation: false,
                });
                Some(TimestampQueries {
                    query_set,
                    resolve,
                    count,
                    encoder_level,
                })
            }
        };

        if let Some(ts) = timestamps.as_ref().filter(|ts| ts.encoder_level) {
            encoder.write_timestamp(&ts.query_set, GPU_BEGIN);
        }
        // Shows up as a named region in graphics debuggers.
        encoder.push_debug_group(desc.label);

        Self {
            shared,
            label: desc.label.to_string(),
            encoder,
            timestamps,
            readbacks: Vec::new(),
            handler: None,
            passes: 0,
        }
    }
}

fn track_readback(readbacks: &mut Vec<Readback>, texture: &WgpuTexture) {
    let Some(surface) = texture.surface.as_ref() else { return };
    if readbacks.iter().any(|r| r.surface.same_memory(surface)) {
        return;
    }
    readbacks.push(Readback {
        texture: texture.texture.clone(),
        surface: surface.clone(),
    });
}

fn load_op(action: LoadAction) -> wgpu::LoadOp<wgpu::Color> {
    match action {
        // Clearing is the portable stand-in for "don't care".
        LoadAction::DontCare => wgpu::LoadOp::Clear(wgpu::Color::TRANSPARENT),
        LoadAction::Load => wgpu::LoadOp::Load,
        LoadAction::Clear([r, g, b, a]) => wgpu::LoadOp::Clear(wgpu::Color { r, g, b, a }),
    }
}

fn store_op(action: StoreAction) -> wgpu::StoreOp {
    match action {
        StoreAction::Store => wgpu::StoreOp::Store,
        StoreAction::DontCare => wgpu::StoreOp::Discard,
    }
}

impl CommandBuffer<WgpuDevice> for WgpuCommandBuffer {
    type RenderPass<'a> = WgpuRenderPass<'a>;
    type ComputePass<'a> = WgpuComputePass<'a>;

    fn label(&self) -> &str {
        &self.label
    }

    fn begin_render_pass<'a>(
        &'a mut self,
        desc: &RenderPassDescriptor<'_, WgpuTexture>,
    ) -> Option<WgpuRenderPass<'a>> {
        if desc.color_attachments.is_empty() {
            log::debug!("render pass '{}' has no color attachments", desc.label);
            return None;
        }
        for att in desc.color_attachments {
            let d = att.texture.descriptor();
            if !d.usage.contains(TextureUsage::RENDER_TARGET)
                || d.width != desc.render_target_width
                || d.height != desc.render_target_height
            {
                log::debug!(
                    "render pass '{}' rejected attachment {}x{} {:?}",
                    desc.label,
                    d.width,
                    d.height,
                    d.usage
                );
                return None;
            }
        }

        let Self {
            shared,
            encoder,
            timestamps,
            readbacks,
            passes,
            ..
        } = self;

        for att in desc.color_attachments.iter().filter(|a| a.store == StoreAction::Store) {
            track_readback(readbacks, att.texture);
        }

        let color_attachments = desc
            .color_attachments
            .iter()
            .map(|att| {
                Some(wgpu::RenderPassColorAttachment {
                    view: &att.texture.view,
                    resolve_target: None,
                    ops: wgpu::Operations {
                        load: load_op(att.load),
                        store: store_op(att.store),
                    },
                    depth_slice: None,
                })
            })
            .collect::<Vec<_>>();

        let first = *passes == 0;
        *passes += 1;

        let pass = encoder.begin_render_pass(&wgpu::RenderPassDescriptor {
            label: Some(desc.label),
            color_attachments: &color_attachments,
            depth_stencil_attachment: None,
            timestamp_writes: timestamps.as_ref().map(|ts| wgpu::RenderPassTimestampWrites {
                query_set: &ts.query_set,
                beginning_of_pass_write_index: first.then_some(KERNEL_BEGIN),
                end_of_pass_write_index: Some(KERNEL_END),
            }),
            occlusion_query_set: None,
            multiview_mask: None,
        });

        Some(WgpuRenderPass {
            pass,
            shared: &**shared,
            bind_group: None,
            bound: false,
        })
    }

    fn begin_compute_pass<'a>(&'a mut self, label: &str) -> Option<WgpuComputePass<'a>> {
        let Self {
            shared,
            encoder,
            timestamps,
            readbacks,
            passes,
            ..
        } = self;

        let first = *passes == 0;
        *passes += 1;

        let pass = encoder.begin_compute_pass(&wgpu::ComputePassDescriptor {
            label: Some(label),
            timestamp_writes: timestamps.as_ref().map(|ts| wgpu::ComputePassTimestampWrites {
                query_set: &ts.query_set,
                beginning_of_pass_write_index: first.then_some(KERNEL_BEGIN),
                end_of_pass_write_index: Some(KERNEL_END),
            }),
        });

        Some(WgpuComputePass {
            pass,
            shared: &**shared,
            readbacks,
            source: None,
            destination: None,
            bind_group: None,
            workgroup_size: None,
        })
    }

    fn add_completed_handler(&mut self, handler: CompletionHandler) {
        self.handler = Some(handler);
    }

    fn commit(self) {
        let Self {
            shared,
            label,
            mut encoder,
            timestamps,
            readbacks,
            handler,
            ..
        } = self;

        encoder.pop_debug_group();
        if let Some(ts) = timestamps.as_ref().filter(|ts| ts.encoder_level) {
            encoder.write_timestamp(&ts.query_set, GPU_END);
        }

        // Encoding errors surface at finish/submit; report them through the
        // completion handler instead of the device's uncaptured-error hook.
        let scope = shared.device.push_error_scope(wgpu::ErrorFilter::Validation);
        let staging = stage_results(&shared, &mut encoder, &readbacks, timestamps.as_ref());
        let index = shared.queue.submit(std::iter::once(encoder.finish()));
        let rejected = pollster::block_on(scope.pop()).map(|e| map_wgpu_error(&e));
        let committed_at = Instant::now();
        log::trace!("committed '{label}'");

        let job_shared = Arc::clone(&shared);
        let job = Box::new(move || {
            let status = match rejected {
                Some(err) => CompletionStatus::Failed(err),
                None => complete(&job_shared, index, staging, committed_at),
            };
            if let Some(handler) = handler {
                handler(status);
            }
        });

        if let Err(job) = shared.worker.enqueue(job) {
            log::warn!("completion worker gone; completing '{label}' inline");
            job();
        }
    }
}

/// Encodes copies of every shared texture (and the resolved timestamps) into
/// one mappable staging buffer.
fn stage_results(
    shared: &GpuShared,
    encoder: &mut wgpu::CommandEncoder,
    readbacks: &[Readback],
    timestamps: Option<&TimestampQueries>,
) -> Option<StagingPlan> {
    if readbacks.is_empty() && timestamps.is_none() {
        return None;
    }

    let align = u64::from(wgpu::COPY_BYTES_PER_ROW_ALIGNMENT);
    let mut size = 0u64;
    let mut layout = Vec::with_capacity(readbacks.len());
    for rb in readbacks {
        let unpadded = rb.surface.bytes_per_row() as u32;
        let padded = wgpu::util::align_to(unpadded, wgpu::COPY_BYTES_PER_ROW_ALIGNMENT);
        layout.push((size, padded));
        size += wgpu::util::align_to(u64::from(padded) * u64::from(rb.surface.height()), align);
    }
    let ts_offset = size;
    if let Some(ts) = timestamps {
        size += u64::from(ts.count) * 8;
    }

    let buffer = shared.device.create_buffer(&wgpu::BufferDescriptor {
        label: Some("prism staging"),
        size,
        usage: wgpu::BufferUsages::MAP_READ | wgpu::BufferUsages::COPY_DST,
        mapped_at_creation: false,
    });

    let mut rows = Vec::with_capacity(readbacks.len());
    for (rb, (offset, padded)) in readbacks.iter().zip(layout) {
        encoder.copy_texture_to_buffer(
            wgpu::TexelCopyTextureInfo {
                texture: &rb.texture,
                mip_level: 0,
                origin: wgpu::Origin3d::ZERO,
                aspect: wgpu::TextureAspect::All,
            },
            wgpu::TexelCopyBufferInfo {
                buffer: &buffer,
                layout: wgpu::TexelCopyBufferLayout {
                    offset,
                    bytes_per_row: Some(padded),
                    rows_per_image: Some(rb.surface.height()),
                },
            },
            wgpu::Extent3d {
                width: rb.surface.width(),
                height: rb.surface.height(),
                depth_or_array_layers: 1,
            },
        );
        rows.push(RowCopy {
            surface: rb.surface.clone(),
            offset: offset as usize,
            padded_bytes_per_row: padded as usize,
        });
    }

    if let Some(ts) = timestamps {
        encoder.resolve_query_set(&ts.query_set, 0..ts.count, &ts.resolve, 0);
        encoder.copy_buffer_to_buffer(&ts.resolve, 0, &buffer, ts_offset, u64::from(ts.count) * 8);
    }

    Some(StagingPlan {
        buffer,
        rows,
        timestamps: timestamps.map(|ts| (ts_offset, ts.count, ts.encoder_level)),
    })
}

/// Runs on the completion worker: waits for `index`, lands readbacks in their
/// surfaces and converts timestamps.
fn complete(
    shared: &GpuShared,
    index: wgpu::SubmissionIndex,
    staging: Option<StagingPlan>,
    committed_at: Instant,
) -> CompletionStatus {
    let (tx, rx) = mpsc::channel();
    if let Some(plan) = &staging {
        plan.buffer.slice(..).map_async(wgpu::MapMode::Read, move |result| {
            let _ = tx.send(result);
        });
    }

    if let Err(e) = shared.device.poll(wgpu::PollType::Wait {
        submission_index: Some(index),
        timeout: None,
    }) {
        return CompletionStatus::Failed(BackendError::Other(format!("device poll failed: {e}")));
    }
    let elapsed = committed_at.elapsed().as_secs_f64();

    let Some(plan) = staging else {
        return CompletionStatus::Completed(GpuTimestamps::single_interval(0.0, elapsed));
    };

    let mapped = match rx.try_recv() {
        Ok(result) => Some(result),
        Err(_) => {
            // The map callback may land one poll after the submission retires.
            let _ = shared.device.poll(wgpu::PollType::Wait {
                submission_index: None,
                timeout: None,
            });
            rx.try_recv().ok()
        }
    };
    match mapped {
        Some(Ok(())) => {}
        Some(Err(e)) => return CompletionStatus::Failed(BackendError::DeviceLost(e.to_string())),
        None => {
            return CompletionStatus::Failed(BackendError::Other(
                "staging buffer was never mapped".to_string(),
            ));
        }
    }

    let timestamps = {
        let data = plan.buffer.slice(..).get_mapped_range();
        for copy in &plan.rows {
            let unpadded = copy.surface.bytes_per_row();
            let height = copy.surface.height() as usize;
            copy.surface.with_bytes_mut(|dst| {
                for row in 0..height {
                    let src = copy.offset + row * copy.padded_bytes_per_row;
                    dst[row * unpadded..(row + 1) * unpadded]
                        .copy_from_slice(&data[src..src + unpadded]);
                }
            });
        }
        plan.timestamps
            .and_then(|(offset, count, encoder_level)| {
                let start = offset as usize;
                let ticks = data[start..start + count as usize * 8]
                    .chunks_exact(8)
                    .map(bytemuck::pod_read_unaligned::<u64>)
                    .collect::<Vec<_>>();
                decode_timestamps(&ticks, encoder_level, shared.timestamp_period)
            })
    };
    plan.buffer.unmap();

    CompletionStatus::Completed(
        timestamps.unwrap_or_else(|| GpuTimestamps::single_interval(0.0, elapsed)),
    )
}

/// Converts raw ticks to seconds. `None` if the kernel interval was never written.
fn decode_timestamps(ticks: &[u64], encoder_level: bool, period_ns: f32) -> Option<GpuTimestamps> {
    let to_secs = |t: u64| t as f64 * f64::from(period_ns) * 1e-9;
    let kernel_start = *ticks.get(KERNEL_BEGIN as usize)?;
    let kernel_end = *ticks.get(KERNEL_END as usize)?;
    if kernel_end == 0 || kernel_end < kernel_start {
        return None;
    }
    let (gpu_start, gpu_end) = match (encoder_level, ticks.get(GPU_BEGIN as usize), ticks.get(GPU_END as usize)) {
        (true, Some(&s), Some(&e)) if e >= s && s <= kernel_start => (s, e.max(kernel_end)),
        _ => (kernel_start, kernel_end),
    };
    Some(GpuTimestamps {
        gpu_start: to_secs(gpu_start),
        gpu_end: to_secs(gpu_end),
        kernel_start: to_secs(kernel_start),
        kernel_end: to_secs(kernel_end),
    })
}

/// Render pass encoder. Group 0 is created when the source changes and
/// re-applied lazily before the next draw.
pub struct WgpuRenderPass<'a> {
    pass: wgpu::RenderPass<'a>,
    shared: &'a GpuShared,
    /// `None` means the placeholder group.
    bind_group: Option<wgpu::BindGroup>,
    bound: bool,
}

impl RenderEncoder<WgpuDevice> for WgpuRenderPass<'_> {
    fn set_pipeline(&mut self, pipeline: &WgpuRenderPipeline) -> Result<(), BackendError> {
        self.pass.set_pipeline(&pipeline.pipeline);
        self.bound = false;
        Ok(())
    }

    fn set_fragment_texture(&mut self, texture: Option<&WgpuTexture>, index: u32) -> Result<(), BackendError> {
        if index != SOURCE_TEXTURE_INDEX {
            return Err(BackendError::Validation(format!(
                "render bindings expose only index {SOURCE_TEXTURE_INDEX}, got {index}"
            )));
        }
        self.bind_group = match texture {
            None => None,
            Some(t) => {
                if !t.descriptor().usage.contains(TextureUsage::SHADER_READ) {
                    return Err(BackendError::Validation(
                        "fragment texture lacks shader-read usage".to_string(),
                    ));
                }
                let group = self.shared.scoped(|| {
                    self.shared.device.create_bind_group(&wgpu::BindGroupDescriptor {
                        label: Some("prism render bind group"),
                        layout: &self.shared.render_bind_layout,
                        entries: &[wgpu::BindGroupEntry {
                            binding: SOURCE_TEXTURE_INDEX,
                            resource: wgpu::BindingResource::TextureView(&t.view),
                        }],
                    })
                })?;
                Some(group)
            }
        };
        self.bound = false;
        Ok(())
    }

    fn draw_primitives(&mut self, vertex_start: u32, vertex_count: u32) {
        if !self.bound {
            let group = self
                .bind_group
                .as_ref()
                .unwrap_or(&self.shared.placeholder_render_group);
            self.pass.set_bind_group(0, group, &[]);
            self.bound = true;
        }
        self.pass.draw(vertex_start..vertex_start + vertex_count, 0..1);
    }

    fn end_encoding(self) {
        drop(self.pass);
    }
}

/// Compute pass encoder. Group 0 is rebuilt whenever a binding changes while
/// a destination is bound.
pub struct WgpuComputePass<'a> {
    pass: wgpu::ComputePass<'a>,
    shared: &'a GpuShared,
    readbacks: &'a mut Vec<Readback>,
    source: Option<wgpu::TextureView>,
    destination: Option<wgpu::TextureView>,
    bind_group: Option<wgpu::BindGroup>,
    workgroup_size: Option<[u32; 3]>,
}

impl WgpuComputePass<'_> {
    fn rebuild_bind_group(&mut self) -> Result<(), BackendError> {
        let Some(destination) = self.destination.as_ref() else {
            return Ok(());
        };
        let source = self.source.as_ref().unwrap_or(&self.shared.placeholder);
        let group = self.shared.scoped(|| {
            self.shared.device.create_bind_group(&wgpu::BindGroupDescriptor {
                label: Some("prism compute bind group"),
                layout: &self.shared.compute_bind_layout,
                entries: &[
                    wgpu::BindGroupEntry {
                        binding: SOURCE_TEXTURE_INDEX,
                        resource: wgpu::BindingResource::TextureView(source),
                    },
                    wgpu::BindGroupEntry {
                        binding: DESTINATION_TEXTURE_INDEX,
                        resource: wgpu::BindingResource::TextureView(destination),
                    },
                ],
            })
        })?;
        self.bind_group = Some(group);
        Ok(())
    }
}

impl ComputeEncoder<WgpuDevice> for WgpuComputePass<'_> {
    fn set_pipeline(&mut self, pipeline: &WgpuComputePipeline) -> Result<(), BackendError> {
        self.pass.set_pipeline(&pipeline.pipeline);
        self.workgroup_size = Some(pipeline.workgroup_size);
        Ok(())
    }

    fn set_texture(&mut self, texture: Option<&WgpuTexture>, index: u32) -> Result<(), BackendError> {
        match index {
            SOURCE_TEXTURE_INDEX => {
                if let Some(t) = texture {
                    if !t.descriptor().usage.contains(TextureUsage::SHADER_READ) {
                        return Err(BackendError::Validation(
                            "source texture lacks shader-read usage".to_string(),
                        ));
                    }
                }
                self.source = texture.map(|t| t.view.clone());
            }
            DESTINATION_TEXTURE_INDEX => {
                let Some(t) = texture else {
                    return Err(BackendError::Validation(
                        "compute destination cannot be unbound".to_string(),
                    ));
                };
                if !t.descriptor().usage.contains(TextureUsage::SHADER_WRITE) {
                    return Err(BackendError::Validation(
                        "destination texture lacks shader-write usage".to_string(),
                    ));
                }
                track_readback(&mut *self.readbacks, t);
                self.destination = Some(t.view.clone());
            }
            other => {
                return Err(BackendError::Validation(format!(
                    "compute bindings expose indices {SOURCE_TEXTURE_INDEX} and {DESTINATION_TEXTURE_INDEX}, got {other}"
                )));
            }
        }
        self.rebuild_bind_group()
    }

    fn dispatch_threads(&mut self, threads: Extent3d, threads_per_group: Extent3d) {
        let Some(bind_group) = self.bind_group.as_ref() else {
            log::warn!("compute dispatch skipped: no destination bound");
            return;
        };
        if let Some(declared) = self.workgroup_size {
            let requested = [threads_per_group.width, threads_per_group.height, threads_per_group.depth];
            if declared != requested {
                log::debug!("kernel declares workgroup {declared:?}, dispatch requested {requested:?}");
            }
        }

        self.pass.set_bind_group(0, bind_group, &[]);

        // wgpu dispatches whole groups only; kernels clamp the overhang.
        self.pass.dispatch_workgroups(
            threads.width.div_ceil(threads_per_group.width.max(1)),
            threads.height.div_ceil(threads_per_group.height.max(1)),
            threads.depth.div_ceil(threads_per_group.depth.max(1)),
        );
    }

    fn end_encoding(self) {
        drop(self.pass);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn timestamps_without_encoder_level_mirror_kernel() {
        let ts = decode_timestamps(&[1_000, 3_000], false, 1.0).unwrap();
        assert_eq!(ts.gpu_start, ts.kernel_start);
        assert!((ts.kernel_end - ts.kernel_start - 2e-6).abs() < 1e-12);
    }

    #[test]
    fn encoder_level_interval_encloses_kernel() {
        let ts = decode_timestamps(&[1_000, 3_000, 500, 4_000], true, 2.0).unwrap();
        assert!(ts.gpu_start <= ts.kernel_start);
        assert!(ts.gpu_end >= ts.kernel_end);
    }

    #[test]
    fn unwritten_kernel_queries_are_ignored() {
        assert!(decode_timestamps(&[0, 0], false, 1.0).is_none());
        assert!(decode_timestamps(&[], false, 1.0).is_none());
    }

    #[test]
    fn dont_care_maps_to_transparent_clear_and_discard() {
        assert_eq!(load_op(LoadAction::DontCare), wgpu::LoadOp::Clear(wgpu::Color::TRANSPARENT));
        assert_eq!(store_op(StoreAction::DontCare), wgpu::StoreOp::Discard);
    }
}
