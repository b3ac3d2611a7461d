use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::mpsc;

use crate::device::{
    CommandBuffer, CommandBufferDescriptor, CommandQueue, CompletionStatus, Device, DeviceInit,
    Texture, WgpuDevice,
};
use crate::pipeline::{CompileError, PipelineCompiler, PipelineResolution, ShaderLibrary};
use crate::strategy::{RenderStrategy, StrategyKind};
use crate::surface::{allocate, TextureDescriptor};
use crate::time::ExecutionInfo;

use super::capture::CaptureScope;
use super::submission::{RenderOutput, Submission, SubmissionId, SubmissionResult, SubmissionState, Tracker};
use super::{SessionConfig, SessionError, SubmitError};

/// Executes render strategies against one device and queue.
///
/// Encoding and commit run on the caller's thread; results arrive on the
/// backend's completion thread, in commit order. The session holds no
/// per-submission state, so `submit` may be called concurrently and
/// failed submissions leave it fully usable.
pub struct RenderSession<D: Device> {
    device: D,
    queue: D::Queue,
    strategies: Vec<RenderStrategy<D>>,
    capture_label: String,
    next_id: AtomicU64,
}

impl<D: Device> RenderSession<D> {
    /// Creates the queue and eagerly compiles every configured strategy.
    ///
    /// Under [`PipelineResolution::Lenient`] a strategy left with no
    /// resolvable names is skipped, and submitting it later fails with
    /// [`SubmitError::StrategyUnavailable`].
    pub fn new(device: D, config: &SessionConfig) -> Result<Self, SessionError> {
        log::info!("creating render session on '{}'", device.name());

        let queue = device
            .make_command_queue(&config.queue_label)
            .ok_or(SessionError::QueueUnavailable)?;

        let compiler = PipelineCompiler::new(&device, config.resolution);
        let mut strategies = Vec::with_capacity(StrategyKind::ALL.len());
        for kind in StrategyKind::ALL {
            let names: Vec<&str> = config.shader_names(kind).iter().map(String::as_str).collect();
            if names.is_empty() {
                log::debug!("{kind} strategy not configured; skipped");
                continue;
            }
            let strategy = match RenderStrategy::compile(kind, &compiler, &names) {
                Ok(strategy) => strategy,
                Err(CompileError::EmptyShaderList) if config.resolution == PipelineResolution::Lenient => {
                    log::warn!("{kind} strategy has no resolvable shaders {names:?}; unavailable");
                    continue;
                }
                Err(source) => return Err(SessionError::Compile { strategy: kind, source }),
            };
            log::info!("{kind} strategy ready: {:?}", strategy.pipeline_names());
            strategies.push(strategy);
        }

        Ok(Self {
            device,
            queue,
            strategies,
            capture_label: config.capture_label.clone(),
            next_id: AtomicU64::new(1),
        })
    }

    pub fn device(&self) -> &D {
        &self.device
    }

    pub fn strategy(&self, kind: StrategyKind) -> Option<&RenderStrategy<D>> {
        self.strategies.iter().find(|s| s.kind() == kind)
    }

    /// Strategies compiled for this session, in a fixed order.
    pub fn available(&self) -> impl Iterator<Item = StrategyKind> + '_ {
        self.strategies.iter().map(RenderStrategy::kind)
    }

    /// Destination descriptor `kind` would allocate for a `width × height` render.
    pub fn destination_descriptor(&self, kind: StrategyKind, width: u32, height: u32) -> Result<TextureDescriptor, SubmitError> {
        let strategy = self.strategy(kind).ok_or(SubmitError::StrategyUnavailable(kind))?;
        Ok(strategy.make_destination_descriptor(width, height))
    }

    /// Encodes and commits one render; returns a handle to its result.
    ///
    /// Failures before commit are returned here and nothing reaches the GPU.
    /// GPU execution failures arrive through the handle.
    pub fn submit(
        &self,
        kind: StrategyKind,
        width: u32,
        height: u32,
        source: Option<&D::Texture>,
    ) -> Result<Submission, SubmitError> {
        let (tx, rx) = mpsc::channel();
        let tracker = self.tracker();
        let id = self.dispatch(kind, width, height, source, &tracker, move |result| {
            // The handle may already be gone; nobody is waiting then.
            let _ = tx.send(result);
        })?;
        Ok(Submission::new(id, kind, tracker, rx))
    }

    /// Like [`RenderSession::submit`], delivering the result to `on_complete`
    /// exactly once on the completion thread.
    ///
    /// `on_complete` is not called when this returns an error.
    pub fn submit_with<F>(
        &self,
        kind: StrategyKind,
        width: u32,
        height: u32,
        source: Option<&D::Texture>,
        on_complete: F,
    ) -> Result<SubmissionId, SubmitError>
    where
        F: FnOnce(SubmissionResult) + Send + 'static,
    {
        let tracker = self.tracker();
        self.dispatch(kind, width, height, source, &tracker, on_complete)
    }

    fn tracker(&self) -> Tracker {
        Tracker::new(self.next_id.fetch_add(1, Ordering::Relaxed))
    }

    fn dispatch<F>(
        &self,
        kind: StrategyKind,
        width: u32,
        height: u32,
        source: Option<&D::Texture>,
        tracker: &Tracker,
        deliver: F,
    ) -> Result<SubmissionId, SubmitError>
    where
        F: FnOnce(SubmissionResult) + Send + 'static,
    {
        let id = tracker.id();
        let strategy = self.strategy(kind).ok_or(SubmitError::StrategyUnavailable(kind))?;

        if let Some(src) = source {
            if (src.width(), src.height()) != (width, height) {
                return Err(SubmitError::SourceDimensionMismatch {
                    width,
                    height,
                    actual_width: src.width(),
                    actual_height: src.height(),
                });
            }
        }

        let desc = strategy.make_destination_descriptor(width, height);
        let (surface, destination) = allocate(&self.device, &desc)?;

        let capture = CaptureScope::begin(&self.device, &self.capture_label);

        let label = format!("prism #{id} {kind}");
        let mut cmd = self
            .queue
            .make_command_buffer(&CommandBufferDescriptor {
                label: &label,
                report_execution_status: true,
            })
            .ok_or(SubmitError::CommandBufferCreationFailure)?;

        if let Err(err) = strategy.encode(&self.device, &mut cmd, source, &destination) {
            log::debug!("submission #{id}: encoding failed, discarding buffer: {err}");
            return Err(err.into());
        }
        tracker.advance(SubmissionState::Encoded);

        let completion = tracker.clone();
        cmd.add_completed_handler(Box::new(move |status| {
            let result = match status {
                CompletionStatus::Completed(timestamps) => Ok(RenderOutput {
                    id,
                    strategy: kind,
                    surface,
                    info: ExecutionInfo::from_timestamps(timestamps),
                }),
                CompletionStatus::Failed(err) => {
                    log::warn!("submission #{id} failed on the GPU: {err}");
                    Err(SubmitError::GpuExecutionFailure(err))
                }
            };
            completion.advance(SubmissionState::Completed {
                succeeded: result.is_ok(),
            });
            deliver(result);
        }));

        tracker.advance(SubmissionState::Committed);
        cmd.commit();
        capture.end();

        Ok(id)
    }
}

impl RenderSession<WgpuDevice> {
    /// Brings up a wgpu device and builds a session on it.
    pub fn with_wgpu(init: DeviceInit, config: &SessionConfig) -> Result<Self, SessionError> {
        if let Some(source) = init.shader_source.as_deref() {
            ShaderLibrary::from_wgsl(source)?;
        }
        let device = WgpuDevice::new_blocking(init)
            .map_err(|e| SessionError::DeviceUnavailable(format!("{e:#}")))?;
        Self::new(device, config)
    }
}
