//! Render strategies.
//!
//! A [`RenderStrategy`] is one of three fixed pipeline topologies. Every
//! variant describes its destination texture and encodes its work into a
//! command buffer; the session dispatches to the variant once per submission.
//!
//! Convention:
//! - the destination is always the fixed half-float RGBA format in shared storage
//! - fragment variants draw a 3-vertex full-screen triangle per pipeline
//! - the optional source texture binds at `SOURCE_TEXTURE_INDEX`

mod compute;
mod multi_pass;
mod single_pass;

use std::fmt;

use thiserror::Error;

use crate::device::{BackendError, Device};
use crate::pipeline::{CompileError, PipelineCompiler};
use crate::surface::{StorageMode, TextureDescriptor, TextureUsage};

pub use compute::ComputeDispatch;
pub use multi_pass::MultiPassFragment;
pub use single_pass::SinglePassFragment;

/// Vertices emitted by the full-screen triangle vertex stage.
pub const FULLSCREEN_TRIANGLE_VERTICES: u32 = 3;

/// Threads per compute group along x and y.
pub const THREADGROUP_EDGE: u32 = 32;

#[derive(Debug, Clone, Error)]
pub enum EncodingFailure {
    #[error("could not create {pass} pass")]
    PassCreationFailed { pass: &'static str },

    #[error("binding pipeline '{pipeline}' failed: {source}")]
    PipelineBindingFailed {
        pipeline: String,
        #[source]
        source: BackendError,
    },

    #[error("could not allocate the intermediate attachment")]
    TemporaryAllocationFailed,
}

/// Externally selectable strategy.
#[derive(Debug, Copy, Clone, Eq, PartialEq, Hash)]
pub enum StrategyKind {
    SinglePassFragment,
    MultiPassFragment,
    ComputeDispatch,
}

impl StrategyKind {
    pub const ALL: [StrategyKind; 3] = [
        StrategyKind::SinglePassFragment,
        StrategyKind::MultiPassFragment,
        StrategyKind::ComputeDispatch,
    ];

    /// Whether this strategy reads an optional source texture.
    pub fn accepts_source(self) -> bool {
        !matches!(self, StrategyKind::SinglePassFragment)
    }
}

impl fmt::Display for StrategyKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.pad(match self {
            StrategyKind::SinglePassFragment => "single-pass",
            StrategyKind::MultiPassFragment => "multi-pass",
            StrategyKind::ComputeDispatch => "compute",
        })
    }
}

/// A compiled strategy, owning its pipelines.
pub enum RenderStrategy<D: Device> {
    SinglePass(SinglePassFragment<D>),
    MultiPass(MultiPassFragment<D>),
    Compute(ComputeDispatch<D>),
}

impl<D: Device> RenderStrategy<D> {
    /// Compiles the strategy of `kind` from `names`.
    pub fn compile(kind: StrategyKind, compiler: &PipelineCompiler<'_, D>, names: &[&str]) -> Result<Self, CompileError> {
        Ok(match kind {
            StrategyKind::SinglePassFragment => RenderStrategy::SinglePass(SinglePassFragment::compile(compiler, names)?),
            StrategyKind::MultiPassFragment => RenderStrategy::MultiPass(MultiPassFragment::compile(compiler, names)?),
            StrategyKind::ComputeDispatch => RenderStrategy::Compute(ComputeDispatch::compile(compiler, names)?),
        })
    }

    pub fn kind(&self) -> StrategyKind {
        match self {
            RenderStrategy::SinglePass(_) => StrategyKind::SinglePassFragment,
            RenderStrategy::MultiPass(_) => StrategyKind::MultiPassFragment,
            RenderStrategy::Compute(_) => StrategyKind::ComputeDispatch,
        }
    }

    /// Entry point names, in execution order.
    pub fn pipeline_names(&self) -> Vec<&str> {
        match self {
            RenderStrategy::SinglePass(s) => vec![s.pipeline().name()],
            RenderStrategy::MultiPass(s) => s.pipelines().iter().map(|p| p.name()).collect(),
            RenderStrategy::Compute(s) => s.pipelines().iter().map(|p| p.name()).collect(),
        }
    }

    pub fn make_destination_descriptor(&self, width: u32, height: u32) -> TextureDescriptor {
        destination_descriptor(self.kind(), width, height)
    }

    pub fn encode(
        &self,
        device: &D,
        cmd: &mut D::CommandBuffer,
        source: Option<&D::Texture>,
        destination: &D::Texture,
    ) -> Result<(), EncodingFailure> {
        match self {
            RenderStrategy::SinglePass(s) => s.encode(cmd, source, destination),
            RenderStrategy::MultiPass(s) => s.encode(device, cmd, source, destination),
            RenderStrategy::Compute(s) => s.encode(cmd, source, destination),
        }
    }
}

/// Destination descriptor for `kind`: render-target for fragment variants,
/// shader-write for compute, shared storage for all.
pub fn destination_descriptor(kind: StrategyKind, width: u32, height: u32) -> TextureDescriptor {
    let usage = match kind {
        StrategyKind::SinglePassFragment | StrategyKind::MultiPassFragment => TextureUsage::RENDER_TARGET,
        StrategyKind::ComputeDispatch => TextureUsage::SHADER_WRITE,
    };
    TextureDescriptor::new_2d(width, height, usage, StorageMode::Shared)
}

fn binding_failed(pipeline: &str) -> impl FnOnce(BackendError) -> EncodingFailure + '_ {
    move |source| EncodingFailure::PipelineBindingFailed {
        pipeline: pipeline.to_string(),
        source,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::device::RecordingDevice;
    use crate::pipeline::PipelineResolution;
    use crate::surface::DESTINATION_FORMAT;

    #[test]
    fn destination_descriptor_matches_request_for_every_strategy() {
        for kind in StrategyKind::ALL {
            for (w, h) in [(1, 1), (100, 100), (256, 256), (2048, 17)] {
                let d = destination_descriptor(kind, w, h);
                assert_eq!((d.width, d.height), (w, h));
                assert_eq!(d.format, DESTINATION_FORMAT);
                assert_eq!(d.storage, StorageMode::Shared);
            }
        }
    }

    #[test]
    fn usage_depends_on_strategy_family() {
        assert_eq!(
            destination_descriptor(StrategyKind::SinglePassFragment, 4, 4).usage,
            TextureUsage::RENDER_TARGET
        );
        assert_eq!(
            destination_descriptor(StrategyKind::MultiPassFragment, 4, 4).usage,
            TextureUsage::RENDER_TARGET
        );
        assert_eq!(
            destination_descriptor(StrategyKind::ComputeDispatch, 4, 4).usage,
            TextureUsage::SHADER_WRITE
        );
    }

    #[test]
    fn compiled_strategy_reports_kind_and_names() {
        let device = RecordingDevice::bundled().unwrap();
        let compiler = PipelineCompiler::new(&device, PipelineResolution::Strict);
        let strategy = RenderStrategy::compile(StrategyKind::ComputeDispatch, &compiler, &["markBounds", "invertSource"]).unwrap();
        assert_eq!(strategy.kind(), StrategyKind::ComputeDispatch);
        assert_eq!(strategy.pipeline_names(), ["markBounds", "invertSource"]);
    }
}
