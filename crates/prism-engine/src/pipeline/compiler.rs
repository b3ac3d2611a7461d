use thiserror::Error;

use crate::device::{BackendError, BlendMode, ComputePipelineDesc, Device, RenderPipelineDesc};
use crate::surface::{PixelFormat, DESTINATION_FORMAT};

use super::library::{EntryPoint, ShaderStage, FULLSCREEN_TRIANGLE_VERTEX};

#[derive(Debug, Copy, Clone, Eq, PartialEq, Hash)]
pub enum PipelineKind {
    /// Full-screen triangle vertex stage paired with each fragment entry point.
    Render,
    /// One compute pipeline per kernel.
    Compute,
}

/// What to do with shader names the library does not contain.
#[derive(Debug, Copy, Clone, Default, Eq, PartialEq)]
pub enum PipelineResolution {
    /// Fail compilation with [`CompileError::ShaderResolutionFailure`].
    #[default]
    Strict,
    /// Drop the name with a warning and keep compiling the rest.
    Lenient,
}

#[derive(Debug, Clone, Error)]
pub enum CompileError {
    #[error("shader entry point '{name}' ({stage:?}) not found in library")]
    ShaderResolutionFailure { name: String, stage: ShaderStage },

    #[error("device rejected pipeline '{name}': {source}")]
    PipelineCreationFailure {
        name: String,
        #[source]
        source: BackendError,
    },

    #[error("shader library has no '{FULLSCREEN_TRIANGLE_VERTEX}' vertex entry point")]
    MissingVertexStage,

    #[error("no shader names left to compile")]
    EmptyShaderList,
}

/// A compiled, immutable pipeline tagged with the entry point and target
/// format it was built for.
#[derive(Debug, Clone)]
pub struct CompiledPipeline<P> {
    name: String,
    format: PixelFormat,
    raw: P,
}

impl<P> CompiledPipeline<P> {
    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn format(&self) -> PixelFormat {
        self.format
    }

    /// Backend pipeline object.
    pub fn raw(&self) -> &P {
        &self.raw
    }
}

pub type RenderPipelines<D> = Vec<CompiledPipeline<<D as Device>::RenderPipeline>>;
pub type ComputePipelines<D> = Vec<CompiledPipeline<<D as Device>::ComputePipeline>>;

/// Output of [`PipelineCompiler::compile`], in input name order.
pub enum CompiledPipelines<D: Device> {
    Render(RenderPipelines<D>),
    Compute(ComputePipelines<D>),
}

impl<D: Device> CompiledPipelines<D> {
    pub fn len(&self) -> usize {
        match self {
            CompiledPipelines::Render(p) => p.len(),
            CompiledPipelines::Compute(p) => p.len(),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn names(&self) -> Vec<&str> {
        match self {
            CompiledPipelines::Render(p) => p.iter().map(|p| p.name()).collect(),
            CompiledPipelines::Compute(p) => p.iter().map(|p| p.name()).collect(),
        }
    }
}

/// Compiles named entry points of the device's shader library into pipelines.
pub struct PipelineCompiler<'d, D: Device> {
    device: &'d D,
    resolution: PipelineResolution,
}

impl<'d, D: Device> PipelineCompiler<'d, D> {
    pub fn new(device: &'d D, resolution: PipelineResolution) -> Self {
        Self { device, resolution }
    }

    pub fn compile(&self, names: &[&str], kind: PipelineKind) -> Result<CompiledPipelines<D>, CompileError> {
        match kind {
            PipelineKind::Render => self.compile_render(names, 1).map(CompiledPipelines::Render),
            PipelineKind::Compute => self.compile_compute(names).map(CompiledPipelines::Compute),
        }
    }

    /// Builds one render pipeline per fragment entry point.
    ///
    /// Every pipeline targets `attachments` color attachments in the
    /// destination format. The first pipeline replaces attachment 0, the
    /// following ones blend premultiplied-over what earlier draws left.
    pub fn compile_render(&self, names: &[&str], attachments: usize) -> Result<RenderPipelines<D>, CompileError> {
        let library = self.device.library();
        let vertex = library
            .function(FULLSCREEN_TRIANGLE_VERTEX, ShaderStage::Vertex)
            .ok_or(CompileError::MissingVertexStage)?;
        let color_formats = vec![DESTINATION_FORMAT; attachments.max(1)];

        let mut out = Vec::with_capacity(names.len());
        for &name in names {
            let Some(fragment) = self.resolve(name, ShaderStage::Fragment)? else {
                continue;
            };
            let blend = if out.is_empty() {
                BlendMode::Replace
            } else {
                BlendMode::PremultipliedOver
            };
            let raw = self
                .device
                .make_render_pipeline(&RenderPipelineDesc {
                    label: name,
                    vertex,
                    fragment,
                    color_formats: &color_formats,
                    blend,
                })
                .map_err(|source| CompileError::PipelineCreationFailure {
                    name: name.to_string(),
                    source,
                })?;
            out.push(CompiledPipeline {
                name: name.to_string(),
                format: DESTINATION_FORMAT,
                raw,
            });
        }

        self.finish(out)
    }

    pub fn compile_compute(&self, names: &[&str]) -> Result<ComputePipelines<D>, CompileError> {
        let mut out = Vec::with_capacity(names.len());
        for &name in names {
            let Some(kernel) = self.resolve(name, ShaderStage::Compute)? else {
                continue;
            };
            let raw = self
                .device
                .make_compute_pipeline(&ComputePipelineDesc { label: name, kernel })
                .map_err(|source| CompileError::PipelineCreationFailure {
                    name: name.to_string(),
                    source,
                })?;
            out.push(CompiledPipeline {
                name: name.to_string(),
                format: DESTINATION_FORMAT,
                raw,
            });
        }

        self.finish(out)
    }

    fn resolve(
        &self,
        name: &str,
        stage: ShaderStage,
    ) -> Result<Option<&'d EntryPoint>, CompileError> {
        match self.device.library().function(name, stage) {
            Some(ep) => Ok(Some(ep)),
            None => match self.resolution {
                PipelineResolution::Strict => Err(CompileError::ShaderResolutionFailure {
                    name: name.to_string(),
                    stage,
                }),
                PipelineResolution::Lenient => {
                    log::warn!("dropping unresolved {stage:?} entry point '{name}'");
                    Ok(None)
                }
            },
        }
    }

    fn finish<P>(&self, out: Vec<CompiledPipeline<P>>) -> Result<Vec<CompiledPipeline<P>>, CompileError> {
        if out.is_empty() {
            return Err(CompileError::EmptyShaderList);
        }
        log::debug!(
            "compiled {} pipeline(s) on '{}': {:?}",
            out.len(),
            self.device.name(),
            out.iter().map(|p| p.name.as_str()).collect::<Vec<_>>()
        );
        Ok(out)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::device::RecordingDevice;

    fn device() -> RecordingDevice {
        RecordingDevice::bundled().unwrap()
    }

    #[test]
    fn render_pipelines_follow_input_order_and_blend_after_first() {
        let device = device();
        let compiler = PipelineCompiler::new(&device, PipelineResolution::Strict);
        let names = ["vignetteResolve", "gradientBase", "tintAccumulate"];
        let pipelines = compiler.compile_render(&names, 2).unwrap();

        let got: Vec<&str> = pipelines.iter().map(|p| p.name()).collect();
        assert_eq!(got, names);
        assert_eq!(pipelines[0].raw().blend(), BlendMode::Replace);
        assert_eq!(pipelines[1].raw().blend(), BlendMode::PremultipliedOver);
        assert_eq!(pipelines[2].raw().attachment_count(), 2);
        assert!(pipelines.iter().all(|p| p.format() == DESTINATION_FORMAT));
    }

    #[test]
    fn strict_mode_fails_on_unknown_name() {
        let device = device();
        let compiler = PipelineCompiler::new(&device, PipelineResolution::Strict);
        let err = compiler
            .compile(&["fillRed", "doesNotExist"], PipelineKind::Render)
            .err()
            .unwrap();
        assert!(matches!(
            err,
            CompileError::ShaderResolutionFailure { ref name, stage: ShaderStage::Fragment } if name == "doesNotExist"
        ));
    }

    #[test]
    fn lenient_mode_drops_unknown_names() {
        let device = device();
        let compiler = PipelineCompiler::new(&device, PipelineResolution::Lenient);
        let compiled = compiler
            .compile(&["missing", "markBounds"], PipelineKind::Compute)
            .unwrap();
        assert_eq!(compiled.names(), ["markBounds"]);
    }

    #[test]
    fn lenient_mode_with_nothing_left_is_an_error() {
        let device = device();
        let compiler = PipelineCompiler::new(&device, PipelineResolution::Lenient);
        assert!(matches!(
            compiler.compile(&["nope"], PipelineKind::Compute),
            Err(CompileError::EmptyShaderList)
        ));
    }

    #[test]
    fn stage_mismatch_does_not_resolve() {
        let device = device();
        let compiler = PipelineCompiler::new(&device, PipelineResolution::Strict);
        // markBounds is a compute kernel, not a fragment entry point.
        assert!(compiler.compile(&["markBounds"], PipelineKind::Render).is_err());
    }

    #[test]
    fn device_rejection_is_reported_with_cause() {
        let device = device();
        device.inject(|f| {
            f.reject_pipelines.insert("fillRed".to_string());
        });
        let compiler = PipelineCompiler::new(&device, PipelineResolution::Strict);
        match compiler.compile(&["fillRed"], PipelineKind::Render) {
            Err(CompileError::PipelineCreationFailure { name, source }) => {
                assert_eq!(name, "fillRed");
                assert!(matches!(source, BackendError::Validation(_)));
            }
            Err(other) => panic!("unexpected error: {other}"),
            Ok(_) => panic!("expected failure"),
        }
    }
}
