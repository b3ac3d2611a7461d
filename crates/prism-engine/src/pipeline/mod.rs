//! Shader library reflection and pipeline compilation.

mod compiler;
mod library;

pub use compiler::{
    CompileError, CompiledPipeline, CompiledPipelines, ComputePipelines, PipelineCompiler,
    PipelineKind, PipelineResolution, RenderPipelines,
};
pub use library::{
    EntryPoint, LibraryError, ShaderLibrary, ShaderStage, BUNDLED_WGSL, FULLSCREEN_TRIANGLE_VERTEX,
};
