use crate::device::{
    ColorAttachment, CommandBuffer, Device, LoadAction, RenderEncoder, RenderPassDescriptor,
    StoreAction, Texture, SOURCE_TEXTURE_INDEX,
};
use crate::pipeline::{CompileError, PipelineCompiler, RenderPipelines};
use crate::surface::{StorageMode, TextureUsage};

use super::{binding_failed, EncodingFailure, FULLSCREEN_TRIANGLE_VERTICES};

/// Color attachments per pass: the destination plus one intermediate.
const ATTACHMENTS: usize = 2;

/// Several logical passes batched into one hardware render pass.
///
/// Attachment 0 is the destination; attachment 1 is a per-submission
/// intermediate that never leaves GPU-local memory. Every pipeline draws one
/// full-screen triangle in order, later pipelines blending over earlier ones.
pub struct MultiPassFragment<D: Device> {
    pipelines: RenderPipelines<D>,
}

impl<D: Device> MultiPassFragment<D> {
    pub fn compile(compiler: &PipelineCompiler<'_, D>, names: &[&str]) -> Result<Self, CompileError> {
        let pipelines = compiler.compile_render(names, ATTACHMENTS)?;
        Ok(Self { pipelines })
    }

    pub fn pipelines(&self) -> &RenderPipelines<D> {
        &self.pipelines
    }

    pub fn encode(
        &self,
        device: &D,
        cmd: &mut D::CommandBuffer,
        source: Option<&D::Texture>,
        destination: &D::Texture,
    ) -> Result<(), EncodingFailure> {
        let storage = if device.supports_memoryless() {
            StorageMode::Memoryless
        } else {
            StorageMode::Private
        };
        let temp_desc = destination
            .descriptor()
            .with(TextureUsage::RENDER_TARGET, storage);
        let temp = device
            .make_texture(&temp_desc)
            .ok_or(EncodingFailure::TemporaryAllocationFailed)?;

        let attachments = [
            ColorAttachment {
                texture: destination,
                load: LoadAction::DontCare,
                store: StoreAction::Store,
            },
            ColorAttachment {
                texture: &temp,
                load: LoadAction::DontCare,
                store: StoreAction::DontCare,
            },
        ];
        let desc = RenderPassDescriptor {
            label: "multi-pass fragment",
            color_attachments: &attachments,
            render_target_width: destination.width(),
            render_target_height: destination.height(),
        };

        let mut pass = cmd
            .begin_render_pass(&desc)
            .ok_or(EncodingFailure::PassCreationFailed { pass: "render" })?;

        for pipeline in &self.pipelines {
            let name = pipeline.name();
            pass.set_pipeline(pipeline.raw()).map_err(binding_failed(name))?;
            if source.is_some() {
                pass.set_fragment_texture(source, SOURCE_TEXTURE_INDEX)
                    .map_err(binding_failed(name))?;
            }
            pass.draw_primitives(0, FULLSCREEN_TRIANGLE_VERTICES);
        }
        pass.end_encoding();

        Ok(())
    }
}
