use crate::device::{
    ColorAttachment, CommandBuffer, Device, LoadAction, RenderEncoder, RenderPassDescriptor,
    StoreAction, Texture, SOURCE_TEXTURE_INDEX,
};
use crate::pipeline::{CompileError, CompiledPipeline, PipelineCompiler};

use super::{binding_failed, EncodingFailure, FULLSCREEN_TRIANGLE_VERTICES};

/// One render pass, one pipeline, one full-screen triangle.
pub struct SinglePassFragment<D: Device> {
    pipeline: CompiledPipeline<D::RenderPipeline>,
}

impl<D: Device> SinglePassFragment<D> {
    /// Compiles the first fragment entry point. Further names are logged
    /// and never compiled.
    pub fn compile(compiler: &PipelineCompiler<'_, D>, names: &[&str]) -> Result<Self, CompileError> {
        let (first, ignored) = names.split_first().ok_or(CompileError::EmptyShaderList)?;
        if !ignored.is_empty() {
            log::warn!("single-pass strategy uses '{first}' and ignores {ignored:?}");
        }
        let pipeline = compiler
            .compile_render(&[*first], 1)?
            .pop()
            .ok_or(CompileError::EmptyShaderList)?;
        Ok(Self { pipeline })
    }

    pub fn pipeline(&self) -> &CompiledPipeline<D::RenderPipeline> {
        &self.pipeline
    }

    pub fn encode(
        &self,
        cmd: &mut D::CommandBuffer,
        source: Option<&D::Texture>,
        destination: &D::Texture,
    ) -> Result<(), EncodingFailure> {
        let attachments = [ColorAttachment {
            texture: destination,
            load: LoadAction::DontCare,
            store: StoreAction::Store,
        }];
        let desc = RenderPassDescriptor {
            label: "single-pass fragment",
            color_attachments: &attachments,
            render_target_width: destination.width(),
            render_target_height: destination.height(),
        };

        let mut pass = cmd
            .begin_render_pass(&desc)
            .ok_or(EncodingFailure::PassCreationFailed { pass: "render" })?;

        let name = self.pipeline.name();
        pass.set_pipeline(self.pipeline.raw()).map_err(binding_failed(name))?;
        if source.is_some() {
            pass.set_fragment_texture(source, SOURCE_TEXTURE_INDEX)
                .map_err(binding_failed(name))?;
        }
        pass.draw_primitives(0, FULLSCREEN_TRIANGLE_VERTICES);
        pass.end_encoding();

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::device::{
        CommandBufferDescriptor, CommandQueue, RecordedCommand, RecordingDevice,
    };
    use crate::pipeline::PipelineResolution;
    use crate::surface::{allocate, StorageMode};
    use crate::strategy::{destination_descriptor, StrategyKind};

    fn setup(names: &[&str]) -> (RecordingDevice, SinglePassFragment<RecordingDevice>) {
        let device = RecordingDevice::bundled().unwrap();
        let compiler = PipelineCompiler::new(&device, PipelineResolution::Strict);
        let strategy = SinglePassFragment::compile(&compiler, names).unwrap();
        (device, strategy)
    }

    #[test]
    fn encodes_one_pass_with_one_draw() {
        let (device, strategy) = setup(&["fillRed"]);
        let queue = device.make_command_queue("q").unwrap();
        let (_, dst) = allocate(&device, &destination_descriptor(StrategyKind::SinglePassFragment, 8, 8)).unwrap();
        let mut cmd = queue
            .make_command_buffer(&CommandBufferDescriptor { label: "t", report_execution_status: true })
            .unwrap();

        strategy.encode(&mut cmd, None, &dst).unwrap();
        cmd.commit();

        let commands: Vec<_> = device.commands().iter().map(RecordedCommand::without_ids).collect();
        assert_eq!(
            commands[1],
            RecordedCommand::BeginRenderPass {
                label: "single-pass fragment".to_string(),
                attachments: vec![crate::device::AttachmentRecord {
                    texture: 0,
                    storage: StorageMode::Shared,
                    load: LoadAction::DontCare,
                    store: StoreAction::Store,
                }],
            }
        );
        assert_eq!(commands[2], RecordedCommand::SetRenderPipeline { name: "fillRed".to_string() });
        assert_eq!(commands[3], RecordedCommand::Draw { vertex_start: 0, vertex_count: 3 });
        assert_eq!(commands[4], RecordedCommand::EndRenderPass);
    }

    #[test]
    fn extra_names_are_never_compiled() {
        // Strict resolution would reject the unknown second name if it were compiled.
        let (_, strategy) = setup(&["fillRed", "noSuchFragment"]);
        assert_eq!(strategy.pipeline().name(), "fillRed");
    }

    #[test]
    fn empty_name_list_is_rejected() {
        let device = RecordingDevice::bundled().unwrap();
        let compiler = PipelineCompiler::new(&device, PipelineResolution::Strict);
        assert!(matches!(
            SinglePassFragment::compile(&compiler, &[]),
            Err(CompileError::EmptyShaderList)
        ));
    }

    #[test]
    fn pass_creation_failure_is_reported() {
        let (device, strategy) = setup(&["fillRed"]);
        let queue = device.make_command_queue("q").unwrap();
        let (_, dst) = allocate(&device, &destination_descriptor(StrategyKind::SinglePassFragment, 8, 8)).unwrap();
        let mut cmd = queue
            .make_command_buffer(&CommandBufferDescriptor { label: "t", report_execution_status: true })
            .unwrap();

        device.inject(|f| f.fail_render_passes = 1);
        assert!(matches!(
            strategy.encode(&mut cmd, None, &dst),
            Err(EncodingFailure::PassCreationFailed { pass: "render" })
        ));
    }
}
