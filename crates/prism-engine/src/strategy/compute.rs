use crate::device::{
    CommandBuffer, ComputeEncoder, Device, Extent3d, Texture, DESTINATION_TEXTURE_INDEX,
    SOURCE_TEXTURE_INDEX,
};
use crate::pipeline::{CompileError, ComputePipelines, PipelineCompiler};

use super::{binding_failed, EncodingFailure, THREADGROUP_EDGE};

/// One compute pass dispatching every kernel over the full destination.
///
/// The grid requests exactly `width × height` threads in 32×32 groups; sizes
/// that are not multiples of 32 rely on the kernel (or the backend) to clamp.
pub struct ComputeDispatch<D: Device> {
    pipelines: ComputePipelines<D>,
}

impl<D: Device> ComputeDispatch<D> {
    pub fn compile(compiler: &PipelineCompiler<'_, D>, names: &[&str]) -> Result<Self, CompileError> {
        let pipelines = compiler.compile_compute(names)?;
        Ok(Self { pipelines })
    }

    pub fn pipelines(&self) -> &ComputePipelines<D> {
        &self.pipelines
    }

    pub fn encode(
        &self,
        cmd: &mut D::CommandBuffer,
        source: Option<&D::Texture>,
        destination: &D::Texture,
    ) -> Result<(), EncodingFailure> {
        let threads = Extent3d::new_2d(destination.width(), destination.height());
        let threads_per_group = Extent3d::new_2d(THREADGROUP_EDGE, THREADGROUP_EDGE);

        let mut pass = cmd
            .begin_compute_pass("compute dispatch")
            .ok_or(EncodingFailure::PassCreationFailed { pass: "compute" })?;

        for pipeline in &self.pipelines {
            let name = pipeline.name();
            pass.set_texture(Some(destination), DESTINATION_TEXTURE_INDEX)
                .map_err(binding_failed(name))?;
            if source.is_some() {
                pass.set_texture(source, SOURCE_TEXTURE_INDEX)
                    .map_err(binding_failed(name))?;
            }
            pass.set_pipeline(pipeline.raw()).map_err(binding_failed(name))?;
            pass.dispatch_threads(threads, threads_per_group);
        }
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
    use crate::strategy::{destination_descriptor, StrategyKind};
    use crate::surface::allocate;

    #[test]
    fn dispatch_requests_exact_thread_coverage() {
        let device = RecordingDevice::bundled().unwrap();
        let compiler = PipelineCompiler::new(&device, PipelineResolution::Strict);
        let strategy = ComputeDispatch::compile(&compiler, &["markBounds"]).unwrap();
        let queue = device.make_command_queue("q").unwrap();
        let (_, dst) = allocate(&device, &destination_descriptor(StrategyKind::ComputeDispatch, 100, 100)).unwrap();
        let mut cmd = queue
            .make_command_buffer(&CommandBufferDescriptor { label: "t", report_execution_status: true })
            .unwrap();

        strategy.encode(&mut cmd, None, &dst).unwrap();
        cmd.commit();

        let commands: Vec<_> = device.commands().iter().map(RecordedCommand::without_ids).collect();
        assert_eq!(
            &commands[1..6],
            &[
                RecordedCommand::BeginComputePass { label: "compute dispatch".to_string() },
                RecordedCommand::SetTexture { index: DESTINATION_TEXTURE_INDEX, texture: Some(0) },
                RecordedCommand::SetComputePipeline { name: "markBounds".to_string() },
                RecordedCommand::DispatchThreads {
                    threads: Extent3d::new_2d(100, 100),
                    threads_per_group: Extent3d::new_2d(32, 32),
                },
                RecordedCommand::EndComputePass,
            ]
        );
    }

    #[test]
    fn render_target_destination_is_rejected_at_binding() {
        let device = RecordingDevice::bundled().unwrap();
        let compiler = PipelineCompiler::new(&device, PipelineResolution::Strict);
        let strategy = ComputeDispatch::compile(&compiler, &["markBounds"]).unwrap();
        let queue = device.make_command_queue("q").unwrap();
        // Fragment-style destination lacks shader-write usage.
        let (_, dst) = allocate(&device, &destination_descriptor(StrategyKind::SinglePassFragment, 8, 8)).unwrap();
        let mut cmd = queue
            .make_command_buffer(&CommandBufferDescriptor { label: "t", report_execution_status: true })
            .unwrap();

        assert!(matches!(
            strategy.encode(&mut cmd, None, &dst),
            Err(EncodingFailure::PipelineBindingFailed { .. })
        ));
    }
}
