use crate::session::{RenderOutput, SubmissionResult};
use crate::surface::SharedSurface;
use crate::time::ExecutionInfo;

use super::{DisplayAdapter, PLACEHOLDER_RGBA};

/// Holds the most recent successfully rendered surface.
///
/// Accepting a newer output drops the previous surface. Failed submissions
/// never replace it, so the display keeps showing the last good frame.
#[derive(Debug, Default)]
pub struct SurfaceSlot {
    latest: Option<SharedSurface>,
    info: Option<ExecutionInfo>,
    accepted: u64,
    rejected: u64,
}

impl SurfaceSlot {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn surface(&self) -> Option<&SharedSurface> {
        self.latest.as_ref()
    }

    /// Timing of the surface currently held.
    pub fn info(&self) -> Option<ExecutionInfo> {
        self.info
    }

    /// Number of outputs accepted and failures ignored so far.
    pub fn counts(&self) -> (u64, u64) {
        (self.accepted, self.rejected)
    }

    pub fn present(&mut self, output: RenderOutput) {
        self.accepted += 1;
        self.info = Some(output.info);
        self.latest = Some(output.surface);
    }

    /// Takes a submission result; returns `true` if the slot changed.
    pub fn accept(&mut self, result: SubmissionResult) -> bool {
        match result {
            Ok(output) => {
                self.present(output);
                true
            }
            Err(err) => {
                log::debug!("keeping previous surface after failed submission: {err}");
                self.rejected += 1;
                false
            }
        }
    }

    /// Pixel the display would show at `(x, y)`; the placeholder when empty.
    pub fn pixel(&self, x: u32, y: u32) -> Option<[f32; 4]> {
        match &self.latest {
            Some(surface) => surface.read_pixel(x, y),
            None => Some(PLACEHOLDER_RGBA),
        }
    }

    pub fn redraw(&self, adapter: &mut dyn DisplayAdapter) {
        adapter.display(self.latest.as_ref());
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::session::SubmitError;
    use crate::strategy::StrategyKind;
    use crate::surface::{ColorSpace, PixelFormat};

    #[derive(Default)]
    struct Recorder {
        seen: Vec<Option<u64>>,
    }

    impl DisplayAdapter for Recorder {
        fn display(&mut self, surface: Option<&SharedSurface>) {
            self.seen.push(surface.map(SharedSurface::id));
        }
    }

    fn output(id: u64) -> RenderOutput {
        RenderOutput {
            id,
            strategy: StrategyKind::SinglePassFragment,
            surface: SharedSurface::zeroed(2, 2, PixelFormat::Rgba16Float, ColorSpace::ExtendedLinearDisplayP3),
            info: ExecutionInfo {
                gpu_time: 0.002,
                kernel_time: 0.001,
            },
        }
    }

    #[test]
    fn empty_slot_shows_placeholder() {
        let slot = SurfaceSlot::new();
        let mut adapter = Recorder::default();
        slot.redraw(&mut adapter);

        assert_eq!(adapter.seen, [None]);
        assert_eq!(slot.pixel(0, 0), Some(PLACEHOLDER_RGBA));
    }

    #[test]
    fn newer_output_replaces_older() {
        let mut slot = SurfaceSlot::new();
        let first = output(1);
        let second = output(2);
        let second_id = second.surface.id();

        slot.present(first);
        slot.present(second);

        assert_eq!(slot.surface().map(SharedSurface::id), Some(second_id));
        assert_eq!(slot.counts(), (2, 0));
    }

    #[test]
    fn failure_keeps_last_good_surface() {
        let mut slot = SurfaceSlot::new();
        assert!(slot.accept(Ok(output(1))));
        let kept = slot.surface().map(SharedSurface::id);

        assert!(!slot.accept(Err(SubmitError::CommandBufferCreationFailure)));
        assert_eq!(slot.surface().map(SharedSurface::id), kept);
        assert_eq!(slot.info().map(|i| i.kernel_time), Some(0.001));
        assert_eq!(slot.counts(), (1, 1));
    }
}
