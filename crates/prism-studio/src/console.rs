use prism_engine::display::{DisplayAdapter, PLACEHOLDER_RGBA};
use prism_engine::surface::SharedSurface;

/// Display adapter that reports what a real view would composite.
#[derive(Debug, Default)]
pub struct ConsoleDisplay {
    last: Option<u64>,
}

impl DisplayAdapter for ConsoleDisplay {
    fn display(&mut self, surface: Option<&SharedSurface>) {
        let Some(surface) = surface else {
            log::info!("display: nothing rendered yet, placeholder {PLACEHOLDER_RGBA:?}");
            return;
        };
        if self.last == Some(surface.id()) {
            return;
        }
        self.last = Some(surface.id());

        let (cx, cy) = (surface.width() / 2, surface.height() / 2);
        let center = surface.read_pixel(cx, cy).unwrap_or(PLACEHOLDER_RGBA);
        log::info!(
            "display: surface #{} {}x{} ({:?}), center {:?}",
            surface.id(),
            surface.width(),
            surface.height(),
            surface.color_space(),
            center
        );
    }
}
