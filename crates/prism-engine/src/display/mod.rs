//! Display side of the engine.
//!
//! The engine never draws to a screen itself. A [`DisplayAdapter`] receives the
//! latest completed surface (or nothing yet) and redraws; [`SurfaceSlot`] keeps
//! that latest surface and feeds adapters.

mod slot;

pub use slot::SurfaceSlot;

use crate::surface::SharedSurface;

/// Color shown before anything was rendered: transparent cyan.
pub const PLACEHOLDER_RGBA: [f32; 4] = [0.0, 1.0, 1.0, 0.0];

/// Consumer of rendered surfaces.
pub trait DisplayAdapter {
    /// Redraws with `surface`. `None` means nothing was rendered yet and the
    /// adapter should composite [`PLACEHOLDER_RGBA`].
    fn display(&mut self, surface: Option<&SharedSurface>);
}
