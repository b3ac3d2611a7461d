//! Prism render-strategy engine.
//!
//! Renders full-screen GPU work into CPU-visible shared surfaces using one of
//! three strategies (single-pass fragment, multi-pass fragment, compute
//! dispatch) and reports per-submission GPU timing.

pub mod device;
pub mod display;
pub mod logging;
pub mod pipeline;
pub mod session;
pub mod strategy;
pub mod surface;
pub mod time;

pub use session::{RenderOutput, RenderSession, SessionConfig, SessionError, SubmitError, Submission};
pub use strategy::StrategyKind;
