//! Render session.
//!
//! Owns the device, its command queue and the compiled strategies, and turns
//! one strategy selection into one committed command buffer per submission.
//! Intended usage:
//! - build once at startup (`RenderSession::new` / `RenderSession::with_wgpu`)
//! - call `submit` per frame or request; collect results via the handle or a callback

mod capture;
mod config;
mod error;
mod render_session;
mod submission;

pub use config::SessionConfig;
pub use error::{SessionError, SubmitError};
pub use render_session::RenderSession;
pub use submission::{RenderOutput, Submission, SubmissionId, SubmissionResult, SubmissionState};
