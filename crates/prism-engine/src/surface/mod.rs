//! Shared surfaces and texture descriptions.
//!
//! A [`SharedSurface`] is the CPU-visible half of every destination texture;
//! [`allocate`] pairs a fresh surface with a device texture over the same
//! memory.

mod alloc;
mod format;
mod shared;

pub use alloc::{allocate, SurfaceAllocationFailure};
pub use format::{
    ColorSpace, PixelFormat, StorageMode, TextureDescriptor, TextureUsage, DESTINATION_FORMAT,
};
pub use shared::{decode_rgba16f, encode_rgba16f, SharedSurface};
