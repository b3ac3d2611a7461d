use thiserror::Error;

use crate::device::Device;

use super::format::{ColorSpace, PixelFormat, StorageMode, TextureDescriptor, DESTINATION_FORMAT};
use super::shared::SharedSurface;

#[derive(Debug, Clone, Error, Eq, PartialEq)]
pub enum SurfaceAllocationFailure {
    #[error("surface extent {width}x{height} is empty")]
    ZeroExtent { width: u32, height: u32 },

    #[error("pixel format {0:?} cannot back a shared surface (expected Rgba16Float)")]
    UnsupportedFormat(PixelFormat),

    #[error("surface extent {width}x{height} exceeds the device limit of {max}")]
    ExceedsDeviceLimit { width: u32, height: u32, max: u32 },

    #[error("surface of {width}x{height} overflows addressable memory")]
    Overflow { width: u32, height: u32 },

    #[error("failed to reserve {bytes} bytes of shared memory")]
    OutOfMemory { bytes: usize },

    #[error("device refused to alias a {width}x{height} texture over shared memory")]
    TextureAliasingRejected { width: u32, height: u32 },
}

/// Allocates a shared surface and a device texture aliasing it.
///
/// The descriptor's storage is forced to [`StorageMode::Shared`]; any other
/// format than the fixed half-float RGBA layout is rejected. Extents the
/// device cannot texture are rejected before any memory is reserved. The
/// surface is tagged extended linear Display P3. No GPU work is submitted.
pub fn allocate<D: Device>(
    device: &D,
    desc: &TextureDescriptor,
) -> Result<(SharedSurface, D::Texture), SurfaceAllocationFailure> {
    let (width, height) = (desc.width, desc.height);

    if desc.format != DESTINATION_FORMAT {
        return Err(SurfaceAllocationFailure::UnsupportedFormat(desc.format));
    }
    if width == 0 || height == 0 {
        return Err(SurfaceAllocationFailure::ZeroExtent { width, height });
    }
    let max = device.max_texture_dimension();
    if width > max || height > max {
        return Err(SurfaceAllocationFailure::ExceedsDeviceLimit { width, height, max });
    }

    let bytes_per_row = (width as usize)
        .checked_mul(desc.format.bytes_per_pixel())
        .ok_or(SurfaceAllocationFailure::Overflow { width, height })?;
    let len = bytes_per_row
        .checked_mul(height as usize)
        .filter(|len| *len <= isize::MAX as usize)
        .ok_or(SurfaceAllocationFailure::Overflow { width, height })?;

    let mut bytes = Vec::new();
    bytes
        .try_reserve_exact(len)
        .map_err(|_| SurfaceAllocationFailure::OutOfMemory { bytes: len })?;
    bytes.resize(len, 0u8);

    let surface = SharedSurface::from_parts(
        width,
        height,
        desc.format,
        ColorSpace::ExtendedLinearDisplayP3,
        bytes.into_boxed_slice(),
    );

    let shared = desc.with(desc.usage, StorageMode::Shared);
    let texture = device
        .make_texture_aliasing(&shared, &surface)
        .ok_or(SurfaceAllocationFailure::TextureAliasingRejected { width, height })?;

    log::trace!(
        "allocated shared surface #{} {}x{} ({} bytes)",
        surface.id(),
        width,
        height,
        len
    );

    Ok((surface, texture))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::device::{RecordingDevice, Texture, RECORDING_MAX_TEXTURE_DIMENSION};
    use crate::surface::TextureUsage;

    fn desc(w: u32, h: u32) -> TextureDescriptor {
        TextureDescriptor::new_2d(w, h, TextureUsage::RENDER_TARGET, StorageMode::Private)
    }

    #[test]
    fn allocation_aliases_texture_and_surface() {
        let device = RecordingDevice::bundled().unwrap();
        let (surface, texture) = allocate(&device, &desc(16, 8)).unwrap();

        assert_eq!(surface.bytes_per_row(), 16 * 8);
        assert_eq!(surface.byte_len(), 16 * 8 * 8);
        assert_eq!(surface.color_space(), ColorSpace::ExtendedLinearDisplayP3);
        assert_eq!(texture.descriptor().storage, StorageMode::Shared);
        assert!(texture.memory().same_memory(&surface));
    }

    #[test]
    fn rejects_non_half_float_formats() {
        let device = RecordingDevice::bundled().unwrap();
        let mut d = desc(4, 4);
        d.format = PixelFormat::Rgba8Unorm;
        assert_eq!(
            allocate(&device, &d).unwrap_err(),
            SurfaceAllocationFailure::UnsupportedFormat(PixelFormat::Rgba8Unorm)
        );
    }

    #[test]
    fn rejects_empty_extent() {
        let device = RecordingDevice::bundled().unwrap();
        assert!(matches!(
            allocate(&device, &desc(0, 4)),
            Err(SurfaceAllocationFailure::ZeroExtent { .. })
        ));
    }

    #[test]
    fn rejects_extent_beyond_device_limit_before_reserving() {
        let device = RecordingDevice::bundled().unwrap();
        // Would need 2 GiB of host memory if it got as far as reserving.
        let max = RECORDING_MAX_TEXTURE_DIMENSION;
        assert_eq!(
            allocate(&device, &desc(max, max + 1)).unwrap_err(),
            SurfaceAllocationFailure::ExceedsDeviceLimit { width: max, height: max + 1, max }
        );
        assert!(allocate(&device, &desc(max, 1)).is_ok());
    }

    #[test]
    fn surfaces_device_refusal() {
        let device = RecordingDevice::bundled().unwrap();
        device.inject(|f| f.fail_textures = 1);
        assert!(matches!(
            allocate(&device, &desc(4, 4)),
            Err(SurfaceAllocationFailure::TextureAliasingRejected { .. })
        ));
    }
}
