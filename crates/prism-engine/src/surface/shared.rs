use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, PoisonError, RwLock};

use half::f16;

use super::format::{ColorSpace, PixelFormat};

static NEXT_SURFACE_ID: AtomicU64 = AtomicU64::new(1);

/// CPU/GPU-shared pixel buffer.
///
/// Cloning yields another handle to the same memory. The texture a backend
/// creates over a surface writes into this memory, so GPU output becomes
/// visible here once the owning submission has completed.
#[derive(Clone)]
pub struct SharedSurface {
    inner: Arc<SurfaceInner>,
}

struct SurfaceInner {
    id: u64,
    width: u32,
    height: u32,
    bytes_per_row: usize,
    format: PixelFormat,
    color_space: ColorSpace,
    bytes: RwLock<Box<[u8]>>,
}

impl SharedSurface {
    /// Wraps already-reserved, zeroed memory. Callers go through
    /// [`super::allocate`], which validates format and extent first.
    pub(crate) fn from_parts(
        width: u32,
        height: u32,
        format: PixelFormat,
        color_space: ColorSpace,
        bytes: Box<[u8]>,
    ) -> Self {
        let bytes_per_row = width as usize * format.bytes_per_pixel();
        debug_assert_eq!(bytes.len(), bytes_per_row * height as usize);
        Self {
            inner: Arc::new(SurfaceInner {
                id: NEXT_SURFACE_ID.fetch_add(1, Ordering::Relaxed),
                width,
                height,
                bytes_per_row,
                format,
                color_space,
                bytes: RwLock::new(bytes),
            }),
        }
    }

    /// Zeroed surface for backend-internal texture memory.
    #[cfg(any(test, feature = "testing"))]
    pub(crate) fn zeroed(width: u32, height: u32, format: PixelFormat, color_space: ColorSpace) -> Self {
        let len = width as usize * height as usize * format.bytes_per_pixel();
        Self::from_parts(width, height, format, color_space, vec![0u8; len].into_boxed_slice())
    }

    /// Process-unique identifier, stable across clones.
    pub fn id(&self) -> u64 {
        self.inner.id
    }

    pub fn width(&self) -> u32 {
        self.inner.width
    }

    pub fn height(&self) -> u32 {
        self.inner.height
    }

    pub fn bytes_per_row(&self) -> usize {
        self.inner.bytes_per_row
    }

    pub fn bytes_per_element(&self) -> usize {
        self.inner.format.bytes_per_pixel()
    }

    pub fn format(&self) -> PixelFormat {
        self.inner.format
    }

    pub fn color_space(&self) -> ColorSpace {
        self.inner.color_space
    }

    /// Total byte length (`bytes_per_row × height`).
    pub fn byte_len(&self) -> usize {
        self.inner.bytes_per_row * self.inner.height as usize
    }

    /// Returns `true` if both handles refer to the same memory.
    pub fn same_memory(&self, other: &SharedSurface) -> bool {
        Arc::ptr_eq(&self.inner, &other.inner)
    }

    /// Runs `f` with read access to the raw rows.
    pub fn with_bytes<R>(&self, f: impl FnOnce(&[u8]) -> R) -> R {
        let guard = self.inner.bytes.read().unwrap_or_else(PoisonError::into_inner);
        f(&guard)
    }

    /// Runs `f` with write access to the raw rows.
    ///
    /// Intended for backends completing GPU work into the surface.
    pub fn with_bytes_mut<R>(&self, f: impl FnOnce(&mut [u8]) -> R) -> R {
        let mut guard = self.inner.bytes.write().unwrap_or_else(PoisonError::into_inner);
        f(&mut guard)
    }

    /// Decodes the pixel at `(x, y)` to linear `f32` RGBA.
    ///
    /// Returns `None` outside the surface or for non half-float surfaces.
    pub fn read_pixel(&self, x: u32, y: u32) -> Option<[f32; 4]> {
        let offset = self.pixel_offset(x, y)?;
        Some(self.with_bytes(|bytes| decode_rgba16f(&bytes[offset..offset + 8])))
    }

    /// Encodes `rgba` at `(x, y)`. Returns `false` outside the surface or for
    /// non half-float surfaces.
    pub fn write_pixel(&self, x: u32, y: u32, rgba: [f32; 4]) -> bool {
        let Some(offset) = self.pixel_offset(x, y) else {
            return false;
        };
        self.with_bytes_mut(|bytes| encode_rgba16f(rgba, &mut bytes[offset..offset + 8]));
        true
    }

    fn pixel_offset(&self, x: u32, y: u32) -> Option<usize> {
        if self.inner.format != PixelFormat::Rgba16Float {
            return None;
        }
        if x >= self.inner.width || y >= self.inner.height {
            return None;
        }
        Some(y as usize * self.inner.bytes_per_row + x as usize * self.bytes_per_element())
    }
}

impl fmt::Debug for SharedSurface {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SharedSurface")
            .field("id", &self.inner.id)
            .field("width", &self.inner.width)
            .field("height", &self.inner.height)
            .field("bytes_per_row", &self.inner.bytes_per_row)
            .field("format", &self.inner.format)
            .field("color_space", &self.inner.color_space)
            .finish()
    }
}

/// Encodes one RGBA pixel as four little-endian half floats.
pub fn encode_rgba16f(rgba: [f32; 4], out: &mut [u8]) {
    for (channel, chunk) in rgba.iter().zip(out.chunks_exact_mut(2)) {
        chunk.copy_from_slice(&f16::from_f32(*channel).to_le_bytes());
    }
}

/// Decodes four little-endian half floats into RGBA.
pub fn decode_rgba16f(bytes: &[u8]) -> [f32; 4] {
    let mut out = [0.0f32; 4];
    for (channel, chunk) in out.iter_mut().zip(bytes.chunks_exact(2)) {
        *channel = f16::from_le_bytes([chunk[0], chunk[1]]).to_f32();
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;

    fn surface(w: u32, h: u32) -> SharedSurface {
        let len = w as usize * h as usize * 8;
        SharedSurface::from_parts(
            w,
            h,
            PixelFormat::Rgba16Float,
            ColorSpace::ExtendedLinearDisplayP3,
            vec![0u8; len].into_boxed_slice(),
        )
    }

    #[test]
    fn pixel_write_is_visible_through_clones() {
        let a = surface(4, 4);
        let b = a.clone();
        assert!(a.write_pixel(3, 2, [1.0, 0.5, 0.25, 1.0]));
        assert_eq!(b.read_pixel(3, 2), Some([1.0, 0.5, 0.25, 1.0]));
        assert!(a.same_memory(&b));
        assert_eq!(a.id(), b.id());
    }

    #[test]
    fn out_of_bounds_access_is_rejected() {
        let s = surface(2, 2);
        assert!(!s.write_pixel(2, 0, [1.0; 4]));
        assert_eq!(s.read_pixel(0, 2), None);
    }

    #[test]
    fn extended_range_values_survive_half_encoding() {
        let mut buf = [0u8; 8];
        encode_rgba16f([2.5, -0.5, 0.0, 1.0], &mut buf);
        assert_eq!(decode_rgba16f(&buf), [2.5, -0.5, 0.0, 1.0]);
    }
}
