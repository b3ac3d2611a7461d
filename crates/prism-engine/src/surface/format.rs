use bitflags::bitflags;

/// Pixel formats known to the engine.
///
/// Only [`PixelFormat::Rgba16Float`] can back a shared destination surface; the
/// other variants exist so that callers (and source textures) can describe what
/// they have and be rejected explicitly.
#[derive(Debug, Copy, Clone, Eq, PartialEq, Hash)]
pub enum PixelFormat {
    /// 4 channels × 16-bit float, 8 bytes per pixel.
    Rgba16Float,
    Rgba8Unorm,
    Bgra8Unorm,
    Rgba32Float,
}

/// Destination format used end to end by every strategy.
pub const DESTINATION_FORMAT: PixelFormat = PixelFormat::Rgba16Float;

impl PixelFormat {
    pub fn bytes_per_pixel(self) -> usize {
        match self {
            PixelFormat::Rgba16Float => 8,
            PixelFormat::Rgba8Unorm | PixelFormat::Bgra8Unorm => 4,
            PixelFormat::Rgba32Float => 16,
        }
    }

    pub fn to_wgpu(self) -> wgpu::TextureFormat {
        match self {
            PixelFormat::Rgba16Float => wgpu::TextureFormat::Rgba16Float,
            PixelFormat::Rgba8Unorm => wgpu::TextureFormat::Rgba8Unorm,
            PixelFormat::Bgra8Unorm => wgpu::TextureFormat::Bgra8Unorm,
            PixelFormat::Rgba32Float => wgpu::TextureFormat::Rgba32Float,
        }
    }
}

/// Color space tag attached to a shared surface.
///
/// Metadata only: no pixel transformation is ever applied by the engine.
#[derive(Debug, Copy, Clone, Eq, PartialEq)]
pub enum ColorSpace {
    /// Extended-range linear Display P3; values outside [0, 1] are meaningful.
    ExtendedLinearDisplayP3,
}

bitflags! {
    /// How a texture is going to be used by a pass.
    #[derive(Debug, Copy, Clone, Eq, PartialEq, Hash)]
    pub struct TextureUsage: u8 {
        const RENDER_TARGET = 1 << 0;
        const SHADER_READ   = 1 << 1;
        const SHADER_WRITE  = 1 << 2;
    }
}

/// Where texture memory lives.
#[derive(Debug, Copy, Clone, Eq, PartialEq, Hash)]
pub enum StorageMode {
    /// CPU and GPU address the same bytes.
    Shared,
    /// GPU-only memory.
    Private,
    /// Tile memory only; contents never leave the render pass.
    Memoryless,
}

/// Value description of a 2D texture, built fresh per render call.
#[derive(Debug, Copy, Clone, Eq, PartialEq, Hash)]
pub struct TextureDescriptor {
    pub width: u32,
    pub height: u32,
    pub format: PixelFormat,
    pub usage: TextureUsage,
    pub storage: StorageMode,
}

impl TextureDescriptor {
    /// Describes a 2D texture in the destination format.
    pub fn new_2d(width: u32, height: u32, usage: TextureUsage, storage: StorageMode) -> Self {
        Self {
            width,
            height,
            format: DESTINATION_FORMAT,
            usage,
            storage,
        }
    }

    /// Returns a copy with the same extent and format but different usage/storage.
    pub fn with(self, usage: TextureUsage, storage: StorageMode) -> Self {
        Self { usage, storage, ..self }
    }

    /// Bytes covered by one row of this texture, unpadded.
    pub fn bytes_per_row(&self) -> usize {
        self.width as usize * self.format.bytes_per_pixel()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn destination_format_is_half_float_rgba() {
        assert_eq!(DESTINATION_FORMAT, PixelFormat::Rgba16Float);
        assert_eq!(DESTINATION_FORMAT.bytes_per_pixel(), 8);
        assert_eq!(DESTINATION_FORMAT.to_wgpu(), wgpu::TextureFormat::Rgba16Float);
    }

    #[test]
    fn with_keeps_extent_and_format() {
        let d = TextureDescriptor::new_2d(100, 7, TextureUsage::RENDER_TARGET, StorageMode::Shared);
        let t = d.with(TextureUsage::RENDER_TARGET, StorageMode::Memoryless);
        assert_eq!((t.width, t.height, t.format), (100, 7, PixelFormat::Rgba16Float));
        assert_eq!(t.storage, StorageMode::Memoryless);
        assert_eq!(d.bytes_per_row(), 800);
    }
}
