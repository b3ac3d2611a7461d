use std::path::Path;

use anyhow::{Context, Result};
use half::f16;
use image::imageops::FilterType;
use image::{DynamicImage, Rgba32FImage};

use prism_engine::device::{Device, WgpuDevice, WgpuTexture};
use prism_engine::surface::{StorageMode, TextureDescriptor, TextureUsage};

/// Decodes an image from disk.
pub fn load(path: &Path) -> Result<DynamicImage> {
    let image = image::open(path).with_context(|| format!("failed to load source image {}", path.display()))?;
    log::info!("loaded source {} ({}x{})", path.display(), image.width(), image.height());
    Ok(image)
}

/// Uploads `image` as a sampled half-float texture of `width × height`,
/// resizing first when the extents differ.
pub fn upload(device: &WgpuDevice, image: DynamicImage, width: u32, height: u32) -> Result<WgpuTexture> {
    let image = if (image.width(), image.height()) != (width, height) {
        log::debug!("resizing source to {width}x{height}");
        image.resize_exact(width, height, FilterType::Triangle)
    } else {
        image
    };

    let data = to_rgba16f(&image.to_rgba32f());
    let desc = TextureDescriptor::new_2d(width, height, TextureUsage::SHADER_READ, StorageMode::Private);
    device
        .make_texture_with_data(&desc, &data)
        .context("device refused the source texture")
}

fn to_rgba16f(image: &Rgba32FImage) -> Vec<u8> {
    image
        .as_raw()
        .iter()
        .flat_map(|&v| f16::from_f32(v).to_le_bytes())
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn converts_to_little_endian_halves() {
        let image = Rgba32FImage::from_pixel(2, 1, image::Rgba([1.0, 0.5, 0.0, 1.0]));
        let bytes = to_rgba16f(&image);
        assert_eq!(bytes.len(), 2 * 8);
        assert_eq!(&bytes[0..2], &f16::from_f32(1.0).to_le_bytes());
        assert_eq!(&bytes[2..4], &f16::from_f32(0.5).to_le_bytes());
    }
}
