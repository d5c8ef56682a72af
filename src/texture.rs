use std::io::Cursor;

use anyhow::{Context, Result};
use image::{DynamicImage, ImageFormat, imageops::FilterType};

/// Interpolation method used when two source textures must share a size.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ResizeInterpolation {
    /// Fast nearest-neighbor interpolation.
    Nearest,
    /// Bilinear interpolation (`image`'s `Triangle` filter).
    #[default]
    Bilinear,
    /// Bicubic interpolation (`image`'s `CatmullRom` filter).
    Bicubic,
}

impl From<ResizeInterpolation> for FilterType {
    fn from(value: ResizeInterpolation) -> Self {
        match value {
            ResizeInterpolation::Nearest => FilterType::Nearest,
            ResizeInterpolation::Bilinear => FilterType::Triangle,
            ResizeInterpolation::Bicubic => FilterType::CatmullRom,
        }
    }
}

/// Resample `image` to exactly `width` x `height`, ignoring aspect ratio.
///
/// Returns an unchanged clone when the size already matches.
pub fn resize_to_exact(
    image: &DynamicImage,
    width: u32,
    height: u32,
    interpolation: ResizeInterpolation,
) -> DynamicImage {
    if image.width() == width && image.height() == height {
        return image.clone();
    }

    image.resize_exact(width, height, interpolation.into())
}

/// Decode an 8-bit sRGB-encoded component to linear `[0, 1]`.
pub fn srgb_to_linear(value: u8) -> f32 {
    let c = f32::from(value) / 255.0;
    if c <= 0.04045 {
        c / 12.92
    } else {
        ((c + 0.055) / 1.055).powf(2.4)
    }
}

/// Encode a linear `[0, 1]` component as 8-bit sRGB.
pub fn linear_to_srgb(value: f32) -> u8 {
    let c = value.clamp(0.0, 1.0);
    let encoded = if c <= 0.003_130_8 {
        c * 12.92
    } else {
        1.055 * c.powf(1.0 / 2.4) - 0.055
    };
    (encoded * 255.0).round() as u8
}

/// Encode an image as PNG bytes.
pub fn encode_png(image: &DynamicImage) -> Result<Vec<u8>> {
    let mut bytes = Cursor::new(Vec::new());
    image
        .write_to(&mut bytes, ImageFormat::Png)
        .context("failed to encode PNG")?;
    Ok(bytes.into_inner())
}

#[cfg(test)]
mod tests {
    use super::*;
    use image::{GenericImageView, RgbaImage};

    #[test]
    fn given_smaller_texture_when_resizing_to_exact_then_target_size_is_reached() {
        let source = DynamicImage::ImageRgba8(RgbaImage::new(4, 2));

        let resized = resize_to_exact(&source, 8, 8, ResizeInterpolation::Bilinear);

        assert_eq!(resized.dimensions(), (8, 8));
    }

    #[test]
    fn given_matching_size_when_resizing_then_original_is_kept() {
        let source = DynamicImage::ImageRgba8(RgbaImage::new(16, 16));

        let resized = resize_to_exact(&source, 16, 16, ResizeInterpolation::Nearest);

        assert_eq!(resized.dimensions(), (16, 16));
    }

    #[test]
    fn given_interpolation_enum_when_converting_then_filter_type_matches() {
        assert_eq!(FilterType::from(ResizeInterpolation::Nearest), FilterType::Nearest);
        assert_eq!(FilterType::from(ResizeInterpolation::Bilinear), FilterType::Triangle);
        assert_eq!(FilterType::from(ResizeInterpolation::Bicubic), FilterType::CatmullRom);
    }

    #[test]
    fn given_srgb_components_when_round_tripping_then_byte_is_preserved() {
        for value in [0_u8, 1, 10, 128, 200, 255] {
            assert_eq!(linear_to_srgb(srgb_to_linear(value)), value);
        }
    }

    #[test]
    fn given_image_when_encoding_then_png_signature_is_written() {
        let source = DynamicImage::ImageRgba8(RgbaImage::new(2, 2));

        let bytes = encode_png(&source).unwrap();

        assert_eq!(&bytes[..4], &[0x89, b'P', b'N', b'G']);
    }
}
