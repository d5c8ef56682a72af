use std::collections::HashMap;

use anyhow::{Context, Result};
use image::{DynamicImage, GenericImageView, Rgba, RgbaImage};
use log::debug;
use nalgebra::Vector3;

use super::image_cache::ImageCache;
use super::scene::{ImageAsset, ImageKind};
use crate::texture::{
    ResizeInterpolation, encode_png, linear_to_srgb, resize_to_exact, srgb_to_linear,
};

const DIELECTRIC_SPECULAR: f32 = 0.04;
const EPSILON: f32 = 1e-6;

/// Authored specular-glossiness factors.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct SpecGlossFactors {
    pub diffuse: [f32; 4],
    pub specular: [f32; 3],
    pub glossiness: f32,
}

impl Default for SpecGlossFactors {
    fn default() -> Self {
        Self {
            diffuse: [1.0; 4],
            specular: [1.0; 3],
            glossiness: 1.0,
        }
    }
}

/// Metallic-roughness equivalent of one specular-glossiness sample.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct MetalRough {
    pub base_color: Vector3<f32>,
    pub metallic: f32,
    pub roughness: f32,
}

fn perceived_brightness(color: &Vector3<f32>) -> f32 {
    (0.299 * color.x * color.x + 0.587 * color.y * color.y + 0.114 * color.z * color.z).sqrt()
}

fn solve_metallic(diffuse: f32, specular: f32, one_minus_specular_strength: f32) -> f32 {
    if specular < DIELECTRIC_SPECULAR {
        return 0.0;
    }
    let a = DIELECTRIC_SPECULAR;
    let b = diffuse * one_minus_specular_strength / (1.0 - a) + specular - 2.0 * a;
    let c = a - specular;
    let discriminant = (b * b - 4.0 * a * c).max(0.0);
    ((-b + discriminant.sqrt()) / (2.0 * a)).clamp(0.0, 1.0)
}

/// Convert linear diffuse/specular colors and glossiness to metallic-roughness.
pub fn spec_gloss_to_metal_rough(
    diffuse: Vector3<f32>,
    specular: Vector3<f32>,
    glossiness: f32,
) -> MetalRough {
    let one_minus_specular_strength = 1.0 - specular.max();
    let metallic = solve_metallic(
        perceived_brightness(&diffuse),
        perceived_brightness(&specular),
        one_minus_specular_strength,
    );

    let from_diffuse = diffuse
        * (one_minus_specular_strength / (1.0 - DIELECTRIC_SPECULAR) / (1.0 - metallic).max(EPSILON));
    let from_specular = (specular - Vector3::repeat(DIELECTRIC_SPECULAR * (1.0 - metallic)))
        / metallic.max(EPSILON);
    let base_color = from_diffuse
        .lerp(&from_specular, metallic * metallic)
        .map(|c| c.clamp(0.0, 1.0));

    MetalRough {
        base_color,
        metallic,
        roughness: (1.0 - glossiness).clamp(0.0, 1.0),
    }
}

// ─── Texture baking ───────────────────────────────────────────────────────────

/// Canonical images produced for one texture pair.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(super) struct BakedImages {
    /// sRGB base color with alpha.
    pub base_color: usize,
    /// Roughness in G, metallic in B.
    pub metallic_roughness: usize,
}

type BakeKey = (Option<usize>, Option<usize>, [u32; 8]);

/// Bakes textured specular-glossiness inputs, converting each distinct
/// input combination once.
#[derive(Debug, Default)]
pub(super) struct SpecGlossBaker {
    baked: HashMap<BakeKey, BakedImages>,
}

impl SpecGlossBaker {
    pub(super) fn bake(
        &mut self,
        diffuse_image: Option<usize>,
        specular_image: Option<usize>,
        factors: &SpecGlossFactors,
        base_name: &str,
        images: &mut Vec<ImageAsset>,
        names: &mut ImageCache,
    ) -> Result<BakedImages> {
        let key = bake_key(diffuse_image, specular_image, factors);
        if let Some(baked) = self.baked.get(&key) {
            return Ok(*baked);
        }
        debug!("baking specular-glossiness textures for {base_name}");

        let diffuse = diffuse_image
            .map(|index| decode(&images[index]))
            .transpose()?;
        let specular = specular_image
            .map(|index| decode(&images[index]))
            .transpose()?;
        let (base_color, metallic_roughness) = bake_pixels(diffuse.as_ref(), specular.as_ref(), factors);

        let mut push = |suffix: &str, image: RgbaImage| -> Result<usize> {
            let data = encode_png(&DynamicImage::ImageRgba8(image))?;
            images.push(ImageAsset {
                name: names.unique_name(&format!("{base_name}_{suffix}")),
                kind: ImageKind::Png,
                data,
                generated: true,
            });
            Ok(images.len() - 1)
        };
        let baked = BakedImages {
            base_color: push("baseColor", base_color)?,
            metallic_roughness: push("metallicRoughness", metallic_roughness)?,
        };
        self.baked.insert(key, baked);
        Ok(baked)
    }
}

fn bake_key(diffuse: Option<usize>, specular: Option<usize>, factors: &SpecGlossFactors) -> BakeKey {
    let [d0, d1, d2, d3] = factors.diffuse.map(f32::to_bits);
    let [s0, s1, s2] = factors.specular.map(f32::to_bits);
    (
        diffuse,
        specular,
        [d0, d1, d2, d3, s0, s1, s2, factors.glossiness.to_bits()],
    )
}

fn decode(asset: &ImageAsset) -> Result<DynamicImage> {
    image::load_from_memory(&asset.data)
        .with_context(|| format!("failed to decode image {}", asset.file_name()))
}

fn bake_pixels(
    diffuse: Option<&DynamicImage>,
    specular: Option<&DynamicImage>,
    factors: &SpecGlossFactors,
) -> (RgbaImage, RgbaImage) {
    let (width, height) = match (diffuse, specular) {
        (Some(d), Some(s)) => (d.width().max(s.width()), d.height().max(s.height())),
        (Some(image), None) | (None, Some(image)) => image.dimensions(),
        (None, None) => (1, 1),
    };
    let to_size = |image: &DynamicImage| {
        resize_to_exact(image, width, height, ResizeInterpolation::Bilinear).to_rgba8()
    };
    let diffuse = diffuse.map(to_size);
    let specular = specular.map(to_size);

    let [dr, dg, db, da] = factors.diffuse;
    let [sr, sg, sb] = factors.specular;
    let mut base_color = RgbaImage::new(width, height);
    let mut metallic_roughness = RgbaImage::new(width, height);

    for y in 0..height {
        for x in 0..width {
            let (diffuse_rgb, alpha) = match &diffuse {
                Some(image) => {
                    let Rgba([r, g, b, a]) = *image.get_pixel(x, y);
                    (
                        Vector3::new(srgb_to_linear(r), srgb_to_linear(g), srgb_to_linear(b)),
                        f32::from(a) / 255.0,
                    )
                }
                None => (Vector3::repeat(1.0), 1.0),
            };
            let (specular_rgb, glossiness) = match &specular {
                Some(image) => {
                    let Rgba([r, g, b, a]) = *image.get_pixel(x, y);
                    (
                        Vector3::new(srgb_to_linear(r), srgb_to_linear(g), srgb_to_linear(b)),
                        f32::from(a) / 255.0,
                    )
                }
                None => (Vector3::repeat(1.0), 1.0),
            };

            let converted = spec_gloss_to_metal_rough(
                diffuse_rgb.component_mul(&Vector3::new(dr, dg, db)),
                specular_rgb.component_mul(&Vector3::new(sr, sg, sb)),
                glossiness * factors.glossiness,
            );
            let color = converted.base_color;
            base_color.put_pixel(
                x,
                y,
                Rgba([
                    linear_to_srgb(color.x),
                    linear_to_srgb(color.y),
                    linear_to_srgb(color.z),
                    unit_to_byte(alpha * da),
                ]),
            );
            metallic_roughness.put_pixel(
                x,
                y,
                Rgba([
                    0,
                    unit_to_byte(converted.roughness),
                    unit_to_byte(converted.metallic),
                    255,
                ]),
            );
        }
    }

    (base_color, metallic_roughness)
}

fn unit_to_byte(value: f32) -> u8 {
    (value.clamp(0.0, 1.0) * 255.0).round() as u8
}
