use log::debug;
use nalgebra::{Vector2, Vector3, Vector4};
use serde_json::Value;

use super::gltf_utils::{as_index, extension, f32_array_or, f32_field, json_array, str_field};
use super::image_cache::ImageCache;
use super::scene::{
    Channel, ColorSpace, FilterMode, ImageAsset, Input, InputValue, Material, TextureInput,
    WrapMode,
};
use super::specgloss::{SpecGlossBaker, SpecGlossFactors, spec_gloss_to_metal_rough};
use super::types::{IssueKind, Issues};
use super::validation::{check_index, optional_index, report};
use crate::options::ImportOptions;
use crate::source::{AssetResolver, SourceDocument};

/// Material extensions with no canonical channel.
const UNTRANSLATED_MATERIAL_EXTENSIONS: [&str; 2] =
    ["KHR_materials_anisotropy", "KHR_materials_dispersion"];

/// Map every source material onto the canonical channel set.
///
/// Returns the materials in source order together with the deduplicated
/// image records they reference.
pub(super) fn import_materials(
    document: &SourceDocument,
    resolver: &dyn AssetResolver,
    options: &ImportOptions,
    issues: &mut Issues,
) -> (Vec<Material>, Vec<ImageAsset>) {
    debug!("importing materials");
    let mut mapper = MaterialMapper {
        document,
        resolver,
        scatter_ratio_limit: options.scatter_extinction_ratio_limit,
        cache: ImageCache::default(),
        baker: SpecGlossBaker::default(),
        images: Vec::new(),
    };
    let materials = json_array(&document.json, "materials")
        .iter()
        .enumerate()
        .map(|(index, source)| mapper.map_material(index, source, issues))
        .collect();
    (materials, mapper.images)
}

struct MaterialMapper<'a> {
    document: &'a SourceDocument,
    resolver: &'a dyn AssetResolver,
    scatter_ratio_limit: f32,
    cache: ImageCache,
    baker: SpecGlossBaker,
    images: Vec<ImageAsset>,
}

impl MaterialMapper<'_> {
    fn map_material(&mut self, index: usize, source: &Value, issues: &mut Issues) -> Material {
        let display_name = str_field(source, "name")
            .filter(|name| !name.is_empty())
            .map(ToOwned::to_owned)
            .unwrap_or_else(|| format!("Material{index}"));
        let mut material = Material {
            name: format!("mat{index}"),
            display_name,
            double_sided: source
                .get("doubleSided")
                .and_then(Value::as_bool)
                .unwrap_or(false),
            ..Material::default()
        };
        let alpha_mode = str_field(source, "alphaMode").unwrap_or("OPAQUE");
        let uses_alpha = matches!(alpha_mode, "BLEND" | "MASK");

        self.map_normal(&mut material, source, issues);
        self.map_occlusion(&mut material, source, issues);
        if let Some(spec_gloss) = extension(source, "KHR_materials_pbrSpecularGlossiness") {
            self.map_spec_gloss(&mut material, spec_gloss, uses_alpha, issues);
        } else {
            self.map_metal_rough(&mut material, source, uses_alpha, issues);
            self.map_extensions(&mut material, source, issues);
        }
        self.map_emission(&mut material, source, issues);
        for name in UNTRANSLATED_MATERIAL_EXTENSIONS {
            if extension(source, name).is_some() {
                issues.warn(
                    IssueKind::Unsupported,
                    "UNSUPPORTED_EXTENSION",
                    format!("material {}: {name} is not translated", material.display_name),
                );
            }
        }
        if alpha_mode == "MASK" {
            material.opacity_threshold = Input::scalar(f32_field(source, "alphaCutoff", 0.5));
        }
        material
    }

    // ─── Core channels ────────────────────────────────────────────────────

    fn map_metal_rough(
        &mut self,
        material: &mut Material,
        source: &Value,
        uses_alpha: bool,
        issues: &mut Issues,
    ) {
        let pbr = source.get("pbrMetallicRoughness").unwrap_or(&Value::Null);
        let base = f32_array_or(pbr, "baseColorFactor", [1.0; 4]);
        let name = material.display_name.clone();

        match self.bind(pbr.get("baseColorTexture"), &name, "diffuse", Channel::Rgb, ColorSpace::Srgb, issues) {
            Some(mut texture) => {
                if base[..3] != [1.0; 3] {
                    texture.scale = Vector4::new(base[0], base[1], base[2], 1.0);
                }
                if uses_alpha {
                    material.opacity = Input::Texture(alpha_read(&texture, base[3]));
                }
                material.diffuse_color = Input::Texture(texture);
            }
            None => {
                material.diffuse_color = Input::vec3(Vector3::new(base[0], base[1], base[2]));
                material.opacity = Input::scalar(base[3]);
            }
        }

        let metallic = f32_field(pbr, "metallicFactor", 1.0);
        let roughness = f32_field(pbr, "roughnessFactor", 1.0);
        match self.bind(
            pbr.get("metallicRoughnessTexture"),
            &name,
            "metallicRoughness",
            Channel::G,
            ColorSpace::Raw,
            issues,
        ) {
            Some(mut roughness_texture) => {
                let mut metallic_texture = roughness_texture.clone();
                metallic_texture.channel = Channel::B;
                if metallic != 1.0 {
                    metallic_texture.scale = Vector4::repeat(metallic);
                }
                if roughness != 1.0 {
                    roughness_texture.scale = Vector4::repeat(roughness);
                }
                material.metallic = Input::Texture(metallic_texture);
                material.roughness = Input::Texture(roughness_texture);
            }
            None => {
                material.metallic = Input::scalar(metallic);
                material.roughness = Input::scalar(roughness);
            }
        }
    }

    fn map_spec_gloss(
        &mut self,
        material: &mut Material,
        spec_gloss: &Value,
        uses_alpha: bool,
        issues: &mut Issues,
    ) {
        let factors = SpecGlossFactors {
            diffuse: f32_array_or(spec_gloss, "diffuseFactor", [1.0; 4]),
            specular: f32_array_or(spec_gloss, "specularFactor", [1.0; 3]),
            glossiness: f32_field(spec_gloss, "glossinessFactor", 1.0),
        };
        let name = material.display_name.clone();
        let diffuse = self.bind(spec_gloss.get("diffuseTexture"), &name, "diffuse", Channel::Rgb, ColorSpace::Srgb, issues);
        let specular = self.bind(
            spec_gloss.get("specularGlossinessTexture"),
            &name,
            "specGloss",
            Channel::Rgb,
            ColorSpace::Srgb,
            issues,
        );

        if let Some(template) = diffuse.as_ref().or(specular.as_ref()) {
            let baked = self.baker.bake(
                diffuse.as_ref().map(|texture| texture.image),
                specular.as_ref().map(|texture| texture.image),
                &factors,
                &name,
                &mut self.images,
                &mut self.cache,
            );
            match baked {
                Ok(baked) => {
                    let mut base_color = template.clone();
                    base_color.image = baked.base_color;
                    base_color.scale = Vector4::repeat(1.0);
                    if uses_alpha {
                        material.opacity = Input::Texture(alpha_read(&base_color, 1.0));
                    }
                    material.diffuse_color = Input::Texture(base_color);

                    let mut roughness = template.clone();
                    roughness.image = baked.metallic_roughness;
                    roughness.channel = Channel::G;
                    roughness.colorspace = Some(ColorSpace::Raw);
                    roughness.scale = Vector4::repeat(1.0);
                    let mut metallic = roughness.clone();
                    metallic.channel = Channel::B;
                    material.metallic = Input::Texture(metallic);
                    material.roughness = Input::Texture(roughness);
                    return;
                }
                Err(err) => issues.warn(
                    IssueKind::Unsupported,
                    "SPEC_GLOSS_BAKE_FAILED",
                    format!("material {name}: {err:#}, using constant factors"),
                ),
            }
        }

        let [dr, dg, db, alpha] = factors.diffuse;
        let converted = spec_gloss_to_metal_rough(
            Vector3::new(dr, dg, db),
            Vector3::from(factors.specular),
            factors.glossiness,
        );
        material.diffuse_color = Input::vec3(converted.base_color);
        material.opacity = Input::scalar(alpha);
        material.metallic = Input::scalar(converted.metallic);
        material.roughness = Input::scalar(converted.roughness);
    }

    fn map_emission(&mut self, material: &mut Material, source: &Value, issues: &mut Issues) {
        let unlit = extension(source, "KHR_materials_unlit").is_some();
        let strength = extension(source, "KHR_materials_emissive_strength")
            .map_or(1.0, |ext| f32_field(ext, "emissiveStrength", 1.0));
        let [r, g, b] = f32_array_or(source, "emissiveFactor", [0.0; 3]);
        let name = material.display_name.clone();

        if let Some(mut texture) = self.bind(source.get("emissiveTexture"), &name, "emissive", Channel::Rgb, ColorSpace::Srgb, issues) {
            if [r, g, b] != [1.0; 3] || strength != 1.0 {
                texture.scale = Vector4::new(r * strength, g * strength, b * strength, strength);
            }
            material.emissive_color = Input::Texture(texture);
        } else if r > 0.0 || g > 0.0 || b > 0.0 {
            material.emissive_color = Input::vec3(Vector3::new(r, g, b) * strength);
        } else if unlit {
            material.emissive_color =
                std::mem::replace(&mut material.diffuse_color, Input::vec3(Vector3::zeros()));
            material.is_unlit = true;
        }
    }

    fn map_normal(&mut self, material: &mut Material, source: &Value, issues: &mut Issues) {
        let info = source.get("normalTexture");
        let name = material.display_name.clone();
        let Some(mut texture) = self.bind(info, &name, "normal", Channel::Rgb, ColorSpace::Raw, issues) else {
            return;
        };
        let strength = info.map_or(1.0, |info| f32_field(info, "scale", 1.0));
        texture.scale = Vector4::new(2.0 * strength, 2.0 * strength, 2.0, 1.0);
        texture.bias = Vector4::new(-strength, -strength, -1.0, 0.0);
        material.normal = Input::Texture(texture);
        material.normal_scale = Input::scalar(strength);
    }

    fn map_occlusion(&mut self, material: &mut Material, source: &Value, issues: &mut Issues) {
        let info = source.get("occlusionTexture");
        let strength = info.map_or(1.0, |info| f32_field(info, "strength", 1.0));
        let name = material.display_name.clone();
        if let Some(mut texture) = self.bind(info, &name, "occlusion", Channel::R, ColorSpace::Raw, issues) {
            if strength != 1.0 {
                texture.scale = Vector4::repeat(strength);
            }
            material.occlusion = Input::Texture(texture);
        } else if strength != 1.0 {
            material.occlusion = Input::scalar(strength);
        }
    }

    // ─── Extensions ───────────────────────────────────────────────────────

    fn map_extensions(&mut self, material: &mut Material, source: &Value, issues: &mut Issues) {
        let name = material.display_name.clone();

        if let Some(ext) = extension(source, "KHR_materials_ior") {
            material.ior = Input::scalar(f32_field(ext, "ior", 1.5));
        }

        if let Some(ext) = extension(source, "KHR_materials_specular") {
            material.specular_level = self.scalar_input(
                ext.get("specularTexture"),
                &name,
                "specularLevel",
                Channel::A,
                f32_field(ext, "specularFactor", 1.0),
                1.0,
                issues,
            );
            material.specular_color = self.color_input(
                ext.get("specularColorTexture"),
                &name,
                "specularColor",
                f32_array_or(ext, "specularColorFactor", [1.0; 3]),
                1.0,
                issues,
            );
        }

        if let Some(ext) = extension(source, "KHR_materials_clearcoat") {
            material.clearcoat = self.scalar_input(
                ext.get("clearcoatTexture"),
                &name,
                "clearcoat",
                Channel::R,
                f32_field(ext, "clearcoatFactor", 0.0),
                0.0,
                issues,
            );
            material.clearcoat_roughness = self.scalar_input(
                ext.get("clearcoatRoughnessTexture"),
                &name,
                "clearcoatRoughness",
                Channel::G,
                f32_field(ext, "clearcoatRoughnessFactor", 0.0),
                0.0,
                issues,
            );
            material.clearcoat_normal =
                self.normal_input(ext.get("clearcoatNormalTexture"), &name, "clearcoatNormal", issues);
        }

        if let Some(ext) = extension(source, "ADOBE_materials_clearcoat_specular") {
            material.clearcoat_ior = Input::scalar(f32_field(ext, "clearcoatIor", 1.5));
            material.clearcoat_specular = self.scalar_input(
                ext.get("clearcoatSpecularTexture"),
                &name,
                "clearcoatSpecular",
                Channel::B,
                f32_field(ext, "clearcoatSpecularFactor", 1.0),
                1.0,
                issues,
            );
        }

        // The multi-vendor tint wins over the legacy vendor one.
        let coat_tint = extension(source, "EXT_materials_clearcoat_color")
            .map(|ext| (ext, "clearcoatColorFactor", "clearcoatColorTexture"))
            .or_else(|| {
                extension(source, "ADOBE_materials_clearcoat_tint")
                    .map(|ext| (ext, "clearcoatTintFactor", "clearcoatTintTexture"))
            });
        if let Some((ext, factor_key, texture_key)) = coat_tint {
            material.clearcoat_color = self.color_input(
                ext.get(texture_key),
                &name,
                "clearcoatColor",
                f32_array_or(ext, factor_key, [1.0; 3]),
                1.0,
                issues,
            );
        }

        if let Some(ext) = extension(source, "KHR_materials_sheen") {
            material.sheen_color = self.color_input(
                ext.get("sheenColorTexture"),
                &name,
                "sheenColor",
                f32_array_or(ext, "sheenColorFactor", [0.0; 3]),
                0.0,
                issues,
            );
            material.sheen_roughness = self.scalar_input(
                ext.get("sheenRoughnessTexture"),
                &name,
                "sheenRoughness",
                Channel::A,
                f32_field(ext, "sheenRoughnessFactor", 0.0),
                0.0,
                issues,
            );
        }

        let transmission = extension(source, "KHR_materials_transmission");
        if let Some(ext) = transmission {
            material.transmission = self.scalar_input(
                ext.get("transmissionTexture"),
                &name,
                "transmission",
                Channel::R,
                f32_field(ext, "transmissionFactor", 0.0),
                0.0,
                issues,
            );
            tint_transmission_through_clearcoat(material, issues);
        }

        if let Some(ext) = extension(source, "KHR_materials_diffuse_transmission") {
            if transmission.is_some() {
                issues.warn(
                    IssueKind::Unsupported,
                    "DIFFUSE_TRANSMISSION_IGNORED",
                    format!("material {name} has both transmission extensions, ignoring diffuse transmission"),
                );
            } else {
                material.transmission = self.scalar_input(
                    ext.get("diffuseTransmissionTexture"),
                    &name,
                    "transmission",
                    Channel::A,
                    f32_field(ext, "diffuseTransmissionFactor", 0.0),
                    0.0,
                    issues,
                );
                material.absorption_color = self.color_input(
                    ext.get("diffuseTransmissionColorTexture"),
                    &name,
                    "absorptionColor",
                    f32_array_or(ext, "diffuseTransmissionColorFactor", [1.0; 3]),
                    0.0,
                    issues,
                );
            }
        }

        let volume = extension(source, "KHR_materials_volume");
        if let Some(ext) = volume {
            let thickness = f32_field(ext, "thicknessFactor", 0.0);
            if thickness > 0.0 {
                material.volume_thickness = self.scalar_input(
                    ext.get("thicknessTexture"),
                    &name,
                    "thickness",
                    Channel::G,
                    thickness,
                    0.0,
                    issues,
                );
                material.absorption_distance = Input::scalar(f32_field(ext, "attenuationDistance", 0.0));
                apply_input_multiplier(
                    &mut material.absorption_color,
                    Vector3::from(f32_array_or(ext, "attenuationColor", [1.0; 3])),
                );
            }
        }

        if let Some(ext) = extension(source, "KHR_materials_volume_scatter") {
            let volume = volume.unwrap_or(&Value::Null);
            let multiscatter = Vector3::from(f32_array_or(ext, "multiscatterColor", [0.0; 3]));
            let scatter = volume_scatter_parameters(
                multiscatter,
                Vector3::from(f32_array_or(volume, "attenuationColor", [1.0; 3])),
                f32_field(volume, "attenuationDistance", 0.0),
                self.scatter_ratio_limit,
            );
            material.scattering_color = Input::vec3(multiscatter);
            material.scattering_distance_scale = Input::vec3(scatter.distance_scale);
            material.scattering_distance = Input::scalar(scatter.distance);
            // Attenuation already accounts for scattering here.
            material.absorption_color = Input::vec3(Vector3::repeat(1.0));
            material.absorption_distance = Input::scalar(0.0);
        } else if let Some(ext) = extension(source, "KHR_materials_subsurface")
            .or_else(|| extension(source, "KHR_materials_sss"))
        {
            material.scattering_distance = Input::scalar(f32_field(ext, "scatterDistance", f32::INFINITY));
            material.scattering_color = Input::vec3(Vector3::from(f32_array_or(ext, "scatterColor", [1.0; 3])));
        }
    }

    // ─── Inputs ───────────────────────────────────────────────────────────

    /// Single-channel input: always raw, the factor scales a texture or
    /// becomes the constant when it differs from `default`.
    #[allow(clippy::too_many_arguments)]
    fn scalar_input(
        &mut self,
        info: Option<&Value>,
        material_name: &str,
        input_name: &str,
        channel: Channel,
        factor: f32,
        default: f32,
        issues: &mut Issues,
    ) -> Input {
        if let Some(mut texture) = self.bind(info, material_name, input_name, channel, ColorSpace::Raw, issues) {
            if factor != 1.0 {
                texture.scale = Vector4::repeat(factor);
            }
            Input::Texture(texture)
        } else if factor != default {
            Input::scalar(factor)
        } else {
            Input::Empty
        }
    }

    fn color_input(
        &mut self,
        info: Option<&Value>,
        material_name: &str,
        input_name: &str,
        factor: [f32; 3],
        default: f32,
        issues: &mut Issues,
    ) -> Input {
        if let Some(mut texture) = self.bind(info, material_name, input_name, Channel::Rgb, ColorSpace::Srgb, issues) {
            if factor != [1.0; 3] {
                texture.scale = Vector4::new(factor[0], factor[1], factor[2], 1.0);
            }
            Input::Texture(texture)
        } else if factor.iter().any(|component| *component != default) {
            Input::vec3(Vector3::from(factor))
        } else {
            Input::Empty
        }
    }

    fn normal_input(
        &mut self,
        info: Option<&Value>,
        material_name: &str,
        input_name: &str,
        issues: &mut Issues,
    ) -> Input {
        let Some(mut texture) = self.bind(info, material_name, input_name, Channel::Rgb, ColorSpace::Raw, issues) else {
            return Input::Empty;
        };
        let strength = info.map_or(1.0, |info| f32_field(info, "scale", 1.0));
        texture.scale = Vector4::new(2.0 * strength, 2.0 * strength, 2.0 * strength, 1.0);
        texture.bias = Vector4::new(-strength, -strength, -strength, 0.0);
        Input::Texture(texture)
    }

    /// Bind a texture-info object, or `None` when absent or unusable.
    fn bind(
        &mut self,
        info: Option<&Value>,
        material_name: &str,
        input_name: &str,
        channel: Channel,
        colorspace: ColorSpace,
        issues: &mut Issues,
    ) -> Option<TextureInput> {
        let info = info?;
        let document = self.document;
        let json = &document.json;
        let context = format!("material {material_name} {input_name}");
        let textures = json_array(json, "textures");
        let texture_index = report(
            issues,
            check_index("texture", info.get("index").unwrap_or(&Value::Null), textures.len()),
            &context,
        )?;
        let image = self.cache.image_for_texture(
            document,
            self.resolver,
            texture_index,
            &format!("{material_name}_{input_name}"),
            &mut self.images,
            issues,
        )?;

        let uv_index = info.get("texCoord").and_then(as_index).unwrap_or(0);
        let mut input = TextureInput::new(image, uv_index, channel);
        input.colorspace = (channel != Channel::A).then_some(colorspace);

        let samplers = json_array(json, "samplers");
        if let Some(sampler) =
            optional_index(issues, &textures[texture_index], "sampler", "sampler", samplers.len(), &context)
                .map(|index| &samplers[index])
        {
            input.wrap_s = wrap_mode(sampler.get("wrapS"));
            input.wrap_t = wrap_mode(sampler.get("wrapT"));
            input.min_filter = filter_mode(sampler.get("minFilter"));
            input.mag_filter = filter_mode(sampler.get("magFilter"));
        }
        apply_texture_transform(info, &mut input);
        Some(input)
    }
}

// ─── Helpers ──────────────────────────────────────────────────────────────────

/// Alpha read of a color texture: same image, sampler and UV transform.
fn alpha_read(color: &TextureInput, factor: f32) -> TextureInput {
    let mut alpha = color.clone();
    alpha.channel = Channel::A;
    alpha.colorspace = None;
    alpha.scale = Vector4::repeat(factor);
    alpha.bias = Vector4::zeros();
    alpha
}

fn wrap_mode(value: Option<&Value>) -> WrapMode {
    match value.and_then(Value::as_u64) {
        Some(33071) => WrapMode::Clamp,
        Some(33648) => WrapMode::Mirror,
        _ => WrapMode::Repeat,
    }
}

fn filter_mode(value: Option<&Value>) -> FilterMode {
    match value.and_then(Value::as_u64) {
        Some(9728) => FilterMode::Nearest,
        Some(9984) => FilterMode::NearestMipmapNearest,
        Some(9985) => FilterMode::LinearMipmapNearest,
        Some(9986) => FilterMode::NearestMipmapLinear,
        Some(9987) => FilterMode::LinearMipmapLinear,
        _ => FilterMode::Linear,
    }
}

fn apply_texture_transform(info: &Value, input: &mut TextureInput) {
    let Some(transform) = extension(info, "KHR_texture_transform") else {
        return;
    };
    let rotation = f32_field(transform, "rotation", 0.0).to_degrees();
    if rotation != 0.0 {
        input.uv_rotation = Some(rotation);
    }
    let scale = f32_array_or(transform, "scale", [1.0, 1.0]);
    if scale != [1.0, 1.0] {
        input.uv_scale = Some(Vector2::from(scale));
    }
    let offset = f32_array_or(transform, "offset", [0.0, 0.0]);
    if offset != [0.0, 0.0] {
        input.uv_translation = Some(Vector2::from(offset));
    }
}

/// Multiply a color input by a constant, seeding the constant when unset.
pub(super) fn apply_input_multiplier(input: &mut Input, multiplier: Vector3<f32>) {
    match input {
        Input::Texture(texture) => {
            texture.scale.x *= multiplier.x;
            texture.scale.y *= multiplier.y;
            texture.scale.z *= multiplier.z;
        }
        Input::Constant(InputValue::Vec3(value)) => *value = value.component_mul(&multiplier),
        _ => *input = Input::vec3(multiplier),
    }
}

/// Approximate tinted transmission by routing base color through the
/// clearcoat lobe. Authored clearcoat data is never overwritten.
fn tint_transmission_through_clearcoat(material: &mut Material, issues: &mut Issues) {
    if !material.diffuse_color.is_used() {
        return;
    }
    if material.clearcoat.is_used() {
        issues.warn(
            IssueKind::Unsupported,
            "TRANSMISSION_TINT_SKIPPED",
            format!(
                "material {}: clearcoat is authored, transmission tint is not approximated",
                material.display_name
            ),
        );
        return;
    }

    material.clearcoat = material.transmission.clone();
    material.clearcoat_roughness = material.roughness.clone();
    material.clearcoat_normal = material.normal.clone();
    material.clearcoat_specular = material.specular_level.clone();
    material.clearcoat_ior = material.ior.clone();
    if material.clearcoat_color.is_used() {
        issues.warn(
            IssueKind::Unsupported,
            "TRANSMISSION_TINT_SKIPPED",
            format!(
                "material {}: clearcoat color is in use, base color is not mapped to it",
                material.display_name
            ),
        );
    } else {
        material.clearcoat_color = material.diffuse_color.clone();
        material.clearcoat_models_transmission_tint = true;
    }
}

// ─── Volume scattering ────────────────────────────────────────────────────────

const MIN_EXTINCTION: f32 = 1e-6;

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ScatterParameters {
    pub distance: f32,
    pub distance_scale: Vector3<f32>,
}

/// Derive scattering distance and per-axis scale from a multi-scatter color
/// and the volume attenuation it reinterprets.
///
/// The per-axis extinction from scattering never exceeds the smallest one by
/// more than `ratio_limit`; a scale above one is folded into the distance.
pub fn volume_scatter_parameters(
    multiscatter: Vector3<f32>,
    attenuation_color: Vector3<f32>,
    attenuation_distance: f32,
    ratio_limit: f32,
) -> ScatterParameters {
    let albedo = multiscatter.map(|c| {
        let s = 4.09712 + 4.20863 * c - (9.59217 + 41.6808 * c + 17.7126 * c * c).sqrt();
        1.0 - s * s
    });
    let extinction = attenuation_color.map(|c| {
        let value = -c.ln() / attenuation_distance;
        if value.is_finite() && value > 0.0 {
            value
        } else {
            MIN_EXTINCTION
        }
    });

    let mut distance = attenuation_distance.max(1e-3);
    let mut from_scattering = Vector3::repeat(1.0 / distance);
    let max_albedo = albedo.max();
    if max_albedo > 0.0 {
        let floor = max_albedo / ratio_limit.max(1.0);
        from_scattering = from_scattering.zip_map(&albedo, |e, a| e * max_albedo / a.max(floor));
    }

    let mut distance_scale = from_scattering.component_div(&extinction);
    let max_scale = distance_scale.max();
    if max_scale > 1.0 {
        distance *= max_scale;
        distance_scale /= max_scale;
    }
    ScatterParameters {
        distance,
        distance_scale,
    }
}

#[cfg(test)]
mod tests {
    use serde_json::json;

    use super::*;
    use crate::source::MemoryResolver;

    const PNG_MAGIC: [u8; 8] = [0x89, b'P', b'N', b'G', 0x0D, 0x0A, 0x1A, 0x0A];

    fn import(materials: Value) -> (Vec<Material>, Vec<ImageAsset>, Issues) {
        let document = SourceDocument::from_parts(
            json!({
                "materials": materials,
                "samplers": [ { "wrapS": 33071, "wrapT": 33648, "minFilter": 9987, "magFilter": 9728 } ],
                "textures": [ { "source": 0, "sampler": 0 }, { "source": 1 } ],
                "images": [ { "uri": "base.png" }, { "uri": "packed.png" } ]
            }),
            Vec::new(),
        );
        let mut resolver = MemoryResolver::default();
        resolver.assets.insert("base.png".to_string(), PNG_MAGIC.to_vec());
        resolver.assets.insert("packed.png".to_string(), PNG_MAGIC.to_vec());
        let mut issues = Issues::default();
        let (materials, images) =
            import_materials(&document, &resolver, &ImportOptions::default(), &mut issues);
        (materials, images, issues)
    }

    #[test]
    fn given_blend_material_with_base_texture_when_mapping_then_alpha_reads_same_image() {
        let (materials, images, _) = import(json!([{
            "name": "Glass",
            "alphaMode": "BLEND",
            "pbrMetallicRoughness": {
                "baseColorFactor": [0.5, 0.5, 0.5, 0.25],
                "baseColorTexture": {
                    "index": 0,
                    "extensions": { "KHR_texture_transform": { "rotation": 1.5707964, "scale": [2.0, 2.0] } }
                },
                "metallicRoughnessTexture": { "index": 1 },
                "roughnessFactor": 0.5
            }
        }]));

        let material = &materials[0];
        let diffuse = material.diffuse_color.texture().unwrap();
        assert_eq!(diffuse.colorspace, Some(ColorSpace::Srgb));
        assert_eq!(diffuse.scale, Vector4::new(0.5, 0.5, 0.5, 1.0));
        assert_eq!(diffuse.wrap_s, WrapMode::Clamp);
        assert_eq!(diffuse.wrap_t, WrapMode::Mirror);
        assert_eq!(diffuse.min_filter, FilterMode::LinearMipmapLinear);
        assert!((diffuse.uv_rotation.unwrap() - 90.0).abs() < 1e-3);
        assert_eq!(diffuse.uv_translation, None);

        let opacity = material.opacity.texture().unwrap();
        assert_eq!(opacity.image, diffuse.image);
        assert_eq!(opacity.channel, Channel::A);
        assert_eq!(opacity.colorspace, None);
        assert_eq!(opacity.scale, Vector4::repeat(0.25));
        assert_eq!(opacity.uv_scale, diffuse.uv_scale);

        let roughness = material.roughness.texture().unwrap();
        let metallic = material.metallic.texture().unwrap();
        assert_eq!((roughness.channel, metallic.channel), (Channel::G, Channel::B));
        assert_eq!(roughness.colorspace, Some(ColorSpace::Raw));
        assert_eq!(roughness.scale, Vector4::repeat(0.5));
        assert_eq!(metallic.scale, Vector4::repeat(1.0));
        assert_eq!(images.len(), 2);
    }

    #[test]
    fn given_unlit_material_when_mapping_then_base_color_moves_to_emissive() {
        let (materials, _, _) = import(json!([{
            "pbrMetallicRoughness": { "baseColorFactor": [0.2, 0.4, 0.6, 1.0] },
            "extensions": { "KHR_materials_unlit": {} }
        }]));

        let material = &materials[0];
        assert!(material.is_unlit);
        assert_eq!(material.display_name, "Material0");
        assert_eq!(material.emissive_color.constant_vec3(), Some(Vector3::new(0.2, 0.4, 0.6)));
        assert_eq!(material.diffuse_color.constant_vec3(), Some(Vector3::zeros()));
    }

    #[test]
    fn given_normal_maps_when_mapping_then_fixed_transform_is_scaled_by_strength() {
        let (materials, _, _) = import(json!([{
            "normalTexture": { "index": 1, "scale": 0.5 },
            "extensions": {
                "KHR_materials_clearcoat": {
                    "clearcoatFactor": 1.0,
                    "clearcoatNormalTexture": { "index": 1, "scale": 0.5 }
                }
            }
        }]));

        let material = &materials[0];
        let normal = material.normal.texture().unwrap();
        assert_eq!(normal.scale, Vector4::new(1.0, 1.0, 2.0, 1.0));
        assert_eq!(normal.bias, Vector4::new(-0.5, -0.5, -1.0, 0.0));
        assert_eq!(normal.colorspace, Some(ColorSpace::Raw));
        assert_eq!(material.normal_scale.constant_scalar(), Some(0.5));
        let coat_normal = material.clearcoat_normal.texture().unwrap();
        assert_eq!(coat_normal.scale, Vector4::new(1.0, 1.0, 1.0, 1.0));
        assert_eq!(coat_normal.bias, Vector4::new(-0.5, -0.5, -0.5, 0.0));
    }

    #[test]
    fn given_both_clearcoat_tints_when_mapping_then_multi_vendor_one_wins() {
        let (materials, _, _) = import(json!([{
            "extensions": {
                "ADOBE_materials_clearcoat_tint": { "clearcoatTintFactor": [0.1, 0.1, 0.1] },
                "EXT_materials_clearcoat_color": { "clearcoatColorFactor": [0.9, 0.8, 0.7] }
            }
        }]));

        assert_eq!(
            materials[0].clearcoat_color.constant_vec3(),
            Some(Vector3::new(0.9, 0.8, 0.7))
        );
    }

    #[test]
    fn given_legacy_subsurface_name_when_mapping_then_it_is_accepted() {
        let (materials, _, _) = import(json!([{
            "extensions": {
                "KHR_materials_sss": { "scatterDistance": 0.25, "scatterColor": [1.0, 0.5, 0.5] }
            }
        }]));

        assert_eq!(materials[0].scattering_distance.constant_scalar(), Some(0.25));
        assert_eq!(
            materials[0].scattering_color.constant_vec3(),
            Some(Vector3::new(1.0, 0.5, 0.5))
        );
    }

    #[test]
    fn given_ratified_and_legacy_subsurface_when_mapping_then_ratified_values_win() {
        let (materials, _, _) = import(json!([{
            "extensions": {
                "KHR_materials_sss": { "scatterDistance": 0.25, "scatterColor": [1.0, 0.5, 0.5] },
                "KHR_materials_subsurface": { "scatterDistance": 0.75, "scatterColor": [0.2, 0.3, 0.4] }
            }
        }]));

        assert_eq!(materials[0].scattering_distance.constant_scalar(), Some(0.75));
        assert_eq!(
            materials[0].scattering_color.constant_vec3(),
            Some(Vector3::new(0.2, 0.3, 0.4))
        );
    }

    #[test]
    fn given_anisotropy_extension_when_mapping_then_unsupported_warning_is_recorded() {
        let (materials, _, issues) = import(json!([{
            "name": "Brushed",
            "extensions": { "KHR_materials_anisotropy": { "anisotropyStrength": 0.5 } }
        }]));

        assert_eq!(materials[0].display_name, "Brushed");
        assert!(issues.contains_code("UNSUPPORTED_EXTENSION"));
        assert!(issues.as_slice()[0].message.contains("KHR_materials_anisotropy"));
    }

    #[test]
    fn given_transmission_without_clearcoat_when_mapping_then_clearcoat_models_tint() {
        let (materials, _, issues) = import(json!([{
            "pbrMetallicRoughness": { "baseColorFactor": [1.0, 0.0, 0.0, 1.0], "roughnessFactor": 0.3 },
            "extensions": { "KHR_materials_transmission": { "transmissionFactor": 0.8 } }
        }]));

        let material = &materials[0];
        assert_eq!(material.clearcoat.constant_scalar(), Some(0.8));
        assert_eq!(material.clearcoat_roughness.constant_scalar(), Some(0.3));
        assert_eq!(material.clearcoat_color, material.diffuse_color);
        assert!(material.clearcoat_models_transmission_tint);
        assert!(issues.is_empty());
    }

    #[test]
    fn given_transmission_with_authored_clearcoat_when_mapping_then_clearcoat_is_kept() {
        let (materials, _, issues) = import(json!([{
            "extensions": {
                "KHR_materials_clearcoat": { "clearcoatFactor": 0.4 },
                "KHR_materials_transmission": { "transmissionFactor": 1.0 },
                "KHR_materials_diffuse_transmission": { "diffuseTransmissionFactor": 0.5 }
            }
        }]));

        let material = &materials[0];
        assert_eq!(material.clearcoat.constant_scalar(), Some(0.4));
        assert_eq!(material.transmission.constant_scalar(), Some(1.0));
        assert!(!material.clearcoat_models_transmission_tint);
        assert!(issues.contains_code("TRANSMISSION_TINT_SKIPPED"));
        assert!(issues.contains_code("DIFFUSE_TRANSMISSION_IGNORED"));
    }

    #[test]
    fn given_volume_scatter_when_mapping_then_absorption_is_replaced() {
        let (materials, _, _) = import(json!([{
            "extensions": {
                "KHR_materials_volume": {
                    "thicknessFactor": 1.0,
                    "attenuationDistance": 1.0,
                    "attenuationColor": [0.5, 0.5, 0.5]
                },
                "KHR_materials_volume_scatter": { "multiscatterColor": [0.0, 0.0, 0.0] },
                "KHR_materials_subsurface": { "scatterDistance": 9.0 }
            }
        }]));

        let material = &materials[0];
        assert_eq!(material.volume_thickness.constant_scalar(), Some(1.0));
        assert_eq!(material.absorption_color.constant_vec3(), Some(Vector3::repeat(1.0)));
        assert_eq!(material.absorption_distance.constant_scalar(), Some(0.0));
        let distance = material.scattering_distance.constant_scalar().unwrap();
        assert!((distance - std::f32::consts::LOG2_E).abs() < 1e-3);
        let scale = material.scattering_distance_scale.constant_vec3().unwrap();
        assert!((scale - Vector3::repeat(1.0)).norm() < 1e-4);
    }

    #[test]
    fn given_uneven_albedo_when_deriving_scatter_then_scales_stay_within_unit_range() {
        let scatter = volume_scatter_parameters(
            Vector3::new(0.5, 0.0, 0.9),
            Vector3::new(0.2, 0.5, 0.9),
            2.0,
            1000.0,
        );

        assert!(scatter.distance >= 2.0);
        assert!(scatter.distance_scale.iter().all(|s| *s > 0.0 && *s <= 1.0 + 1e-6));
        assert!((scatter.distance_scale.max() - 1.0).abs() < 1e-5);
    }

    #[test]
    fn given_volume_with_zero_thickness_when_mapping_then_absorption_is_untouched() {
        let (materials, _, _) = import(json!([{
            "extensions": { "KHR_materials_volume": { "thicknessFactor": 0.0, "attenuationColor": [0.5, 0.5, 0.5] } }
        }]));

        assert!(!materials[0].volume_thickness.is_used());
        assert!(!materials[0].absorption_color.is_used());
    }

    #[test]
    fn given_invalid_texture_index_when_mapping_then_constant_factor_is_kept() {
        let (materials, _, issues) = import(json!([{
            "pbrMetallicRoughness": {
                "baseColorFactor": [0.1, 0.2, 0.3, 1.0],
                "baseColorTexture": { "index": 9 }
            },
            "extensions": { "KHR_materials_sheen": { "sheenRoughnessFactor": 0.4, "sheenRoughnessTexture": { "index": 7 } } }
        }]));

        let material = &materials[0];
        assert_eq!(material.diffuse_color.constant_vec3(), Some(Vector3::new(0.1, 0.2, 0.3)));
        assert_eq!(material.sheen_roughness.constant_scalar(), Some(0.4));
        assert!(!material.sheen_color.is_used());
        assert!(issues.contains_code("INVALID_TEXTURE_INDEX"));
    }

    #[test]
    fn given_mask_with_occlusion_strength_when_mapping_then_threshold_and_scale_are_set() {
        let (materials, _, _) = import(json!([{
            "alphaMode": "MASK",
            "alphaCutoff": 0.3,
            "occlusionTexture": { "index": 1, "strength": 0.7 },
            "emissiveFactor": [1.0, 0.5, 0.0],
            "extensions": { "KHR_materials_emissive_strength": { "emissiveStrength": 2.0 } }
        }]));

        let material = &materials[0];
        assert_eq!(material.opacity_threshold.constant_scalar(), Some(0.3));
        let occlusion = material.occlusion.texture().unwrap();
        assert_eq!(occlusion.channel, Channel::R);
        assert_eq!(occlusion.scale, Vector4::repeat(0.7));
        assert_eq!(material.emissive_color.constant_vec3(), Some(Vector3::new(2.0, 1.0, 0.0)));
    }

    #[test]
    fn given_constant_spec_gloss_when_mapping_then_metal_rough_constants_are_derived() {
        let (materials, _, _) = import(json!([{
            "pbrMetallicRoughness": { "metallicFactor": 0.9 },
            "extensions": {
                "KHR_materials_pbrSpecularGlossiness": {
                    "diffuseFactor": [0.5, 0.5, 0.5, 0.75],
                    "specularFactor": [0.04, 0.04, 0.04],
                    "glossinessFactor": 0.25
                },
                "KHR_materials_sheen": { "sheenColorFactor": [1.0, 1.0, 1.0] }
            }
        }]));

        let material = &materials[0];
        assert!(material.metallic.constant_scalar().unwrap() < 1e-3);
        assert!((material.roughness.constant_scalar().unwrap() - 0.75).abs() < 1e-6);
        assert_eq!(material.opacity.constant_scalar(), Some(0.75));
        assert!(!material.sheen_color.is_used());
    }

    #[test]
    fn given_undecodable_spec_gloss_texture_when_mapping_then_constants_are_used_with_warning() {
        let (materials, _, issues) = import(json!([{
            "extensions": {
                "KHR_materials_pbrSpecularGlossiness": {
                    "diffuseTexture": { "index": 0 },
                    "glossinessFactor": 0.5
                }
            }
        }]));

        assert!(issues.contains_code("SPEC_GLOSS_BAKE_FAILED"));
        assert!(materials[0].diffuse_color.constant_vec3().is_some());
        assert!((materials[0].roughness.constant_scalar().unwrap() - 0.5).abs() < 1e-6);
    }
}
