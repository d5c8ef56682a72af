use std::collections::{HashMap, HashSet};

use serde_json::Value;

use super::gltf_utils::{as_index, extension, json_array, str_field};
use super::scene::{ImageAsset, ImageKind};
use super::types::{IssueKind, Issues};
use super::validation::{check_index, report};
use crate::source::{AssetResolver, SourceDocument};

/// Deduplicating map from source textures to canonical image records.
#[derive(Debug, Default)]
pub(super) struct ImageCache {
    by_texture: HashMap<usize, Option<usize>>,
    by_source_image: HashMap<usize, usize>,
    used_names: HashSet<String>,
}

impl ImageCache {
    /// Return the canonical image for a texture, importing it on first use.
    ///
    /// Failures are cached too, so a broken texture is reported once.
    pub(super) fn image_for_texture(
        &mut self,
        document: &SourceDocument,
        resolver: &dyn AssetResolver,
        texture_index: usize,
        fallback_name: &str,
        images: &mut Vec<ImageAsset>,
        issues: &mut Issues,
    ) -> Option<usize> {
        if let Some(cached) = self.by_texture.get(&texture_index) {
            return *cached;
        }
        let imported = self.import_texture_image(
            document,
            resolver,
            texture_index,
            fallback_name,
            images,
            issues,
        );
        self.by_texture.insert(texture_index, imported);
        imported
    }

    fn import_texture_image(
        &mut self,
        document: &SourceDocument,
        resolver: &dyn AssetResolver,
        texture_index: usize,
        fallback_name: &str,
        images: &mut Vec<ImageAsset>,
        issues: &mut Issues,
    ) -> Option<usize> {
        let json = &document.json;
        let context = format!("texture {texture_index}");
        let texture = json_array(json, "textures").get(texture_index)?;
        let source = texture
            .get("source")
            .or_else(|| extension(texture, "EXT_texture_webp").and_then(|ext| ext.get("source")));
        let Some(source) = source else {
            issues.warn(
                IssueKind::Reference,
                "TEXTURE_WITHOUT_SOURCE",
                format!("{context} has no image source"),
            );
            return None;
        };
        let image_count = json_array(json, "images").len();
        let image_index = report(issues, check_index("image", source, image_count), &context)?;
        if let Some(existing) = self.by_source_image.get(&image_index) {
            return Some(*existing);
        }

        let image = &json_array(json, "images")[image_index];
        let uri = str_field(image, "uri").filter(|uri| !uri.starts_with("data:"));
        let base_name = str_field(image, "name")
            .filter(|name| !name.trim().is_empty())
            .map(ToOwned::to_owned)
            .or_else(|| uri.and_then(uri_stem))
            .unwrap_or_else(|| fallback_name.to_string());

        let data = read_image_bytes(document, resolver, image, image_index, issues)?;
        let Some(kind) = image_kind(image, &data) else {
            issues.warn(
                IssueKind::Unsupported,
                "UNSUPPORTED_IMAGE_FORMAT",
                format!("image {image_index} is not PNG, JPEG or WebP"),
            );
            return None;
        };

        let name = self.unique_name(&base_name);
        images.push(ImageAsset {
            name,
            kind,
            data,
            generated: false,
        });
        let canonical = images.len() - 1;
        self.by_source_image.insert(image_index, canonical);
        Some(canonical)
    }

    /// Reserve a collision-free short name derived from `base`.
    pub(super) fn unique_name(&mut self, base: &str) -> String {
        let cleaned = clean_name(base);
        let mut name = cleaned.clone();
        let mut suffix = 1;
        while !self.used_names.insert(name.clone()) {
            name = format!("{cleaned}_{suffix}");
            suffix += 1;
        }
        name
    }
}

fn read_image_bytes(
    document: &SourceDocument,
    resolver: &dyn AssetResolver,
    image: &Value,
    image_index: usize,
    issues: &mut Issues,
) -> Option<Vec<u8>> {
    let json = &document.json;
    let context = format!("image {image_index}");

    if let Some(view) = image.get("bufferView") {
        let views = json_array(json, "bufferViews");
        let view_index = report(issues, check_index("buffer view", view, views.len()), &context)?;
        let view = &views[view_index];
        let buffer = view
            .get("buffer")
            .and_then(as_index)
            .and_then(|buffer| document.buffers.get(buffer));
        let offset = view.get("byteOffset").and_then(Value::as_u64).unwrap_or(0) as usize;
        let length = view.get("byteLength").and_then(Value::as_u64).unwrap_or(0) as usize;
        let bytes = offset
            .checked_add(length)
            .and_then(|end| buffer.and_then(|buffer| buffer.get(offset..end)));
        if bytes.is_none() {
            issues.warn(
                IssueKind::Shape,
                "IMAGE_VIEW_OUT_OF_BOUNDS",
                format!("{context}: buffer view {view_index} lies outside its buffer"),
            );
        }
        return bytes.map(<[u8]>::to_vec);
    }

    let Some(uri) = str_field(image, "uri") else {
        issues.warn(
            IssueKind::Reference,
            "IMAGE_WITHOUT_DATA",
            format!("{context} has neither a uri nor a buffer view"),
        );
        return None;
    };
    match resolver.resolve(uri) {
        Ok(bytes) => Some(bytes),
        Err(err) => {
            issues.warn(
                IssueKind::Reference,
                "IMAGE_UNRESOLVED",
                format!("{context}: {err:#}"),
            );
            None
        }
    }
}

/// Image format from the URI extension or MIME type, else sniffed from bytes.
fn image_kind(image: &Value, data: &[u8]) -> Option<ImageKind> {
    let declared = str_field(image, "uri")
        .filter(|uri| !uri.starts_with("data:"))
        .and_then(|uri| uri.rsplit_once('.'))
        .map(|(_, extension)| extension.to_ascii_lowercase())
        .or_else(|| {
            str_field(image, "mimeType")
                .and_then(|mime| mime.strip_prefix("image/"))
                .map(str::to_ascii_lowercase)
        });

    match declared.as_deref() {
        Some("png") => return Some(ImageKind::Png),
        Some("jpg" | "jpeg") => return Some(ImageKind::Jpeg),
        Some("webp") => return Some(ImageKind::Webp),
        _ => {}
    }

    match image::guess_format(data).ok()? {
        image::ImageFormat::Png => Some(ImageKind::Png),
        image::ImageFormat::Jpeg => Some(ImageKind::Jpeg),
        image::ImageFormat::WebP => Some(ImageKind::Webp),
        _ => None,
    }
}

fn uri_stem(uri: &str) -> Option<String> {
    let file = uri.rsplit(['/', '\\']).next()?;
    let stem = file.rsplit_once('.').map_or(file, |(stem, _)| stem);
    (!stem.is_empty()).then(|| stem.to_string())
}

fn clean_name(name: &str) -> String {
    let cleaned: String = name
        .chars()
        .filter(|c| !matches!(c, '[' | ']' | '(' | ')' | '{' | '}' | '<' | '>'))
        .map(|c| if c.is_whitespace() || c == '/' || c == '\\' { '_' } else { c })
        .collect();
    if cleaned.is_empty() {
        "image".to_string()
    } else {
        cleaned
    }
}
