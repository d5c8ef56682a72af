use std::{fs, path::Path};

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};

/// Knobs for a single import run. Persisted as JSON next to batch jobs.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ImportOptions {
    /// Run the material channel mapper.
    pub import_materials: bool,
    /// Run mesh, node, skeleton, animation and instancing stages.
    pub import_geometry: bool,
    /// Derive bitangents from normals and tangent handedness.
    pub compute_bitangents: bool,
    /// Store `1 - v` for every texture coordinate set.
    pub flip_uv_v: bool,
    /// Upper bound on the ratio between per-axis scattering extinction.
    pub scatter_extinction_ratio_limit: f32,
    /// Node extension key that carries a neural primitive payload.
    pub neural_extension_name: String,
}

impl Default for ImportOptions {
    fn default() -> Self {
        Self {
            import_materials: true,
            import_geometry: true,
            compute_bitangents: false,
            flip_uv_v: true,
            scatter_extinction_ratio_limit: 1000.0,
            neural_extension_name: "ADOBE_nerf".to_string(),
        }
    }
}

/// Load import options from a JSON file.
pub fn load_import_options(path: &Path) -> Result<ImportOptions> {
    let content = fs::read_to_string(path)
        .with_context(|| format!("failed to read import options: {}", path.display()))?;
    serde_json::from_str(&content)
        .with_context(|| format!("failed to parse import options JSON: {}", path.display()))
}

/// Save import options to a JSON file.
pub fn save_import_options(path: &Path, options: &ImportOptions) -> Result<()> {
    if let Some(parent) = path.parent()
        && !parent.as_os_str().is_empty()
    {
        fs::create_dir_all(parent).with_context(|| {
            format!("failed to create options directory: {}", parent.display())
        })?;
    }

    let content =
        serde_json::to_string_pretty(options).context("failed to serialize import options")?;
    fs::write(path, content)
        .with_context(|| format!("failed to write import options: {}", path.display()))
}
