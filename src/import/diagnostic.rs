use std::{fs, path::Path};

use anyhow::{Context, Result};
use serde::Serialize;

use super::ImportReport;
use super::types::ImportIssue;

// ─── Summary structs ──────────────────────────────────────────────────────────

#[derive(Debug, Clone, Serialize)]
pub struct SkeletonSummary {
    name: String,
    display_name: String,
    joint_count: usize,
    anchor_node: Option<usize>,
    skinned_mesh_parts: Vec<usize>,
    animated_joint_count: usize,
}

#[derive(Debug, Clone, Serialize)]
pub struct TrackSummary {
    display_name: String,
    min_time: Option<f32>,
    max_time: Option<f32>,
}

/// JSON-friendly digest of an import run.
#[derive(Debug, Clone, Serialize)]
pub struct ImportSummary {
    generator: String,
    node_count: usize,
    root_count: usize,
    placeholder_count: usize,
    mesh_count: usize,
    total_vertices: usize,
    total_triangles: usize,
    material_count: usize,
    image_count: usize,
    generated_image_count: usize,
    camera_count: usize,
    light_count: usize,
    neural_primitive_count: usize,
    skeletons: Vec<SkeletonSummary>,
    tracks: Vec<TrackSummary>,
    issues: Vec<ImportIssue>,
}

impl ImportSummary {
    pub fn node_count(&self) -> usize {
        self.node_count
    }

    pub fn mesh_count(&self) -> usize {
        self.mesh_count
    }

    pub fn material_count(&self) -> usize {
        self.material_count
    }

    pub fn skeleton_count(&self) -> usize {
        self.skeletons.len()
    }

    pub fn track_count(&self) -> usize {
        self.tracks.len()
    }

    pub fn issue_count(&self) -> usize {
        self.issues.len()
    }
}

// ─── Summary builder ──────────────────────────────────────────────────────────

pub fn summarize(report: &ImportReport) -> ImportSummary {
    let scene = &report.scene;
    let skeletons = scene
        .skeletons
        .iter()
        .map(|skeleton| SkeletonSummary {
            name: skeleton.name.clone(),
            display_name: skeleton.display_name.clone(),
            joint_count: skeleton.joints.len(),
            anchor_node: skeleton.parent,
            skinned_mesh_parts: skeleton.mesh_skinning_targets.clone(),
            animated_joint_count: skeleton.animated_joints.len(),
        })
        .collect();
    let tracks = scene
        .animation_tracks
        .iter()
        .map(|track| TrackSummary {
            display_name: track.display_name.clone(),
            min_time: track.has_timepoints.then_some(track.min_time),
            max_time: track.has_timepoints.then_some(track.max_time),
        })
        .collect();

    ImportSummary {
        generator: scene.metadata.generator.clone(),
        node_count: scene.nodes.len(),
        root_count: scene.root_nodes.len(),
        placeholder_count: scene.nodes.iter().filter(|node| node.is_placeholder).count(),
        mesh_count: scene.meshes.len(),
        total_vertices: scene.meshes.iter().map(|mesh| mesh.points.len()).sum(),
        total_triangles: scene.meshes.iter().map(|mesh| mesh.indices.len() / 3).sum(),
        material_count: scene.materials.len(),
        image_count: scene.images.len(),
        generated_image_count: scene.images.iter().filter(|image| image.generated).count(),
        camera_count: scene.cameras.len(),
        light_count: scene.lights.len(),
        neural_primitive_count: scene.neural_primitives.len(),
        skeletons,
        tracks,
        issues: report.issues.clone(),
    }
}

// ─── Summary writer ───────────────────────────────────────────────────────────

/// Write the import summary as pretty JSON.
pub fn write_import_summary(path: &Path, report: &ImportReport) -> Result<()> {
    if let Some(parent) = path.parent()
        && !parent.as_os_str().is_empty()
    {
        fs::create_dir_all(parent).with_context(|| {
            format!("failed to create summary directory: {}", parent.display())
        })?;
    }

    let content = serde_json::to_string_pretty(&summarize(report))
        .context("failed to serialize import summary")?;
    fs::write(path, content)
        .with_context(|| format!("failed to write import summary: {}", path.display()))
}
