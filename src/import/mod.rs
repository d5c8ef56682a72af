mod animation;
mod cameras;
mod diagnostic;
mod geometry;
mod gltf_utils;
mod image_cache;
mod material;
mod nodes;
mod scene;
mod skeleton;
mod specgloss;
mod types;
mod validation;

use log::{debug, info};

use crate::error::ImportError;
use crate::options::ImportOptions;
use crate::source::{AssetResolver, SourceDocument};

// Re-export public types for callers of this module.
pub use animation::{Interpolate, merge_time_axes, resample_curve, sample_curve};
pub use diagnostic::{ImportSummary, summarize, write_import_summary};
pub use geometry::{interleave_influences, triangles_from_fan, triangles_from_strip};
pub use material::{ScatterParameters, volume_scatter_parameters};
pub use scene::{
    AnimationTrack, Camera, Channel, ColorSpace, FilterMode, ImageAsset, ImageKind, Input,
    InputValue, Interpolation, Light, LightKind, Material, Mesh, NeuralPrimitive, Node,
    NodeAnimation, Projection, Scene, SceneMetadata, Skeleton, SkeletonAnimation, TextureInput,
    TimeSamples, WrapMode,
};
pub use specgloss::{MetalRough, SpecGlossFactors, spec_gloss_to_metal_rough};
pub use types::{ImportIssue, IssueKind, Issues, Severity};
pub use validation::check_index;

use animation::{import_animation_tracks, import_node_animations, import_skeleton_animations};
use cameras::{import_cameras, import_lights};
use geometry::import_meshes;
use material::import_materials;
use nodes::{ReferenceCounts, bind_skinned_meshes, build_node_graph, check_mesh_instancing};
use skeleton::{build_joint_paths, import_skeletons};
use validation::{check_extensions, import_metadata};

/// Canonical scene plus every issue recorded while building it.
#[derive(Debug, Clone)]
pub struct ImportReport {
    pub scene: Scene,
    pub issues: Vec<ImportIssue>,
}

impl ImportReport {
    pub fn has_errors(&self) -> bool {
        self.issues
            .iter()
            .any(|issue| issue.severity == Severity::Error)
    }
}

// ─── Public API ───────────────────────────────────────────────────────────────

/// Rebuild a canonical scene from a loaded glTF document.
///
/// Only a version below 2.0 or an undersized node array abort the import;
/// every other defect is recorded in the report and the affected field,
/// channel or subtree falls back to its default.
pub fn import_gltf(
    document: &SourceDocument,
    resolver: &dyn AssetResolver,
    options: &ImportOptions,
) -> Result<ImportReport, ImportError> {
    let json = &document.json;
    let mut issues = Issues::default();
    issues.extend(document.load_issues.iter().cloned());

    let mut scene = Scene {
        metadata: import_metadata(json, document.file_name.as_deref(), document.external_uris())?,
        ..Scene::default()
    };
    check_extensions(json, &options.neural_extension_name, &mut issues);

    scene.cameras = import_cameras(json, &mut issues);
    scene.lights = import_lights(json, &mut issues);
    if options.import_materials {
        let (materials, images) = import_materials(document, resolver, options, &mut issues);
        scene.materials = materials;
        scene.images = images;
    }

    if options.import_geometry {
        let (mut meshes, mesh_parts) = import_meshes(document, options, &mut issues);
        let counts = ReferenceCounts {
            cameras: scene.cameras.len(),
            lights: scene.lights.len(),
            skins: gltf_utils::json_array(json, "skins").len(),
        };
        let mut graph = build_node_graph(
            json,
            &mesh_parts,
            counts,
            &options.neural_extension_name,
            &mut issues,
        )?;

        let joint_paths = build_joint_paths(json);
        let mut skeletons = import_skeletons(document, &mut graph, &joint_paths, &mut issues);
        bind_skinned_meshes(json, &mut graph, &mesh_parts, &mut skeletons, &mut issues);

        let mut tracks = import_animation_tracks(json);
        import_node_animations(document, &mut graph, &mut tracks, &mut issues);
        import_skeleton_animations(&graph, &mut skeletons, &tracks);
        check_mesh_instancing(&graph.mesh_use_count, &mesh_parts, &mut meshes, &mut issues);

        scene.has_animations = tracks.iter().any(|track| track.has_timepoints);
        scene.meshes = meshes;
        scene.skeletons = skeletons;
        scene.animation_tracks = tracks;
        scene.nodes = graph.nodes;
        scene.root_nodes = graph.roots;
        scene.neural_primitives = graph.neural_primitives;
    } else {
        debug!("geometry import disabled, skipping meshes, nodes and animation");
    }

    info!(
        "imported {} nodes, {} meshes, {} materials, {} skeletons with {} issues",
        scene.nodes.len(),
        scene.meshes.len(),
        scene.materials.len(),
        scene.skeletons.len(),
        issues.len()
    );
    Ok(ImportReport {
        scene,
        issues: issues.into_vec(),
    })
}
