use std::collections::BTreeMap;

use nalgebra::{Matrix4, Translation3, UnitQuaternion, Vector2, Vector3, Vector4};
use serde_json::{Map, Value};

// ─── Scene ────────────────────────────────────────────────────────────────────

/// Canonical scene rebuilt from a glTF document.
#[derive(Debug, Clone, Default)]
pub struct Scene {
    pub metadata: SceneMetadata,
    pub nodes: Vec<Node>,
    pub root_nodes: Vec<usize>,
    pub skeletons: Vec<Skeleton>,
    pub animation_tracks: Vec<AnimationTrack>,
    pub materials: Vec<Material>,
    pub meshes: Vec<Mesh>,
    pub images: Vec<ImageAsset>,
    pub cameras: Vec<Camera>,
    pub lights: Vec<Light>,
    pub neural_primitives: Vec<NeuralPrimitive>,
    pub has_animations: bool,
}

#[derive(Debug, Clone, Default)]
pub struct SceneMetadata {
    pub generator: String,
    pub copyright: Option<String>,
    pub extras: BTreeMap<String, String>,
    pub filenames: Vec<String>,
}

// ─── Nodes ────────────────────────────────────────────────────────────────────

#[derive(Debug, Clone)]
pub struct Node {
    pub name: String,
    pub display_name: String,
    pub parent: Option<usize>,
    pub children: Vec<usize>,
    pub translation: Vector3<f32>,
    pub rotation: UnitQuaternion<f32>,
    pub scale: Vector3<f32>,
    /// Authored 4x4 matrix. Takes precedence over TRS when present.
    pub matrix: Option<Matrix4<f32>>,
    pub has_transform: bool,
    pub static_meshes: Vec<usize>,
    pub skinned_meshes: Vec<usize>,
    /// Skeletons anchored at this node.
    pub skeletons: Vec<usize>,
    pub camera: Option<usize>,
    pub light: Option<usize>,
    pub neural_primitive: Option<usize>,
    /// One slot per animation track once any channel targets this node.
    pub animations: Vec<Option<NodeAnimation>>,
    pub is_joint: bool,
    /// Stands in for an out-of-range source index.
    pub is_placeholder: bool,
}

impl Node {
    pub fn new(name: impl Into<String>, display_name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            display_name: display_name.into(),
            parent: None,
            children: Vec::new(),
            translation: Vector3::zeros(),
            rotation: UnitQuaternion::identity(),
            scale: Vector3::new(1.0, 1.0, 1.0),
            matrix: None,
            has_transform: false,
            static_meshes: Vec::new(),
            skinned_meshes: Vec::new(),
            skeletons: Vec::new(),
            camera: None,
            light: None,
            neural_primitive: None,
            animations: Vec::new(),
            is_joint: false,
            is_placeholder: false,
        }
    }

    pub fn placeholder(source_index: usize) -> Self {
        let mut node = Self::new(
            format!("bad_index_node_{source_index}"),
            format!("Bad Index Node {source_index}"),
        );
        node.is_placeholder = true;
        node
    }

    /// Local transform from the authored matrix, or composed as T * R * S.
    pub fn local_matrix(&self) -> Matrix4<f32> {
        if let Some(matrix) = self.matrix {
            return matrix;
        }
        Translation3::from(self.translation).to_homogeneous()
            * self.rotation.to_homogeneous()
            * Matrix4::new_nonuniform_scaling(&self.scale)
    }
}

// ─── Animation ────────────────────────────────────────────────────────────────

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Interpolation {
    #[default]
    Linear,
    Step,
    CubicSpline,
}

/// Raw keyframes of one animated property.
#[derive(Debug, Clone, PartialEq)]
pub struct TimeSamples<T> {
    pub times: Vec<f32>,
    pub values: Vec<T>,
    pub interpolation: Interpolation,
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct NodeAnimation {
    pub translations: Option<TimeSamples<Vector3<f32>>>,
    pub rotations: Option<TimeSamples<UnitQuaternion<f32>>>,
    pub scales: Option<TimeSamples<Vector3<f32>>>,
}

#[derive(Debug, Clone, Default)]
pub struct AnimationTrack {
    pub name: String,
    pub display_name: String,
    pub min_time: f32,
    pub max_time: f32,
    pub has_timepoints: bool,
}

impl AnimationTrack {
    pub fn include_times(&mut self, times: &[f32]) {
        for &time in times {
            if !self.has_timepoints {
                self.min_time = time;
                self.max_time = time;
                self.has_timepoints = true;
            } else {
                self.min_time = self.min_time.min(time);
                self.max_time = self.max_time.max(time);
            }
        }
    }
}

/// Joint poses of one track on a shared time axis, indexed `[time][joint]`
/// where `joint` follows `Skeleton::animated_joints`.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct SkeletonAnimation {
    pub times: Vec<f32>,
    pub translations: Vec<Vec<Vector3<f32>>>,
    pub rotations: Vec<Vec<UnitQuaternion<f32>>>,
    pub scales: Vec<Vec<Vector3<f32>>>,
}

impl SkeletonAnimation {
    pub fn is_empty(&self) -> bool {
        self.times.is_empty()
    }
}

// ─── Skeletons ────────────────────────────────────────────────────────────────

#[derive(Debug, Clone, Default)]
pub struct Skeleton {
    pub name: String,
    pub display_name: String,
    /// Hierarchical joint path tokens, e.g. `n0/n3/n4`.
    pub joints: Vec<String>,
    /// Friendly joint names taken from the source nodes.
    pub joint_names: Vec<String>,
    /// Source node index per joint, `None` for placeholders.
    pub source_joints: Vec<Option<usize>>,
    pub rest_transforms: Vec<Matrix4<f32>>,
    pub bind_transforms: Vec<Matrix4<f32>>,
    /// Node the skeleton is anchored under.
    pub parent: Option<usize>,
    /// Mesh parts deformed by this skeleton, without duplicates.
    pub mesh_skinning_targets: Vec<usize>,
    /// Joint positions that carry animation, ascending.
    pub animated_joints: Vec<usize>,
    /// One entry per track; empty when no joint moves in that track.
    pub animations: Vec<SkeletonAnimation>,
}

// ─── Materials ────────────────────────────────────────────────────────────────

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Channel {
    R,
    G,
    B,
    A,
    Rgb,
    Rgba,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ColorSpace {
    Raw,
    Srgb,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum WrapMode {
    #[default]
    Repeat,
    Clamp,
    Mirror,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum FilterMode {
    Nearest,
    #[default]
    Linear,
    NearestMipmapNearest,
    LinearMipmapNearest,
    NearestMipmapLinear,
    LinearMipmapLinear,
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub enum InputValue {
    Scalar(f32),
    Vec3(Vector3<f32>),
    Vec4(Vector4<f32>),
}

/// Texture binding of a material channel. The sampled texel is remapped as
/// `texel * scale + bias`.
#[derive(Debug, Clone, PartialEq)]
pub struct TextureInput {
    pub image: usize,
    pub uv_index: usize,
    pub channel: Channel,
    /// `None` when the channel carries no color data (alpha).
    pub colorspace: Option<ColorSpace>,
    pub wrap_s: WrapMode,
    pub wrap_t: WrapMode,
    pub min_filter: FilterMode,
    pub mag_filter: FilterMode,
    /// Degrees.
    pub uv_rotation: Option<f32>,
    pub uv_scale: Option<Vector2<f32>>,
    pub uv_translation: Option<Vector2<f32>>,
    pub scale: Vector4<f32>,
    pub bias: Vector4<f32>,
}

impl TextureInput {
    pub fn new(image: usize, uv_index: usize, channel: Channel) -> Self {
        Self {
            image,
            uv_index,
            channel,
            colorspace: Some(ColorSpace::Raw),
            wrap_s: WrapMode::Repeat,
            wrap_t: WrapMode::Repeat,
            min_filter: FilterMode::Linear,
            mag_filter: FilterMode::Linear,
            uv_rotation: None,
            uv_scale: None,
            uv_translation: None,
            scale: Vector4::new(1.0, 1.0, 1.0, 1.0),
            bias: Vector4::zeros(),
        }
    }

    pub fn copy_uv_transform_from(&mut self, other: &TextureInput) {
        self.uv_rotation = other.uv_rotation;
        self.uv_scale = other.uv_scale;
        self.uv_translation = other.uv_translation;
    }
}

/// A material channel: unset, a constant, or a texture lookup.
#[derive(Debug, Clone, PartialEq, Default)]
pub enum Input {
    #[default]
    Empty,
    Constant(InputValue),
    Texture(TextureInput),
}

impl Input {
    pub fn scalar(value: f32) -> Self {
        Input::Constant(InputValue::Scalar(value))
    }

    pub fn vec3(value: Vector3<f32>) -> Self {
        Input::Constant(InputValue::Vec3(value))
    }

    pub fn is_used(&self) -> bool {
        !matches!(self, Input::Empty)
    }

    pub fn texture(&self) -> Option<&TextureInput> {
        match self {
            Input::Texture(texture) => Some(texture),
            _ => None,
        }
    }

    pub fn constant_scalar(&self) -> Option<f32> {
        match self {
            Input::Constant(InputValue::Scalar(value)) => Some(*value),
            _ => None,
        }
    }

    pub fn constant_vec3(&self) -> Option<Vector3<f32>> {
        match self {
            Input::Constant(InputValue::Vec3(value)) => Some(*value),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, Default)]
pub struct Material {
    pub name: String,
    pub display_name: String,
    pub diffuse_color: Input,
    pub opacity: Input,
    pub opacity_threshold: Input,
    pub metallic: Input,
    pub roughness: Input,
    pub emissive_color: Input,
    pub normal: Input,
    pub normal_scale: Input,
    pub occlusion: Input,
    pub ior: Input,
    pub specular_level: Input,
    pub specular_color: Input,
    pub clearcoat: Input,
    pub clearcoat_color: Input,
    pub clearcoat_roughness: Input,
    pub clearcoat_ior: Input,
    pub clearcoat_specular: Input,
    pub clearcoat_normal: Input,
    pub sheen_color: Input,
    pub sheen_roughness: Input,
    pub transmission: Input,
    pub volume_thickness: Input,
    pub absorption_distance: Input,
    pub absorption_color: Input,
    pub scattering_color: Input,
    pub scattering_distance: Input,
    pub scattering_distance_scale: Input,
    pub clearcoat_models_transmission_tint: bool,
    pub is_unlit: bool,
    pub double_sided: bool,
}

// ─── Images ───────────────────────────────────────────────────────────────────

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ImageKind {
    Png,
    Jpeg,
    Webp,
}

impl ImageKind {
    pub fn extension(self) -> &'static str {
        match self {
            ImageKind::Png => "png",
            ImageKind::Jpeg => "jpg",
            ImageKind::Webp => "webp",
        }
    }
}

#[derive(Debug, Clone)]
pub struct ImageAsset {
    /// Unique short name without extension.
    pub name: String,
    pub kind: ImageKind,
    pub data: Vec<u8>,
    /// Produced by the importer rather than copied from the source.
    pub generated: bool,
}

impl ImageAsset {
    pub fn file_name(&self) -> String {
        format!("{}.{}", self.name, self.kind.extension())
    }
}

// ─── Meshes ───────────────────────────────────────────────────────────────────

#[derive(Debug, Clone, Default)]
pub struct Mesh {
    pub name: String,
    pub display_name: String,
    pub points: Vec<Vector3<f32>>,
    pub normals: Vec<Vector3<f32>>,
    pub tangents: Vec<Vector4<f32>>,
    pub bitangents: Vec<Vector3<f32>>,
    pub uvs: Vec<Vector2<f32>>,
    /// TEXCOORD_1 and up.
    pub extra_uv_sets: Vec<Vec<Vector2<f32>>>,
    pub colors: Vec<Vector3<f32>>,
    pub opacities: Vec<f32>,
    /// Triangle list, or passthrough indices for point and line topologies.
    pub indices: Vec<u32>,
    /// `influence_count` joint indices per vertex.
    pub joints: Vec<u32>,
    pub weights: Vec<f32>,
    pub influence_count: usize,
    pub is_rigid: bool,
    pub material: Option<usize>,
    pub double_sided: bool,
    pub instanceable: bool,
}

// ─── Cameras and lights ───────────────────────────────────────────────────────

#[derive(Debug, Clone, PartialEq)]
pub enum Projection {
    Perspective {
        yfov: f32,
        aspect_ratio: Option<f32>,
        znear: f32,
        zfar: Option<f32>,
    },
    Orthographic {
        xmag: f32,
        ymag: f32,
        znear: f32,
        zfar: f32,
    },
}

#[derive(Debug, Clone, PartialEq)]
pub struct Camera {
    pub name: String,
    pub projection: Projection,
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub enum LightKind {
    Directional,
    Point,
    Spot {
        inner_cone_angle: f32,
        outer_cone_angle: f32,
    },
}

#[derive(Debug, Clone, PartialEq)]
pub struct Light {
    pub name: String,
    pub kind: LightKind,
    pub color: Vector3<f32>,
    pub intensity: f32,
    pub range: Option<f32>,
}

// ─── Neural primitives ────────────────────────────────────────────────────────

#[derive(Debug, Clone, PartialEq)]
pub struct NeuralPrimitive {
    pub node: usize,
    pub sigma_threshold: Option<f32>,
    pub hash_grid_resolution: Vec<u32>,
    /// Extension object as authored, encoded grids included.
    pub payload: Map<String, Value>,
}
