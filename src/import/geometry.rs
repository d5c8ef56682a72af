use log::debug;
use nalgebra::{Vector3, Vector4};
use serde_json::Value;

use super::gltf_utils::{
    chunk_vec2, chunk_vec3, chunk_vec4, extension, json_array, read_accessor_f32,
    read_accessor_u32, str_field,
};
use super::scene::Mesh;
use super::types::{IssueKind, Issues};
use super::validation::{check_accessor, optional_index, report};
use crate::options::ImportOptions;
use crate::source::SourceDocument;

const MAX_UV_SETS: usize = 8;
const MAX_INFLUENCE_SETS: usize = 8;

const MODE_POINTS: u64 = 0;
const MODE_TRIANGLES: u64 = 4;
const MODE_TRIANGLE_STRIP: u64 = 5;
const MODE_TRIANGLE_FAN: u64 = 6;

// ─── Topology ─────────────────────────────────────────────────────────────────

/// Expand a triangle strip, alternating winding so every face keeps the
/// orientation of the first.
pub fn triangles_from_strip(strip: &[u32]) -> Vec<u32> {
    if strip.len() < 3 {
        return Vec::new();
    }
    (0..strip.len() - 2)
        .flat_map(|i| {
            let odd = i % 2;
            [strip[i], strip[i + 1 + odd], strip[i + 2 - odd]]
        })
        .collect()
}

/// Expand a triangle fan around its first index.
pub fn triangles_from_fan(fan: &[u32]) -> Vec<u32> {
    if fan.len() < 3 {
        return Vec::new();
    }
    (0..fan.len() - 2)
        .flat_map(|i| [fan[0], fan[i + 1], fan[i + 2]])
        .collect()
}

/// Convert primitive indices to a triangle list according to `mode`.
///
/// Point and line topologies are passed through unchanged with a warning.
pub(super) fn normalize_topology(
    mode: u64,
    indices: Vec<u32>,
    issues: &mut Issues,
    context: &str,
) -> Vec<u32> {
    match mode {
        MODE_TRIANGLES => {
            if indices.len() < 3 || indices.len() % 3 != 0 {
                issues.warn(
                    IssueKind::Shape,
                    "TRIANGLE_INDEX_COUNT",
                    format!(
                        "{context}: {} indices do not form whole triangles",
                        indices.len()
                    ),
                );
            }
            indices
        }
        MODE_TRIANGLE_STRIP => triangles_from_strip(&indices),
        MODE_TRIANGLE_FAN => triangles_from_fan(&indices),
        MODE_POINTS..MODE_TRIANGLES => {
            issues.warn(
                IssueKind::Unsupported,
                "UNSUPPORTED_TOPOLOGY",
                format!("{context}: point and line primitives (mode {mode}) are passed through"),
            );
            indices
        }
        _ => {
            issues.warn(
                IssueKind::Unsupported,
                "UNKNOWN_TOPOLOGY",
                format!("{context}: unknown primitive mode {mode}"),
            );
            indices
        }
    }
}

// ─── Skinning influences ──────────────────────────────────────────────────────

/// Interleave JOINTS_n/WEIGHTS_n sets so every vertex owns `sets * 4`
/// consecutive influences.
pub fn interleave_influences(
    sets: &[(Vec<u32>, Vec<f32>)],
    vertex_count: usize,
) -> (Vec<u32>, Vec<f32>) {
    let influence_count = sets.len() * 4;
    let mut joints = Vec::with_capacity(vertex_count * influence_count);
    let mut weights = Vec::with_capacity(vertex_count * influence_count);
    for vertex in 0..vertex_count {
        for (set_joints, set_weights) in sets {
            let range = vertex * 4..vertex * 4 + 4;
            joints.extend_from_slice(&set_joints[range.clone()]);
            weights.extend_from_slice(&set_weights[range]);
        }
    }
    (joints, weights)
}

// ─── Mesh import ──────────────────────────────────────────────────────────────

/// Import every primitive as its own mesh part.
///
/// Returns the parts plus, per source mesh, the indices of its parts. Slots
/// are never dropped: a primitive that fails validation yields an empty part.
pub(super) fn import_meshes(
    document: &SourceDocument,
    options: &ImportOptions,
    issues: &mut Issues,
) -> (Vec<Mesh>, Vec<Vec<usize>>) {
    debug!("importing meshes");
    let json = &document.json;
    let mut meshes = Vec::new();
    let mut mesh_parts = Vec::new();

    for (mesh_index, source_mesh) in json_array(json, "meshes").iter().enumerate() {
        let mesh_name = str_field(source_mesh, "name")
            .map(ToOwned::to_owned)
            .unwrap_or_else(|| format!("Mesh{mesh_index}"));
        let primitives = json_array(source_mesh, "primitives");
        let mut parts = Vec::with_capacity(primitives.len());

        for (primitive_index, primitive) in primitives.iter().enumerate() {
            let display_name = if primitives.len() > 1 {
                format!("{mesh_name}_primitive{primitive_index}")
            } else {
                mesh_name.clone()
            };
            let context = format!("mesh {mesh_index} primitive {primitive_index}");
            let mut mesh = import_primitive(document, options, primitive, issues, &context)
                .unwrap_or_default();
            mesh.name = format!("mesh{mesh_index}_{primitive_index}");
            mesh.display_name = display_name;
            meshes.push(mesh);
            parts.push(meshes.len() - 1);
        }
        mesh_parts.push(parts);
    }

    (meshes, mesh_parts)
}

fn read_attribute(
    document: &SourceDocument,
    attributes: &Value,
    semantic: &str,
    expected: &[&'static str],
    vertex_count: Option<usize>,
    issues: &mut Issues,
    context: &str,
) -> Option<Vec<f32>> {
    let value = attributes.get(semantic)?;
    let context = format!("{context} {semantic}");
    let meta = report(issues, check_accessor(&document.json, value, expected), &context)?;
    if meta.sparse {
        issues.warn(
            IssueKind::Unsupported,
            "SPARSE_ACCESSOR",
            format!("{context}: sparse substitution is ignored"),
        );
    }
    if let Some(vertex_count) = vertex_count
        && meta.count != vertex_count
    {
        issues.warn(
            IssueKind::Shape,
            "ATTRIBUTE_COUNT_MISMATCH",
            format!("{context}: {} elements for {vertex_count} vertices", meta.count),
        );
        return None;
    }
    let values = read_accessor_f32(document, &meta);
    if values.is_none() {
        issues.warn(
            IssueKind::Shape,
            "ACCESSOR_OUT_OF_BOUNDS",
            format!("{context}: accessor data lies outside its buffer"),
        );
    }
    values
}

fn import_primitive(
    document: &SourceDocument,
    options: &ImportOptions,
    primitive: &Value,
    issues: &mut Issues,
    context: &str,
) -> Option<Mesh> {
    let json = &document.json;
    if extension(primitive, "KHR_draco_mesh_compression").is_some() {
        issues.warn(
            IssueKind::Unsupported,
            "UNSUPPORTED_EXTENSION",
            format!("{context}: Draco compressed geometry is not decoded"),
        );
    }

    let attributes = primitive.get("attributes").unwrap_or(&Value::Null);
    let Some(points) = read_attribute(document, attributes, "POSITION", &["VEC3"], None, issues, context)
    else {
        issues.warn(
            IssueKind::Shape,
            "MISSING_POSITIONS",
            format!("{context}: no readable POSITION attribute, part left empty"),
        );
        return None;
    };
    let points = chunk_vec3(&points);
    let vertex_count = points.len();

    let indices = match primitive.get("indices") {
        Some(value) => {
            let indices_context = format!("{context} indices");
            let meta = report(issues, check_accessor(json, value, &["SCALAR"]), &indices_context)?;
            let Some(indices) = read_accessor_u32(document, &meta) else {
                issues.warn(
                    IssueKind::Shape,
                    "INVALID_INDEX_ACCESSOR",
                    format!("{indices_context}: not an unsigned integer accessor within bounds"),
                );
                return None;
            };
            if let Some(max) = indices.iter().copied().max()
                && max as usize >= vertex_count
            {
                issues.warn(
                    IssueKind::Reference,
                    "INDEX_OUT_OF_RANGE",
                    format!("{context}: index {max} exceeds vertex count {vertex_count}, part left empty"),
                );
                return None;
            }
            indices
        }
        None => (0..vertex_count as u32).collect(),
    };

    let mode = primitive
        .get("mode")
        .and_then(Value::as_u64)
        .unwrap_or(MODE_TRIANGLES);
    let mut mesh = Mesh {
        points,
        indices: normalize_topology(mode, indices, issues, context),
        is_rigid: true,
        ..Mesh::default()
    };

    if let Some(normals) = read_attribute(document, attributes, "NORMAL", &["VEC3"], Some(vertex_count), issues, context) {
        mesh.normals = chunk_vec3(&normals);
    }
    if let Some(tangents) = read_attribute(document, attributes, "TANGENT", &["VEC4"], Some(vertex_count), issues, context) {
        mesh.tangents = chunk_vec4(&tangents);
    }
    if options.compute_bitangents && !mesh.normals.is_empty() && !mesh.tangents.is_empty() {
        mesh.bitangents = compute_bitangents(&mesh.normals, &mesh.tangents, issues, context);
    }

    for set in 0..MAX_UV_SETS {
        let semantic = format!("TEXCOORD_{set}");
        if attributes.get(&semantic).is_none() {
            break;
        }
        let Some(values) = read_attribute(document, attributes, &semantic, &["VEC2"], Some(vertex_count), issues, context) else {
            continue;
        };
        let mut uvs = chunk_vec2(&values);
        if options.flip_uv_v {
            for uv in &mut uvs {
                uv.y = 1.0 - uv.y;
            }
        }
        if set == 0 {
            mesh.uvs = uvs;
        } else {
            mesh.extra_uv_sets.push(uvs);
        }
    }

    if let Some(values) = read_attribute(document, attributes, "COLOR_0", &["VEC3", "VEC4"], Some(vertex_count), issues, context) {
        if values.len() == vertex_count * 4 {
            let colors = chunk_vec4(&values);
            mesh.colors = colors.iter().map(|color| color.xyz()).collect();
            mesh.opacities = colors.iter().map(|color| color.w).collect();
        } else {
            mesh.colors = chunk_vec3(&values);
        }
    }

    let influence_sets = read_influence_sets(document, attributes, vertex_count, issues, context);
    if !influence_sets.is_empty() {
        let (joints, weights) = interleave_influences(&influence_sets, vertex_count);
        mesh.influence_count = influence_sets.len() * 4;
        mesh.joints = joints;
        mesh.weights = weights;
        mesh.is_rigid = false;
    }

    let material_count = json_array(json, "materials").len();
    mesh.material = optional_index(issues, primitive, "material", "material", material_count, context);
    mesh.double_sided = mesh
        .material
        .and_then(|material| json_array(json, "materials").get(material))
        .and_then(|material| material.get("doubleSided"))
        .and_then(Value::as_bool)
        .unwrap_or(false);

    Some(mesh)
}

fn read_influence_sets(
    document: &SourceDocument,
    attributes: &Value,
    vertex_count: usize,
    issues: &mut Issues,
    context: &str,
) -> Vec<(Vec<u32>, Vec<f32>)> {
    let json = &document.json;
    let mut sets = Vec::new();
    for set in 0..MAX_INFLUENCE_SETS {
        let joints_key = format!("JOINTS_{set}");
        let weights_key = format!("WEIGHTS_{set}");
        let (Some(joints_value), Some(weights_value)) =
            (attributes.get(&joints_key), attributes.get(&weights_key))
        else {
            if attributes.get(&joints_key).is_some() || attributes.get(&weights_key).is_some() {
                issues.warn(
                    IssueKind::Shape,
                    "UNPAIRED_INFLUENCES",
                    format!("{context}: {joints_key} and {weights_key} must both be present"),
                );
            }
            break;
        };

        let joints = report(issues, check_accessor(json, joints_value, &["VEC4"]), context)
            .and_then(|meta| {
                (meta.count == vertex_count)
                    .then(|| read_accessor_u32(document, &meta))
                    .flatten()
            });
        let weights = report(issues, check_accessor(json, weights_value, &["VEC4"]), context)
            .and_then(|meta| {
                (meta.count == vertex_count)
                    .then(|| read_accessor_f32(document, &meta))
                    .flatten()
            });
        let (Some(joints), Some(weights)) = (joints, weights) else {
            issues.warn(
                IssueKind::Shape,
                "INVALID_INFLUENCES",
                format!("{context}: {joints_key}/{weights_key} are unreadable or miscounted, skinning stops at set {set}"),
            );
            break;
        };
        sets.push((joints, weights));
    }
    sets
}

fn compute_bitangents(
    normals: &[Vector3<f32>],
    tangents: &[Vector4<f32>],
    issues: &mut Issues,
    context: &str,
) -> Vec<Vector3<f32>> {
    let mut degenerate = 0;
    let bitangents = normals
        .iter()
        .zip(tangents)
        .map(|(normal, tangent)| {
            let handedness = if tangent.w.abs() < 0.5 {
                degenerate += 1;
                1.0
            } else {
                tangent.w.signum()
            };
            normal.cross(&tangent.xyz()) * handedness
        })
        .collect();
    if degenerate > 0 {
        issues.warn(
            IssueKind::Shape,
            "TANGENT_HANDEDNESS",
            format!("{context}: {degenerate} tangents have no handedness, assuming +1"),
        );
    }
    bitangents
}

#[cfg(test)]
mod tests {
    use serde_json::json;

    use super::super::gltf_utils::test_support::document_with;
    use super::*;

    #[test]
    fn given_strip_when_expanding_then_winding_alternates() {
        assert_eq!(
            triangles_from_strip(&[0, 1, 2, 3, 4]),
            vec![0, 1, 2, 1, 3, 2, 2, 3, 4]
        );
    }

    #[test]
    fn given_fan_when_expanding_then_faces_share_first_vertex() {
        assert_eq!(
            triangles_from_fan(&[0, 1, 2, 3, 4]),
            vec![0, 1, 2, 0, 2, 3, 0, 3, 4]
        );
        assert!(triangles_from_fan(&[0, 1]).is_empty());
    }

    #[test]
    fn given_partial_triangle_list_when_normalizing_then_topology_warning_is_recorded() {
        let mut issues = Issues::default();

        let indices = normalize_topology(MODE_TRIANGLES, vec![0, 1, 2, 3], &mut issues, "p");

        assert_eq!(indices.len(), 4);
        assert!(issues.contains_code("TRIANGLE_INDEX_COUNT"));
    }

    #[test]
    fn given_two_influence_sets_when_interleaving_then_vertex_owns_eight_slots() {
        let sets = vec![
            (vec![1, 2, 3, 4, 5, 6, 7, 8], vec![0.1; 8]),
            (vec![9, 10, 11, 12, 13, 14, 15, 16], vec![0.2; 8]),
        ];

        let (joints, weights) = interleave_influences(&sets, 2);

        assert_eq!(joints[..8], [1, 2, 3, 4, 9, 10, 11, 12]);
        assert_eq!(joints[8..], [5, 6, 7, 8, 13, 14, 15, 16]);
        assert_eq!(weights[4], 0.2);
    }

    fn triangle_document(indices: &[u16]) -> SourceDocument {
        document_with(
            json!({
                "asset": { "version": "2.0" },
                "accessors": [
                    { "bufferView": 0, "componentType": 5126, "count": 3, "type": "VEC3" },
                    { "bufferView": 1, "componentType": 5123, "count": indices.len(), "type": "SCALAR" },
                    { "bufferView": 0, "byteOffset": 36, "componentType": 5126, "count": 3, "type": "VEC2" }
                ],
                "materials": [ { "doubleSided": true } ],
                "meshes": [
                    {
                        "name": "Tri",
                        "primitives": [
                            { "attributes": { "POSITION": 0, "TEXCOORD_0": 2 }, "indices": 1, "material": 0 },
                            { "attributes": { "POSITION": 0 }, "material": 4 }
                        ]
                    }
                ]
            }),
            &[
                0.0, 0.0, 0.0, 1.0, 0.0, 0.0, 0.0, 1.0, 0.0, //
                0.0, 0.25, 1.0, 0.0, 0.5, 1.0,
            ],
            indices,
        )
    }

    #[test]
    fn given_indexed_primitive_when_importing_then_uvs_are_flipped_and_material_bound() {
        let document = triangle_document(&[0, 1, 2]);
        let mut issues = Issues::default();

        let (meshes, parts) = import_meshes(&document, &ImportOptions::default(), &mut issues);

        assert_eq!(parts, vec![vec![0, 1]]);
        assert_eq!(meshes[0].display_name, "Tri_primitive0");
        assert_eq!(meshes[0].indices, vec![0, 1, 2]);
        assert_eq!(meshes[0].uvs[0].y, 0.75);
        assert_eq!(meshes[0].uvs[1].y, 1.0);
        assert_eq!(meshes[0].material, Some(0));
        assert!(meshes[0].double_sided);
        assert!(meshes[0].is_rigid);
    }

    #[test]
    fn given_unindexed_primitive_when_importing_then_sequential_indices_and_bad_material_is_reported() {
        let document = triangle_document(&[0, 1, 2]);
        let mut issues = Issues::default();

        let (meshes, _) = import_meshes(&document, &ImportOptions::default(), &mut issues);

        assert_eq!(meshes[1].indices, vec![0, 1, 2]);
        assert_eq!(meshes[1].material, None);
        assert!(issues.contains_code("INVALID_MATERIAL_INDEX"));
    }

    #[test]
    fn given_index_past_vertex_count_when_importing_then_part_is_empty_but_kept() {
        let document = triangle_document(&[0, 1, 7]);
        let mut issues = Issues::default();

        let (meshes, parts) = import_meshes(&document, &ImportOptions::default(), &mut issues);

        assert_eq!(parts[0].len(), 2);
        assert!(meshes[0].points.is_empty());
        assert!(meshes[0].indices.is_empty());
        assert_eq!(meshes[0].display_name, "Tri_primitive0");
        assert!(issues.contains_code("INDEX_OUT_OF_RANGE"));
    }

    #[test]
    fn given_tangent_without_handedness_when_deriving_bitangents_then_positive_sign_is_assumed() {
        let mut issues = Issues::default();
        let normals = vec![Vector3::new(0.0, 0.0, 1.0)];
        let tangents = vec![Vector4::new(1.0, 0.0, 0.0, 0.0)];

        let bitangents = compute_bitangents(&normals, &tangents, &mut issues, "p");

        assert_eq!(bitangents[0], Vector3::new(0.0, 1.0, 0.0));
        assert!(issues.contains_code("TANGENT_HANDEDNESS"));
    }

    #[test]
    fn given_position_count_beyond_buffer_when_importing_then_part_is_empty_with_warning() {
        let document = document_with(
            json!({
                "accessors": [
                    { "bufferView": 0, "componentType": 5126, "count": 1u64 << 61, "type": "VEC3" }
                ],
                "meshes": [ { "primitives": [ { "attributes": { "POSITION": 0 } } ] } ]
            }),
            &[0.0, 0.0, 0.0],
            &[],
        );
        let mut issues = Issues::default();

        let (meshes, parts) = import_meshes(&document, &ImportOptions::default(), &mut issues);

        assert_eq!(parts, vec![vec![0]]);
        assert!(meshes[0].points.is_empty());
        assert!(issues.contains_code("ACCESSOR_OUT_OF_BOUNDS"));
    }
}
