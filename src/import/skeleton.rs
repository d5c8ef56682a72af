use std::collections::HashMap;

use log::debug;
use nalgebra::Matrix4;
use serde_json::Value;

use super::gltf_utils::{
    as_index, chunk_mat4, json_array, node_to_local_matrix, read_accessor_f32, str_field,
};
use super::nodes::{NodeGraph, scene_root_references};
use super::scene::Skeleton;
use super::types::{IssueKind, Issues};
use super::validation::{check_accessor, check_index, report};
use crate::source::SourceDocument;

// ─── Joint paths ──────────────────────────────────────────────────────────────

/// Hierarchical path token (`n0/n3/n7`) for every source node reachable from
/// a scene root. Each node keeps the path of the first parent that reaches it.
pub(super) fn build_joint_paths(json: &Value) -> HashMap<usize, String> {
    let node_count = json_array(json, "nodes").len();
    let mut paths = HashMap::new();
    let mut stack: Vec<(usize, Option<String>)> = scene_root_references(json)
        .iter()
        .rev()
        .filter_map(as_index)
        .filter(|index| *index < node_count)
        .map(|index| (index, None))
        .collect();

    while let Some((index, parent_path)) = stack.pop() {
        if paths.contains_key(&index) {
            continue;
        }
        let path = match parent_path {
            Some(parent) => format!("{parent}/n{index}"),
            None => format!("n{index}"),
        };
        let children = json_array(&json_array(json, "nodes")[index], "children");
        stack.extend(
            children
                .iter()
                .rev()
                .filter_map(as_index)
                .filter(|child| *child < node_count && !paths.contains_key(child))
                .map(|child| (child, Some(path.clone()))),
        );
        paths.insert(index, path);
    }

    paths
}

// ─── Skeleton assembly ────────────────────────────────────────────────────────

/// Build one skeleton per source skin.
///
/// Joint, name, rest and bind arrays always have the skin's joint count.
/// Invalid joint references become placeholder joints with identity
/// transforms, and an unusable inverse-bind accessor leaves identity binds.
pub(super) fn import_skeletons(
    document: &SourceDocument,
    graph: &mut NodeGraph,
    joint_paths: &HashMap<usize, String>,
    issues: &mut Issues,
) -> Vec<Skeleton> {
    debug!("assembling skeletons");
    let json = &document.json;
    let source_nodes = json_array(json, "nodes");

    json_array(json, "skins")
        .iter()
        .enumerate()
        .map(|(skin_index, skin)| {
            let context = format!("skin {skin_index}");
            let display_name = str_field(skin, "name")
                .map(ToOwned::to_owned)
                .unwrap_or_else(|| format!("Skeleton{skin_index}"));
            let mut skeleton = Skeleton {
                name: format!("skel{skin_index}"),
                display_name,
                ..Skeleton::default()
            };

            for (slot, joint) in json_array(skin, "joints").iter().enumerate() {
                let Some(node_index) =
                    report(issues, check_index("node", joint, source_nodes.len()), &context)
                else {
                    let token = as_index(joint).unwrap_or(slot);
                    skeleton.joints.push(format!("bad_index_node_{token}"));
                    skeleton.joint_names.push(format!("Bad Index Node {token}"));
                    skeleton.source_joints.push(None);
                    skeleton.rest_transforms.push(Matrix4::identity());
                    continue;
                };

                let path = joint_paths.get(&node_index).cloned().unwrap_or_else(|| {
                    issues.warn(
                        IssueKind::Reference,
                        "JOINT_OUTSIDE_SCENE",
                        format!("{context}: joint node {node_index} is not reachable from a scene root"),
                    );
                    format!("n{node_index}")
                });
                let (joint_name, rest) = match graph.node_map.get(&node_index).copied() {
                    Some(node_slot) => {
                        let node = &mut graph.nodes[node_slot];
                        node.is_joint = true;
                        (node.display_name.clone(), node.local_matrix())
                    }
                    None => {
                        let source = &source_nodes[node_index];
                        (
                            str_field(source, "name")
                                .map(ToOwned::to_owned)
                                .unwrap_or_else(|| format!("Node{node_index}")),
                            node_to_local_matrix(source),
                        )
                    }
                };

                skeleton.joints.push(path);
                skeleton.joint_names.push(joint_name);
                skeleton.source_joints.push(Some(node_index));
                skeleton.rest_transforms.push(rest);
            }

            skeleton.bind_transforms =
                read_bind_transforms(document, skin, skeleton.joints.len(), issues, &context);
            skeleton
        })
        .collect()
}

/// World-space bind transforms as the inverse of each inverse-bind matrix.
fn read_bind_transforms(
    document: &SourceDocument,
    skin: &Value,
    joint_count: usize,
    issues: &mut Issues,
    context: &str,
) -> Vec<Matrix4<f32>> {
    let mut binds = vec![Matrix4::identity(); joint_count];
    let Some(value) = skin.get("inverseBindMatrices") else {
        return binds;
    };
    let Some(meta) = report(issues, check_accessor(&document.json, value, &["MAT4"]), context) else {
        return binds;
    };
    if meta.count != joint_count {
        issues.warn(
            IssueKind::Shape,
            "INVERSE_BIND_COUNT",
            format!(
                "{context}: {} inverse bind matrices for {joint_count} joints",
                meta.count
            ),
        );
    }
    let Some(values) = read_accessor_f32(document, &meta) else {
        issues.warn(
            IssueKind::Shape,
            "ACCESSOR_OUT_OF_BOUNDS",
            format!("{context}: inverse bind matrices lie outside their buffer"),
        );
        return binds;
    };

    for (joint, inverse_bind) in chunk_mat4(&values).into_iter().take(joint_count).enumerate() {
        match inverse_bind.try_inverse() {
            Some(bind) => binds[joint] = bind,
            None => issues.warn(
                IssueKind::Shape,
                "SINGULAR_INVERSE_BIND",
                format!("{context}: inverse bind matrix {joint} is not invertible"),
            ),
        }
    }
    binds
}

#[cfg(test)]
mod tests {
    use nalgebra::Vector3;
    use serde_json::json;

    use super::super::gltf_utils::test_support::document_with;
    use super::super::nodes::{ReferenceCounts, build_node_graph};
    use super::*;

    fn translation_ibm(x: f32) -> [f32; 16] {
        let mut values = [0.0; 16];
        values[0] = 1.0;
        values[5] = 1.0;
        values[10] = 1.0;
        values[15] = 1.0;
        values[12] = -x;
        values
    }

    fn skinned_document(joints: Value, ibm_count: usize) -> SourceDocument {
        let floats: Vec<f32> = (0..ibm_count)
            .flat_map(|i| translation_ibm(i as f32 + 1.0))
            .collect();
        document_with(
            json!({
                "scenes": [ { "nodes": [0] } ],
                "nodes": [
                    { "name": "hips", "translation": [0.0, 1.0, 0.0], "children": [1] },
                    { "name": "spine", "translation": [0.0, 0.5, 0.0] }
                ],
                "skins": [ { "joints": joints, "inverseBindMatrices": 0 } ],
                "accessors": [
                    { "bufferView": 0, "componentType": 5126, "count": ibm_count, "type": "MAT4" }
                ]
            }),
            &floats,
            &[],
        )
    }

    fn assemble(document: &SourceDocument, issues: &mut Issues) -> (NodeGraph, Vec<Skeleton>) {
        let counts = ReferenceCounts {
            skins: 1,
            ..ReferenceCounts::default()
        };
        let mut graph = build_node_graph(&document.json, &[], counts, "ADOBE_nerf", issues).unwrap();
        let paths = build_joint_paths(&document.json);
        let skeletons = import_skeletons(document, &mut graph, &paths, issues);
        (graph, skeletons)
    }

    #[test]
    fn given_nested_nodes_when_building_paths_then_tokens_are_hierarchical() {
        let document = json!({
            "scenes": [ { "nodes": [0] } ],
            "nodes": [ { "children": [2] }, {}, { "children": [1] } ]
        });

        let paths = build_joint_paths(&document);

        assert_eq!(paths[&0], "n0");
        assert_eq!(paths[&2], "n0/n2");
        assert_eq!(paths[&1], "n0/n2/n1");
    }

    #[test]
    fn given_valid_skin_when_assembling_then_arrays_align_and_joints_are_marked() {
        let document = skinned_document(json!([0, 1]), 2);
        let mut issues = Issues::default();

        let (graph, skeletons) = assemble(&document, &mut issues);

        let skeleton = &skeletons[0];
        assert_eq!(skeleton.joints, vec!["n0", "n0/n1"]);
        assert_eq!(skeleton.joint_names, vec!["hips", "spine"]);
        assert_eq!(skeleton.rest_transforms[1][(1, 3)], 0.5);
        assert_eq!(skeleton.bind_transforms[1][(0, 3)], 2.0);
        assert!(graph.nodes[0].is_joint && graph.nodes[1].is_joint);
        assert!(issues.is_empty());
    }

    #[test]
    fn given_invalid_joint_when_assembling_then_placeholder_keeps_lengths_equal() {
        let document = skinned_document(json!([0, 42, 1]), 3);
        let mut issues = Issues::default();

        let (_, skeletons) = assemble(&document, &mut issues);

        let skeleton = &skeletons[0];
        assert_eq!(skeleton.joints.len(), 3);
        assert_eq!(skeleton.joint_names.len(), 3);
        assert_eq!(skeleton.rest_transforms.len(), 3);
        assert_eq!(skeleton.bind_transforms.len(), 3);
        assert_eq!(skeleton.joints[1], "bad_index_node_42");
        assert_eq!(skeleton.rest_transforms[1], Matrix4::identity());
        assert!(issues.contains_code("INVALID_NODE_INDEX"));
    }

    #[test]
    fn given_short_inverse_bind_accessor_when_assembling_then_missing_binds_are_identity() {
        let document = skinned_document(json!([0, 1]), 1);
        let mut issues = Issues::default();

        let (_, skeletons) = assemble(&document, &mut issues);

        let binds = &skeletons[0].bind_transforms;
        assert_eq!(binds.len(), 2);
        assert_eq!(
            binds[0].transform_vector(&Vector3::new(1.0, 0.0, 0.0)),
            Vector3::new(1.0, 0.0, 0.0)
        );
        assert_eq!(binds[0][(0, 3)], 1.0);
        assert_eq!(binds[1], Matrix4::identity());
        assert!(issues.contains_code("INVERSE_BIND_COUNT"));
    }
}
