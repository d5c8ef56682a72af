use std::collections::{HashMap, HashSet};

use log::debug;
use nalgebra::{Matrix4, Quaternion, UnitQuaternion, Vector3};
use serde_json::Value;

use super::gltf_utils::{as_index, extension, f32_array, json_array, str_field};
use super::scene::{Mesh, NeuralPrimitive, Node, Skeleton};
use super::types::{IssueKind, Issues};
use super::validation::optional_index;
use crate::error::ImportError;

/// A skinned mesh instance whose binding waits until every node has a slot.
#[derive(Debug, Clone, Copy)]
pub(super) struct SkinnedInstance {
    pub(super) source_node: usize,
    pub(super) mesh: usize,
    pub(super) skin: usize,
}

/// Result of the first traversal phase.
#[derive(Debug, Default)]
pub(super) struct NodeGraph {
    pub(super) nodes: Vec<Node>,
    pub(super) roots: Vec<usize>,
    /// Source node index to canonical slot. Out-of-range sources map to
    /// their placeholder.
    pub(super) node_map: HashMap<usize, usize>,
    /// Source node index to source parent index.
    pub(super) parent_map: HashMap<usize, usize>,
    pub(super) skinned: Vec<SkinnedInstance>,
    pub(super) mesh_use_count: Vec<usize>,
    pub(super) neural_primitives: Vec<NeuralPrimitive>,
}

/// Counts of the arrays node references are validated against.
#[derive(Debug, Clone, Copy, Default)]
pub(super) struct ReferenceCounts {
    pub(super) cameras: usize,
    pub(super) lights: usize,
    pub(super) skins: usize,
}

// ─── Scene roots ──────────────────────────────────────────────────────────────

/// Root node references of every scene, default scene first. Documents
/// without scenes treat every parentless node as a root.
pub(super) fn scene_root_references(json: &Value) -> Vec<Value> {
    let scenes = json_array(json, "scenes");
    if scenes.is_empty() {
        let children: HashSet<usize> = json_array(json, "nodes")
            .iter()
            .flat_map(|node| json_array(node, "children"))
            .filter_map(as_index)
            .collect();
        return (0..json_array(json, "nodes").len())
            .filter(|index| !children.contains(index))
            .map(Value::from)
            .collect();
    }

    let default_scene = json
        .get("scene")
        .and_then(as_index)
        .filter(|index| *index < scenes.len())
        .unwrap_or(0);
    let mut order = vec![default_scene];
    order.extend((0..scenes.len()).filter(|index| *index != default_scene));
    order
        .into_iter()
        .flat_map(|index| json_array(&scenes[index], "nodes").iter().cloned())
        .collect()
}

// ─── Traversal ────────────────────────────────────────────────────────────────

/// Assign canonical slots to the node forest in pre-order.
///
/// Each source node is visited at most once. Revisits through a second
/// parent or a cycle are skipped with a warning, and out-of-range root
/// references become placeholder nodes so their slot is preserved. The
/// resulting array holds one slot per source node plus one per placeholder.
pub(super) fn build_node_graph(
    json: &Value,
    mesh_parts: &[Vec<usize>],
    counts: ReferenceCounts,
    neural_extension: &str,
    issues: &mut Issues,
) -> Result<NodeGraph, ImportError> {
    debug!("building node graph");
    let source_nodes = json_array(json, "nodes");
    let root_references = scene_root_references(json);
    let bad_roots = root_references
        .iter()
        .filter(|value| as_index(value).is_none_or(|index| index >= source_nodes.len()))
        .count();
    let capacity = source_nodes.len() + bad_roots;

    let mut graph = NodeGraph {
        nodes: Vec::with_capacity(capacity),
        mesh_use_count: vec![0; mesh_parts.len()],
        ..NodeGraph::default()
    };
    let mut builder = GraphBuilder {
        json,
        mesh_parts,
        counts,
        neural_extension,
        capacity,
        graph: &mut graph,
        issues,
    };

    for (position, value) in root_references.iter().enumerate() {
        let Some(index) = as_index(value).filter(|index| *index < source_nodes.len()) else {
            let source_index = as_index(value).unwrap_or(usize::MAX - position);
            builder.issues.warn(
                IssueKind::Reference,
                "INVALID_NODE_INDEX",
                format!("scene root {value} is not a valid node index, inserting placeholder"),
            );
            let slot = builder.allocate(Node::placeholder(source_index))?;
            builder.graph.node_map.entry(source_index).or_insert(slot);
            builder.graph.roots.push(slot);
            continue;
        };
        if builder.graph.node_map.contains_key(&index) {
            builder.issues.warn(
                IssueKind::Topology,
                "NODE_REVISITED",
                format!("root node {index} was already traversed, skipping"),
            );
            continue;
        }
        let slot = builder.traverse(index)?;
        builder.graph.roots.push(slot);
    }
    builder.fill_unreached()?;

    Ok(graph)
}

struct GraphBuilder<'a> {
    json: &'a Value,
    mesh_parts: &'a [Vec<usize>],
    counts: ReferenceCounts,
    neural_extension: &'a str,
    capacity: usize,
    graph: &'a mut NodeGraph,
    issues: &'a mut Issues,
}

impl GraphBuilder<'_> {
    fn allocate(&mut self, node: Node) -> Result<usize, ImportError> {
        let slot = self.graph.nodes.len();
        if slot >= self.capacity {
            return Err(ImportError::NodeCapacity {
                slot,
                capacity: self.capacity,
            });
        }
        self.graph.nodes.push(node);
        Ok(slot)
    }

    /// Source nodes no scene reaches keep a detached slot so the array
    /// covers the whole source node list. They are not entered in the node
    /// map, so references to them still resolve as outside the scene.
    fn fill_unreached(&mut self) -> Result<(), ImportError> {
        let mut unreached = 0;
        for (index, source) in json_array(self.json, "nodes").iter().enumerate() {
            if self.graph.node_map.contains_key(&index) {
                continue;
            }
            let display_name = str_field(source, "name")
                .map(ToOwned::to_owned)
                .unwrap_or_else(|| format!("Node{index}"));
            self.allocate(Node::new(format!("n{index}"), display_name))?;
            unreached += 1;
        }
        if unreached > 0 {
            debug!("{unreached} source nodes are not reachable from any scene");
        }
        Ok(())
    }

    /// Depth-first pre-order walk from a valid, untraversed root.
    fn traverse(&mut self, root: usize) -> Result<usize, ImportError> {
        let source_nodes = json_array(self.json, "nodes");
        // (source index, source parent index)
        let mut stack: Vec<(usize, Option<usize>)> = vec![(root, None)];
        let mut root_slot = None;

        while let Some((index, parent)) = stack.pop() {
            if self.graph.node_map.contains_key(&index) {
                self.issues.warn(
                    IssueKind::Topology,
                    "NODE_REVISITED",
                    format!("node {index} is reachable more than once, keeping its first parent"),
                );
                continue;
            }

            let parent_slot = parent.and_then(|parent| self.graph.node_map.get(&parent).copied());
            let source = &source_nodes[index];
            let mut node = self.build_node(index, source);
            node.parent = parent_slot;
            let slot = self.allocate(node)?;
            self.graph.node_map.insert(index, slot);
            root_slot.get_or_insert(slot);

            if let Some(parent) = parent {
                self.graph.parent_map.insert(index, parent);
            }
            if let Some(parent_slot) = parent_slot {
                self.graph.nodes[parent_slot].children.push(slot);
            }

            let mut children = Vec::new();
            for child in json_array(source, "children") {
                let Some(child_index) = as_index(child).filter(|c| *c < source_nodes.len()) else {
                    self.issues.warn(
                        IssueKind::Reference,
                        "INVALID_NODE_INDEX",
                        format!("node {index} lists invalid child {child}"),
                    );
                    continue;
                };
                if self.graph.node_map.contains_key(&child_index) {
                    self.issues.warn(
                        IssueKind::Topology,
                        "NODE_CYCLE",
                        format!("node {index} lists already traversed child {child_index}"),
                    );
                    continue;
                }
                children.push(child_index);
            }
            stack.extend(children.into_iter().rev().map(|child| (child, Some(index))));
        }

        Ok(root_slot.unwrap_or_default())
    }

    fn build_node(&mut self, index: usize, source: &Value) -> Node {
        let display_name = str_field(source, "name")
            .map(ToOwned::to_owned)
            .unwrap_or_else(|| format!("Node{index}"));
        let mut node = Node::new(format!("n{index}"), display_name);
        let context = format!("node {index}");

        self.read_transform(source, &mut node, &context);

        node.camera = optional_index(self.issues, source, "camera", "camera", self.counts.cameras, &context);
        node.light = extension(source, "KHR_lights_punctual").and_then(|light| {
            optional_index(self.issues, light, "light", "light", self.counts.lights, &context)
        });

        if let Some(mesh) =
            optional_index(self.issues, source, "mesh", "mesh", self.mesh_parts.len(), &context)
        {
            self.graph.mesh_use_count[mesh] += 1;
            let skin = optional_index(self.issues, source, "skin", "skin", self.counts.skins, &context);
            match skin {
                Some(skin) => self.graph.skinned.push(SkinnedInstance {
                    source_node: index,
                    mesh,
                    skin,
                }),
                None => node.static_meshes = self.mesh_parts[mesh].clone(),
            }
        }

        if let Some(payload) = extension(source, self.neural_extension).and_then(Value::as_object) {
            let slot = self.graph.nodes.len();
            node.neural_primitive = Some(self.graph.neural_primitives.len());
            self.graph.neural_primitives.push(NeuralPrimitive {
                node: slot,
                sigma_threshold: payload
                    .get("sigma_threshold")
                    .and_then(Value::as_f64)
                    .map(|value| value as f32),
                hash_grid_resolution: payload
                    .get("hash_grid_res")
                    .and_then(Value::as_array)
                    .map(|values| {
                        values
                            .iter()
                            .filter_map(Value::as_u64)
                            .map(|value| value as u32)
                            .collect()
                    })
                    .unwrap_or_default(),
                payload: payload.clone(),
            });
        }

        node
    }

    fn read_transform(&mut self, source: &Value, node: &mut Node, context: &str) {
        if let Some(values) = self.vector_field(source, "translation", 3, context) {
            node.translation = Vector3::new(values[0], values[1], values[2]);
            node.has_transform = true;
        }
        if let Some(values) = self.vector_field(source, "rotation", 4, context) {
            let quaternion = Quaternion::new(values[3], values[0], values[1], values[2]);
            if quaternion.norm() < 1e-6 {
                self.issues.warn(
                    IssueKind::Shape,
                    "DEGENERATE_ROTATION",
                    format!("{context}: rotation quaternion has zero length, using identity"),
                );
            } else {
                node.rotation = UnitQuaternion::from_quaternion(quaternion);
            }
            node.has_transform = true;
        }
        if let Some(values) = self.vector_field(source, "scale", 3, context) {
            node.scale = Vector3::new(values[0], values[1], values[2]);
            node.has_transform = true;
        }
        if let Some(values) = self.vector_field(source, "matrix", 16, context) {
            node.matrix = Some(Matrix4::from_column_slice(&values));
            node.has_transform = true;
        }
    }

    fn vector_field(&mut self, source: &Value, key: &str, arity: usize, context: &str) -> Option<Vec<f32>> {
        source.get(key)?;
        match f32_array(source, key) {
            Some(values) if values.len() == arity => Some(values),
            _ => {
                self.issues.warn(
                    IssueKind::Shape,
                    "TRANSFORM_ARITY",
                    format!("{context}: {key} must hold {arity} numbers, ignoring it"),
                );
                None
            }
        }
    }
}

// ─── Skin binding ─────────────────────────────────────────────────────────────

/// Second phase: anchor each skeleton and record the mesh parts it deforms.
///
/// The anchor is the parent of the skin's declared skeleton node, else the
/// parent of the skinned node, else the skinned node itself.
pub(super) fn bind_skinned_meshes(
    json: &Value,
    graph: &mut NodeGraph,
    mesh_parts: &[Vec<usize>],
    skeletons: &mut [Skeleton],
    issues: &mut Issues,
) {
    debug!("binding {} skinned mesh instances", graph.skinned.len());
    let skins = json_array(json, "skins");
    for instance in graph.skinned.clone() {
        let Some(skeleton) = skeletons.get_mut(instance.skin) else {
            continue;
        };

        let declared_root = skins
            .get(instance.skin)
            .and_then(|skin| skin.get("skeleton"))
            .and_then(as_index);
        let anchor_source = match declared_root {
            Some(root) => graph.parent_map.get(&root).copied(),
            None => graph.parent_map.get(&instance.source_node).copied(),
        }
        .unwrap_or(instance.source_node);

        let Some(anchor) = graph.node_map.get(&anchor_source).copied() else {
            issues.warn(
                IssueKind::Reference,
                "SKIN_ANCHOR_MISSING",
                format!("skin {} anchor node {anchor_source} was never traversed", instance.skin),
            );
            continue;
        };

        skeleton.parent = Some(anchor);
        let node = &mut graph.nodes[anchor];
        if !node.skeletons.contains(&instance.skin) {
            node.skeletons.push(instance.skin);
        }
        for &part in &mesh_parts[instance.mesh] {
            if !skeleton.mesh_skinning_targets.contains(&part) {
                skeleton.mesh_skinning_targets.push(part);
            }
            if !node.skinned_meshes.contains(&part) {
                node.skinned_meshes.push(part);
            }
        }
    }
}

// ─── Instancing ───────────────────────────────────────────────────────────────

/// Mark parts of meshes referenced more than once as instanceable and warn
/// about meshes no node references.
pub(super) fn check_mesh_instancing(
    mesh_use_count: &[usize],
    mesh_parts: &[Vec<usize>],
    meshes: &mut [Mesh],
    issues: &mut Issues,
) {
    for (mesh_index, (&uses, parts)) in mesh_use_count.iter().zip(mesh_parts).enumerate() {
        if uses == 0 {
            issues.warn(
                IssueKind::Reference,
                "UNUSED_MESH",
                format!("mesh {mesh_index} is not referenced by any node"),
            );
        }
        if uses > 1 {
            for &part in parts {
                meshes[part].instanceable = true;
            }
        }
    }
}
