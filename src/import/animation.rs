use std::collections::HashSet;

use log::debug;
use nalgebra::{Quaternion, UnitQuaternion, Vector3};
use serde_json::Value;

use super::gltf_utils::{chunk_vec3, chunk_vec4, json_array, read_accessor_f32, str_field};
use super::nodes::NodeGraph;
use super::scene::{
    AnimationTrack, Interpolation, Node, NodeAnimation, Skeleton, SkeletonAnimation, TimeSamples,
};
use super::types::{IssueKind, Issues};
use super::validation::{check_accessor, check_index, report};
use crate::source::SourceDocument;

// ─── Interpolation ────────────────────────────────────────────────────────────

/// Value types a raw curve can be resampled over.
pub trait Interpolate: Copy {
    fn interpolate(&self, other: &Self, t: f32) -> Self;
}

impl Interpolate for Vector3<f32> {
    fn interpolate(&self, other: &Self, t: f32) -> Self {
        self.lerp(other, t)
    }
}

impl Interpolate for UnitQuaternion<f32> {
    fn interpolate(&self, other: &Self, t: f32) -> Self {
        // Shortest arc: q and -q encode the same rotation.
        let other = if self.coords.dot(&other.coords) < 0.0 {
            UnitQuaternion::new_unchecked(-other.into_inner())
        } else {
            *other
        };
        self.try_slerp(&other, t, 1e-6)
            .unwrap_or_else(|| self.nlerp(&other, t))
    }
}

/// Sample a raw curve at `time`, holding the boundary keys outside its range.
pub fn sample_curve<T: Interpolate>(curve: &TimeSamples<T>, time: f32) -> Option<T> {
    let times = &curve.times;
    let values = &curve.values;
    let count = times.len().min(values.len());
    if count == 0 {
        return None;
    }
    if count == 1 || time <= times[0] {
        return Some(values[0]);
    }
    if time >= times[count - 1] {
        return Some(values[count - 1]);
    }

    // Clamped so unordered or non-finite keys cannot index past either end.
    let upper = times[..count]
        .partition_point(|key| *key <= time)
        .clamp(1, count - 1);
    let lower = upper - 1;
    if curve.interpolation == Interpolation::Step {
        return Some(values[lower]);
    }
    let span = times[upper] - times[lower];
    let t = if span > 0.0 {
        (time - times[lower]) / span
    } else {
        0.0
    };
    Some(values[lower].interpolate(&values[upper], t))
}

/// Resample onto `axis`, or broadcast `rest` when the curve has fewer than
/// two keys.
pub fn resample_curve<T: Interpolate>(curve: Option<&TimeSamples<T>>, axis: &[f32], rest: T) -> Vec<T> {
    match curve {
        Some(curve) if curve.times.len().min(curve.values.len()) >= 2 => axis
            .iter()
            .map(|time| sample_curve(curve, *time).unwrap_or(rest))
            .collect(),
        _ => vec![rest; axis.len()],
    }
}

/// Ascending, duplicate-free union of several time arrays.
pub fn merge_time_axes<'a>(sources: impl IntoIterator<Item = &'a [f32]>) -> Vec<f32> {
    let mut merged: Vec<f32> = sources
        .into_iter()
        .flatten()
        .copied()
        .filter(|time| time.is_finite())
        .collect();
    merged.sort_by(f32::total_cmp);
    merged.dedup();
    merged
}

// ─── Tracks ───────────────────────────────────────────────────────────────────

pub(super) fn import_animation_tracks(json: &Value) -> Vec<AnimationTrack> {
    json_array(json, "animations")
        .iter()
        .enumerate()
        .map(|(index, animation)| {
            let display_name = str_field(animation, "name")
                .map(ToOwned::to_owned)
                .unwrap_or_else(|| format!("Animation{index}"));
            AnimationTrack {
                name: format!("anim{index}"),
                display_name,
                ..AnimationTrack::default()
            }
        })
        .collect()
}

// ─── Node animation ───────────────────────────────────────────────────────────

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum TargetPath {
    Translation,
    Rotation,
    Scale,
}

/// Attach raw per-node curves for every channel of every animation.
pub(super) fn import_node_animations(
    document: &SourceDocument,
    graph: &mut NodeGraph,
    tracks: &mut [AnimationTrack],
    issues: &mut Issues,
) {
    debug!("importing node animations for {} tracks", tracks.len());
    let json = &document.json;
    let node_count = json_array(json, "nodes").len();

    for (track_index, animation) in json_array(json, "animations").iter().enumerate() {
        let samplers = json_array(animation, "samplers");
        for (channel_index, channel) in json_array(animation, "channels").iter().enumerate() {
            let context = format!("animation {track_index} channel {channel_index}");
            let target = channel.get("target").unwrap_or(&Value::Null);

            let path = match str_field(target, "path") {
                Some("translation") => TargetPath::Translation,
                Some("rotation") => TargetPath::Rotation,
                Some("scale") => TargetPath::Scale,
                Some("weights") => {
                    issues.warn(
                        IssueKind::Unsupported,
                        "UNSUPPORTED_ANIMATION_PATH",
                        format!("{context}: morph target weights are not animated"),
                    );
                    continue;
                }
                other => {
                    issues.warn(
                        IssueKind::Unsupported,
                        "UNSUPPORTED_ANIMATION_PATH",
                        format!("{context}: unknown target path {other:?}"),
                    );
                    continue;
                }
            };

            let Some(node_index) = target
                .get("node")
                .and_then(|value| report(issues, check_index("node", value, node_count), &context))
            else {
                continue;
            };
            let Some(slot) = graph.node_map.get(&node_index).copied() else {
                issues.warn(
                    IssueKind::Reference,
                    "ANIMATED_NODE_OUTSIDE_SCENE",
                    format!("{context}: node {node_index} is not part of any scene"),
                );
                continue;
            };
            let Some(sampler) = channel
                .get("sampler")
                .and_then(|value| report(issues, check_index("animation sampler", value, samplers.len()), &context))
                .map(|index| &samplers[index])
            else {
                continue;
            };

            let Some(curve) = read_sampler(document, sampler, path, issues, &context) else {
                continue;
            };
            tracks[track_index].include_times(curve.times());

            let node = &mut graph.nodes[slot];
            if node.animations.len() < tracks.len() {
                node.animations.resize(tracks.len(), None);
            }
            let animation = node.animations[track_index].get_or_insert_with(NodeAnimation::default);
            let replaced = match curve {
                Curve::Vector(samples) if path == TargetPath::Translation => {
                    animation.translations.replace(samples).is_some()
                }
                Curve::Vector(samples) => animation.scales.replace(samples).is_some(),
                Curve::Rotation(samples) => animation.rotations.replace(samples).is_some(),
            };
            if replaced {
                issues.warn(
                    IssueKind::Shape,
                    "DUPLICATE_CHANNEL",
                    format!("{context}: node {node_index} already has a {path:?} curve, keeping the last"),
                );
            }
        }
    }
}

enum Curve {
    Vector(TimeSamples<Vector3<f32>>),
    Rotation(TimeSamples<UnitQuaternion<f32>>),
}

impl Curve {
    fn times(&self) -> &[f32] {
        match self {
            Curve::Vector(samples) => &samples.times,
            Curve::Rotation(samples) => &samples.times,
        }
    }
}

fn read_sampler(
    document: &SourceDocument,
    sampler: &Value,
    path: TargetPath,
    issues: &mut Issues,
    context: &str,
) -> Option<Curve> {
    let json = &document.json;
    let interpolation = match str_field(sampler, "interpolation") {
        Some("STEP") => Interpolation::Step,
        Some("CUBICSPLINE") => Interpolation::CubicSpline,
        _ => Interpolation::Linear,
    };
    let expected: &[&'static str] = if path == TargetPath::Rotation {
        &["VEC4"]
    } else {
        &["VEC3"]
    };

    let input = report(
        issues,
        check_accessor(json, sampler.get("input").unwrap_or(&Value::Null), &["SCALAR"]),
        &format!("{context} input"),
    )?;
    let output = report(
        issues,
        check_accessor(json, sampler.get("output").unwrap_or(&Value::Null), expected),
        &format!("{context} output"),
    )?;
    let (Some(times), Some(raw)) = (
        read_accessor_f32(document, &input),
        read_accessor_f32(document, &output),
    ) else {
        issues.warn(
            IssueKind::Shape,
            "ACCESSOR_OUT_OF_BOUNDS",
            format!("{context}: sampler data lies outside its buffer"),
        );
        return None;
    };

    // Cubic splines store in-tangent, value, out-tangent per key.
    let width = output.element_count;
    let raw: Vec<f32> = if interpolation == Interpolation::CubicSpline {
        raw.chunks_exact(width * 3)
            .flat_map(|triplet| triplet[width..width * 2].iter().copied())
            .collect()
    } else {
        raw
    };

    let key_count = raw.len() / width;
    let mut times = times;
    if key_count != times.len() {
        issues.warn(
            IssueKind::Shape,
            "TIME_VALUE_MISMATCH",
            format!("{context}: {} times for {key_count} values, truncating", times.len()),
        );
        times.truncate(key_count);
    }
    let raw = &raw[..times.len() * width];

    let finite: Vec<usize> = (0..times.len()).filter(|key| times[*key].is_finite()).collect();
    let (times, raw): (Vec<f32>, Vec<f32>) = if finite.len() == times.len() {
        (times, raw.to_vec())
    } else {
        issues.warn(
            IssueKind::Shape,
            "NON_FINITE_KEY_TIME",
            format!(
                "{context}: {} non-finite key times dropped with their values",
                times.len() - finite.len()
            ),
        );
        (
            finite.iter().map(|key| times[*key]).collect(),
            finite
                .iter()
                .flat_map(|key| raw[key * width..(key + 1) * width].iter().copied())
                .collect(),
        )
    };
    if times.is_empty() {
        issues.warn(
            IssueKind::Shape,
            "EMPTY_CURVE",
            format!("{context}: no usable keys, channel skipped"),
        );
        return None;
    }

    Some(match path {
        TargetPath::Rotation => {
            let mut degenerate = 0;
            let values = chunk_vec4(&raw)
                .into_iter()
                .map(|v| {
                    let quaternion = Quaternion::new(v.w, v.x, v.y, v.z);
                    if quaternion.norm() < 1e-6 {
                        degenerate += 1;
                        UnitQuaternion::identity()
                    } else {
                        UnitQuaternion::from_quaternion(quaternion)
                    }
                })
                .collect();
            if degenerate > 0 {
                issues.warn(
                    IssueKind::Shape,
                    "DEGENERATE_ROTATION",
                    format!("{context}: {degenerate} zero-length rotation keys replaced by identity"),
                );
            }
            Curve::Rotation(TimeSamples {
                times,
                values,
                interpolation,
            })
        }
        _ => Curve::Vector(TimeSamples {
            times,
            values: chunk_vec3(&raw),
            interpolation,
        }),
    })
}

// ─── Skeleton animation ───────────────────────────────────────────────────────

/// Resample every animated skeleton onto one shared time axis per track.
pub(super) fn import_skeleton_animations(
    graph: &NodeGraph,
    skeletons: &mut [Skeleton],
    tracks: &[AnimationTrack],
) {
    debug!("resampling skeleton animations");
    let animated: HashSet<usize> = graph
        .nodes
        .iter()
        .enumerate()
        .filter(|(_, node)| node.animations.iter().any(Option::is_some))
        .map(|(slot, _)| slot)
        .collect();

    for skeleton in skeletons.iter_mut() {
        let joints: Vec<(usize, &Node)> = skeleton
            .source_joints
            .iter()
            .enumerate()
            .filter_map(|(joint, source)| {
                let slot = graph.node_map.get(&(*source)?).copied()?;
                animated.contains(&slot).then(|| (joint, &graph.nodes[slot]))
            })
            .collect();
        if joints.is_empty() {
            continue;
        }

        skeleton.animated_joints = joints.iter().map(|(joint, _)| *joint).collect();
        skeleton.animations = (0..tracks.len())
            .map(|track| resample_track(&joints, track))
            .collect();
    }
}

fn resample_track(joints: &[(usize, &Node)], track: usize) -> SkeletonAnimation {
    let curves: Vec<(&Node, Option<&NodeAnimation>)> = joints
        .iter()
        .map(|(_, node)| (*node, node.animations.get(track).and_then(Option::as_ref)))
        .collect();

    let times = merge_time_axes(curves.iter().filter_map(|(_, animation)| *animation).flat_map(
        |animation| {
            [
                animation.translations.as_ref().map(|c| c.times.as_slice()),
                animation.rotations.as_ref().map(|c| c.times.as_slice()),
                animation.scales.as_ref().map(|c| c.times.as_slice()),
            ]
            .into_iter()
            .flatten()
        },
    ));
    if times.is_empty() {
        return SkeletonAnimation::default();
    }

    // Per joint curves on the shared axis, transposed to [time][joint].
    let per_joint: Vec<_> = curves
        .iter()
        .map(|(node, animation)| {
            (
                resample_curve(animation.and_then(|a| a.translations.as_ref()), &times, node.translation),
                resample_curve(animation.and_then(|a| a.rotations.as_ref()), &times, node.rotation),
                resample_curve(animation.and_then(|a| a.scales.as_ref()), &times, node.scale),
            )
        })
        .collect();

    SkeletonAnimation {
        translations: (0..times.len())
            .map(|t| per_joint.iter().map(|joint| joint.0[t]).collect())
            .collect(),
        rotations: (0..times.len())
            .map(|t| per_joint.iter().map(|joint| joint.1[t]).collect())
            .collect(),
        scales: (0..times.len())
            .map(|t| per_joint.iter().map(|joint| joint.2[t]).collect())
            .collect(),
        times,
    }
}

#[cfg(test)]
mod tests {
    use std::f32::consts::FRAC_PI_2;

    use serde_json::json;

    use super::super::gltf_utils::test_support::document_with;
    use super::super::nodes::{ReferenceCounts, build_node_graph};
    use super::super::skeleton::{build_joint_paths, import_skeletons};
    use super::*;

    fn linear(times: Vec<f32>, values: Vec<Vector3<f32>>) -> TimeSamples<Vector3<f32>> {
        TimeSamples {
            times,
            values,
            interpolation: Interpolation::Linear,
        }
    }

    #[test]
    fn given_overlapping_axes_when_merging_then_union_is_sorted_and_unique() {
        let first = [0.0, 0.5, 1.0];
        let second = [1.0, 0.25, 0.0, f32::NAN];

        let merged = merge_time_axes([&first[..], &second[..]]);

        assert_eq!(merged, vec![0.0, 0.25, 0.5, 1.0]);
    }

    #[test]
    fn given_time_outside_curve_when_sampling_then_boundary_is_held() {
        let curve = linear(
            vec![1.0, 2.0],
            vec![Vector3::new(0.0, 0.0, 0.0), Vector3::new(10.0, 0.0, 0.0)],
        );

        assert_eq!(sample_curve(&curve, 0.0).unwrap().x, 0.0);
        assert_eq!(sample_curve(&curve, 1.5).unwrap().x, 5.0);
        assert_eq!(sample_curve(&curve, 3.0).unwrap().x, 10.0);
    }

    #[test]
    fn given_step_curve_when_sampling_then_previous_key_is_held() {
        let mut curve = linear(
            vec![0.0, 1.0],
            vec![Vector3::new(1.0, 0.0, 0.0), Vector3::new(2.0, 0.0, 0.0)],
        );
        curve.interpolation = Interpolation::Step;

        assert_eq!(sample_curve(&curve, 0.9).unwrap().x, 1.0);
    }

    #[test]
    fn given_rotation_keys_when_sampling_midpoint_then_slerp_halves_angle() {
        let curve = TimeSamples {
            times: vec![0.0, 1.0],
            values: vec![
                UnitQuaternion::identity(),
                UnitQuaternion::from_axis_angle(&Vector3::z_axis(), FRAC_PI_2),
            ],
            interpolation: Interpolation::Linear,
        };

        let mid = sample_curve(&curve, 0.5).unwrap();

        assert!((mid.angle() - FRAC_PI_2 / 2.0).abs() < 1e-5);
    }

    #[test]
    fn given_single_key_curve_when_resampling_then_rest_is_broadcast() {
        let curve = linear(vec![0.5], vec![Vector3::new(9.0, 9.0, 9.0)]);
        let rest = Vector3::new(1.0, 2.0, 3.0);

        let samples = resample_curve(Some(&curve), &[0.0, 1.0, 2.0], rest);

        assert_eq!(samples, vec![rest; 3]);
    }

    #[test]
    fn given_non_finite_key_time_when_sampling_then_a_bracketing_key_is_returned() {
        let curve = linear(vec![f32::NAN, 1.0, 2.0], vec![Vector3::zeros(); 3]);

        assert_eq!(sample_curve(&curve, 0.5), Some(Vector3::zeros()));
        assert_eq!(sample_curve(&curve, f32::NAN), Some(Vector3::zeros()));
    }

    #[test]
    fn given_unordered_keys_when_sampling_then_indices_stay_in_range() {
        let curve = linear(
            vec![0.0, 5.0, 1.0, 2.0],
            vec![Vector3::zeros(), Vector3::repeat(5.0), Vector3::repeat(1.0), Vector3::repeat(2.0)],
        );

        assert!(sample_curve(&curve, 1.5).is_some());
    }

    fn animated_document() -> SourceDocument {
        document_with(
            json!({
                "scenes": [ { "nodes": [0] } ],
                "nodes": [
                    { "children": [1], "translation": [0.0, 1.0, 0.0] },
                    { "translation": [0.0, 2.0, 0.0] },
                    {}
                ],
                "skins": [ { "joints": [0, 1] } ],
                "accessors": [
                    { "bufferView": 0, "componentType": 5126, "count": 2, "type": "SCALAR" },
                    { "bufferView": 0, "byteOffset": 8, "componentType": 5126, "count": 2, "type": "VEC3" },
                    { "bufferView": 0, "byteOffset": 32, "componentType": 5126, "count": 2, "type": "SCALAR" },
                    { "bufferView": 0, "byteOffset": 40, "componentType": 5126, "count": 2, "type": "VEC4" }
                ],
                "animations": [
                    {
                        "name": "walk",
                        "samplers": [
                            { "input": 0, "output": 1 },
                            { "input": 2, "output": 3 },
                            { "input": 0, "output": 0 }
                        ],
                        "channels": [
                            { "sampler": 0, "target": { "node": 0, "path": "translation" } },
                            { "sampler": 1, "target": { "node": 1, "path": "rotation" } },
                            { "sampler": 0, "target": { "node": 1, "path": "weights" } },
                            { "sampler": 2, "target": { "node": 0, "path": "scale" } },
                            { "sampler": 7, "target": { "node": 0, "path": "scale" } },
                            { "sampler": 0, "target": { "node": 2, "path": "translation" } }
                        ]
                    }
                ]
            }),
            &[
                0.0, 1.0, // times A
                0.0, 0.0, 0.0, 4.0, 0.0, 0.0, // translations
                0.5, 2.0, // times B
                0.0, 0.0, 0.0, 1.0, 0.0, 0.0, 0.0, 1.0, // rotations
            ],
            &[],
        )
    }

    #[test]
    fn given_channels_when_importing_then_curves_attach_and_track_range_updates() {
        let document = animated_document();
        let mut issues = Issues::default();
        let counts = ReferenceCounts {
            skins: 1,
            ..ReferenceCounts::default()
        };
        let mut graph = build_node_graph(&document.json, &[], counts, "ADOBE_nerf", &mut issues).unwrap();
        let mut tracks = import_animation_tracks(&document.json);

        import_node_animations(&document, &mut graph, &mut tracks, &mut issues);

        assert_eq!(tracks[0].display_name, "walk");
        assert_eq!((tracks[0].min_time, tracks[0].max_time), (0.0, 2.0));
        let root = graph.nodes[0].animations[0].as_ref().unwrap();
        assert_eq!(root.translations.as_ref().unwrap().values[1].x, 4.0);
        assert!(root.scales.is_none());
        assert!(issues.contains_code("UNSUPPORTED_ANIMATION_PATH"));
        assert!(issues.contains_code("ACCESSOR_TYPE"));
        assert!(issues.contains_code("INVALID_ANIMATION_SAMPLER_INDEX"));
        assert!(issues.contains_code("ANIMATED_NODE_OUTSIDE_SCENE"));
    }

    #[test]
    fn given_joints_on_different_axes_when_resampling_then_union_drives_every_joint() {
        let document = animated_document();
        let mut issues = Issues::default();
        let counts = ReferenceCounts {
            skins: 1,
            ..ReferenceCounts::default()
        };
        let mut graph = build_node_graph(&document.json, &[], counts, "ADOBE_nerf", &mut issues).unwrap();
        let paths = build_joint_paths(&document.json);
        let mut skeletons = import_skeletons(&document, &mut graph, &paths, &mut issues);
        let mut tracks = import_animation_tracks(&document.json);
        import_node_animations(&document, &mut graph, &mut tracks, &mut issues);

        import_skeleton_animations(&graph, &mut skeletons, &tracks);

        let skeleton = &skeletons[0];
        assert_eq!(skeleton.animated_joints, vec![0, 1]);
        let animation = &skeleton.animations[0];
        assert_eq!(animation.times, vec![0.0, 0.5, 1.0, 2.0]);
        assert_eq!(animation.translations.len(), 4);
        assert!(animation.translations.iter().all(|pose| pose.len() == 2));
        assert_eq!(animation.translations[1][0].x, 2.0);
        assert_eq!(animation.translations[3][0].x, 4.0);
        assert_eq!(animation.translations[2][1], Vector3::new(0.0, 2.0, 0.0));
        assert_eq!(animation.rotations[0][1], UnitQuaternion::identity());
        assert_eq!(animation.scales[0][0], Vector3::new(1.0, 1.0, 1.0));
    }

    #[test]
    fn given_nan_key_time_in_buffer_when_importing_then_key_is_dropped_and_resampling_completes() {
        let document = document_with(
            json!({
                "scenes": [ { "nodes": [0] } ],
                "nodes": [ { "children": [1] }, {} ],
                "skins": [ { "joints": [0, 1] } ],
                "accessors": [
                    { "bufferView": 0, "componentType": 5126, "count": 3, "type": "SCALAR" },
                    { "bufferView": 0, "byteOffset": 12, "componentType": 5126, "count": 3, "type": "SCALAR" },
                    { "bufferView": 0, "byteOffset": 24, "componentType": 5126, "count": 3, "type": "VEC3" }
                ],
                "animations": [ {
                    "samplers": [ { "input": 0, "output": 2 }, { "input": 1, "output": 2 } ],
                    "channels": [
                        { "sampler": 0, "target": { "node": 0, "path": "translation" } },
                        { "sampler": 1, "target": { "node": 1, "path": "translation" } }
                    ]
                } ]
            }),
            &[
                0.0, 1.0, 2.0, // clean times
                f32::NAN, 1.0, 2.0, // times with a bad key
                0.0, 0.0, 0.0, 1.0, 0.0, 0.0, 2.0, 0.0, 0.0, // translations
            ],
            &[],
        );
        let mut issues = Issues::default();
        let counts = ReferenceCounts {
            skins: 1,
            ..ReferenceCounts::default()
        };
        let mut graph = build_node_graph(&document.json, &[], counts, "ADOBE_nerf", &mut issues).unwrap();
        let paths = build_joint_paths(&document.json);
        let mut skeletons = import_skeletons(&document, &mut graph, &paths, &mut issues);
        let mut tracks = import_animation_tracks(&document.json);

        import_node_animations(&document, &mut graph, &mut tracks, &mut issues);
        import_skeleton_animations(&graph, &mut skeletons, &tracks);

        assert!(issues.contains_code("NON_FINITE_KEY_TIME"));
        let child = graph.nodes[1].animations[0].as_ref().unwrap();
        let translations = child.translations.as_ref().unwrap();
        assert_eq!(translations.times, vec![1.0, 2.0]);
        assert_eq!(translations.values[0].x, 1.0);
        let animation = &skeletons[0].animations[0];
        assert_eq!(animation.times, vec![0.0, 1.0, 2.0]);
        assert_eq!(animation.translations[0][1].x, 1.0);
    }
}
