use std::f32::consts::FRAC_PI_4;

use nalgebra::Vector3;
use serde_json::Value;

use super::gltf_utils::{extension, f32_array_or, f32_field, json_array, str_field};
use super::scene::{Camera, Light, LightKind, Projection};
use super::types::{IssueKind, Issues};

// ─── Cameras ──────────────────────────────────────────────────────────────────

pub(super) fn import_cameras(json: &Value, issues: &mut Issues) -> Vec<Camera> {
    json_array(json, "cameras")
        .iter()
        .enumerate()
        .map(|(index, camera)| {
            let name = str_field(camera, "name")
                .map(ToOwned::to_owned)
                .unwrap_or_else(|| format!("Camera{index}"));
            let projection = match (str_field(camera, "type"), camera.get("perspective"), camera.get("orthographic")) {
                (Some("perspective"), Some(p), _) => Projection::Perspective {
                    yfov: f32_field(p, "yfov", FRAC_PI_4),
                    aspect_ratio: optional_f32(p, "aspectRatio"),
                    znear: f32_field(p, "znear", 0.01),
                    zfar: optional_f32(p, "zfar"),
                },
                (Some("orthographic"), _, Some(o)) => Projection::Orthographic {
                    xmag: f32_field(o, "xmag", 1.0),
                    ymag: f32_field(o, "ymag", 1.0),
                    znear: f32_field(o, "znear", 0.0),
                    zfar: f32_field(o, "zfar", 100.0),
                },
                (kind, ..) => {
                    issues.warn(
                        IssueKind::Shape,
                        "CAMERA_PROJECTION",
                        format!("camera {index}: no usable projection for type {kind:?}, using a default perspective"),
                    );
                    Projection::Perspective {
                        yfov: FRAC_PI_4,
                        aspect_ratio: None,
                        znear: 0.01,
                        zfar: None,
                    }
                }
            };
            Camera { name, projection }
        })
        .collect()
}

fn optional_f32(object: &Value, key: &str) -> Option<f32> {
    object.get(key).and_then(Value::as_f64).map(|value| value as f32)
}

// ─── Lights ───────────────────────────────────────────────────────────────────

/// Punctual lights declared at document level by `KHR_lights_punctual`.
pub(super) fn import_lights(json: &Value, issues: &mut Issues) -> Vec<Light> {
    let lights = extension(json, "KHR_lights_punctual")
        .map(|ext| json_array(ext, "lights"))
        .unwrap_or_default();

    lights
        .iter()
        .enumerate()
        .map(|(index, light)| {
            let kind = match str_field(light, "type") {
                Some("directional") => LightKind::Directional,
                Some("spot") => {
                    let spot = light.get("spot").unwrap_or(&Value::Null);
                    LightKind::Spot {
                        inner_cone_angle: f32_field(spot, "innerConeAngle", 0.0),
                        outer_cone_angle: f32_field(spot, "outerConeAngle", FRAC_PI_4),
                    }
                }
                Some("point") => LightKind::Point,
                other => {
                    issues.warn(
                        IssueKind::Unsupported,
                        "UNKNOWN_LIGHT_TYPE",
                        format!("light {index}: type {other:?} imported as a point light"),
                    );
                    LightKind::Point
                }
            };
            Light {
                name: str_field(light, "name")
                    .map(ToOwned::to_owned)
                    .unwrap_or_else(|| format!("Light{index}")),
                kind,
                color: Vector3::from(f32_array_or(light, "color", [1.0; 3])),
                intensity: f32_field(light, "intensity", 1.0),
                range: optional_f32(light, "range"),
            }
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use serde_json::json;

    use super::*;

    #[test]
    fn given_both_projection_kinds_when_importing_then_fields_are_read() {
        let json = json!({
            "cameras": [
                { "type": "perspective", "perspective": { "yfov": 0.5, "znear": 0.1, "aspectRatio": 1.5 } },
                { "name": "top", "type": "orthographic", "orthographic": { "xmag": 2.0, "ymag": 3.0, "znear": 0.5, "zfar": 50.0 } }
            ]
        });
        let mut issues = Issues::default();

        let cameras = import_cameras(&json, &mut issues);

        assert_eq!(cameras[0].name, "Camera0");
        assert_eq!(
            cameras[0].projection,
            Projection::Perspective { yfov: 0.5, aspect_ratio: Some(1.5), znear: 0.1, zfar: None }
        );
        assert_eq!(
            cameras[1].projection,
            Projection::Orthographic { xmag: 2.0, ymag: 3.0, znear: 0.5, zfar: 50.0 }
        );
        assert!(issues.is_empty());
    }

    #[test]
    fn given_camera_without_projection_block_when_importing_then_default_is_used_with_warning() {
        let json = json!({ "cameras": [ { "type": "orthographic" } ] });
        let mut issues = Issues::default();

        let cameras = import_cameras(&json, &mut issues);

        assert!(matches!(cameras[0].projection, Projection::Perspective { .. }));
        assert!(issues.contains_code("CAMERA_PROJECTION"));
    }

    #[test]
    fn given_punctual_lights_when_importing_then_defaults_fill_missing_fields() {
        let json = json!({
            "extensions": {
                "KHR_lights_punctual": {
                    "lights": [
                        { "type": "spot", "spot": { "innerConeAngle": 0.2 }, "range": 10.0 },
                        { "type": "directional", "color": [1.0, 0.5, 0.0], "intensity": 3.0 },
                        { "type": "area" }
                    ]
                }
            }
        });
        let mut issues = Issues::default();

        let lights = import_lights(&json, &mut issues);

        assert_eq!(
            lights[0].kind,
            LightKind::Spot { inner_cone_angle: 0.2, outer_cone_angle: FRAC_PI_4 }
        );
        assert_eq!(lights[0].range, Some(10.0));
        assert_eq!(lights[0].color, Vector3::repeat(1.0));
        assert_eq!(lights[1].intensity, 3.0);
        assert_eq!(lights[2].kind, LightKind::Point);
        assert!(issues.contains_code("UNKNOWN_LIGHT_TYPE"));
    }
}
