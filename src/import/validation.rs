use std::collections::{BTreeMap, BTreeSet};

use serde_json::Value;

use super::gltf_utils::{AccessorMeta, accessor_meta, as_index, json_array, str_field};
use super::scene::SceneMetadata;
use super::types::{IssueKind, Issues, SUPPORTED_EXTENSIONS};
use crate::error::{ImportError, ReferenceError};

// ─── Reference validation ─────────────────────────────────────────────────────

/// Check that a JSON reference is an index below `count`.
pub fn check_index(kind: &'static str, value: &Value, count: usize) -> Result<usize, ReferenceError> {
    let index = as_index(value).ok_or(ReferenceError::NotAnIndex { kind })?;
    if index >= count {
        return Err(ReferenceError::OutOfRange { kind, index, count });
    }
    Ok(index)
}

/// Check an accessor reference and its element type.
pub(super) fn check_accessor(
    json: &Value,
    value: &Value,
    expected: &[&'static str],
) -> Result<AccessorMeta, ReferenceError> {
    let index = check_index("accessor", value, json_array(json, "accessors").len())?;
    let actual = json_array(json, "accessors")[index]
        .get("type")
        .and_then(Value::as_str)
        .unwrap_or("<missing>");
    let meta = accessor_meta(json, index).ok_or_else(|| ReferenceError::AccessorType {
        index,
        expected: expected.first().copied().unwrap_or("SCALAR"),
        actual: actual.to_string(),
    })?;
    if !expected.contains(&meta.accessor_type) {
        return Err(ReferenceError::AccessorType {
            index,
            expected: expected.first().copied().unwrap_or("SCALAR"),
            actual: meta.accessor_type.to_string(),
        });
    }
    Ok(meta)
}

fn issue_code(error: &ReferenceError) -> String {
    match error {
        ReferenceError::OutOfRange { kind, .. } | ReferenceError::NotAnIndex { kind } => {
            format!("INVALID_{}_INDEX", kind.to_ascii_uppercase().replace(' ', "_"))
        }
        ReferenceError::AccessorType { .. } => "ACCESSOR_TYPE".to_string(),
    }
}

/// Record a failed reference and return `None`, or pass the value through.
pub(super) fn report<T>(
    issues: &mut Issues,
    result: Result<T, ReferenceError>,
    context: &str,
) -> Option<T> {
    match result {
        Ok(value) => Some(value),
        Err(err) => {
            let kind = match err {
                ReferenceError::AccessorType { .. } => IssueKind::Shape,
                _ => IssueKind::Reference,
            };
            issues.warn(kind, &issue_code(&err), format!("{context}: {err}"));
            None
        }
    }
}

/// Validate an optional index field; absent fields are not an error.
pub(super) fn optional_index(
    issues: &mut Issues,
    object: &Value,
    key: &str,
    kind: &'static str,
    count: usize,
    context: &str,
) -> Option<usize> {
    let value = object.get(key)?;
    report(issues, check_index(kind, value, count), context)
}

// ─── Document-level checks ────────────────────────────────────────────────────

/// Read asset metadata and reject documents older than glTF 2.0.
pub(super) fn import_metadata(
    json: &Value,
    file_name: Option<&str>,
    external_uris: Vec<String>,
) -> Result<SceneMetadata, ImportError> {
    let asset = json.get("asset").unwrap_or(&Value::Null);
    let version_text = str_field(asset, "version").unwrap_or_default();
    let version: f64 = version_text
        .trim()
        .parse()
        .map_err(|_| ImportError::InvalidVersion(version_text.to_string()))?;
    if version < 2.0 {
        return Err(ImportError::UnsupportedVersion(version_text.to_string()));
    }

    let extras = asset.get("extras").and_then(Value::as_object);
    let source_generator = str_field(asset, "generator").or_else(|| {
        extras
            .and_then(|extras| extras.get("generator"))
            .and_then(Value::as_str)
    });

    let mut generator = format!("gltfscene {}", env!("CARGO_PKG_VERSION"));
    if let Some(source_generator) = source_generator {
        generator.push_str("; glTF generator: ");
        generator.push_str(source_generator);
    }

    let extras: BTreeMap<String, String> = extras
        .map(|extras| {
            extras
                .iter()
                .filter_map(|(key, value)| Some((key.clone(), value.as_str()?.to_string())))
                .collect()
        })
        .unwrap_or_default();

    let mut filenames: Vec<String> = file_name.map(ToOwned::to_owned).into_iter().collect();
    filenames.extend(external_uris);

    Ok(SceneMetadata {
        generator,
        copyright: str_field(asset, "copyright").map(ToOwned::to_owned),
        extras,
        filenames,
    })
}

/// Warn once for every used or required extension that is not translated.
pub(super) fn check_extensions(json: &Value, neural_extension: &str, issues: &mut Issues) {
    let mut reported = BTreeSet::new();
    for (key, required) in [("extensionsRequired", true), ("extensionsUsed", false)] {
        for name in json_array(json, key).iter().filter_map(Value::as_str) {
            if SUPPORTED_EXTENSIONS.contains(&name) || name == neural_extension {
                continue;
            }
            if !reported.insert(name.to_string()) {
                continue;
            }
            let message = if required {
                format!("required extension {name} is not supported, content that depends on it is skipped")
            } else {
                format!("extension {name} is not supported and will be ignored")
            };
            issues.warn(IssueKind::Unsupported, "UNSUPPORTED_EXTENSION", message);
        }
    }
}
