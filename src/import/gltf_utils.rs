use nalgebra::{Matrix4, Quaternion, Translation3, UnitQuaternion, Vector2, Vector3, Vector4};
use serde_json::Value;

use crate::source::SourceDocument;

// ─── JSON helpers ─────────────────────────────────────────────────────────────

/// Top-level array of the document, empty when absent or malformed.
pub(super) fn json_array<'a>(json: &'a Value, key: &str) -> &'a [Value] {
    json.get(key)
        .and_then(Value::as_array)
        .map(Vec::as_slice)
        .unwrap_or(&[])
}

/// Interpret a JSON value as an array index.
pub(super) fn as_index(value: &Value) -> Option<usize> {
    value.as_u64().map(|index| index as usize)
}

pub(super) fn extension<'a>(object: &'a Value, name: &str) -> Option<&'a Value> {
    object.get("extensions")?.get(name)
}

pub(super) fn str_field<'a>(object: &'a Value, key: &str) -> Option<&'a str> {
    object.get(key).and_then(Value::as_str)
}

pub(super) fn f32_field(object: &Value, key: &str, default: f32) -> f32 {
    object
        .get(key)
        .and_then(Value::as_f64)
        .map(|value| value as f32)
        .unwrap_or(default)
}

/// Numeric array of any length, `None` when absent or non-numeric.
pub(super) fn f32_array(object: &Value, key: &str) -> Option<Vec<f32>> {
    object
        .get(key)?
        .as_array()?
        .iter()
        .map(|value| value.as_f64().map(|number| number as f32))
        .collect()
}

/// Numeric array of exactly `N` components, falling back to `default`.
pub(super) fn f32_array_or<const N: usize>(object: &Value, key: &str, default: [f32; N]) -> [f32; N] {
    f32_array(object, key)
        .and_then(|values| <[f32; N]>::try_from(values).ok())
        .unwrap_or(default)
}

/// Local transform of a raw node object, tolerating malformed fields.
pub(super) fn node_to_local_matrix(node: &Value) -> Matrix4<f32> {
    if let Some(matrix) = f32_array(node, "matrix").filter(|values| values.len() == 16) {
        return Matrix4::from_column_slice(&matrix);
    }

    let [tx, ty, tz] = f32_array_or(node, "translation", [0.0, 0.0, 0.0]);
    let [rx, ry, rz, rw] = f32_array_or(node, "rotation", [0.0, 0.0, 0.0, 1.0]);
    let [sx, sy, sz] = f32_array_or(node, "scale", [1.0, 1.0, 1.0]);

    let quaternion = Quaternion::new(rw, rx, ry, rz);
    let rotation = if quaternion.norm() < 1e-6 {
        UnitQuaternion::identity()
    } else {
        UnitQuaternion::from_quaternion(quaternion)
    };

    Translation3::new(tx, ty, tz).to_homogeneous()
        * rotation.to_homogeneous()
        * Matrix4::new_nonuniform_scaling(&Vector3::new(sx, sy, sz))
}

// ─── Accessor metadata ────────────────────────────────────────────────────────

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(super) enum ComponentType {
    I8,
    U8,
    I16,
    U16,
    U32,
    F32,
}

impl ComponentType {
    pub(super) fn from_code(code: u64) -> Option<Self> {
        match code {
            5120 => Some(Self::I8),
            5121 => Some(Self::U8),
            5122 => Some(Self::I16),
            5123 => Some(Self::U16),
            5125 => Some(Self::U32),
            5126 => Some(Self::F32),
            _ => None,
        }
    }

    pub(super) fn size(self) -> usize {
        match self {
            Self::I8 | Self::U8 => 1,
            Self::I16 | Self::U16 => 2,
            Self::U32 | Self::F32 => 4,
        }
    }

    pub(super) fn is_integer(self) -> bool {
        self != Self::F32
    }
}

#[derive(Debug, Clone, Copy)]
pub(super) struct AccessorMeta {
    /// `None` when the accessor has no buffer view and reads as zeros.
    pub(super) buffer: Option<usize>,
    pub(super) base_offset: usize,
    pub(super) stride: usize,
    pub(super) count: usize,
    pub(super) component_type: ComponentType,
    pub(super) accessor_type: &'static str,
    pub(super) element_count: usize,
    pub(super) normalized: bool,
    pub(super) sparse: bool,
}

pub(super) fn element_count_of(accessor_type: &str) -> Option<(&'static str, usize)> {
    match accessor_type {
        "SCALAR" => Some(("SCALAR", 1)),
        "VEC2" => Some(("VEC2", 2)),
        "VEC3" => Some(("VEC3", 3)),
        "VEC4" => Some(("VEC4", 4)),
        "MAT2" => Some(("MAT2", 4)),
        "MAT3" => Some(("MAT3", 9)),
        "MAT4" => Some(("MAT4", 16)),
        _ => None,
    }
}

pub(super) fn accessor_meta(json: &Value, accessor_index: usize) -> Option<AccessorMeta> {
    let accessor = json_array(json, "accessors").get(accessor_index)?;
    let (accessor_type, element_count) = element_count_of(str_field(accessor, "type")?)?;
    let component_type = ComponentType::from_code(accessor.get("componentType")?.as_u64()?)?;
    let count = accessor.get("count")?.as_u64()? as usize;
    let accessor_offset = accessor
        .get("byteOffset")
        .and_then(Value::as_u64)
        .unwrap_or(0) as usize;

    let mut meta = AccessorMeta {
        buffer: None,
        base_offset: 0,
        stride: element_count * component_type.size(),
        count,
        component_type,
        accessor_type,
        element_count,
        normalized: accessor
            .get("normalized")
            .and_then(Value::as_bool)
            .unwrap_or(false),
        sparse: accessor.get("sparse").is_some(),
    };

    let Some(buffer_view_index) = accessor.get("bufferView").and_then(as_index) else {
        return Some(meta);
    };
    let buffer_view = json_array(json, "bufferViews").get(buffer_view_index)?;
    let view_offset = buffer_view
        .get("byteOffset")
        .and_then(Value::as_u64)
        .unwrap_or(0) as usize;

    meta.buffer = Some(buffer_view.get("buffer").and_then(as_index)?);
    meta.base_offset = view_offset.saturating_add(accessor_offset);
    if let Some(stride) = buffer_view
        .get("byteStride")
        .and_then(Value::as_u64)
        .filter(|stride| *stride > 0)
    {
        meta.stride = stride as usize;
    }
    Some(meta)
}

// ─── Accessor I/O ─────────────────────────────────────────────────────────────

/// Upper bound on components synthesized for an accessor without a buffer view.
const MAX_ZERO_FILLED_COMPONENTS: usize = 1 << 26;

fn read_component(bytes: &[u8], offset: usize, component_type: ComponentType) -> Option<f64> {
    let slice = bytes.get(offset..offset + component_type.size())?;
    Some(match component_type {
        ComponentType::I8 => slice[0] as i8 as f64,
        ComponentType::U8 => slice[0] as f64,
        ComponentType::I16 => i16::from_le_bytes([slice[0], slice[1]]) as f64,
        ComponentType::U16 => u16::from_le_bytes([slice[0], slice[1]]) as f64,
        ComponentType::U32 => u32::from_le_bytes([slice[0], slice[1], slice[2], slice[3]]) as f64,
        ComponentType::F32 => f32::from_le_bytes([slice[0], slice[1], slice[2], slice[3]]) as f64,
    })
}

fn normalize_component(value: f64, component_type: ComponentType) -> f64 {
    match component_type {
        ComponentType::I8 => (value / 127.0).max(-1.0),
        ComponentType::U8 => value / 255.0,
        ComponentType::I16 => (value / 32767.0).max(-1.0),
        ComponentType::U16 => value / 65535.0,
        ComponentType::U32 => value / u32::MAX as f64,
        ComponentType::F32 => value,
    }
}

/// Read all components of an accessor in element order.
///
/// Returns `None` when any element falls outside its buffer or the byte span
/// overflows. Accessors without a buffer view read as zeros.
fn read_components(document: &SourceDocument, meta: &AccessorMeta) -> Option<Vec<f64>> {
    let total = meta.count.checked_mul(meta.element_count)?;
    let Some(buffer_index) = meta.buffer else {
        return (total <= MAX_ZERO_FILLED_COMPONENTS).then(|| vec![0.0; total]);
    };
    let bytes = document.buffers.get(buffer_index)?;

    let component_size = meta.component_type.size();
    if meta.count > 0 {
        let element_span =
            matrix_lane_offset(meta, meta.element_count - 1, component_size) + component_size;
        let end = (meta.count - 1)
            .checked_mul(meta.stride)?
            .checked_add(meta.base_offset)?
            .checked_add(element_span)?;
        if end > bytes.len() {
            return None;
        }
    }
    let mut values = Vec::with_capacity(total);
    for element in 0..meta.count {
        let element_offset = meta.base_offset + element * meta.stride;
        for lane in 0..meta.element_count {
            let offset = element_offset + matrix_lane_offset(meta, lane, component_size);
            values.push(read_component(bytes, offset, meta.component_type)?);
        }
    }
    Some(values)
}

/// Byte offset of a lane inside one element. Matrix columns of 1- and
/// 2-byte components are padded to 4-byte boundaries.
fn matrix_lane_offset(meta: &AccessorMeta, lane: usize, component_size: usize) -> usize {
    let rows = match (meta.accessor_type, component_size) {
        ("MAT2", 1) => 2,
        ("MAT3", 1) | ("MAT3", 2) => 3,
        _ => return lane * component_size,
    };
    let column_stride = (rows * component_size).next_multiple_of(4);
    (lane / rows) * column_stride + (lane % rows) * component_size
}

/// Read an accessor as floats, applying `normalized` integer decoding.
pub(super) fn read_accessor_f32(document: &SourceDocument, meta: &AccessorMeta) -> Option<Vec<f32>> {
    let normalize = meta.normalized && meta.component_type.is_integer();
    Some(
        read_components(document, meta)?
            .into_iter()
            .map(|value| {
                if normalize {
                    normalize_component(value, meta.component_type) as f32
                } else {
                    value as f32
                }
            })
            .collect(),
    )
}

/// Read an integer accessor as unsigned indices.
pub(super) fn read_accessor_u32(document: &SourceDocument, meta: &AccessorMeta) -> Option<Vec<u32>> {
    if !matches!(
        meta.component_type,
        ComponentType::U8 | ComponentType::U16 | ComponentType::U32
    ) {
        return None;
    }
    Some(
        read_components(document, meta)?
            .into_iter()
            .map(|value| value as u32)
            .collect(),
    )
}

pub(super) fn chunk_vec2(values: &[f32]) -> Vec<Vector2<f32>> {
    values
        .chunks_exact(2)
        .map(|chunk| Vector2::new(chunk[0], chunk[1]))
        .collect()
}

pub(super) fn chunk_vec3(values: &[f32]) -> Vec<Vector3<f32>> {
    values
        .chunks_exact(3)
        .map(|chunk| Vector3::new(chunk[0], chunk[1], chunk[2]))
        .collect()
}

pub(super) fn chunk_vec4(values: &[f32]) -> Vec<Vector4<f32>> {
    values
        .chunks_exact(4)
        .map(|chunk| Vector4::new(chunk[0], chunk[1], chunk[2], chunk[3]))
        .collect()
}

/// Column-major 4x4 matrices.
pub(super) fn chunk_mat4(values: &[f32]) -> Vec<Matrix4<f32>> {
    values
        .chunks_exact(16)
        .map(Matrix4::from_column_slice)
        .collect()
}

#[cfg(test)]
pub(super) mod test_support {
    use serde_json::{Value, json};

    use crate::source::SourceDocument;

    /// Document whose single buffer holds `floats` followed by `indices`,
    /// with one buffer view per section.
    pub(crate) fn document_with(json: Value, floats: &[f32], indices: &[u16]) -> SourceDocument {
        let mut bytes: Vec<u8> = floats.iter().flat_map(|value| value.to_le_bytes()).collect();
        let index_offset = bytes.len();
        bytes.extend(indices.iter().flat_map(|value| value.to_le_bytes()));

        let mut json = json;
        json["buffers"] = json!([{ "byteLength": bytes.len() }]);
        json["bufferViews"] = json!([
            { "buffer": 0, "byteOffset": 0, "byteLength": index_offset },
            { "buffer": 0, "byteOffset": index_offset, "byteLength": indices.len() * 2 }
        ]);
        SourceDocument::from_parts(json, vec![bytes])
    }
}
