use log::{error, info, warn};
use serde::{Deserialize, Serialize};

// ─── Extension tables ─────────────────────────────────────────────────────────

/// Extensions the importer translates. The configured neural-primitive
/// extension is accepted in addition to these.
pub(super) const SUPPORTED_EXTENSIONS: [&str; 20] = [
    "KHR_lights_punctual",
    "KHR_materials_clearcoat",
    "KHR_materials_diffuse_transmission",
    "KHR_materials_emissive_strength",
    "KHR_materials_ior",
    "KHR_materials_pbrSpecularGlossiness",
    "KHR_materials_sheen",
    "KHR_materials_specular",
    "KHR_materials_sss",
    "KHR_materials_subsurface",
    "KHR_materials_transmission",
    "KHR_materials_unlit",
    "KHR_materials_volume",
    "KHR_materials_volume_scatter",
    "KHR_mesh_quantization",
    "KHR_texture_transform",
    "EXT_materials_clearcoat_color",
    "EXT_texture_webp",
    "ADOBE_materials_clearcoat_specular",
    "ADOBE_materials_clearcoat_tint",
];

// ─── Issue reporting ──────────────────────────────────────────────────────────

/// Severity level attached to an import issue.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
pub enum Severity {
    Error,
    Warning,
    Info,
}

/// Category of a recovered failure.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
pub enum IssueKind {
    /// An index into a source array was out of range.
    Reference,
    /// An accessor had the wrong element type, arity or count.
    Shape,
    /// A cycle or repeated visit in the node graph.
    Topology,
    /// A feature or extension is not translated.
    Unsupported,
}

/// A single non-fatal problem found while importing.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ImportIssue {
    pub severity: Severity,
    pub kind: IssueKind,
    pub code: String,
    pub message: String,
}

/// Ordered collector of import issues. Every recorded issue is mirrored to
/// the `log` facade at the matching level.
#[derive(Debug, Default)]
pub struct Issues {
    entries: Vec<ImportIssue>,
}

impl Issues {
    pub fn push(&mut self, severity: Severity, kind: IssueKind, code: &str, message: String) {
        match severity {
            Severity::Error => error!("[{code}] {message}"),
            Severity::Warning => warn!("[{code}] {message}"),
            Severity::Info => info!("[{code}] {message}"),
        }
        self.entries.push(ImportIssue {
            severity,
            kind,
            code: code.to_string(),
            message,
        });
    }

    pub fn warn(&mut self, kind: IssueKind, code: &str, message: impl Into<String>) {
        self.push(Severity::Warning, kind, code, message.into());
    }

    pub fn error(&mut self, kind: IssueKind, code: &str, message: impl Into<String>) {
        self.push(Severity::Error, kind, code, message.into());
    }

    pub fn extend(&mut self, issues: impl IntoIterator<Item = ImportIssue>) {
        self.entries.extend(issues);
    }

    pub fn contains_code(&self, code: &str) -> bool {
        self.entries.iter().any(|issue| issue.code == code)
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn as_slice(&self) -> &[ImportIssue] {
        &self.entries
    }

    pub fn into_vec(self) -> Vec<ImportIssue> {
        self.entries
    }
}
