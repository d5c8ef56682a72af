use std::{
    collections::HashMap,
    fs,
    path::{Path, PathBuf},
};

use anyhow::{Context, Result, anyhow, bail};
use base64::{Engine as _, engine::general_purpose::STANDARD};
use gltf::binary::Glb;
use serde_json::Value;

use crate::error::ImportError;
use crate::import::{ImportIssue, IssueKind, Severity};

// ─── Resolvers ────────────────────────────────────────────────────────────────

/// Fetches the bytes behind a URI referenced by the document.
pub trait AssetResolver {
    fn resolve(&self, uri: &str) -> Result<Vec<u8>>;
}

/// Resolves relative paths against a directory and decodes base64 data URIs.
#[derive(Debug, Clone)]
pub struct FileResolver {
    base_dir: PathBuf,
}

impl FileResolver {
    pub fn new(base_dir: impl Into<PathBuf>) -> Self {
        Self {
            base_dir: base_dir.into(),
        }
    }
}

impl AssetResolver for FileResolver {
    fn resolve(&self, uri: &str) -> Result<Vec<u8>> {
        if let Some(data) = uri.strip_prefix("data:") {
            return decode_data_uri(data);
        }
        let path = self.base_dir.join(percent_decode(uri));
        fs::read(&path).with_context(|| format!("failed to read asset: {}", path.display()))
    }
}

/// In-memory resolver keyed by URI.
#[derive(Debug, Clone, Default)]
pub struct MemoryResolver {
    pub assets: HashMap<String, Vec<u8>>,
}

impl AssetResolver for MemoryResolver {
    fn resolve(&self, uri: &str) -> Result<Vec<u8>> {
        if let Some(data) = uri.strip_prefix("data:") {
            return decode_data_uri(data);
        }
        self.assets
            .get(uri)
            .cloned()
            .ok_or_else(|| anyhow!("asset not found: {uri}"))
    }
}

fn decode_data_uri(data: &str) -> Result<Vec<u8>> {
    let Some((header, payload)) = data.split_once(',') else {
        bail!("malformed data URI");
    };
    if !header.ends_with(";base64") {
        bail!("only base64 data URIs are supported");
    }
    STANDARD
        .decode(payload)
        .context("failed to decode base64 data URI")
}

fn percent_decode(uri: &str) -> String {
    let bytes = uri.as_bytes();
    let mut decoded = Vec::with_capacity(bytes.len());
    let mut index = 0;
    while index < bytes.len() {
        if bytes[index] == b'%'
            && let Some(hex) = uri.get(index + 1..index + 3)
            && let Ok(value) = u8::from_str_radix(hex, 16)
        {
            decoded.push(value);
            index += 3;
            continue;
        }
        decoded.push(bytes[index]);
        index += 1;
    }
    String::from_utf8_lossy(&decoded).into_owned()
}

// ─── Source document ──────────────────────────────────────────────────────────

/// A parsed glTF document with its binary buffers loaded.
#[derive(Debug, Clone)]
pub struct SourceDocument {
    pub json: Value,
    pub buffers: Vec<Vec<u8>>,
    pub file_name: Option<String>,
    /// Problems met while loading buffers.
    pub load_issues: Vec<ImportIssue>,
}

impl SourceDocument {
    /// Wrap an already parsed document and its buffers.
    pub fn from_parts(json: Value, buffers: Vec<Vec<u8>>) -> Self {
        Self {
            json,
            buffers,
            file_name: None,
            load_issues: Vec::new(),
        }
    }

    /// Parse a `.glb` container or a `.gltf` JSON document and load its buffers.
    pub fn from_slice(bytes: &[u8], resolver: &dyn AssetResolver) -> Result<Self> {
        let (json, blob) = if bytes.starts_with(b"glTF") {
            let glb = Glb::from_slice(bytes)
                .map_err(|err| ImportError::Source(err.to_string()))
                .context("input is not a valid GLB container")?;
            let json: Value = serde_json::from_slice(glb.json.as_ref())
                .map_err(|err| ImportError::Source(err.to_string()))
                .context("failed to parse glTF JSON chunk")?;
            (json, glb.bin.map(|chunk| chunk.into_owned()))
        } else {
            let json: Value = serde_json::from_slice(bytes)
                .map_err(|err| ImportError::Source(err.to_string()))
                .context("failed to parse glTF JSON")?;
            (json, None)
        };

        let mut document = Self::from_parts(json, Vec::new());
        document.load_buffers(blob, resolver);
        Ok(document)
    }

    /// Read a document from disk, resolving external assets next to it.
    pub fn from_path(path: &Path) -> Result<Self> {
        let bytes = fs::read(path)
            .with_context(|| format!("failed to read input file: {}", path.display()))?;
        let base_dir = path.parent().map(Path::to_path_buf).unwrap_or_default();
        let mut document = Self::from_slice(&bytes, &FileResolver::new(base_dir))?;
        document.file_name = path
            .file_name()
            .map(|name| name.to_string_lossy().into_owned());
        Ok(document)
    }

    fn load_buffers(&mut self, mut blob: Option<Vec<u8>>, resolver: &dyn AssetResolver) {
        let buffers = self
            .json
            .get("buffers")
            .and_then(Value::as_array)
            .cloned()
            .unwrap_or_default();

        for (index, buffer) in buffers.iter().enumerate() {
            let declared = buffer
                .get("byteLength")
                .and_then(Value::as_u64)
                .unwrap_or(0) as usize;

            let loaded = match buffer.get("uri").and_then(Value::as_str) {
                Some(uri) => resolver
                    .resolve(uri)
                    .with_context(|| format!("buffer {index} could not be resolved")),
                None if index == 0 => blob
                    .take()
                    .ok_or_else(|| anyhow!("buffer 0 has no uri and the file has no BIN chunk")),
                None => Err(anyhow!("buffer {index} has no uri")),
            };

            let bytes = match loaded {
                Ok(bytes) => bytes,
                Err(err) => {
                    self.record(IssueKind::Reference, "BUFFER_UNRESOLVED", format!("{err:#}"));
                    Vec::new()
                }
            };
            if !bytes.is_empty() && bytes.len() < declared {
                self.record(
                    IssueKind::Shape,
                    "BUFFER_TOO_SHORT",
                    format!(
                        "buffer {index} holds {} bytes but declares {declared}",
                        bytes.len()
                    ),
                );
            }
            self.buffers.push(bytes);
        }
    }

    fn record(&mut self, kind: IssueKind, code: &str, message: String) {
        log::error!("[{code}] {message}");
        self.load_issues.push(ImportIssue {
            severity: Severity::Error,
            kind,
            code: code.to_string(),
            message,
        });
    }

    /// URIs of external buffers and images.
    pub fn external_uris(&self) -> Vec<String> {
        ["buffers", "images"]
            .iter()
            .filter_map(|key| self.json.get(*key).and_then(Value::as_array))
            .flatten()
            .filter_map(|entry| entry.get("uri").and_then(Value::as_str))
            .filter(|uri| !uri.starts_with("data:"))
            .map(ToOwned::to_owned)
            .collect()
    }
}
