pub mod error;
pub mod import;
pub mod options;
pub mod source;
pub mod texture;

pub use error::ImportError;
pub use import::{ImportReport, Scene, import_gltf, write_import_summary};
pub use options::ImportOptions;
pub use source::{AssetResolver, FileResolver, MemoryResolver, SourceDocument};
