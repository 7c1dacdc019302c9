//! Shared types, error model, and configuration for nbpub.
//!
//! This crate is the foundation depended on by all other nbpub crates.
//! It provides:
//! - [`NbPubError`]: the unified error type
//! - Domain types ([`UpdateReport`], [`FetchManifest`], [`Notebook`])
//! - Configuration ([`AppConfig`], [`BuildConfig`], config loading)

pub mod config;
pub mod error;
pub mod notebook;
pub mod types;

// Re-export public API at crate root for ergonomic imports.
pub use config::{
    AppConfig, BuildConfig, CONFIG_FILE_NAME, ExecutionConfig, PackagingConfig, PathsConfig,
    SourcesConfig, config_file_path, init_config, load_config, load_config_from,
};
pub use error::{NbPubError, Result};
pub use notebook::{CellType, NewCell, Notebook};
pub use types::{
    CURRENT_SCHEMA_VERSION, FETCH_MANIFEST_NAME, FetchManifest, UpdateReport, is_notebook_path,
};
