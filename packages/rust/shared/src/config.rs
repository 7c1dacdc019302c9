//! Build configuration for nbpub.
//!
//! The optional config file lives at `<repo root>/nbpub.toml`. Every field has
//! a default, so a missing file or a partial file is fine. [`AppConfig`] is the
//! file schema; [`BuildConfig`] is the runtime view with every path resolved
//! against the repository root, built once and passed by reference.

use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

use crate::error::{NbPubError, Result};

/// Default configuration file name, looked up in the repository root.
pub const CONFIG_FILE_NAME: &str = "nbpub.toml";

// ---------------------------------------------------------------------------
// Config structs (matching nbpub.toml schema)
// ---------------------------------------------------------------------------

/// Top-level application config, deserialized from TOML.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct AppConfig {
    /// Filesystem layout, relative to the repository root.
    #[serde(default)]
    pub paths: PathsConfig,

    /// Where example notebooks are downloaded from.
    #[serde(default)]
    pub sources: SourcesConfig,

    /// Archive and Colab packaging rules.
    #[serde(default)]
    pub packaging: PackagingConfig,

    /// Notebook execution settings.
    #[serde(default)]
    pub execution: ExecutionConfig,
}

/// `[paths]` section.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PathsConfig {
    /// Download cache of unmodified notebooks.
    #[serde(default = "default_source_root")]
    pub source_root: String,

    /// Executed notebooks, ready for HTML rendering.
    #[serde(default = "default_executed_root")]
    pub executed_root: String,

    /// Notebooks and their required files for Colab.
    #[serde(default = "default_colab_root")]
    pub colab_root: String,

    /// Zip archives of notebooks and their required files.
    #[serde(default = "default_archive_root")]
    pub archive_root: String,

    /// Environment file for notebooks that don't package their own.
    #[serde(default = "default_environment")]
    pub default_environment: String,
}

impl Default for PathsConfig {
    fn default() -> Self {
        Self {
            source_root: default_source_root(),
            executed_root: default_executed_root(),
            colab_root: default_colab_root(),
            archive_root: default_archive_root(),
            default_environment: default_environment(),
        }
    }
}

fn default_source_root() -> String {
    "build/notebook-src".into()
}
fn default_executed_root() -> String {
    "source/notebooks".into()
}
fn default_colab_root() -> String {
    "source/_static/colab".into()
}
fn default_archive_root() -> String {
    "source/_static/examples".into()
}
fn default_environment() -> String {
    "devtools/conda-envs/examples_env.yml".into()
}

/// `[sources]` section.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SourcesConfig {
    /// GitHub repos to download example notebooks from, as `owner/name`.
    #[serde(default = "default_repos")]
    pub repos: Vec<String>,

    /// Directory inside each repo holding the examples.
    #[serde(default = "default_subdir")]
    pub subdir: String,

    /// Base URL of the GitHub REST API.
    #[serde(default = "default_api_base")]
    pub api_base: String,

    /// Name of the env var holding an optional API token (never store the token itself).
    #[serde(default = "default_token_env")]
    pub token_env: String,
}

impl Default for SourcesConfig {
    fn default() -> Self {
        Self {
            repos: default_repos(),
            subdir: default_subdir(),
            api_base: default_api_base(),
            token_env: default_token_env(),
        }
    }
}

fn default_repos() -> Vec<String> {
    vec![
        "openforcefield/openff-toolkit".into(),
        "openforcefield/openff-interchange".into(),
    ]
}
fn default_subdir() -> String {
    "examples".into()
}
fn default_api_base() -> String {
    "https://api.github.com".into()
}
fn default_token_env() -> String {
    "GITHUB_TOKEN".into()
}

/// `[packaging]` section.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PackagingConfig {
    /// Canonical environment file name inside archives and Colab folders.
    #[serde(default = "default_environment_name")]
    pub environment_name: String,

    /// File names excluded from archives and Colab folders.
    #[serde(default = "default_ignored_files")]
    pub ignored_files: Vec<String>,

    /// Directory names never descended into when searching for notebooks.
    #[serde(default = "default_skip_dirs")]
    pub skip_dirs: Vec<String>,

    /// Parent directory names marking a notebook as bare (no companion files).
    #[serde(default = "default_bare_dirs")]
    pub bare_dirs: Vec<String>,
}

impl Default for PackagingConfig {
    fn default() -> Self {
        Self {
            environment_name: default_environment_name(),
            ignored_files: default_ignored_files(),
            skip_dirs: default_skip_dirs(),
            bare_dirs: default_bare_dirs(),
        }
    }
}

fn default_environment_name() -> String {
    "environment.yaml".into()
}
fn default_ignored_files() -> Vec<String> {
    [".gitignore", "Thumbs.db", ".DS_Store", "thumbnail.png", "__pycache__"]
        .into_iter()
        .map(String::from)
        .collect()
}
fn default_skip_dirs() -> Vec<String> {
    vec!["deprecated".into(), "external".into()]
}
fn default_bare_dirs() -> Vec<String> {
    vec!["examples".into(), "experimental".into(), "deprecated".into()]
}

/// `[execution]` section.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ExecutionConfig {
    /// Jupyter launcher used to run `nbconvert`.
    #[serde(default = "default_jupyter_cmd")]
    pub jupyter_cmd: String,

    /// Kernel name passed to the executor.
    #[serde(default = "default_kernel")]
    pub kernel: String,

    /// Per-cell timeout in seconds.
    #[serde(default = "default_timeout_secs")]
    pub timeout_secs: u64,

    /// Delay between successive pool submissions, in ms.
    #[serde(default = "default_submit_delay_ms")]
    pub submit_delay_ms: u64,

    /// Worker count; 0 means one per available processor.
    #[serde(default)]
    pub workers: usize,

    /// Env var enabling experimental features in the executed notebooks.
    #[serde(default = "default_experimental_env")]
    pub experimental_env: String,

    /// Value assigned to `experimental_env`.
    #[serde(default = "default_experimental_value")]
    pub experimental_value: String,
}

impl Default for ExecutionConfig {
    fn default() -> Self {
        Self {
            jupyter_cmd: default_jupyter_cmd(),
            kernel: default_kernel(),
            timeout_secs: default_timeout_secs(),
            submit_delay_ms: default_submit_delay_ms(),
            workers: 0,
            experimental_env: default_experimental_env(),
            experimental_value: default_experimental_value(),
        }
    }
}

fn default_jupyter_cmd() -> String {
    "jupyter".into()
}
fn default_kernel() -> String {
    "python3".into()
}
fn default_timeout_secs() -> u64 {
    600
}
fn default_submit_delay_ms() -> u64 {
    1000
}
fn default_experimental_env() -> String {
    "INTERCHANGE_EXPERIMENTAL".into()
}
fn default_experimental_value() -> String {
    "1".into()
}

// ---------------------------------------------------------------------------
// Runtime config (resolved against the repository root)
// ---------------------------------------------------------------------------

/// Runtime build configuration with absolute paths.
#[derive(Debug, Clone)]
pub struct BuildConfig {
    /// Repository root everything else is relative to.
    pub root: PathBuf,
    pub source_root: PathBuf,
    pub executed_root: PathBuf,
    pub colab_root: PathBuf,
    pub archive_root: PathBuf,
    pub default_environment: PathBuf,
    pub sources: SourcesConfig,
    pub packaging: PackagingConfig,
    pub execution: ExecutionConfig,
}

impl BuildConfig {
    /// Resolve `config` against `root`. Absolute paths in the file are kept as-is.
    pub fn resolve(root: &Path, config: &AppConfig) -> Self {
        let join = |p: &str| root.join(p);
        Self {
            root: root.to_path_buf(),
            source_root: join(&config.paths.source_root),
            executed_root: join(&config.paths.executed_root),
            colab_root: join(&config.paths.colab_root),
            archive_root: join(&config.paths.archive_root),
            default_environment: join(&config.paths.default_environment),
            sources: config.sources.clone(),
            packaging: config.packaging.clone(),
            execution: config.execution.clone(),
        }
    }

    /// The three output roots, in the order they are cleared.
    pub fn output_roots(&self) -> [&Path; 3] {
        [&self.executed_root, &self.colab_root, &self.archive_root]
    }

    /// File names accepted as environment candidates: the canonical name with
    /// its `.yaml` and `.yml` variants.
    pub fn environment_candidates(&self) -> [String; 2] {
        let name = &self.packaging.environment_name;
        let stem = Path::new(name)
            .file_stem()
            .and_then(|s| s.to_str())
            .unwrap_or(name);
        [format!("{stem}.yaml"), format!("{stem}.yml")]
    }

    /// Number of execution workers, falling back to available parallelism.
    pub fn worker_count(&self) -> usize {
        match self.execution.workers {
            0 => std::thread::available_parallelism()
                .map(|n| n.get())
                .unwrap_or(1),
            n => n,
        }
    }
}

// ---------------------------------------------------------------------------
// Config loading
// ---------------------------------------------------------------------------

/// Path of the config file for a repository root.
pub fn config_file_path(root: &Path) -> PathBuf {
    root.join(CONFIG_FILE_NAME)
}

/// Load the config for a repository root. Returns defaults if the file does not exist.
pub fn load_config(root: &Path) -> Result<AppConfig> {
    let path = config_file_path(root);

    if !path.exists() {
        tracing::debug!(?path, "config file not found, using defaults");
        return Ok(AppConfig::default());
    }

    load_config_from(&path)
}

/// Load the application config from a specific file path.
pub fn load_config_from(path: &Path) -> Result<AppConfig> {
    let content = std::fs::read_to_string(path).map_err(|e| NbPubError::io(path, e))?;

    toml::from_str(&content)
        .map_err(|e| NbPubError::config(format!("failed to parse {}: {e}", path.display())))
}

/// Write a default config file into `root`. Returns the path to the created file.
pub fn init_config(root: &Path) -> Result<PathBuf> {
    let path = config_file_path(root);
    if path.exists() {
        return Err(NbPubError::config(format!(
            "{} already exists",
            path.display()
        )));
    }

    let content = toml::to_string_pretty(&AppConfig::default())
        .map_err(|e| NbPubError::config(e.to_string()))?;

    std::fs::write(&path, content).map_err(|e| NbPubError::io(&path, e))?;
    tracing::info!(?path, "created default config file");

    Ok(path)
}
