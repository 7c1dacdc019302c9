//! Self-installing Colab bundles.

use std::path::{Path, PathBuf};

use serde_yaml_ng::Value as YamlValue;
use tracing::{debug, instrument};

use nbpub_shared::{BuildConfig, NbPubError, NewCell, Notebook, Result, is_notebook_path};

use crate::files::needed_files;
use crate::layout::{bare_colab_dirs, colab_notebook_path, is_bare_notebook, source_relative};

/// Lines of the dependency-install cell put at the top of every Colab notebook.
pub fn install_cell_source(environment_name: &str) -> Vec<String> {
    vec![
        "# Execute this cell to make this notebook's dependencies available".into(),
        "!pip install -q condacolab".into(),
        "import condacolab".into(),
        "condacolab.install_mambaforge()".into(),
        format!("!mamba env update -q -n base -f {environment_name}"),
    ]
}

/// Build the Colab bundle for `notebook` and return the modified notebook's path.
///
/// Companion files are copied next to it and the environment file loses its
/// `name` key. Every notebook in the bundle, the requested one and any
/// siblings sharing its folder, gets the install cell at position 0.
///
/// A bare notebook's bundle directory is its own, so it is replaced
/// wholesale along with any folders left from earlier versions of the
/// notebook. Shared directories are overwritten file by file.
#[instrument(skip_all, fields(notebook = %notebook.display()))]
pub fn create_colab_bundle(config: &BuildConfig, notebook: &Path) -> Result<PathBuf> {
    let files = needed_files(config, notebook)?;

    let dst = colab_notebook_path(config, notebook)?;
    let bundle = dst
        .parent()
        .ok_or_else(|| NbPubError::validation(format!("no bundle dir for {}", dst.display())))?;

    if is_bare_notebook(config, notebook) {
        let rel = source_relative(config, notebook)?;
        let mut stale = bare_colab_dirs(config, &rel)?;
        stale.push(bundle.to_path_buf());
        for dir in stale.iter().filter(|d| d.exists()) {
            std::fs::remove_dir_all(dir).map_err(|e| NbPubError::io(dir, e))?;
        }
    }
    std::fs::create_dir_all(bundle).map_err(|e| NbPubError::io(bundle, e))?;

    for (src, rel) in files.iter() {
        let target = bundle.join(rel);
        if let Some(parent) = target.parent() {
            std::fs::create_dir_all(parent).map_err(|e| NbPubError::io(parent, e))?;
        }
        if is_notebook_path(src) {
            write_with_install_cell(config, src, &target)?;
        } else {
            std::fs::copy(src, &target).map_err(|e| NbPubError::io(src, e))?;
        }
    }

    strip_environment_name(&bundle.join(&config.packaging.environment_name))?;

    debug!(bundle = %bundle.display(), files = files.iter().count(), "colab bundle written");
    Ok(dst)
}

fn write_with_install_cell(config: &BuildConfig, src: &Path, dst: &Path) -> Result<()> {
    let mut doc = Notebook::read(src)?;
    doc.insert_cell(
        0,
        NewCell::code(install_cell_source(&config.packaging.environment_name)),
    );
    doc.write(dst)
}

/// Remove the top-level `name` key from a Conda environment file, which
/// condacolab can't cope with. The file is left untouched when there is none.
pub fn strip_environment_name(path: &Path) -> Result<()> {
    let text = std::fs::read_to_string(path).map_err(|e| NbPubError::io(path, e))?;
    let mut env: YamlValue = serde_yaml_ng::from_str(&text)
        .map_err(|e| NbPubError::parse(format!("invalid environment {}: {e}", path.display())))?;

    let Some(mapping) = env.as_mapping_mut() else {
        return Ok(());
    };
    if mapping.remove("name").is_none() {
        return Ok(());
    }

    let text = serde_yaml_ng::to_string(&env)
        .map_err(|e| NbPubError::parse(format!("failed to write {}: {e}", path.display())))?;
    std::fs::write(path, text).map_err(|e| NbPubError::io(path, e))
}
