//! Where each notebook's outputs live, and how notebooks are discovered.
//!
//! For a notebook at source-relative path `rel`:
//! ```text
//! archive   bare: <archive_root>/<rel stem>.zip   else: <archive_root>/<rel parent>.zip
//! colab     bare: <colab_root>/<rel parent>/<stem>_<sha1[..6]>/<name>
//!           else: <colab_root>/<rel>
//! executed  <executed_root>/<rel>
//! ```

use std::collections::VecDeque;
use std::ffi::OsString;
use std::path::{Path, PathBuf};

use regex::Regex;
use sha1::{Digest, Sha1};

use nbpub_shared::{BuildConfig, NbPubError, Result, is_notebook_path};

/// A notebook is bare when it sits directly in one of the bare directories
/// (e.g. `examples/`) and so has no companion files.
pub fn is_bare_notebook(config: &BuildConfig, notebook: &Path) -> bool {
    notebook
        .parent()
        .and_then(|p| p.file_name())
        .and_then(|n| n.to_str())
        .is_some_and(|name| config.packaging.bare_dirs.iter().any(|b| b == name))
}

/// Path of `notebook` relative to the source root.
pub fn source_relative(config: &BuildConfig, notebook: &Path) -> Result<PathBuf> {
    if notebook.is_relative() {
        return Ok(notebook.to_path_buf());
    }
    notebook
        .strip_prefix(&config.source_root)
        .map(Path::to_path_buf)
        .map_err(|_| {
            NbPubError::validation(format!(
                "{} is not inside the source root {}",
                notebook.display(),
                config.source_root.display()
            ))
        })
}

/// Archive file for `notebook`.
pub fn archive_path(config: &BuildConfig, notebook: &Path) -> Result<PathBuf> {
    let rel = source_relative(config, notebook)?;
    if is_bare_notebook(config, &rel) {
        return Ok(config.archive_root.join(rel.with_extension("zip")));
    }
    // Folder names may contain dots (`v1.2`), so append rather than replace.
    let parent = rel.parent().map(Path::to_path_buf).unwrap_or_default();
    Ok(with_zip_suffix(&config.archive_root.join(parent)))
}

/// Colab copy of `notebook`. Bare notebooks get their own folder, suffixed
/// with a short hash of the notebook to avoid collisions, so this reads the
/// notebook from disk in that case.
pub fn colab_notebook_path(config: &BuildConfig, notebook: &Path) -> Result<PathBuf> {
    let rel = source_relative(config, notebook)?;
    if !is_bare_notebook(config, &rel) {
        return Ok(config.colab_root.join(rel));
    }

    let src = config.source_root.join(&rel);
    let bytes = std::fs::read(&src).map_err(|e| NbPubError::io(&src, e))?;
    let digest = format!("{:x}", Sha1::digest(&bytes));

    let stem = rel.file_stem().unwrap_or_default().to_string_lossy();
    let name = rel.file_name().unwrap_or_default();
    let folder = format!("{stem}_{}", &digest[..6]);

    let parent = rel.parent().unwrap_or(Path::new(""));
    Ok(config.colab_root.join(parent).join(folder).join(name))
}

/// Executed copy of `notebook`.
pub fn executed_path(config: &BuildConfig, notebook: &Path) -> Result<PathBuf> {
    Ok(config.executed_root.join(source_relative(config, notebook)?))
}

/// Outputs left behind by a notebook that no longer exists in the source cache.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct StaleOutputs {
    pub archive: PathBuf,
    /// Colab folders to delete. For bare notebooks the hash suffix can't be
    /// recomputed, so every `<stem>_<6 hex>` folder holding the notebook counts.
    pub colab_dirs: Vec<PathBuf>,
    pub executed: PathBuf,
}

/// Outputs of the removed notebook at source-relative path `rel`.
pub fn stale_outputs(config: &BuildConfig, rel: &Path) -> Result<StaleOutputs> {
    let archive = archive_path(config, rel)?;
    let executed = executed_path(config, rel)?;

    let colab_dirs = if is_bare_notebook(config, rel) {
        bare_colab_dirs(config, rel)?
    } else {
        rel.parent()
            .map(|p| vec![config.colab_root.join(p)])
            .unwrap_or_default()
    };

    Ok(StaleOutputs {
        archive,
        colab_dirs,
        executed,
    })
}

/// Existing `<stem>_<6 hex>` Colab folders of the bare notebook at `rel`.
pub(crate) fn bare_colab_dirs(config: &BuildConfig, rel: &Path) -> Result<Vec<PathBuf>> {
    let parent = config.colab_root.join(rel.parent().unwrap_or(Path::new("")));
    let Some(name) = rel.file_name() else {
        return Ok(Vec::new());
    };
    let stem = rel.file_stem().unwrap_or_default().to_string_lossy();
    let pattern = Regex::new(&format!("^{}_[0-9a-f]{{6}}$", regex::escape(&stem)))
        .map_err(|e| NbPubError::validation(format!("bad notebook name {stem}: {e}")))?;

    let Ok(entries) = std::fs::read_dir(&parent) else {
        return Ok(Vec::new());
    };

    let mut dirs: Vec<PathBuf> = entries
        .filter_map(|e| e.ok())
        .map(|e| e.path())
        .filter(|p| p.is_dir() && p.join(name).is_file())
        .filter(|p| {
            p.file_name()
                .and_then(|n| n.to_str())
                .is_some_and(|n| pattern.is_match(n))
        })
        .collect();
    dirs.sort();
    Ok(dirs)
}

/// Breadth-first search for notebooks under the source root, never
/// descending into the configured skip directories or hidden ones
/// (`.ipynb_checkpoints`, interrupted download staging). Returns absolute
/// paths, sorted.
pub fn find_notebooks(config: &BuildConfig) -> Result<Vec<PathBuf>> {
    let root = &config.source_root;
    if !root.exists() {
        return Ok(Vec::new());
    }

    let mut queue = VecDeque::from([root.clone()]);
    let mut notebooks = Vec::new();

    while let Some(dir) = queue.pop_front() {
        let entries = std::fs::read_dir(&dir).map_err(|e| NbPubError::io(&dir, e))?;
        for entry in entries {
            let path = entry.map_err(|e| NbPubError::io(&dir, e))?.path();
            if path.is_dir() {
                let skip = path
                    .file_name()
                    .and_then(|n| n.to_str())
                    .is_some_and(|n| {
                        n.starts_with('.') || config.packaging.skip_dirs.iter().any(|s| s == n)
                    });
                if !skip {
                    queue.push_back(path);
                }
            } else if is_notebook_path(&path) {
                notebooks.push(path);
            }
        }
    }

    notebooks.sort();
    Ok(notebooks)
}

fn with_zip_suffix(path: &Path) -> PathBuf {
    let mut name: OsString = path.file_name().unwrap_or_default().to_os_string();
    name.push(".zip");
    path.with_file_name(name)
}

#[cfg(test)]
mod tests {
    use super::*;
    use nbpub_shared::AppConfig;

    fn config(root: &Path) -> BuildConfig {
        BuildConfig::resolve(root, &AppConfig::default())
    }

    fn touch(path: &Path, contents: &str) {
        std::fs::create_dir_all(path.parent().unwrap()).unwrap();
        std::fs::write(path, contents).unwrap();
    }

    #[test]
    fn bare_detection_uses_parent_name() {
        let cfg = config(Path::new("/repo"));
        assert!(is_bare_notebook(&cfg, Path::new("o/r/examples/a.ipynb")));
        assert!(is_bare_notebook(&cfg, Path::new("o/r/examples/experimental/a.ipynb")));
        assert!(!is_bare_notebook(&cfg, Path::new("o/r/examples/topic/a.ipynb")));
    }

    #[test]
    fn archive_paths() {
        let cfg = config(Path::new("/repo"));
        let bare = cfg.source_root.join("o/r/examples/a.ipynb");
        let nested = cfg.source_root.join("o/r/examples/v1.2/b.ipynb");

        assert_eq!(
            archive_path(&cfg, &bare).unwrap(),
            cfg.archive_root.join("o/r/examples/a.zip")
        );
        assert_eq!(
            archive_path(&cfg, &nested).unwrap(),
            cfg.archive_root.join("o/r/examples/v1.2.zip")
        );
    }

    #[test]
    fn colab_path_of_bare_notebook_is_hashed() {
        let dir = tempfile::tempdir().unwrap();
        let cfg = config(dir.path());
        let nb = cfg.source_root.join("o/r/examples/intro.ipynb");
        touch(&nb, "{}");

        let path = colab_notebook_path(&cfg, &nb).unwrap();
        // sha1("{}") = bf21a9e8fbc5a3846fb05b4fa0859e0917b2202f
        assert_eq!(
            path,
            cfg.colab_root.join("o/r/examples/intro_bf21a9/intro.ipynb")
        );
    }

    #[test]
    fn colab_path_of_folder_notebook_mirrors_source() {
        let cfg = config(Path::new("/repo"));
        let nb = cfg.source_root.join("o/r/examples/topic/topic.ipynb");
        assert_eq!(
            colab_notebook_path(&cfg, &nb).unwrap(),
            cfg.colab_root.join("o/r/examples/topic/topic.ipynb")
        );
    }

    #[test]
    fn outside_source_root_is_rejected() {
        let cfg = config(Path::new("/repo"));
        assert!(executed_path(&cfg, Path::new("/elsewhere/a.ipynb")).is_err());
    }

    #[test]
    fn find_notebooks_skips_configured_dirs() {
        let dir = tempfile::tempdir().unwrap();
        let cfg = config(dir.path());
        let src = &cfg.source_root;
        touch(&src.join("o/r/examples/a.ipynb"), "{}");
        touch(&src.join("o/r/examples/topic/B.IPYNB"), "{}");
        touch(&src.join("o/r/examples/topic/data.csv"), "");
        touch(&src.join("o/r/examples/deprecated/old.ipynb"), "{}");
        touch(&src.join("o/r/examples/external/ext.ipynb"), "{}");
        touch(&src.join("o/r/examples/.ipynb_checkpoints/a-checkpoint.ipynb"), "{}");
        touch(&src.join(".nbpub-staging-x1/examples/a.ipynb"), "{}");

        let found = find_notebooks(&cfg).unwrap();
        assert_eq!(
            found,
            vec![
                src.join("o/r/examples/a.ipynb"),
                src.join("o/r/examples/topic/B.IPYNB"),
            ]
        );
    }

    #[test]
    fn find_notebooks_without_cache_is_empty() {
        let dir = tempfile::tempdir().unwrap();
        assert!(find_notebooks(&config(dir.path())).unwrap().is_empty());
    }

    #[test]
    fn stale_outputs_for_removed_bare_notebook() {
        let dir = tempfile::tempdir().unwrap();
        let cfg = config(dir.path());
        let parent = cfg.colab_root.join("o/r/examples");
        touch(&parent.join("intro_abc123/intro.ipynb"), "{}");
        touch(&parent.join("intro_def456/intro.ipynb"), "{}");
        touch(&parent.join("intro_extra_abc123/intro_extra.ipynb"), "{}");
        touch(&parent.join("intro_zzzzzz/intro.ipynb"), "{}");

        let stale = stale_outputs(&cfg, Path::new("o/r/examples/intro.ipynb")).unwrap();
        assert_eq!(
            stale.colab_dirs,
            vec![parent.join("intro_abc123"), parent.join("intro_def456")]
        );
        assert_eq!(stale.archive, cfg.archive_root.join("o/r/examples/intro.zip"));
        assert_eq!(stale.executed, cfg.executed_root.join("o/r/examples/intro.ipynb"));
    }

    #[test]
    fn stale_outputs_for_folder_notebook() {
        let cfg = config(Path::new("/repo"));
        let stale = stale_outputs(&cfg, Path::new("o/r/examples/topic/topic.ipynb")).unwrap();
        assert_eq!(stale.colab_dirs, vec![cfg.colab_root.join("o/r/examples/topic")]);
        assert_eq!(stale.archive, cfg.archive_root.join("o/r/examples/topic.zip"));
    }
}
