//! Content-hash diff between a repository cache and a fresh download.

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

use sha2::{Digest, Sha256};
use walkdir::WalkDir;

use nbpub_shared::{FETCH_MANIFEST_NAME, NbPubError, Result, UpdateReport, is_notebook_path};

/// Diff result categorizing files by their change status. Paths are
/// `/`-separated and relative to the repository cache root.
#[derive(Debug, Default)]
pub(crate) struct FileDiff {
    /// Files not previously cached.
    pub new_files: Vec<String>,
    /// Files whose content hash changed.
    pub changed_files: Vec<String>,
    /// Files unchanged.
    pub unchanged_files: Vec<String>,
    /// Files cached before but absent from the download.
    pub removed_files: Vec<String>,
}

/// Hash every regular file under `root`, keyed by relative path.
pub(crate) fn hash_tree(root: &Path) -> Result<BTreeMap<String, String>> {
    let mut files = BTreeMap::new();

    for entry in WalkDir::new(root).sort_by_file_name() {
        let entry = entry.map_err(|e| {
            let path = e.path().unwrap_or(root).to_path_buf();
            NbPubError::io(path, e.into())
        })?;
        if !entry.file_type().is_file() {
            continue;
        }

        let rel = relative_key(root, entry.path());
        if rel == FETCH_MANIFEST_NAME {
            continue;
        }

        let bytes = std::fs::read(entry.path()).map_err(|e| NbPubError::io(entry.path(), e))?;
        files.insert(rel, format!("{:x}", Sha256::digest(&bytes)));
    }

    Ok(files)
}

fn relative_key(root: &Path, path: &Path) -> String {
    path.strip_prefix(root)
        .unwrap_or(path)
        .components()
        .map(|c| c.as_os_str().to_string_lossy())
        .collect::<Vec<_>>()
        .join("/")
}

/// Compute the diff between cached file hashes and freshly downloaded ones.
pub(crate) fn diff_files(
    existing: &BTreeMap<String, String>,
    fetched: &BTreeMap<String, String>,
) -> FileDiff {
    let mut diff = FileDiff::default();

    for (path, hash) in fetched {
        match existing.get(path) {
            Some(old) if old == hash => diff.unchanged_files.push(path.clone()),
            Some(_) => diff.changed_files.push(path.clone()),
            None => diff.new_files.push(path.clone()),
        }
    }

    for path in existing.keys() {
        if !fetched.contains_key(path) {
            diff.removed_files.push(path.clone());
        }
    }

    diff
}

/// Turn a file diff into notebook-level work. A removed companion file
/// sends its owning notebooks back through packaging so their bundles stop
/// shipping it.
///
/// `repo_cache` is the (already updated) cache directory and `repo_rel` its
/// path relative to the source root; report paths are source-root relative.
pub(crate) fn build_report(diff: &FileDiff, repo_cache: &Path, repo_rel: &Path) -> UpdateReport {
    let removed_companions = diff
        .removed_files
        .iter()
        .filter(|rel| !is_notebook_path(Path::new(rel.as_str())));

    let reprocess = diff
        .new_files
        .iter()
        .chain(&diff.changed_files)
        .chain(removed_companions)
        .flat_map(|rel| notebooks_for_file(repo_cache, rel))
        .map(|nb| repo_rel.join(nb));

    let cleanup = diff
        .removed_files
        .iter()
        .map(PathBuf::from)
        .filter(|p| is_notebook_path(p))
        .map(|nb| repo_rel.join(nb));

    UpdateReport::new(reprocess.collect::<Vec<_>>(), cleanup.collect::<Vec<_>>())
}

/// The notebooks a changed file belongs to: the file itself if it is a
/// notebook, otherwise every notebook in the nearest ancestor directory that
/// has any. Returned paths are relative to `repo_cache`.
pub(crate) fn notebooks_for_file(repo_cache: &Path, rel: &str) -> Vec<PathBuf> {
    let rel = PathBuf::from(rel);
    if is_notebook_path(&rel) {
        return vec![rel];
    }

    for dir in rel.ancestors().skip(1) {
        let Ok(read_dir) = std::fs::read_dir(repo_cache.join(dir)) else {
            continue;
        };
        let mut notebooks: Vec<PathBuf> = read_dir
            .filter_map(|e| e.ok())
            .map(|e| e.path())
            .filter(|p| p.is_file() && is_notebook_path(p))
            .filter_map(|p| p.file_name().map(|name| dir.join(name)))
            .collect();
        if !notebooks.is_empty() {
            notebooks.sort();
            return notebooks;
        }
    }

    Vec::new()
}
