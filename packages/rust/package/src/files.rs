//! The set of files that travel with a notebook.

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

use walkdir::WalkDir;

use nbpub_shared::{BuildConfig, NbPubError, Result};

use crate::layout::is_bare_notebook;

/// Source path → destination path relative to the bundle root.
///
/// Always holds exactly one entry whose destination is the canonical
/// environment file name.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct FileSet {
    entries: BTreeMap<PathBuf, PathBuf>,
}

impl FileSet {
    pub fn iter(&self) -> impl Iterator<Item = (&Path, &Path)> {
        self.entries.iter().map(|(s, d)| (s.as_path(), d.as_path()))
    }

    /// Destination of `src`, if it is part of the set.
    pub fn destination(&self, src: &Path) -> Option<&Path> {
        self.entries.get(src).map(PathBuf::as_path)
    }
}

/// Resolve the files needed to run `notebook` (an absolute path).
///
/// A bare notebook travels alone. Otherwise every file under its directory
/// goes along, except ignored names at any depth. Then exactly one
/// environment file is settled on:
///
/// - no candidate: the default environment, renamed to the canonical name
/// - one candidate: renamed to the canonical name
/// - several, one canonical: kept as they are
/// - several, none canonical: configuration error
pub fn needed_files(config: &BuildConfig, notebook: &Path) -> Result<FileSet> {
    let dir = notebook.parent().unwrap_or(Path::new(""));

    let sources = if is_bare_notebook(config, notebook) {
        vec![notebook.to_path_buf()]
    } else {
        companion_files(config, dir)?
    };

    let mut entries: BTreeMap<PathBuf, PathBuf> = sources
        .iter()
        .map(|src| {
            let rel = src.strip_prefix(dir).unwrap_or(src).to_path_buf();
            (src.clone(), rel)
        })
        .collect();

    let canonical = PathBuf::from(&config.packaging.environment_name);
    let candidates = config.environment_candidates();
    let environments: Vec<&PathBuf> = sources
        .iter()
        .filter(|src| src.parent() == Some(dir))
        .filter(|src| {
            src.file_name()
                .and_then(|n| n.to_str())
                .is_some_and(|n| candidates.iter().any(|c| c == n))
        })
        .collect();

    match environments.as_slice() {
        [] => {
            entries.insert(config.default_environment.clone(), canonical);
        }
        [only] => {
            entries.insert((*only).clone(), canonical);
        }
        many if many.iter().any(|p| p.file_name() == Some(canonical.as_os_str())) => {}
        many => {
            let listing: String = many
                .iter()
                .map(|p| format!("\n  {}", p.display()))
                .collect();
            return Err(NbPubError::config(format!(
                "Could not choose a Conda environment file from multiple candidates:{listing}\n\
                 Name the intended Conda environment '{}'.",
                canonical.display()
            )));
        }
    }

    Ok(FileSet { entries })
}

fn companion_files(config: &BuildConfig, dir: &Path) -> Result<Vec<PathBuf>> {
    let ignored = &config.packaging.ignored_files;
    let mut files = Vec::new();

    let walker = WalkDir::new(dir)
        .min_depth(1)
        .sort_by_file_name()
        .into_iter()
        .filter_entry(|e| {
            e.file_name()
                .to_str()
                .is_none_or(|name| !ignored.iter().any(|i| i == name))
        });

    for entry in walker {
        let entry = entry.map_err(|e| {
            let path = e.path().unwrap_or(dir).to_path_buf();
            NbPubError::io(path, e.into())
        })?;
        if entry.file_type().is_file() {
            files.push(entry.into_path());
        }
    }

    Ok(files)
}
