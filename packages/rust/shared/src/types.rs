//! Core domain types shared by the fetcher and the orchestrator.

use std::collections::{BTreeMap, BTreeSet};
use std::path::{Path, PathBuf};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Current schema version for the fetch manifest format.
pub const CURRENT_SCHEMA_VERSION: u32 = 1;

/// File name of the manifest stored at the root of each repository cache.
pub const FETCH_MANIFEST_NAME: &str = ".nbpub-manifest.json";

// ---------------------------------------------------------------------------
// UpdateReport
// ---------------------------------------------------------------------------

/// What a fetch cycle changed, as notebook paths relative to the source root.
///
/// `cleanup` never overlaps `reprocess`: a notebook that is both removed and
/// re-added only needs reprocessing.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct UpdateReport {
    reprocess: BTreeSet<PathBuf>,
    cleanup: BTreeSet<PathBuf>,
    rebuild_all: BTreeSet<String>,
}

impl UpdateReport {
    /// Build a report. Non-notebook paths in `cleanup` are dropped.
    pub fn new(
        reprocess: impl IntoIterator<Item = PathBuf>,
        cleanup: impl IntoIterator<Item = PathBuf>,
    ) -> Self {
        let reprocess: BTreeSet<PathBuf> = reprocess.into_iter().collect();
        let cleanup = cleanup
            .into_iter()
            .filter(|p| is_notebook_path(p))
            .filter(|p| !reprocess.contains(p))
            .collect();
        Self {
            reprocess,
            cleanup,
            rebuild_all: BTreeSet::new(),
        }
    }

    /// A report demanding a full rebuild on behalf of `repo`.
    pub fn rebuild_all(repo: impl Into<String>) -> Self {
        Self {
            rebuild_all: BTreeSet::from([repo.into()]),
            ..Self::default()
        }
    }

    /// Merge `other` into `self`.
    pub fn extend(&mut self, other: UpdateReport) {
        self.reprocess.extend(other.reprocess);
        self.cleanup.extend(other.cleanup);
        self.rebuild_all.extend(other.rebuild_all);
        let reprocess = &self.reprocess;
        self.cleanup.retain(|p| !reprocess.contains(p));
    }

    pub fn reprocess(&self) -> &BTreeSet<PathBuf> {
        &self.reprocess
    }

    pub fn cleanup(&self) -> &BTreeSet<PathBuf> {
        &self.cleanup
    }

    /// Repos that asked for a full rebuild.
    pub fn rebuild_repos(&self) -> &BTreeSet<String> {
        &self.rebuild_all
    }

    /// True when incremental reconciliation is unsafe.
    pub fn needs_rebuild_all(&self) -> bool {
        !self.rebuild_all.is_empty()
    }

    pub fn is_empty(&self) -> bool {
        self.reprocess.is_empty() && self.cleanup.is_empty() && self.rebuild_all.is_empty()
    }
}

/// True for paths with an `.ipynb` extension (any case).
pub fn is_notebook_path(path: &Path) -> bool {
    path.extension()
        .and_then(|e| e.to_str())
        .is_some_and(|e| e.eq_ignore_ascii_case("ipynb"))
}

// ---------------------------------------------------------------------------
// FetchManifest
// ---------------------------------------------------------------------------

/// The manifest stored at the root of each repository cache, describing what
/// was downloaded and the content hash of every file.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FetchManifest {
    /// Schema version for forward compatibility.
    pub schema_version: u32,
    /// Repo as `owner/name`.
    pub repo: String,
    /// Release tag the cache was populated from.
    pub tag: String,
    /// Subdirectory of the repo that was downloaded.
    pub subdir: String,
    /// When the cache was last populated.
    pub fetched_at: DateTime<Utc>,
    /// SHA-256 of each file, keyed by `/`-separated path relative to the
    /// repository cache root.
    pub files: BTreeMap<String, String>,
}

#[cfg(test)]
mod tests {
    use super::*;

    fn paths(items: &[&str]) -> Vec<PathBuf> {
        items.iter().map(PathBuf::from).collect()
    }

    #[test]
    fn cleanup_excludes_reprocessed_and_non_notebooks() {
        let report = UpdateReport::new(
            paths(&["r/examples/a/a.ipynb"]),
            paths(&["r/examples/a/a.ipynb", "r/examples/b.ipynb", "r/examples/data.csv"]),
        );
        assert_eq!(report.cleanup().len(), 1);
        assert!(report.cleanup().contains(Path::new("r/examples/b.ipynb")));
        assert!(!report.needs_rebuild_all());
    }

    #[test]
    fn extend_resubtracts_cleanup() {
        let mut first = UpdateReport::new(vec![], paths(&["x/examples/moved.ipynb"]));
        let second = UpdateReport::new(paths(&["x/examples/moved.ipynb"]), vec![]);
        first.extend(second);
        assert!(first.cleanup().is_empty());
        assert_eq!(first.reprocess().len(), 1);
    }

    #[test]
    fn rebuild_all_survives_merge() {
        let mut report = UpdateReport::default();
        assert!(report.is_empty());
        report.extend(UpdateReport::rebuild_all("owner/repo"));
        assert!(report.needs_rebuild_all());
        assert!(report.rebuild_repos().contains("owner/repo"));
    }

    #[test]
    fn notebook_extension_is_case_insensitive() {
        assert!(is_notebook_path(Path::new("a/B.IPYNB")));
        assert!(!is_notebook_path(Path::new("a/b.py")));
    }

    #[test]
    fn manifest_serialization() {
        let manifest = FetchManifest {
            schema_version: CURRENT_SCHEMA_VERSION,
            repo: "owner/repo".into(),
            tag: "0.10.0".into(),
            subdir: "examples".into(),
            fetched_at: Utc::now(),
            files: BTreeMap::from([("examples/a.ipynb".into(), "abc".into())]),
        };

        let json = serde_json::to_string_pretty(&manifest).expect("serialize");
        let parsed: FetchManifest = serde_json::from_str(&json).expect("deserialize");
        assert_eq!(parsed.schema_version, CURRENT_SCHEMA_VERSION);
        assert_eq!(parsed.tag, "0.10.0");
        assert_eq!(parsed.files.len(), 1);
    }
}
