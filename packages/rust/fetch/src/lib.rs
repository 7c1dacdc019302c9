//! Remote notebook fetcher.
//!
//! For each configured GitHub repository, nbpub looks up the latest stable
//! release, downloads the examples directory at that tag into the local
//! source cache, and reports which notebooks changed since the previous run.

mod diff;
mod release;
mod zipball;

use std::path::{Path, PathBuf};
use std::time::Duration;

use chrono::Utc;
use reqwest::Client;
use reqwest::header::{ACCEPT, AUTHORIZATION, LINK};
use serde::Deserialize;
use tracing::{debug, info, instrument, warn};
use url::Url;

use nbpub_shared::{
    BuildConfig, CURRENT_SCHEMA_VERSION, FETCH_MANIFEST_NAME, FetchManifest, NbPubError, Result,
    SourcesConfig, UpdateReport,
};

pub use release::{ReleaseVersion, next_link, select_latest};
pub use zipball::unpack_subdir;

/// User-Agent string for API requests (GitHub rejects requests without one).
const USER_AGENT: &str = concat!("nbpub/", env!("CARGO_PKG_VERSION"));

/// Releases requested per page.
const PER_PAGE: u32 = 100;

/// Timeout for API requests and downloads.
const DEFAULT_TIMEOUT_SECS: u64 = 120;

// ---------------------------------------------------------------------------
// API payloads
// ---------------------------------------------------------------------------

/// The fields of a GitHub release we care about.
#[derive(Debug, Clone, Deserialize)]
pub struct Release {
    pub tag_name: String,
    #[serde(default)]
    pub draft: bool,
    #[serde(default)]
    pub prerelease: bool,
}

// ---------------------------------------------------------------------------
// RepoFetcher
// ---------------------------------------------------------------------------

/// Downloads example directories from GitHub releases into the source cache.
pub struct RepoFetcher {
    client: Client,
    /// API base without a trailing slash.
    api_base: String,
    token: Option<String>,
}

impl RepoFetcher {
    /// Create a fetcher for the configured API, picking up the optional token.
    pub fn new(sources: &SourcesConfig) -> Result<Self> {
        Url::parse(&sources.api_base).map_err(|e| {
            NbPubError::config(format!("invalid api_base '{}': {e}", sources.api_base))
        })?;
        let api_base = sources.api_base.trim_end_matches('/').to_string();

        let token = std::env::var(&sources.token_env)
            .ok()
            .filter(|t| !t.is_empty());
        if token.is_some() {
            debug!(var = %sources.token_env, "using API token");
        }

        let client = Client::builder()
            .user_agent(USER_AGENT)
            .redirect(reqwest::redirect::Policy::limited(5))
            .timeout(Duration::from_secs(DEFAULT_TIMEOUT_SECS))
            .build()
            .map_err(|e| NbPubError::Network(format!("failed to build HTTP client: {e}")))?;

        Ok(Self {
            client,
            api_base,
            token,
        })
    }

    /// Fetch every configured repository and merge the reports.
    ///
    /// Any failure aborts the whole fetch: later stages depend on it.
    #[instrument(skip_all, fields(repos = config.sources.repos.len()))]
    pub async fn fetch_all(&self, config: &BuildConfig) -> Result<UpdateReport> {
        let mut report = UpdateReport::default();
        for repo in &config.sources.repos {
            report.extend(self.fetch_repo(config, repo).await?);
        }

        info!(
            reprocess = report.reprocess().len(),
            cleanup = report.cleanup().len(),
            rebuild_all = report.needs_rebuild_all(),
            "fetch complete"
        );
        Ok(report)
    }

    /// Bring the cache for one `owner/name` repo up to its latest stable release.
    #[instrument(skip_all, fields(repo = %repo))]
    pub async fn fetch_repo(&self, config: &BuildConfig, repo: &str) -> Result<UpdateReport> {
        let repo_rel = repo_cache_rel(repo)?;
        let cache_dir = config.source_root.join(&repo_rel);
        let subdir = config.sources.subdir.as_str();

        let tag = self.latest_stable_tag(repo).await?;
        let previous = read_manifest(&cache_dir).filter(|m| {
            m.schema_version == CURRENT_SCHEMA_VERSION && m.repo == repo && m.subdir == subdir
        });

        if let Some(manifest) = &previous {
            if manifest.tag == tag {
                info!(%tag, "cache already at latest release");
                return Ok(UpdateReport::default());
            }
        }

        info!(%tag, dest = %cache_dir.display(), "downloading examples");
        std::fs::create_dir_all(&config.source_root)
            .map_err(|e| NbPubError::io(&config.source_root, e))?;
        let staging = tempfile::Builder::new()
            .prefix(".nbpub-staging-")
            .tempdir_in(&config.source_root)
            .map_err(|e| NbPubError::io(&config.source_root, e))?;

        let bytes = self.download_zipball(repo, &tag).await?;
        let count = unpack_subdir(&bytes, subdir, staging.path())?;
        if count == 0 {
            warn!(%tag, subdir, "release contains no files under the examples directory");
        }

        let files = diff::hash_tree(staging.path())?;

        if cache_dir.exists() {
            std::fs::remove_dir_all(&cache_dir).map_err(|e| NbPubError::io(&cache_dir, e))?;
        }
        if let Some(parent) = cache_dir.parent() {
            std::fs::create_dir_all(parent).map_err(|e| NbPubError::io(parent, e))?;
        }
        let staged = staging.keep();
        std::fs::rename(&staged, &cache_dir).map_err(|e| NbPubError::io(&cache_dir, e))?;

        let manifest = FetchManifest {
            schema_version: CURRENT_SCHEMA_VERSION,
            repo: repo.to_string(),
            tag: tag.clone(),
            subdir: subdir.to_string(),
            fetched_at: Utc::now(),
            files,
        };
        write_manifest(&cache_dir, &manifest)?;

        let report = match previous {
            None => {
                info!(%tag, "no usable previous cache, requesting full rebuild");
                UpdateReport::rebuild_all(repo)
            }
            Some(old) => {
                let diff = diff::diff_files(&old.files, &manifest.files);
                info!(
                    from = %old.tag,
                    to = %tag,
                    new = diff.new_files.len(),
                    changed = diff.changed_files.len(),
                    unchanged = diff.unchanged_files.len(),
                    removed = diff.removed_files.len(),
                    "file diff computed"
                );
                diff::build_report(&diff, &cache_dir, &repo_rel)
            }
        };

        Ok(report)
    }

    /// Tag name of the newest stable release, walking every page of the listing.
    #[instrument(skip(self))]
    pub async fn latest_stable_tag(&self, repo: &str) -> Result<String> {
        let releases = self.list_releases(repo).await?;
        let tags = releases
            .iter()
            .filter(|r| !r.draft && !r.prerelease)
            .map(|r| r.tag_name.as_str());

        select_latest(tags)
            .map(|v| v.tag().to_string())
            .ok_or_else(|| {
                NbPubError::validation(format!("{repo}: no stable release with a version tag"))
            })
    }

    /// Every release of `repo`, following `Link: rel="next"` pagination.
    pub async fn list_releases(&self, repo: &str) -> Result<Vec<Release>> {
        let mut url = format!("{}/repos/{repo}/releases?per_page={PER_PAGE}", self.api_base);
        let mut releases = Vec::new();

        loop {
            let response = self.get(&url).await?;
            let next = response
                .headers()
                .get(LINK)
                .and_then(|v| v.to_str().ok())
                .and_then(next_link);

            let page: Vec<Release> = response.json().await.map_err(|e| {
                NbPubError::parse(format!("{url}: unexpected release listing: {e}"))
            })?;
            debug!(%url, count = page.len(), "release page");
            releases.extend(page);

            match next {
                Some(next) => url = next,
                None => break,
            }
        }

        Ok(releases)
    }

    /// Download the source zipball of `repo` at `tag`.
    pub async fn download_zipball(&self, repo: &str, tag: &str) -> Result<Vec<u8>> {
        let url = format!("{}/repos/{repo}/zipball/{tag}", self.api_base);
        let response = self.get(&url).await?;
        let bytes = response
            .bytes()
            .await
            .map_err(|e| NbPubError::Network(format!("{url}: failed to read body: {e}")))?;
        debug!(%url, size = bytes.len(), "zipball downloaded");
        Ok(bytes.to_vec())
    }

    /// GET `url`, turning transport errors and non-success statuses into errors.
    async fn get(&self, url: &str) -> Result<reqwest::Response> {
        let mut request = self
            .client
            .get(url)
            .header(ACCEPT, "application/vnd.github+json");
        if let Some(token) = &self.token {
            request = request.header(AUTHORIZATION, format!("Bearer {token}"));
        }

        let response = request
            .send()
            .await
            .map_err(|e| NbPubError::Network(format!("{url}: {e}")))?;

        let status = response.status();
        if !status.is_success() {
            return Err(NbPubError::Network(format!("{url}: HTTP {status}")));
        }
        Ok(response)
    }
}

// ---------------------------------------------------------------------------
// Helpers
// ---------------------------------------------------------------------------

/// `owner/name` → `owner/name` as a relative path, rejecting anything else.
fn repo_cache_rel(repo: &str) -> Result<PathBuf> {
    let parts: Vec<&str> = repo.split('/').collect();
    match parts.as_slice() {
        [owner, name]
            if !owner.is_empty()
                && !name.is_empty()
                && !matches!(*owner, "." | "..")
                && !matches!(*name, "." | "..") =>
        {
            Ok(Path::new(owner).join(name))
        }
        _ => Err(NbPubError::config(format!(
            "repo '{repo}' must be given as owner/name"
        ))),
    }
}

/// Load the cache manifest, treating any problem as "no previous cache".
fn read_manifest(cache_dir: &Path) -> Option<FetchManifest> {
    let path = cache_dir.join(FETCH_MANIFEST_NAME);
    let content = std::fs::read_to_string(&path).ok()?;
    match serde_json::from_str(&content) {
        Ok(manifest) => Some(manifest),
        Err(e) => {
            warn!(path = %path.display(), error = %e, "ignoring unreadable fetch manifest");
            None
        }
    }
}

fn write_manifest(cache_dir: &Path, manifest: &FetchManifest) -> Result<()> {
    let path = cache_dir.join(FETCH_MANIFEST_NAME);
    let json = serde_json::to_string_pretty(manifest)
        .map_err(|e| NbPubError::parse(format!("failed to serialize manifest: {e}")))?;
    std::fs::write(&path, json).map_err(|e| NbPubError::io(&path, e))
}
