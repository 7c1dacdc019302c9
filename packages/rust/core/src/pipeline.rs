//! End-to-end build: fetch → diff → rebuild-all | incremental → package → execute.

use std::collections::BTreeSet;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::{Duration, Instant};

use tracing::{debug, info, instrument};

use nbpub_fetch::RepoFetcher;
use nbpub_package::{
    create_archive, create_colab_bundle, find_notebooks, is_bare_notebook, source_relative,
    stale_outputs,
};
use nbpub_shared::{BuildConfig, NbPubError, Result, UpdateReport};

use crate::executor::{ExecutionEngine, ExecutionSummary, execute_all};

/// Switches from the command line.
#[derive(Debug, Clone, Copy, Default)]
pub struct BuildOptions {
    /// Skip archive and Colab packaging.
    pub skip_proc: bool,
    /// Skip notebook execution.
    pub skip_exec: bool,
    /// Rebuild every notebook regardless of what the fetch reported.
    pub redo_all: bool,
}

/// Stages of a build.
///
/// ```text
/// Fetch → Diff ─┬→ RebuildAll ─┬→ Package → Execute → Done
///               └→ Incremental ┘
/// ```
/// `Diff` picks `RebuildAll` when any repository asked for it or the caller
/// forced it, `Incremental` otherwise. `Package` and `Execute` are passed
/// through when skipped.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Stage {
    Fetch,
    Diff,
    RebuildAll,
    Incremental,
    Package,
    Execute,
    Done,
}

impl Stage {
    pub fn label(self) -> &'static str {
        match self {
            Self::Fetch => "Fetching notebooks",
            Self::Diff => "Comparing with previous build",
            Self::RebuildAll => "Clearing previous outputs",
            Self::Incremental => "Cleaning up removed notebooks",
            Self::Package => "Packaging notebooks",
            Self::Execute => "Executing notebooks",
            Self::Done => "Done",
        }
    }
}

/// Whether a build started from scratch.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BuildMode {
    Full,
    Incremental,
}

/// Result of a build.
#[derive(Debug)]
pub struct BuildResult {
    pub mode: BuildMode,
    /// Notebooks processed this run, source-relative.
    pub notebooks: Vec<PathBuf>,
    /// Removed notebooks whose outputs were deleted.
    pub cleaned: Vec<PathBuf>,
    pub packaged: usize,
    /// `None` when execution was skipped.
    pub execution: Option<ExecutionSummary>,
    pub elapsed: Duration,
}

impl BuildResult {
    /// Execution failures as a single error, if there were any.
    pub fn execution_error(&self) -> Option<NbPubError> {
        let summary = self.execution.as_ref()?;
        let (first, _) = summary.failed.first()?;
        let message = summary
            .failed
            .iter()
            .map(|(path, err)| format!("\n  {}: {err}", path.display()))
            .collect::<String>();
        Some(NbPubError::execution(
            first,
            format!("{} notebook(s) failed:{message}", summary.failed.len()),
        ))
    }
}

/// Progress callback for reporting build status.
pub trait ProgressReporter: Send + Sync {
    /// Called when entering a new stage.
    fn phase(&self, name: &str);
    /// Called after a notebook's archive and Colab bundle are written.
    fn notebook_packaged(&self, notebook: &Path, current: usize, total: usize);
    /// Called as each execution finishes.
    fn notebook_executed(&self, notebook: &Path, ok: bool, current: usize, total: usize);
    /// Called when the build completes.
    fn done(&self, result: &BuildResult);
}

/// No-op progress reporter for headless/test usage.
pub struct SilentProgress;

impl ProgressReporter for SilentProgress {
    fn phase(&self, _name: &str) {}
    fn notebook_packaged(&self, _notebook: &Path, _current: usize, _total: usize) {}
    fn notebook_executed(&self, _notebook: &Path, _ok: bool, _current: usize, _total: usize) {}
    fn done(&self, _result: &BuildResult) {}
}

/// Run a full build: fetch every configured repository, then process what changed.
#[instrument(skip_all, fields(repos = config.sources.repos.len(), redo_all = options.redo_all))]
pub async fn run_build(
    config: &BuildConfig,
    options: BuildOptions,
    engine: Arc<dyn ExecutionEngine>,
    progress: &dyn ProgressReporter,
) -> Result<BuildResult> {
    progress.phase(Stage::Fetch.label());
    let fetcher = RepoFetcher::new(&config.sources)?;
    let report = fetcher.fetch_all(config).await?;
    run_from_report(config, options, report, engine, progress).await
}

/// Process an update report against the current source cache.
#[instrument(skip_all, fields(reprocess = report.reprocess().len(), cleanup = report.cleanup().len()))]
pub async fn run_from_report(
    config: &BuildConfig,
    options: BuildOptions,
    report: UpdateReport,
    engine: Arc<dyn ExecutionEngine>,
    progress: &dyn ProgressReporter,
) -> Result<BuildResult> {
    let start = Instant::now();
    let mut notebooks: Vec<PathBuf> = Vec::new();
    let mut cleaned = Vec::new();
    let mut mode = BuildMode::Incremental;
    let mut packaged = 0;
    let mut execution = None;

    let mut stage = Stage::Diff;
    while stage != Stage::Done {
        progress.phase(stage.label());
        debug!(?stage, "entering stage");

        stage = match stage {
            // The report already exists, so there is nothing left to fetch.
            Stage::Fetch | Stage::Diff => {
                notebooks = find_notebooks(config)?;
                if options.redo_all || report.needs_rebuild_all() {
                    Stage::RebuildAll
                } else {
                    Stage::Incremental
                }
            }
            Stage::RebuildAll => {
                mode = BuildMode::Full;
                info!(
                    forced = options.redo_all,
                    repos = ?report.rebuild_repos(),
                    "updating all notebooks"
                );
                clear_outputs(config)?;
                Stage::Package
            }
            Stage::Incremental => {
                for rel in report.cleanup() {
                    cleanup_notebook(config, rel)?;
                    cleaned.push(rel.clone());
                }
                let wanted = incremental_set(config, &report, &cleaned);
                notebooks.retain(|nb| {
                    source_relative(config, nb).is_ok_and(|rel| wanted.contains(&rel))
                });
                info!(notebooks = notebooks.len(), cleaned = cleaned.len(), "incremental update");
                Stage::Package
            }
            Stage::Package => {
                if !options.skip_proc {
                    let total = notebooks.len();
                    for (i, notebook) in notebooks.iter().enumerate() {
                        create_colab_bundle(config, notebook)?;
                        create_archive(config, notebook)?;
                        packaged += 1;
                        let rel = source_relative(config, notebook)?;
                        progress.notebook_packaged(&rel, i + 1, total);
                    }
                }
                Stage::Execute
            }
            Stage::Execute => {
                if !options.skip_exec {
                    execution =
                        Some(execute_all(config, engine.clone(), &notebooks, progress).await?);
                }
                Stage::Done
            }
            Stage::Done => Stage::Done,
        };
    }

    let result = BuildResult {
        mode,
        notebooks: notebooks
            .iter()
            .map(|nb| source_relative(config, nb))
            .collect::<Result<_>>()?,
        cleaned,
        packaged,
        execution,
        elapsed: start.elapsed(),
    };

    info!(
        notebooks = result.notebooks.len(),
        packaged = result.packaged,
        elapsed_ms = result.elapsed.as_millis() as u64,
        "build complete"
    );
    progress.done(&result);
    Ok(result)
}

/// Notebooks to reprocess in an incremental build: the reported ones, plus
/// the surviving neighbours of removed non-bare notebooks, whose shared
/// archive and Colab folder went away with the cleanup.
fn incremental_set(
    config: &BuildConfig,
    report: &UpdateReport,
    cleaned: &[PathBuf],
) -> BTreeSet<PathBuf> {
    let mut wanted = report.reprocess().clone();
    for rel in cleaned.iter().filter(|rel| !is_bare_notebook(config, rel)) {
        let Some(dir) = rel.parent() else { continue };
        let Ok(entries) = std::fs::read_dir(config.source_root.join(dir)) else {
            continue;
        };
        for entry in entries.filter_map(|e| e.ok()) {
            let path = entry.path();
            if nbpub_shared::is_notebook_path(&path) {
                if let Some(name) = path.file_name() {
                    wanted.insert(dir.join(name));
                }
            }
        }
    }
    wanted
}

/// Remove the executed, Colab and archive roots entirely.
fn clear_outputs(config: &BuildConfig) -> Result<()> {
    for root in config.output_roots() {
        match std::fs::remove_dir_all(root) {
            Ok(()) => info!(path = %root.display(), "cleared"),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
            Err(e) => return Err(NbPubError::io(root, e)),
        }
    }
    Ok(())
}

/// Delete every output of the removed notebook at source-relative path `rel`:
/// its archive, its Colab folder and its executed copy. The source cache is
/// left alone. Outputs that are already gone are ignored.
pub fn cleanup_notebook(config: &BuildConfig, rel: &Path) -> Result<()> {
    let stale = stale_outputs(config, rel)?;
    info!(notebook = %rel.display(), "cleaning up removed notebook");

    remove_file(&stale.archive)?;
    for dir in &stale.colab_dirs {
        match std::fs::remove_dir_all(dir) {
            Ok(()) => {}
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                debug!(path = %dir.display(), "already gone");
            }
            Err(e) => return Err(NbPubError::io(dir, e)),
        }
    }
    remove_file(&stale.executed)
}

fn remove_file(path: &Path) -> Result<()> {
    match std::fs::remove_file(path) {
        Ok(()) => Ok(()),
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
            debug!(path = %path.display(), "already gone");
            Ok(())
        }
        Err(e) => Err(NbPubError::io(path, e)),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Mutex;

    use crate::executor::tests::{FAILING_NOTEBOOK, FakeEngine, OK_NOTEBOOK, test_config, write};

    fn engine() -> Arc<dyn ExecutionEngine> {
        Arc::new(FakeEngine::default())
    }

    /// Writes the default environment so bare notebooks can be packaged.
    fn scaffold(root: &Path) -> BuildConfig {
        let cfg = test_config(root);
        write(&cfg.default_environment, "name: examples\ndependencies:\n  - python\n");
        cfg
    }

    fn rel(p: &str) -> PathBuf {
        PathBuf::from(p)
    }

    #[derive(Default)]
    struct RecordingProgress {
        phases: Mutex<Vec<String>>,
    }

    impl ProgressReporter for RecordingProgress {
        fn phase(&self, name: &str) {
            self.phases.lock().unwrap().push(name.to_string());
        }
        fn notebook_packaged(&self, _notebook: &Path, _current: usize, _total: usize) {}
        fn notebook_executed(&self, _notebook: &Path, _ok: bool, _current: usize, _total: usize) {}
        fn done(&self, _result: &BuildResult) {}
    }

    #[tokio::test]
    async fn rebuild_all_clears_outputs_even_without_notebooks() {
        let dir = tempfile::tempdir().unwrap();
        let cfg = scaffold(dir.path());
        for root in cfg.output_roots() {
            write(&root.join("stale/file.txt"), "old");
        }

        let report = UpdateReport::rebuild_all("o/r");
        let result = run_from_report(&cfg, BuildOptions::default(), report, engine(), &SilentProgress)
            .await
            .unwrap();

        assert_eq!(result.mode, BuildMode::Full);
        assert!(result.notebooks.is_empty());
        for root in cfg.output_roots() {
            assert!(!root.exists(), "{} should be cleared", root.display());
        }
    }

    #[tokio::test]
    async fn redo_all_overrides_empty_report() {
        let dir = tempfile::tempdir().unwrap();
        let cfg = scaffold(dir.path());
        write(&cfg.source_root.join("o/r/examples/a.ipynb"), OK_NOTEBOOK);
        write(&cfg.source_root.join("o/r/examples/deprecated/old.ipynb"), OK_NOTEBOOK);
        write(&cfg.executed_root.join("stale.ipynb"), "{}");

        let options = BuildOptions {
            redo_all: true,
            ..BuildOptions::default()
        };
        let progress = RecordingProgress::default();
        let result = run_from_report(&cfg, options, UpdateReport::default(), engine(), &progress)
            .await
            .unwrap();

        assert_eq!(result.mode, BuildMode::Full);
        assert_eq!(result.notebooks, vec![rel("o/r/examples/a.ipynb")]);
        assert_eq!(result.packaged, 1);
        assert!(!cfg.executed_root.join("stale.ipynb").exists());
        assert!(cfg.executed_root.join("o/r/examples/a.ipynb").is_file());
        assert!(cfg.archive_root.join("o/r/examples/a.zip").is_file());

        let phases = progress.phases.lock().unwrap();
        assert_eq!(
            phases.as_slice(),
            [
                Stage::Diff.label(),
                Stage::RebuildAll.label(),
                Stage::Package.label(),
                Stage::Execute.label(),
            ]
        );
    }

    #[tokio::test]
    async fn incremental_processes_only_reported_and_discovered() {
        let dir = tempfile::tempdir().unwrap();
        let cfg = scaffold(dir.path());
        write(&cfg.source_root.join("o/r/examples/a.ipynb"), OK_NOTEBOOK);
        write(&cfg.source_root.join("o/r/examples/b.ipynb"), OK_NOTEBOOK);
        write(&cfg.source_root.join("o/r/examples/deprecated/d.ipynb"), OK_NOTEBOOK);
        write(&cfg.executed_root.join("o/r/examples/b.ipynb"), "untouched");

        let report = UpdateReport::new(
            vec![
                rel("o/r/examples/a.ipynb"),
                rel("o/r/examples/deprecated/d.ipynb"),
            ],
            vec![],
        );
        let result = run_from_report(&cfg, BuildOptions::default(), report, engine(), &SilentProgress)
            .await
            .unwrap();

        assert_eq!(result.mode, BuildMode::Incremental);
        assert_eq!(result.notebooks, vec![rel("o/r/examples/a.ipynb")]);
        assert_eq!(
            std::fs::read_to_string(cfg.executed_root.join("o/r/examples/b.ipynb")).unwrap(),
            "untouched"
        );
        assert!(!cfg.executed_root.join("o/r/examples/deprecated/d.ipynb").exists());
    }

    #[tokio::test]
    async fn removed_notebook_outputs_are_cleaned_first() {
        let dir = tempfile::tempdir().unwrap();
        let cfg = scaffold(dir.path());
        let gone = rel("o/r/examples/topic/topic.ipynb");
        write(&cfg.archive_root.join("o/r/examples/topic.zip"), "zip");
        write(&cfg.colab_root.join("o/r/examples/topic/topic.ipynb"), "{}");
        write(&cfg.executed_root.join(&gone), "{}");

        let report = UpdateReport::new(vec![], vec![gone.clone()]);
        let options = BuildOptions {
            skip_exec: true,
            ..BuildOptions::default()
        };
        let result = run_from_report(&cfg, options, report, engine(), &SilentProgress)
            .await
            .unwrap();

        assert_eq!(result.cleaned, vec![gone.clone()]);
        assert!(result.execution.is_none());
        assert!(!cfg.archive_root.join("o/r/examples/topic.zip").exists());
        assert!(!cfg.colab_root.join("o/r/examples/topic").exists());
        assert!(!cfg.executed_root.join(&gone).exists());
    }

    #[tokio::test]
    async fn surviving_neighbour_of_removed_notebook_is_rebuilt() {
        let dir = tempfile::tempdir().unwrap();
        let cfg = scaffold(dir.path());
        let topic = cfg.source_root.join("o/r/examples/topic");
        write(&topic.join("keep.ipynb"), OK_NOTEBOOK);
        write(&cfg.colab_root.join("o/r/examples/topic/keep.ipynb"), "{}");

        let report = UpdateReport::new(vec![], vec![rel("o/r/examples/topic/gone.ipynb")]);
        let options = BuildOptions {
            skip_exec: true,
            ..BuildOptions::default()
        };
        let result = run_from_report(&cfg, options, report, engine(), &SilentProgress)
            .await
            .unwrap();

        assert_eq!(result.notebooks, vec![rel("o/r/examples/topic/keep.ipynb")]);
        assert!(cfg.archive_root.join("o/r/examples/topic.zip").is_file());
        assert!(cfg.colab_root.join("o/r/examples/topic/keep.ipynb").is_file());
    }

    #[test]
    fn cleanup_removes_all_three_outputs_of_bare_notebook() {
        let dir = tempfile::tempdir().unwrap();
        let cfg = test_config(dir.path());
        let gone = rel("o/r/examples/intro.ipynb");
        write(&cfg.archive_root.join("o/r/examples/intro.zip"), "zip");
        write(&cfg.colab_root.join("o/r/examples/intro_0a1b2c/intro.ipynb"), "{}");
        write(&cfg.colab_root.join("o/r/examples/other_0a1b2c/other.ipynb"), "{}");
        write(&cfg.executed_root.join(&gone), "{}");

        cleanup_notebook(&cfg, &gone).unwrap();

        assert!(!cfg.archive_root.join("o/r/examples/intro.zip").exists());
        assert!(!cfg.colab_root.join("o/r/examples/intro_0a1b2c").exists());
        assert!(cfg.colab_root.join("o/r/examples/other_0a1b2c").exists());
        assert!(!cfg.executed_root.join(&gone).exists());
    }

    #[test]
    fn cleanup_tolerates_missing_outputs() {
        let dir = tempfile::tempdir().unwrap();
        let cfg = test_config(dir.path());
        cleanup_notebook(&cfg, Path::new("o/r/examples/topic/never.ipynb")).unwrap();
    }

    #[tokio::test]
    async fn ambiguous_environment_aborts_packaging() {
        let dir = tempfile::tempdir().unwrap();
        let mut cfg = scaffold(dir.path());
        cfg.packaging.environment_name = "environment.conda".into();
        let topic = cfg.source_root.join("o/r/examples/topic");
        write(&topic.join("topic.ipynb"), OK_NOTEBOOK);
        write(&topic.join("environment.yaml"), "dependencies: []\n");
        write(&topic.join("environment.yml"), "dependencies: []\n");

        let report = UpdateReport::new(vec![rel("o/r/examples/topic/topic.ipynb")], vec![]);
        let err = run_from_report(&cfg, BuildOptions::default(), report, engine(), &SilentProgress)
            .await
            .unwrap_err();
        assert!(matches!(err, NbPubError::Config { .. }));
        assert!(!cfg.executed_root.join("o/r/examples/topic/topic.ipynb").exists());
    }

    #[tokio::test]
    async fn execution_failures_are_reported_at_the_end() {
        let dir = tempfile::tempdir().unwrap();
        let cfg = scaffold(dir.path());
        write(&cfg.source_root.join("o/r/examples/a.ipynb"), OK_NOTEBOOK);
        write(&cfg.source_root.join("o/r/examples/b.ipynb"), FAILING_NOTEBOOK);

        let options = BuildOptions {
            skip_proc: true,
            redo_all: true,
            ..BuildOptions::default()
        };
        let result = run_from_report(&cfg, options, UpdateReport::default(), engine(), &SilentProgress)
            .await
            .unwrap();

        assert_eq!(result.packaged, 0);
        let summary = result.execution.as_ref().unwrap();
        assert_eq!(summary.succeeded, vec![rel("o/r/examples/a.ipynb")]);

        let err = result.execution_error().unwrap().to_string();
        assert!(err.contains("1 notebook(s) failed"), "{err}");
        assert!(err.contains("o/r/examples/b.ipynb"), "{err}");
    }
}
