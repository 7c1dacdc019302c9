//! Notebook execution.
//!
//! The actual kernel work is done by an external engine behind the
//! [`ExecutionEngine`] trait; the default one pipes the notebook through
//! `jupyter nbconvert`. [`execute_all`] runs a batch on a small worker pool.

use std::io::Write;
use std::path::{Path, PathBuf};
use std::process::{Command, Stdio};
use std::sync::Arc;
use std::time::Duration;

use serde_json::json;
use tokio::sync::Semaphore;
use tracing::{debug, info, instrument, warn};

use nbpub_package::{executed_path, source_relative};
use nbpub_shared::{BuildConfig, ExecutionConfig, NbPubError, NewCell, Notebook, Result};

use crate::pipeline::ProgressReporter;

/// Image shown as the gallery thumbnail when it sits next to a notebook.
pub const THUMBNAIL_NAME: &str = "thumbnail.png";

/// Runs a notebook to completion.
pub trait ExecutionEngine: Send + Sync {
    /// Execute `notebook` with `workdir` as the kernel's working directory and
    /// return the executed document.
    fn execute(&self, notebook: &Notebook, workdir: &Path) -> Result<Notebook>;
}

// ---------------------------------------------------------------------------
// nbconvert engine
// ---------------------------------------------------------------------------

/// Executes notebooks with `jupyter nbconvert --execute`, one subprocess per notebook.
#[derive(Debug, Clone)]
pub struct NbconvertEngine {
    config: ExecutionConfig,
}

impl NbconvertEngine {
    pub fn new(config: &ExecutionConfig) -> Self {
        Self {
            config: config.clone(),
        }
    }

    fn command(&self, workdir: &Path) -> Command {
        let mut cmd = Command::new(&self.config.jupyter_cmd);
        cmd.args(["nbconvert", "--to", "notebook", "--execute", "--stdin", "--stdout"])
            .arg(format!(
                "--ExecutePreprocessor.timeout={}",
                self.config.timeout_secs
            ))
            .arg(format!(
                "--ExecutePreprocessor.kernel_name={}",
                self.config.kernel
            ))
            .arg("--ExecutePreprocessor.store_widget_state=True")
            .current_dir(workdir)
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped());

        if !self.config.experimental_env.is_empty() {
            cmd.env(&self.config.experimental_env, &self.config.experimental_value);
        }
        cmd
    }
}

impl ExecutionEngine for NbconvertEngine {
    fn execute(&self, notebook: &Notebook, workdir: &Path) -> Result<Notebook> {
        let input = notebook.to_json()?;

        let mut child = self.command(workdir).spawn().map_err(|e| {
            NbPubError::execution(
                workdir,
                format!(
                    "failed to spawn nbconvert: {e}. Is `{}` installed?",
                    self.config.jupyter_cmd
                ),
            )
        })?;

        let mut stdin = child
            .stdin
            .take()
            .ok_or_else(|| NbPubError::execution(workdir, "failed to capture nbconvert stdin"))?;

        // Feed stdin from its own thread so a large notebook can't deadlock
        // against a full stdout pipe.
        let writer = std::thread::spawn(move || stdin.write_all(input.as_bytes()));

        let output = child
            .wait_with_output()
            .map_err(|e| NbPubError::execution(workdir, format!("nbconvert wait error: {e}")))?;

        match writer.join() {
            Ok(Ok(())) => {}
            Ok(Err(e)) => debug!("nbconvert closed stdin early: {e}"),
            Err(_) => warn!("nbconvert stdin writer panicked"),
        }

        if !output.status.success() {
            let stderr = String::from_utf8_lossy(&output.stderr);
            return Err(NbPubError::execution(
                workdir,
                format!("nbconvert exited with {}: {}", output.status, stderr_tail(&stderr)),
            ));
        }

        let text = String::from_utf8_lossy(&output.stdout);
        Notebook::from_json(&text)
    }
}

/// Last few lines of stderr; the traceback is at the end.
fn stderr_tail(stderr: &str) -> String {
    let lines: Vec<&str> = stderr.trim_end().lines().collect();
    lines[lines.len().saturating_sub(20)..].join("\n")
}

// ---------------------------------------------------------------------------
// Single notebook
// ---------------------------------------------------------------------------

/// The hidden cell marking `thumbnail.png` as the notebook's thumbnail.
pub fn thumbnail_cell() -> NewCell {
    NewCell::code([
        "from IPython.display import Image".to_string(),
        format!("display(Image(\"{THUMBNAIL_NAME}\"))"),
    ])
    .with_metadata(json!({
        "nbsphinx": "hidden",
        "tags": ["nbsphinx-thumbnail"],
    }))
}

/// Execute the notebook at `notebook` (absolute, inside the source root) and
/// write the result under the executed root. Returns the written path.
///
/// Any failure is reported as an execution error naming the notebook's
/// source-relative path.
pub fn execute_notebook(
    config: &BuildConfig,
    engine: &dyn ExecutionEngine,
    notebook: &Path,
) -> Result<PathBuf> {
    let rel = source_relative(config, notebook)?;
    info!(notebook = %rel.display(), "executing");

    let workdir = notebook.parent().unwrap_or(config.source_root.as_path());
    let executed = Notebook::read(notebook)
        .and_then(|mut doc| {
            if workdir.join(THUMBNAIL_NAME).is_file() {
                doc.insert_cell(0, thumbnail_cell());
            }
            engine.execute(&doc, workdir)
        })
        .map_err(|e| match e {
            NbPubError::Execution { message, .. } => NbPubError::execution(&rel, message),
            other => NbPubError::execution(&rel, other.to_string()),
        })?;

    let dst = executed_path(config, notebook)?;
    executed
        .write(&dst)
        .map_err(|e| NbPubError::execution(&rel, e.to_string()))?;

    info!(notebook = %rel.display(), "done executing");
    Ok(dst)
}

// ---------------------------------------------------------------------------
// Worker pool
// ---------------------------------------------------------------------------

/// Outcome of a batch execution. Paths are source-relative.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ExecutionSummary {
    pub succeeded: Vec<PathBuf>,
    pub failed: Vec<(PathBuf, String)>,
}

/// Execute `notebooks` on a pool of `config.worker_count()` blocking workers.
///
/// Submissions are spaced by `submit_delay_ms` to dodge a startup race in the
/// Jupyter executor. A failing notebook doesn't stop the others; failures are
/// collected in the summary.
#[instrument(skip_all, fields(notebooks = notebooks.len()))]
pub async fn execute_all(
    config: &BuildConfig,
    engine: Arc<dyn ExecutionEngine>,
    notebooks: &[PathBuf],
    progress: &dyn ProgressReporter,
) -> Result<ExecutionSummary> {
    let workers = config.worker_count();
    let delay = Duration::from_millis(config.execution.submit_delay_ms);
    let semaphore = Arc::new(Semaphore::new(workers));
    let shared = Arc::new(config.clone());

    info!(workers, delay_ms = config.execution.submit_delay_ms, "starting execution");

    let mut handles = Vec::with_capacity(notebooks.len());
    for (i, notebook) in notebooks.iter().enumerate() {
        if i > 0 && !delay.is_zero() {
            tokio::time::sleep(delay).await;
        }

        let permit = semaphore
            .clone()
            .acquire_owned()
            .await
            .map_err(|e| NbPubError::validation(format!("worker pool closed: {e}")))?;

        let rel = source_relative(config, notebook).unwrap_or_else(|_| notebook.clone());
        let task_config = shared.clone();
        let engine = engine.clone();
        let path = notebook.clone();
        let handle = tokio::task::spawn_blocking(move || {
            let _permit = permit;
            execute_notebook(&task_config, engine.as_ref(), &path)
        });
        handles.push((rel, handle));
    }

    let total = handles.len();
    let mut summary = ExecutionSummary::default();
    for (i, (rel, handle)) in handles.into_iter().enumerate() {
        let outcome = match handle.await {
            Ok(result) => result,
            Err(e) => Err(NbPubError::execution(&rel, format!("worker panicked: {e}"))),
        };

        let ok = outcome.is_ok();
        match outcome {
            Ok(_) => summary.succeeded.push(rel.clone()),
            Err(e) => {
                warn!(notebook = %rel.display(), error = %e, "execution failed");
                summary.failed.push((rel.clone(), e.to_string()));
            }
        }
        progress.notebook_executed(&rel, ok, i + 1, total);
    }

    info!(
        succeeded = summary.succeeded.len(),
        failed = summary.failed.len(),
        "execution finished"
    );
    Ok(summary)
}
