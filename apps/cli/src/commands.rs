//! CLI command definitions, routing, and tracing setup.

use std::path::{Path, PathBuf};
use std::sync::Arc;

use clap::{Parser, Subcommand};
use color_eyre::eyre::{Result, eyre};
use indicatif::{ProgressBar, ProgressStyle};
use tracing::info;

use nbpub_core::{
    BuildMode, BuildOptions, BuildResult, NbconvertEngine, ProgressReporter, run_build,
};
use nbpub_package::{find_notebooks, is_bare_notebook, source_relative};
use nbpub_shared::{AppConfig, BuildConfig, config_file_path, init_config, load_config, load_config_from};

// ---------------------------------------------------------------------------
// CLI structure
// ---------------------------------------------------------------------------

/// nbpub: publish example notebooks alongside the documentation.
#[derive(Parser)]
#[command(
    name = "nbpub",
    version,
    about = "Fetch, package and execute example notebooks for the documentation build.",
    long_about = None,
)]
pub(crate) struct Cli {
    /// Repository root that all configured paths are relative to.
    #[arg(long, default_value = ".", env = "NBPUB_ROOT", global = true)]
    pub root: PathBuf,

    /// Config file to use instead of `<root>/nbpub.toml`.
    #[arg(long, global = true)]
    pub config: Option<PathBuf>,

    /// Log format: text (default) or json.
    #[arg(long, default_value = "text", global = true)]
    pub log_format: LogFormat,

    /// Verbosity level (-v, -vv).
    #[arg(short, long, action = clap::ArgAction::Count, global = true)]
    pub verbose: u8,

    #[command(subcommand)]
    pub command: Command,
}

/// Log output format.
#[derive(Clone, Debug, clap::ValueEnum)]
pub(crate) enum LogFormat {
    Text,
    Json,
}

/// Top-level CLI subcommands.
#[derive(Subcommand)]
pub(crate) enum Command {
    /// Download the latest examples, then package and execute what changed.
    Build {
        /// Skip creating zip archives and Colab bundles.
        #[arg(long)]
        skip_proc: bool,

        /// Skip executing notebooks.
        #[arg(long)]
        skip_exec: bool,

        /// Clear all outputs and process every notebook.
        #[arg(long)]
        redo_all: bool,
    },

    /// List the notebooks currently in the source cache.
    List,

    /// Configuration management.
    Config {
        /// Config subcommand.
        #[command(subcommand)]
        action: ConfigAction,
    },
}

/// Config subcommands.
#[derive(Subcommand)]
pub(crate) enum ConfigAction {
    /// Initialize config file with defaults.
    Init,
    /// Show resolved configuration.
    Show,
}

// ---------------------------------------------------------------------------
// Tracing setup
// ---------------------------------------------------------------------------

/// Initialize tracing based on CLI flags.
pub(crate) fn init_tracing(cli: &Cli) {
    use tracing_subscriber::{EnvFilter, fmt};

    let filter = match cli.verbose {
        0 => "nbpub=info",
        1 => "nbpub=debug",
        _ => "nbpub=trace",
    };

    let env_filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(filter));

    match cli.log_format {
        LogFormat::Text => {
            fmt()
                .with_env_filter(env_filter)
                .with_target(false)
                .with_writer(std::io::stderr)
                .init();
        }
        LogFormat::Json => {
            fmt()
                .json()
                .with_env_filter(env_filter)
                .with_writer(std::io::stderr)
                .init();
        }
    }
}

// ---------------------------------------------------------------------------
// Command dispatch
// ---------------------------------------------------------------------------

/// Run the CLI command.
pub(crate) async fn run(cli: Cli) -> Result<()> {
    let root = std::fs::canonicalize(&cli.root)
        .map_err(|e| eyre!("cannot resolve root '{}': {e}", cli.root.display()))?;

    match cli.command {
        Command::Build {
            skip_proc,
            skip_exec,
            redo_all,
        } => {
            let options = BuildOptions {
                skip_proc,
                skip_exec,
                redo_all,
            };
            cmd_build(&root, cli.config.as_deref(), options).await
        }
        Command::List => cmd_list(&root, cli.config.as_deref()),
        Command::Config { action } => match action {
            ConfigAction::Init => cmd_config_init(&root),
            ConfigAction::Show => cmd_config_show(&root, cli.config.as_deref()),
        },
    }
}

fn load_app_config(root: &Path, config: Option<&Path>) -> Result<AppConfig> {
    let app = match config {
        Some(path) => load_config_from(path)?,
        None => load_config(root)?,
    };
    Ok(app)
}

// ---------------------------------------------------------------------------
// Command handlers
// ---------------------------------------------------------------------------

async fn cmd_build(root: &Path, config: Option<&Path>, options: BuildOptions) -> Result<()> {
    let app = load_app_config(root, config)?;
    let build = BuildConfig::resolve(root, &app);

    info!(
        root = %root.display(),
        repos = ?build.sources.repos,
        skip_proc = options.skip_proc,
        skip_exec = options.skip_exec,
        redo_all = options.redo_all,
        "starting build"
    );

    let engine = Arc::new(NbconvertEngine::new(&build.execution));
    let reporter = CliProgress::new();
    let result = run_build(&build, options, engine, &reporter).await?;

    println!();
    println!(
        "  Mode:      {}",
        match result.mode {
            BuildMode::Full => "full rebuild",
            BuildMode::Incremental => "incremental",
        }
    );
    println!("  Notebooks: {}", result.notebooks.len());
    println!("  Cleaned:   {}", result.cleaned.len());
    println!("  Packaged:  {}", result.packaged);
    match &result.execution {
        Some(summary) => println!(
            "  Executed:  {} ok, {} failed",
            summary.succeeded.len(),
            summary.failed.len()
        ),
        None => println!("  Executed:  skipped"),
    }
    println!("  Time:      {:.1}s", result.elapsed.as_secs_f64());
    println!();

    if let Some(err) = result.execution_error() {
        return Err(err.into());
    }
    Ok(())
}

fn cmd_list(root: &Path, config: Option<&Path>) -> Result<()> {
    let app = load_app_config(root, config)?;
    let build = BuildConfig::resolve(root, &app);

    let notebooks = find_notebooks(&build)?;
    if notebooks.is_empty() {
        println!(
            "No notebooks in {}. Run `nbpub build` to fetch them.",
            build.source_root.display()
        );
        return Ok(());
    }

    for notebook in &notebooks {
        let rel = source_relative(&build, notebook)?;
        let kind = if is_bare_notebook(&build, notebook) {
            "bare"
        } else {
            "folder"
        };
        println!("{kind:<7} {}", rel.display());
    }
    Ok(())
}

fn cmd_config_init(root: &Path) -> Result<()> {
    let path = init_config(root)?;
    println!("Config initialized at: {}", path.display());
    Ok(())
}

fn cmd_config_show(root: &Path, config: Option<&Path>) -> Result<()> {
    let source = config
        .map(Path::to_path_buf)
        .unwrap_or_else(|| config_file_path(root));
    let app = load_app_config(root, config)?;
    let toml_str = toml::to_string_pretty(&app)?;
    println!("# {}", source.display());
    println!("{toml_str}");
    Ok(())
}

// ---------------------------------------------------------------------------
// CLI progress reporter
// ---------------------------------------------------------------------------

/// CLI progress reporter using an indicatif spinner.
struct CliProgress {
    spinner: ProgressBar,
}

impl CliProgress {
    fn new() -> Self {
        let spinner = ProgressBar::new_spinner();
        let style = ProgressStyle::with_template("{spinner:.cyan} {msg}")
            .unwrap_or_else(|_| ProgressStyle::default_spinner())
            .tick_strings(&["⠋", "⠙", "⠹", "⠸", "⠼", "⠴", "⠦", "⠧", "⠇", "⠏"]);
        spinner.set_style(style);
        spinner.enable_steady_tick(std::time::Duration::from_millis(80));
        Self { spinner }
    }
}

impl ProgressReporter for CliProgress {
    fn phase(&self, name: &str) {
        self.spinner.set_message(name.to_string());
    }

    fn notebook_packaged(&self, notebook: &Path, current: usize, total: usize) {
        self.spinner
            .set_message(format!("Packaging [{current}/{total}] {}", notebook.display()));
    }

    fn notebook_executed(&self, notebook: &Path, ok: bool, current: usize, total: usize) {
        let status = if ok { "ok" } else { "FAILED" };
        self.spinner.set_message(format!(
            "Executing [{current}/{total}] {} {status}",
            notebook.display()
        ));
    }

    fn done(&self, _result: &BuildResult) {
        self.spinner.finish_and_clear();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use clap::CommandFactory;

    #[test]
    fn cli_definition_is_valid() {
        Cli::command().debug_assert();
    }

    #[test]
    fn build_flags_parse() {
        let cli = Cli::parse_from(["nbpub", "build", "--skip-exec", "--redo-all"]);
        match cli.command {
            Command::Build {
                skip_proc,
                skip_exec,
                redo_all,
            } => {
                assert!(!skip_proc);
                assert!(skip_exec);
                assert!(redo_all);
            }
            _ => panic!("expected build"),
        }
    }

    #[test]
    fn global_flags_after_subcommand() {
        let cli = Cli::parse_from(["nbpub", "list", "--root", "/tmp/docs", "-vv"]);
        assert_eq!(cli.root, PathBuf::from("/tmp/docs"));
        assert_eq!(cli.verbose, 2);
        assert!(matches!(cli.command, Command::List));
    }

    #[test]
    fn list_on_empty_cache_succeeds() {
        let dir = tempfile::tempdir().unwrap();
        cmd_list(dir.path(), None).unwrap();
    }
}
