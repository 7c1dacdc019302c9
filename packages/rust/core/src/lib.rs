//! Build orchestration for nbpub.
//!
//! This crate ties together fetching, packaging and execution into the
//! end-to-end `build` workflow.

pub mod executor;
pub mod pipeline;

pub use executor::{
    ExecutionEngine, ExecutionSummary, NbconvertEngine, THUMBNAIL_NAME, execute_all,
    execute_notebook, thumbnail_cell,
};
pub use pipeline::{
    BuildMode, BuildOptions, BuildResult, ProgressReporter, SilentProgress, Stage,
    cleanup_notebook, run_build, run_from_report,
};
