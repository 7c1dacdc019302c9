//! Notebook packaging: output layout, file sets, zip archives and Colab bundles.

pub mod archive;
pub mod colab;
pub mod files;
pub mod layout;

pub use archive::{create_archive, write_archive};
pub use colab::{create_colab_bundle, install_cell_source, strip_environment_name};
pub use files::{FileSet, needed_files};
pub use layout::{
    StaleOutputs, archive_path, colab_notebook_path, executed_path, find_notebooks,
    is_bare_notebook, source_relative, stale_outputs,
};
