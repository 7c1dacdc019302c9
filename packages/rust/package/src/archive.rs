//! Downloadable zip archives.

use std::fs::File;
use std::io::{BufWriter, Write};
use std::path::{Path, PathBuf};

use tracing::{debug, instrument};
use zip::CompressionMethod;
use zip::write::{SimpleFileOptions, ZipWriter};

use nbpub_shared::{BuildConfig, NbPubError, Result};

use crate::files::{FileSet, needed_files};
use crate::layout::archive_path;

/// Write the archive for `notebook` and return its path.
///
/// Overwrites any existing archive.
#[instrument(skip_all, fields(notebook = %notebook.display()))]
pub fn create_archive(config: &BuildConfig, notebook: &Path) -> Result<PathBuf> {
    let files = needed_files(config, notebook)?;
    let path = archive_path(config, notebook)?;
    write_archive(&path, &files)?;
    debug!(archive = %path.display(), entries = files.iter().count(), "archive written");
    Ok(path)
}

/// Write `files` into a deflated zip at `path`.
pub fn write_archive(path: &Path, files: &FileSet) -> Result<()> {
    if let Some(parent) = path.parent() {
        std::fs::create_dir_all(parent).map_err(|e| NbPubError::io(parent, e))?;
    }

    let file = File::create(path).map_err(|e| NbPubError::io(path, e))?;
    let mut zip = ZipWriter::new(BufWriter::new(file));
    let options = SimpleFileOptions::default()
        .compression_method(CompressionMethod::Deflated)
        .compression_level(Some(9));

    for (src, dest) in files.iter() {
        let bytes = std::fs::read(src).map_err(|e| NbPubError::io(src, e))?;
        zip.start_file(entry_name(dest), options)
            .map_err(|e| NbPubError::Archive(format!("{}: {e}", path.display())))?;
        zip.write_all(&bytes).map_err(|e| NbPubError::io(path, e))?;
    }

    let mut writer = zip
        .finish()
        .map_err(|e| NbPubError::Archive(format!("{}: {e}", path.display())))?;
    writer.flush().map_err(|e| NbPubError::io(path, e))
}

/// Zip entry names always use `/`.
fn entry_name(dest: &Path) -> String {
    dest.components()
        .map(|c| c.as_os_str().to_string_lossy())
        .collect::<Vec<_>>()
        .join("/")
}
