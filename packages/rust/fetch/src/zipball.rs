//! Extraction of one subdirectory from a GitHub source zipball.
//!
//! GitHub zipballs wrap the tree in a single `<owner>-<repo>-<sha>/` directory.
//! Only regular files under `<wrapper>/<subdir>/` are written; directories,
//! symlinks and everything outside the subdirectory are skipped.

use std::io::{Cursor, Read};
use std::path::{Component, Path, PathBuf};

use tracing::debug;
use zip::ZipArchive;

use nbpub_shared::{NbPubError, Result};

/// `S_IFMT` / `S_IFLNK` from the Unix mode bits zip entries may carry.
const MODE_TYPE_MASK: u32 = 0o170000;
const MODE_SYMLINK: u32 = 0o120000;

/// Unpack `<wrapper>/<subdir>/**` from a zipball into `dest/<subdir>/**`.
///
/// Returns the number of files written.
pub fn unpack_subdir(bytes: &[u8], subdir: &str, dest: &Path) -> Result<usize> {
    let mut archive = ZipArchive::new(Cursor::new(bytes))
        .map_err(|e| NbPubError::Archive(format!("unreadable zipball: {e}")))?;
    let subdir = Path::new(subdir);
    let mut written = 0;

    for i in 0..archive.len() {
        let mut entry = archive
            .by_index(i)
            .map_err(|e| NbPubError::Archive(format!("bad zipball entry: {e}")))?;

        if entry.is_dir()
            || entry
                .unix_mode()
                .is_some_and(|mode| mode & MODE_TYPE_MASK == MODE_SYMLINK)
        {
            continue;
        }

        let Some(path) = entry.enclosed_name() else {
            debug!(name = entry.name(), "skipping entry with unsafe path");
            continue;
        };
        let Some(rel) = strip_wrapper(&path) else {
            continue;
        };
        if !rel.starts_with(subdir) {
            continue;
        }

        let target = dest.join(&rel);
        if let Some(parent) = target.parent() {
            std::fs::create_dir_all(parent).map_err(|e| NbPubError::io(parent, e))?;
        }

        let mut data = Vec::new();
        entry
            .read_to_end(&mut data)
            .map_err(|e| NbPubError::Archive(format!("{}: {e}", path.display())))?;
        std::fs::write(&target, data).map_err(|e| NbPubError::io(&target, e))?;

        debug!(path = %rel.display(), "unpacked");
        written += 1;
    }

    Ok(written)
}

/// Drop the wrapper directory; reject anything that could escape `dest`.
fn strip_wrapper(path: &Path) -> Option<PathBuf> {
    let mut components = path.components();
    match components.next()? {
        Component::Normal(_) => {}
        _ => return None,
    }

    let mut rel = PathBuf::new();
    for component in components {
        match component {
            Component::Normal(part) => rel.push(part),
            Component::CurDir => {}
            _ => return None,
        }
    }

    if rel.as_os_str().is_empty() {
        None
    } else {
        Some(rel)
    }
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use std::io::Write;

    use zip::write::{SimpleFileOptions, ZipWriter};

    /// Build a GitHub-style zipball from `(path, contents)` pairs.
    pub(crate) fn make_zipball(files: &[(&str, &str)]) -> Vec<u8> {
        let mut cursor = Cursor::new(Vec::new());
        {
            let mut zip = ZipWriter::new(&mut cursor);
            let options = SimpleFileOptions::default();
            for (path, contents) in files {
                zip.start_file(*path, options).expect("start file");
                zip.write_all(contents.as_bytes()).expect("write");
            }
            zip.finish().expect("finish zip");
        }
        cursor.into_inner()
    }

    #[test]
    fn only_subdir_is_unpacked() {
        let bytes = make_zipball(&[
            ("acme-widgets-abc123/README.md", "readme"),
            ("acme-widgets-abc123/examples/intro.ipynb", "{}"),
            ("acme-widgets-abc123/examples/deep/data/a.csv", "1,2"),
            ("acme-widgets-abc123/src/lib.py", "pass"),
        ]);
        let dir = tempfile::tempdir().expect("tempdir");

        let written = unpack_subdir(&bytes, "examples", dir.path()).expect("unpack");
        assert_eq!(written, 2);
        assert!(dir.path().join("examples/intro.ipynb").is_file());
        assert_eq!(
            std::fs::read_to_string(dir.path().join("examples/deep/data/a.csv")).unwrap(),
            "1,2"
        );
        assert!(!dir.path().join("README.md").exists());
        assert!(!dir.path().join("src").exists());
    }

    #[test]
    fn similarly_named_sibling_is_not_unpacked() {
        let bytes = make_zipball(&[
            ("w/examples/a.ipynb", "{}"),
            ("w/examples-old/b.ipynb", "{}"),
        ]);
        let dir = tempfile::tempdir().expect("tempdir");

        assert_eq!(unpack_subdir(&bytes, "examples", dir.path()).unwrap(), 1);
        assert!(!dir.path().join("examples-old").exists());
    }

    #[test]
    fn strip_wrapper_rejects_escapes() {
        assert_eq!(
            strip_wrapper(Path::new("wrap/examples/a.ipynb")),
            Some(PathBuf::from("examples/a.ipynb"))
        );
        assert!(strip_wrapper(Path::new("wrap")).is_none());
        assert!(strip_wrapper(Path::new("wrap/../etc/passwd")).is_none());
        assert!(strip_wrapper(Path::new("/abs/path")).is_none());
    }

    #[test]
    fn garbage_is_archive_error() {
        let dir = tempfile::tempdir().expect("tempdir");
        let err = unpack_subdir(b"definitely not a zip", "examples", dir.path()).unwrap_err();
        assert!(matches!(err, NbPubError::Archive(_)));
    }
}
