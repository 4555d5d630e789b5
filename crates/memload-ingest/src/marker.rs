//! Completion marking
//!
//! A processed file is renamed in place with a leading [`MARKER`]. The rename
//! stays inside the file's directory, so on POSIX filesystems it is a single
//! atomic step: the file is visible under exactly one of its two names at
//! any moment.

use std::io;
use std::path::{Path, PathBuf};

/// Prefix that flags a file as processed
pub const MARKER: char = '.';

/// Whether the file name already carries the marker
pub fn is_marked(path: &Path) -> bool {
    path.file_name()
        .and_then(|name| name.to_str())
        .is_some_and(|name| name.starts_with(MARKER))
}

/// Name the file will have once marked
pub fn marked_path(path: &Path) -> Option<PathBuf> {
    let name = path.file_name()?.to_str()?;
    let marked = format!("{}{}", MARKER, name);
    Some(match path.parent() {
        Some(parent) => parent.join(marked),
        None => PathBuf::from(marked),
    })
}

/// Rename `path` to its marked name and return the new path
pub fn mark_processed(path: &Path) -> io::Result<PathBuf> {
    if is_marked(path) {
        return Err(io::Error::new(
            io::ErrorKind::InvalidInput,
            format!("{} is already marked", path.display()),
        ));
    }

    let target = marked_path(path).ok_or_else(|| {
        io::Error::new(
            io::ErrorKind::InvalidInput,
            format!("{} has no UTF-8 file name", path.display()),
        )
    })?;

    std::fs::rename(path, &target)?;
    Ok(target)
}
