use std::path::{Path, PathBuf};

use tracing::warn;
use walkdir::WalkDir;

use crate::error::{Error, Result};

/// Directories that hold installed or generated code, never sources.
pub(crate) const SKIPPED_DIRS: &[&str] = &[
    ".git",
    "node_modules",
    "bower_components",
    "vendor",
    "target",
    "build",
    "obj",
    "bin",
    ".gradle",
    "__pycache__",
    ".venv",
];

/// Walk `root` and return every file for which `matches` holds, sorted,
/// without descending into directories named in `skipped`.
///
/// An unreadable root is an error. Unreadable entries below it are logged and
/// skipped.
pub(crate) fn find_files<F>(root: &Path, skipped: &[&str], matches: F) -> Result<Vec<PathBuf>>
where
    F: Fn(&Path) -> bool,
{
    std::fs::read_dir(root).map_err(|e| Error::io(root, e))?;

    let walker = WalkDir::new(root)
        .follow_links(false)
        .sort_by_file_name()
        .into_iter()
        .filter_entry(|entry| {
            entry.depth() == 0
                || !entry.file_type().is_dir()
                || entry
                    .file_name()
                    .to_str()
                    .map_or(true, |name| !skipped.contains(&name))
        });

    let mut found = Vec::new();
    for entry in walker {
        match entry {
            Ok(entry) if entry.file_type().is_file() && matches(entry.path()) => {
                found.push(entry.into_path());
            }
            Ok(_) => {}
            Err(err) if err.depth() == 0 => {
                let source = err
                    .into_io_error()
                    .unwrap_or_else(|| std::io::Error::other("filesystem loop"));
                return Err(Error::io(root, source));
            }
            Err(err) => {
                warn!(path = ?err.path(), error = %err, "skipping unreadable path");
            }
        }
    }
    Ok(found)
}

pub(crate) fn file_name(path: &Path) -> &str {
    path.file_name().and_then(|n| n.to_str()).unwrap_or("")
}

/// A display name for a module: its directory relative to the scan root, or
/// the root's own name.
pub(crate) fn module_name(root: &Path, dir: &Path) -> String {
    match dir.strip_prefix(root) {
        Ok(rel) if !rel.as_os_str().is_empty() => rel.to_string_lossy().replace('\\', "/"),
        _ => root
            .canonicalize()
            .ok()
            .as_deref()
            .and_then(Path::file_name)
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_else(|| ".".to_string()),
    }
}
