//! Suite file discovery.
//!
//! Every `*.yaml` file under a directory is a suite, except files whose
//! name starts with `docker` (compose definitions living next to suites).

use std::io;
use std::path::{Path, PathBuf};
use walkdir::WalkDir;

/// Recursively find suite files under `root`, sorted by path.
pub fn discover_suites(root: &Path) -> io::Result<Vec<PathBuf>> {
    let mut found = Vec::new();

    for entry in WalkDir::new(root).sort_by_file_name() {
        let entry = entry.map_err(io::Error::from)?;
        if entry.file_type().is_file() && is_suite_file(entry.path()) {
            found.push(entry.into_path());
        }
    }

    found.sort();
    Ok(found)
}

/// Whether `path` names a suite file.
pub fn is_suite_file(path: &Path) -> bool {
    let is_yaml = path.extension().is_some_and(|ext| ext == "yaml");
    let is_compose = path
        .file_name()
        .is_some_and(|name| name.to_string_lossy().starts_with("docker"));

    is_yaml && !is_compose
}
