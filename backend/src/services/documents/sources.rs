//! Image discovery for a folder and the global pseudo-folder.

use common::model::document::ImageOrigin;
use std::collections::{BTreeSet, HashSet};
use std::fs;
use std::io;
use std::path::{Path, PathBuf};

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SourceImage {
    pub path: PathBuf,
    pub origin: ImageOrigin,
}

impl SourceImage {
    pub fn file_name(&self) -> String {
        self.path
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_default()
    }
}

/// Files directly inside `dir` whose name ends with one of `extensions`, in
/// path order. A missing directory has no images.
pub fn list_images(dir: &Path, extensions: &[String]) -> io::Result<Vec<PathBuf>> {
    let entries = match fs::read_dir(dir) {
        Ok(entries) => entries,
        Err(err) if err.kind() == io::ErrorKind::NotFound => return Ok(Vec::new()),
        Err(err) => return Err(err),
    };

    let mut found = BTreeSet::new();
    for entry in entries {
        let entry = entry?;
        if !entry.file_type()?.is_file() {
            continue;
        }
        let name = entry.file_name();
        let name = name.to_string_lossy();
        if extensions.iter().any(|ext| name.ends_with(ext.as_str())) {
            found.insert(entry.path());
        }
    }
    Ok(found.into_iter().collect())
}

/// Global images first, then folder images whose file name the global set
/// does not already use.
pub fn merge_with_global(global: Vec<PathBuf>, folder: Vec<PathBuf>) -> Vec<SourceImage> {
    let mut taken: HashSet<std::ffi::OsString> = HashSet::new();
    let mut merged = Vec::with_capacity(global.len() + folder.len());

    for (paths, origin) in [(global, ImageOrigin::Global), (folder, ImageOrigin::Folder)] {
        for path in paths {
            let Some(name) = path.file_name() else { continue };
            if taken.insert(name.to_os_string()) {
                merged.push(SourceImage { path, origin });
            }
        }
    }
    merged
}
