use std::path::{Path, PathBuf};

use tracing::{debug, warn};
use walkdir::WalkDir;

use crate::{error::SchemaError, utils::normalize_path};

/// A `.proto` file discovered under a schema root.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SourceFile {
    pub absolute: PathBuf,
    /// Path below the root, `/`-separated. This is the name the file is
    /// compiled and looked up under.
    pub relative: String,
}

/// Recursively lists every regular file with a `proto` extension under
/// `root`, sorted by relative path.
pub fn scan(root: &Path) -> Result<Vec<SourceFile>, SchemaError> {
    let mut files = Vec::new();

    for entry in WalkDir::new(root).follow_links(true) {
        let entry = entry.map_err(|err| SchemaError::Traversal {
            path:   err.path().unwrap_or(root).to_path_buf(),
            source: err,
        })?;

        if !entry.file_type().is_file() {
            continue;
        }
        if entry.path().extension().map_or(true, |ext| ext != "proto") {
            continue;
        }

        let relative = entry
            .path()
            .strip_prefix(root)
            .unwrap_or_else(|_| entry.path())
            .to_string_lossy()
            .into_owned();
        files.push(SourceFile {
            absolute: entry.path().to_path_buf(),
            relative: normalize_path(&relative),
        });
    }

    // Ensure deterministic order
    files.sort_by(|a, b| a.relative.cmp(&b.relative));

    if files.is_empty() {
        warn!(root = %root.display(), "no .proto files found");
    } else {
        debug!(root = %root.display(), count = files.len(), "scanned schema tree");
    }

    Ok(files)
}
