use std::path::Path;

use tracing::debug;

use crate::error::DeployResult;
use crate::fs::FileSystem;
use crate::slug::is_valid_slug;

/// List function slugs under `functions_dir`.
///
/// Only directories whose names are valid slugs count, which skips shared
/// code folders such as `_shared`. A missing directory yields no slugs.
pub fn discover_slugs(fs: &dyn FileSystem, functions_dir: &Path) -> DeployResult<Vec<String>> {
    let entries = match fs.read_dir(functions_dir) {
        Ok(entries) => entries,
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
            debug!(dir = %functions_dir.display(), "functions directory missing");
            return Ok(Vec::new());
        }
        Err(e) => return Err(e.into()),
    };

    let mut slugs: Vec<String> = entries
        .into_iter()
        .filter(|entry| entry.is_dir && is_valid_slug(&entry.name))
        .map(|entry| entry.name)
        .collect();
    slugs.sort();
    Ok(slugs)
}
