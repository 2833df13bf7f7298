use crate::error::{Result, SinkError};
use std::io::Write;
use std::path::Path;
use tempfile::NamedTempFile;
use tracing::debug;

/// Atomically replace the manifest at `path` with `contents`.
///
/// The text goes to a temporary file in the same directory which is then
/// renamed over the destination, so readers never observe a torn manifest.
pub fn write_manifest(path: &Path, contents: &str) -> Result<()> {
    let map_err = |source| SinkError::ManifestWrite {
        path: path.to_path_buf(),
        source,
    };

    let dir = match path.parent() {
        Some(parent) if !parent.as_os_str().is_empty() => parent,
        _ => Path::new("."),
    };

    let mut tmp = NamedTempFile::new_in(dir).map_err(map_err)?;
    tmp.write_all(contents.as_bytes()).map_err(map_err)?;
    tmp.as_file().sync_data().map_err(map_err)?;
    tmp.persist(path).map_err(|e| map_err(e.error))?;

    debug!("Wrote playlist {} ({} bytes)", path.display(), contents.len());
    Ok(())
}
