//! Writing generated documents to disk for static web servers.

use std::fs;
use std::io;
use std::path::Path;
use tracing::{debug, error};

/// Replace `path` with `contents` via a temp file and rename, so readers
/// never see a half-written document.
pub fn write_atomic(path: &Path, contents: &str) -> io::Result<()> {
    if let Some(parent) = path.parent() {
        if !parent.as_os_str().is_empty() {
            fs::create_dir_all(parent)?;
        }
    }
    let mut tmp = path.as_os_str().to_owned();
    tmp.push(".tmp");
    fs::write(&tmp, contents)?;
    fs::rename(&tmp, path)
}

/// [`write_atomic`], logging instead of failing.
pub fn write_file(path: &Path, contents: &str) {
    match write_atomic(path, contents) {
        Ok(()) => debug!("Wrote {}", path.display()),
        Err(e) => error!("Failed to write {}: {}", path.display(), e),
    }
}
