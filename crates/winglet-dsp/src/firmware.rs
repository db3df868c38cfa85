//! Firmware blob loading.
//!
//! Blobs are looked up by bare name across an ordered list of search
//! directories, first hit wins. The blob is held only for the duration of
//! one enable attempt.

use std::path::PathBuf;

use bytes::Bytes;
use tracing::debug;

use crate::error::{DspError, Result};

/// Firmware image the receiver loads on first open.
pub const DEFAULT_FIRMWARE: &str = "dsp0.hex";

/// Environment variable prepending a directory to the search path.
pub const FIRMWARE_DIR_ENV: &str = "WINGLET_FIRMWARE_DIR";

/// Default search directories, most specific first. An existing
/// [`FIRMWARE_DIR_ENV`] directory is searched before the standard ones.
#[must_use]
pub fn default_search_path() -> Vec<PathBuf> {
    search_path_from(std::env::var_os(FIRMWARE_DIR_ENV))
}

fn search_path_from(override_dir: Option<std::ffi::OsString>) -> Vec<PathBuf> {
    let mut dirs = Vec::new();
    if let Some(dir) = override_dir {
        dirs.push(PathBuf::from(dir));
    }
    dirs.push(PathBuf::from("/lib/firmware/winglet"));
    dirs.push(PathBuf::from("/lib/firmware"));
    dirs
}

/// Load a firmware blob by name.
///
/// # Errors
///
/// Returns [`DspError::Config`] for names containing path separators,
/// [`DspError::FirmwareNotFound`] when no directory has the blob, and
/// [`DspError::Io`] for any other filesystem failure.
pub fn load(name: &str, dirs: &[PathBuf]) -> Result<Bytes> {
    if name.contains(['/', '\\']) || name.is_empty() {
        return Err(DspError::config(format!("bad firmware name {name:?}")));
    }
    for dir in dirs {
        let path = dir.join(name);
        match std::fs::read(&path) {
            Ok(bytes) => {
                debug!(path = %path.display(), len = bytes.len(), "loaded firmware");
                return Ok(Bytes::from(bytes));
            }
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
            Err(e) => return Err(e.into()),
        }
    }
    Err(DspError::FirmwareNotFound {
        name: name.to_owned(),
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn first_directory_wins() {
        let a = tempfile::tempdir().unwrap();
        let b = tempfile::tempdir().unwrap();
        std::fs::write(a.path().join("fw.hex"), b"AAA").unwrap();
        std::fs::write(b.path().join("fw.hex"), b"BBB").unwrap();
        let dirs = [a.path().to_owned(), b.path().to_owned()];
        assert_eq!(load("fw.hex", &dirs).unwrap().as_ref(), b"AAA");
    }

    #[test]
    fn falls_through_missing_directories() {
        let a = tempfile::tempdir().unwrap();
        let b = tempfile::tempdir().unwrap();
        std::fs::write(b.path().join("fw.hex"), b"BBB").unwrap();
        let dirs = [a.path().join("nonexistent"), b.path().to_owned()];
        assert_eq!(load("fw.hex", &dirs).unwrap().as_ref(), b"BBB");
    }

    #[test]
    fn missing_blob_reports_name() {
        let a = tempfile::tempdir().unwrap();
        let dirs = [a.path().to_owned()];
        assert!(matches!(
            load("fw.hex", &dirs),
            Err(DspError::FirmwareNotFound { name }) if name == "fw.hex"
        ));
    }

    #[test]
    fn env_override_searched_first() {
        let dirs = search_path_from(Some("/nonexistent/fw-override".into()));
        assert_eq!(dirs[0], PathBuf::from("/nonexistent/fw-override"));
        assert_eq!(dirs[1], PathBuf::from("/lib/firmware/winglet"));
    }

    #[test]
    fn unset_override_uses_standard_dirs() {
        let dirs = search_path_from(None);
        assert_eq!(dirs[0], PathBuf::from("/lib/firmware/winglet"));
        assert_eq!(dirs[1], PathBuf::from("/lib/firmware"));
    }

    #[test]
    fn path_separators_rejected() {
        assert!(matches!(
            load("../fw.hex", &[]),
            Err(DspError::Config { .. })
        ));
    }
}
