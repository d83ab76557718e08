//! Filesystem helpers
//!
//! - `write_atomic`: write through a temp file and rename over the target
//! - `read_text_lossy`: routine sources are not guaranteed to be UTF-8

use std::fs;
use std::path::Path;

use crate::error::{GraphError, Result};

/// Write `content` to `path` atomically.
///
/// On Windows the target is removed first because `fs::rename` will not
/// replace an existing file there.
pub fn write_atomic(path: &Path, content: &[u8]) -> Result<()> {
    if let Some(parent) = path.parent() {
        if !parent.as_os_str().is_empty() {
            fs::create_dir_all(parent).map_err(|e| GraphError::io(parent.display(), e))?;
        }
    }

    let temp_path = path.with_extension("tmp");
    fs::write(&temp_path, content).map_err(|e| GraphError::io(temp_path.display(), e))?;

    #[cfg(windows)]
    {
        if path.exists() {
            fs::remove_file(path).map_err(|e| GraphError::io(path.display(), e))?;
        }
    }
    fs::rename(&temp_path, path).map_err(|e| GraphError::io(path.display(), e))
}

/// Read a text file, replacing invalid UTF-8 sequences.
///
/// Returns the text and whether any replacement happened.
pub fn read_text_lossy(path: &Path) -> Result<(String, bool)> {
    let bytes = fs::read(path).map_err(|e| GraphError::io(path.display(), e))?;
    match String::from_utf8(bytes) {
        Ok(text) => Ok((text, false)),
        Err(err) => Ok((String::from_utf8_lossy(err.as_bytes()).into_owned(), true)),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn test_write_atomic_replaces_existing() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("nested").join("report.json");
        write_atomic(&path, b"first").unwrap();
        write_atomic(&path, b"second").unwrap();
        assert_eq!(fs::read_to_string(&path).unwrap(), "second");
        assert!(!path.with_extension("tmp").exists());
    }

    #[test]
    fn test_read_text_lossy_flags_bad_bytes() {
        let dir = TempDir::new().unwrap();
        let good = dir.path().join("GOOD.m");
        let bad = dir.path().join("BAD.m");
        fs::write(&good, "GOOD ;ok\n").unwrap();
        fs::write(&bad, b"BAD ;\xff\xfe\n").unwrap();

        assert_eq!(read_text_lossy(&good).unwrap(), ("GOOD ;ok\n".to_string(), false));
        let (text, replaced) = read_text_lossy(&bad).unwrap();
        assert!(replaced);
        assert!(text.starts_with("BAD ;"));
    }
}
