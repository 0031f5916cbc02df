use std::fs;
use std::io;
use std::path::{Path, PathBuf};

/// Persists the path of the input that produced the current frame set.
///
/// Comparison is exact string equality; a renamed input is a different input.
#[derive(Debug, Clone)]
pub struct CacheValidator {
    token_path: PathBuf,
}

impl CacheValidator {
    pub fn new(token_path: impl Into<PathBuf>) -> Self {
        Self {
            token_path: token_path.into(),
        }
    }

    pub fn token_path(&self) -> &Path {
        &self.token_path
    }

    /// False when the token is absent, unreadable or different.
    pub fn is_valid(&self, current_input: &str) -> bool {
        match fs::read_to_string(&self.token_path) {
            Ok(text) => text.strip_suffix('\n').unwrap_or(&text) == current_input,
            Err(_) => false,
        }
    }

    /// Overwrite the token. Call only once a frame set is fully extracted.
    pub fn record(&self, current_input: &str) -> io::Result<()> {
        if let Some(parent) = self.token_path.parent() {
            if !parent.as_os_str().is_empty() {
                fs::create_dir_all(parent)?;
            }
        }
        fs::write(&self.token_path, format!("{}\n", current_input))
    }

    /// Drop the token so the next run regenerates.
    pub fn invalidate(&self) -> io::Result<()> {
        match fs::remove_file(&self.token_path) {
            Err(e) if e.kind() != io::ErrorKind::NotFound => Err(e),
            _ => Ok(()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn absent_token_is_invalid() {
        let tmp = TempDir::new().unwrap();
        let cache = CacheValidator::new(tmp.path().join("input.token"));
        assert!(!cache.is_valid("a.mp4"));
    }

    #[test]
    fn recorded_token_matches_exactly() {
        let tmp = TempDir::new().unwrap();
        let cache = CacheValidator::new(tmp.path().join("nested").join("input.token"));
        cache.record("a.mp4").unwrap();
        assert!(cache.is_valid("a.mp4"));
        assert!(!cache.is_valid("b.mp4"));
        assert!(!cache.is_valid("./a.mp4"));
        assert_eq!(
            fs::read_to_string(cache.token_path()).unwrap(),
            "a.mp4\n"
        );
    }

    #[test]
    fn record_overwrites_and_invalidate_removes() {
        let tmp = TempDir::new().unwrap();
        let cache = CacheValidator::new(tmp.path().join("input.token"));
        cache.record("a.mp4").unwrap();
        cache.record("b.mp4").unwrap();
        assert!(!cache.is_valid("a.mp4"));
        assert!(cache.is_valid("b.mp4"));
        cache.invalidate().unwrap();
        cache.invalidate().unwrap();
        assert!(!cache.is_valid("b.mp4"));
    }

    #[test]
    fn unwritable_token_reports_error() {
        let tmp = TempDir::new().unwrap();
        fs::write(tmp.path().join("blocker"), b"").unwrap();
        let cache = CacheValidator::new(tmp.path().join("blocker").join("input.token"));
        assert!(cache.record("a.mp4").is_err());
        assert!(!cache.is_valid("a.mp4"));
    }
}
