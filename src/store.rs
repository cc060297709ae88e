use log::{debug, info};
use std::error::Error;
use std::fmt;
use std::fs;
use std::io::{self, ErrorKind};
use std::num::ParseFloatError;
use std::path::{Path, PathBuf};

#[derive(Debug)]
pub enum StoreError {
    Io(io::Error),
    Parse(String),
}

impl fmt::Display for StoreError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            StoreError::Io(e) => write!(f, "bpm file error: {}", e),
            StoreError::Parse(msg) => write!(f, "bpm file is malformed: {}", msg),
        }
    }
}

impl Error for StoreError {}

impl From<io::Error> for StoreError {
    fn from(e: io::Error) -> Self {
        StoreError::Io(e)
    }
}

impl From<ParseFloatError> for StoreError {
    fn from(e: ParseFloatError) -> Self {
        StoreError::Parse(e.to_string())
    }
}

/// A single saved bpm value. Lines starting with `#` are comments.
pub struct BpmStore {
    path: PathBuf,
}

impl BpmStore {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        BpmStore { path: path.into() }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn save(&self, bpm: f32) -> Result<(), StoreError> {
        let contents = format!("# saved {}\n{:.6}\n", chrono::Local::now().to_rfc3339(), bpm);
        fs::write(&self.path, contents)?;
        info!("Saved {} bpm to {}", bpm, self.path.display());
        Ok(())
    }

    /// The saved value, or `None` when nothing has been saved yet.
    pub fn load(&self) -> Result<Option<f32>, StoreError> {
        let contents = match fs::read_to_string(&self.path) {
            Ok(contents) => contents,
            Err(e) if e.kind() == ErrorKind::NotFound => {
                debug!("No saved bpm at {}", self.path.display());
                return Ok(None);
            }
            Err(e) => return Err(e.into()),
        };
        let line = contents
            .lines()
            .map(str::trim)
            .find(|l| !l.is_empty() && !l.starts_with('#'))
            .ok_or_else(|| StoreError::Parse("no value".to_string()))?;
        let bpm: f32 = line.parse()?;
        Ok(Some(bpm))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn temp_path(name: &str) -> PathBuf {
        std::env::temp_dir().join(format!("phaselock-{}-{}", name, std::process::id()))
    }

    #[test]
    fn test_save_then_load() {
        let path = temp_path("roundtrip");
        let store = BpmStore::new(&path);
        store.save(123.5).unwrap();
        assert_eq!(store.load().unwrap(), Some(123.5));
        fs::remove_file(path).unwrap();
    }

    #[test]
    fn test_missing_file() {
        let store = BpmStore::new(temp_path("missing"));
        assert_eq!(store.load().unwrap(), None);
    }

    #[test]
    fn test_malformed_file() {
        let path = temp_path("malformed");
        fs::write(&path, "# nothing\nfast\n").unwrap();
        let store = BpmStore::new(&path);
        assert!(matches!(store.load(), Err(StoreError::Parse(_))));
        fs::remove_file(path).unwrap();
    }
}
