use crate::StoreError;
use std::fs;
use std::path::{Path, PathBuf};

/// Extension of data files: `<identity>.cellar`.
pub const STORE_EXTENSION: &str = "cellar";

/// Environment variable overriding the default data directory.
pub const DATA_DIR_ENV: &str = "CELLAR_DATA_DIR";

/// Directory layout for Cellar stores.
///
/// One data file and one lock file per stack identity, side by side in a
/// single data directory. Nothing is created until [`initialize`](Self::initialize).
#[derive(Debug, Clone)]
pub struct StoreLayout {
    root: PathBuf,
}

impl StoreLayout {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    /// The per-user data directory: `$CELLAR_DATA_DIR`, else the platform data
    /// directory joined with `cellar`. `None` if neither can be determined.
    pub fn default_root() -> Option<PathBuf> {
        if let Some(dir) = std::env::var_os(DATA_DIR_ENV).filter(|v| !v.is_empty()) {
            return Some(PathBuf::from(dir));
        }
        dirs::data_dir().map(|d| d.join("cellar"))
    }

    #[inline]
    pub fn root(&self) -> &Path {
        &self.root
    }

    #[inline]
    pub fn data_file(&self, identity: &str) -> PathBuf {
        self.root.join(format!("{identity}.{STORE_EXTENSION}"))
    }

    #[inline]
    pub fn lock_file(&self, identity: &str) -> PathBuf {
        self.root.join(format!("{identity}.{STORE_EXTENSION}.lock"))
    }

    /// Create the data directory if needed.
    pub fn initialize(&self) -> Result<(), StoreError> {
        fs::create_dir_all(&self.root).map_err(|source| StoreError::Unavailable {
            path: self.root.clone(),
            source,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn layout_paths_are_correct() {
        let layout = StoreLayout::new("/tmp/cellar-test");
        assert_eq!(layout.root(), Path::new("/tmp/cellar-test"));
        assert_eq!(
            layout.data_file("Tasks"),
            PathBuf::from("/tmp/cellar-test/Tasks.cellar")
        );
        assert_eq!(
            layout.lock_file("Tasks"),
            PathBuf::from("/tmp/cellar-test/Tasks.cellar.lock")
        );
    }

    #[test]
    fn initialize_creates_nested_root() {
        let dir = tempfile::tempdir().unwrap();
        let layout = StoreLayout::new(dir.path().join("a").join("b"));
        layout.initialize().unwrap();
        assert!(layout.root().is_dir());
    }

    #[test]
    fn initialize_is_idempotent() {
        let dir = tempfile::tempdir().unwrap();
        let layout = StoreLayout::new(dir.path());
        layout.initialize().unwrap();
        layout.initialize().unwrap();
    }

    #[test]
    fn initialize_under_a_file_is_unavailable() {
        let dir = tempfile::tempdir().unwrap();
        let blocker = dir.path().join("not-a-dir");
        fs::write(&blocker, "x").unwrap();
        let layout = StoreLayout::new(blocker.join("store"));
        assert!(matches!(
            layout.initialize(),
            Err(StoreError::Unavailable { .. })
        ));
    }
}
