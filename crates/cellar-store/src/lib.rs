//! Store coordinator, on-disk layout, and atomic commits for Cellar.
//!
//! This crate provides the storage layer: `StoreLayout` maps a stack identity
//! to its data and lock files, `StoreLock` gives one coordinator exclusive
//! ownership of a store, `StoreImage` is the checksummed on-disk document, and
//! `StoreCoordinator` opens (or creates) a store against a `SchemaModel` and
//! applies `ChangeSet`s atomically via write-to-temp, fsync, rename.

pub mod changes;
pub mod coordinator;
pub mod image;
pub mod layout;
pub mod lock;

pub use changes::{ChangeSet, CommitReceipt, ObjectId, StoredRecord};
pub use coordinator::StoreCoordinator;
pub use image::{SchemaStamp, StoreImage, STORE_FORMAT_VERSION};
pub use layout::{StoreLayout, DATA_DIR_ENV, STORE_EXTENSION};
pub use lock::StoreLock;

use cellar_schema::SchemaError;
use std::path::{Path, PathBuf};
use thiserror::Error;

/// Fsync a directory so that a preceding `rename()` is durable.
///
/// POSIX does not promise that a rename survives a crash until the parent
/// directory itself has been synced.
pub(crate) fn fsync_dir(dir: &Path) -> Result<(), std::io::Error> {
    let f = std::fs::File::open(dir)?;
    f.sync_all()
}

#[derive(Debug, Error)]
pub enum StoreError {
    #[error("store unavailable at {}: {source}", .path.display())]
    Unavailable {
        path: PathBuf,
        source: std::io::Error,
    },
    #[error("store is held by another coordinator: {}", .0.display())]
    Locked(PathBuf),
    #[error("store I/O error: {0}")]
    Io(#[from] std::io::Error),
    #[error("store format version mismatch: expected {expected}, found {found}")]
    VersionMismatch { expected: u32, found: u32 },
    #[error("store schema mismatch: expected {expected}, found {found}")]
    SchemaMismatch {
        expected: SchemaStamp,
        found: SchemaStamp,
    },
    #[error("integrity check failed for '{path}': expected {expected}, got {actual}")]
    IntegrityFailure {
        path: String,
        expected: String,
        actual: String,
    },
    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
    #[error("object not found: {0}")]
    ObjectNotFound(ObjectId),
    #[error("object already exists: {0}")]
    DuplicateObject(ObjectId),
    #[error("unknown entity '{0}'")]
    UnknownEntity(String),
    #[error("validation failed for {entity} {object}: {source}")]
    Validation {
        object: ObjectId,
        entity: String,
        source: SchemaError,
    },
    #[error(
        "unique constraint on {entity}.{attribute} violated: {object} repeats value {value} of {existing}"
    )]
    UniqueConstraint {
        entity: String,
        attribute: String,
        object: ObjectId,
        existing: ObjectId,
        value: String,
    },
}

impl StoreError {
    /// Reclassify plain I/O failures as the store at `path` being unavailable.
    pub(crate) fn unavailable_at(self, path: &Path) -> Self {
        match self {
            StoreError::Io(source) => StoreError::Unavailable {
                path: path.to_path_buf(),
                source,
            },
            other => other,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use cellar_schema::Fingerprint;

    #[test]
    fn store_error_display_unavailable() {
        let e = StoreError::Unavailable {
            path: PathBuf::from("/data/Tasks.cellar"),
            source: std::io::Error::new(std::io::ErrorKind::PermissionDenied, "denied"),
        };
        let msg = e.to_string();
        assert!(msg.contains("/data/Tasks.cellar"));
        assert!(msg.contains("denied"));
    }

    #[test]
    fn store_error_display_locked() {
        let e = StoreError::Locked(PathBuf::from("/data/Tasks.cellar.lock"));
        assert!(e.to_string().contains("Tasks.cellar.lock"));
    }

    #[test]
    fn store_error_display_version_mismatch() {
        let e = StoreError::VersionMismatch {
            expected: 2,
            found: 1,
        };
        let msg = e.to_string();
        assert!(msg.contains('2'));
        assert!(msg.contains('1'));
    }

    #[test]
    fn store_error_display_schema_mismatch_has_both_versions() {
        let e = StoreError::SchemaMismatch {
            expected: SchemaStamp {
                name: "Tasks".to_owned(),
                version: 3,
                fingerprint: Fingerprint::new("aaaaaaaaaaaaaaaa"),
            },
            found: SchemaStamp {
                name: "Tasks".to_owned(),
                version: 2,
                fingerprint: Fingerprint::new("bbbbbbbbbbbbbbbb"),
            },
        };
        let msg = e.to_string();
        assert!(msg.contains("v3"));
        assert!(msg.contains("v2"));
        assert!(msg.contains("aaaaaaaaaaaa"));
        assert!(msg.contains("bbbbbbbbbbbb"));
    }

    #[test]
    fn store_error_display_unique_constraint() {
        let e = StoreError::UniqueConstraint {
            entity: "Task".to_owned(),
            attribute: "title".to_owned(),
            object: ObjectId::new(7),
            existing: ObjectId::new(3),
            value: "\"Buy milk\"".to_owned(),
        };
        let msg = e.to_string();
        assert!(msg.contains("Task.title"));
        assert!(msg.contains("#7"));
        assert!(msg.contains("#3"));
    }

    #[test]
    fn unavailable_at_only_wraps_io() {
        let io = StoreError::Io(std::io::Error::other("full"));
        assert!(matches!(
            io.unavailable_at(Path::new("/x")),
            StoreError::Unavailable { .. }
        ));
        let other = StoreError::ObjectNotFound(ObjectId::new(1));
        assert!(matches!(
            other.unavailable_at(Path::new("/x")),
            StoreError::ObjectNotFound(_)
        ));
    }
}
