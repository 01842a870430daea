//! Lazy persistence stack for Cellar.
//!
//! This crate ties the schema and store layers together into the
//! `PersistenceStack` façade: a chain of one-shot stages (schema model, store
//! coordinator, working session) materialized on first use. The session tracks
//! `ManagedObject`s through an explicit lifecycle and commits their changes
//! atomically, either directly or through a scoped `Transaction`.

pub mod config;
pub mod lazy;
pub mod lifecycle;
pub mod logging;
pub mod object;
pub mod session;
pub mod stack;
pub mod transaction;

pub use config::StackConfig;
pub use lazy::{Stage, StageState};
pub use lifecycle::{validate_transition, ObjectState};
pub use logging::{init_tracing, LOG_ENV};
pub use object::ManagedObject;
pub use session::WorkingSession;
pub use stack::{PersistenceStack, StackStatus};
pub use transaction::Transaction;

pub use cellar_schema::{AttributeKind, AttributeValue, SchemaModel, StackIdentity};
pub use cellar_store::{CommitReceipt, ObjectId, StoreCoordinator};

use cellar_schema::SchemaError;
use cellar_store::StoreError;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum CoreError {
    #[error("configuration error: {0}")]
    Configuration(String),
    #[error("schema error: {0}")]
    Schema(#[from] SchemaError),
    #[error(transparent)]
    StoreUnavailable(StoreError),
    #[error(transparent)]
    SchemaMismatch(StoreError),
    #[error(transparent)]
    Store(StoreError),
    #[error("unknown entity '{entity}' in schema '{schema}'")]
    UnknownEntity { entity: String, schema: String },
    #[error("invalid value: {0}")]
    InvalidValue(#[source] SchemaError),
    #[error(transparent)]
    Commit(#[from] CommitError),
    #[error("{stage} stage failed earlier: {reason}")]
    StageFailed { stage: &'static str, reason: String },
    #[error("{0} stage requested while it is being initialized on the same thread")]
    Reentrant(&'static str),
    #[error("a transaction is already open on this session")]
    TransactionActive,
    #[error("object {0} is no longer tracked by a live session")]
    Detached(ObjectId),
    #[error("invalid state transition: {from} -> {to}")]
    InvalidTransition { from: String, to: String },
}

impl From<StoreError> for CoreError {
    fn from(e: StoreError) -> Self {
        match e {
            StoreError::Unavailable { .. } | StoreError::Locked(_) | StoreError::Io(_) => {
                CoreError::StoreUnavailable(e)
            }
            StoreError::SchemaMismatch { .. } | StoreError::VersionMismatch { .. } => {
                CoreError::SchemaMismatch(e)
            }
            other => CoreError::Store(other),
        }
    }
}

/// Broad classification of a failed commit.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CommitFailure {
    /// A value does not match the schema.
    Validation,
    /// A uniqueness or object-existence constraint was violated.
    Constraint,
    /// The data file could not be written.
    Io,
    Other,
}

impl std::fmt::Display for CommitFailure {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            CommitFailure::Validation => write!(f, "validation"),
            CommitFailure::Constraint => write!(f, "constraint"),
            CommitFailure::Io => write!(f, "io"),
            CommitFailure::Other => write!(f, "other"),
        }
    }
}

/// A commit the store refused. The session's pending changes are untouched.
#[derive(Debug, Error)]
#[error("commit of {pending} pending change(s) failed: {source}")]
pub struct CommitError {
    pending: usize,
    source: StoreError,
}

impl CommitError {
    pub(crate) fn new(pending: usize, source: StoreError) -> Self {
        Self { pending, source }
    }

    /// Number of changes that were submitted and are still pending.
    pub fn pending(&self) -> usize {
        self.pending
    }

    pub fn store_error(&self) -> &StoreError {
        &self.source
    }

    pub fn kind(&self) -> CommitFailure {
        match self.source {
            StoreError::Validation { .. } | StoreError::UnknownEntity(_) => {
                CommitFailure::Validation
            }
            StoreError::UniqueConstraint { .. }
            | StoreError::ObjectNotFound(_)
            | StoreError::DuplicateObject(_) => CommitFailure::Constraint,
            StoreError::Io(_) | StoreError::Unavailable { .. } => CommitFailure::Io,
            _ => CommitFailure::Other,
        }
    }
}
