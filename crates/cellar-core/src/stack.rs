use crate::config::StackConfig;
use crate::lazy::{Stage, StageState};
use crate::object::ManagedObject;
use crate::session::WorkingSession;
use crate::transaction::Transaction;
use crate::CoreError;
use cellar_schema::{load_schema, SchemaBundle, SchemaModel, StackIdentity};
use cellar_store::{StoreCoordinator, StoreLayout};
use std::fmt;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tracing::{debug, info, warn};

/// Snapshot of the three stages of a [`PersistenceStack`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct StackStatus {
    pub schema: StageState,
    pub coordinator: StageState,
    pub session: StageState,
}

impl fmt::Display for StackStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "schema: {}, coordinator: {}, session: {}",
            self.schema, self.coordinator, self.session
        )
    }
}

/// Lazily built chain of schema model, store coordinator and working session
/// for one stack identity.
///
/// Construction does no I/O. The first operation that needs a stage builds it
/// and everything it depends on, in order, exactly once. A stage that fails
/// to build stays failed for the lifetime of the stack. Dropping the stack
/// releases the session, then the coordinator (and its file lock), then the
/// schema.
pub struct PersistenceStack {
    // Field order is drop order.
    session: Stage<WorkingSession>,
    coordinator: Stage<StoreCoordinator>,
    schema: Stage<SchemaModel>,
    identity: StackIdentity,
    layout: StoreLayout,
    schemas: SchemaBundle,
    debug_logging: Arc<AtomicBool>,
}

impl PersistenceStack {
    /// Validate `config` and prepare the chain without touching the filesystem.
    pub fn new(config: StackConfig) -> Result<Self, CoreError> {
        let identity = StackIdentity::parse(config.identity())
            .map_err(|e| CoreError::Configuration(e.to_string()))?;
        let data_dir = config.resolved_data_dir()?;
        let debug_logging = config.debug_logging();
        let schemas = config.into_schemas(&data_dir);
        debug!(
            "persistence stack '{identity}' configured at {}",
            data_dir.display()
        );

        Ok(Self {
            session: Stage::new("session"),
            coordinator: Stage::new("coordinator"),
            schema: Stage::new("schema"),
            identity,
            layout: StoreLayout::new(data_dir),
            schemas,
            debug_logging: Arc::new(AtomicBool::new(debug_logging)),
        })
    }

    /// Stack for `identity` with the default configuration.
    pub fn open(identity: &str) -> Result<Self, CoreError> {
        Self::new(StackConfig::new(identity))
    }

    pub fn identity(&self) -> &StackIdentity {
        &self.identity
    }

    pub fn data_dir(&self) -> &Path {
        self.layout.root()
    }

    /// Where the data file lives, whether or not it exists yet.
    pub fn data_file(&self) -> PathBuf {
        self.layout.data_file(&self.identity)
    }

    pub fn schema(&self) -> Result<&Arc<SchemaModel>, CoreError> {
        self.schema.get_or_try_init(|| {
            let model = load_schema(&self.schemas, &self.identity)
                .map_err(CoreError::from)
                .inspect_err(|e| self.echo_failure("schema", e))?;
            info!(
                "loaded schema '{}' v{} ({} entities)",
                model.name(),
                model.version(),
                model.entity_names().len()
            );
            Ok(model)
        })
    }

    pub fn coordinator(&self) -> Result<&Arc<StoreCoordinator>, CoreError> {
        self.coordinator.get_or_try_init(|| {
            let schema = Arc::clone(self.schema()?);
            StoreCoordinator::open(schema, &self.layout, &self.identity)
                .map_err(CoreError::from)
                .inspect_err(|e| self.echo_failure("coordinator", e))
        })
    }

    pub fn session(&self) -> Result<&Arc<WorkingSession>, CoreError> {
        self.session.get_or_try_init(|| {
            let coordinator = Arc::clone(self.coordinator()?);
            Ok(WorkingSession::with_debug_flag(
                coordinator,
                Arc::clone(&self.debug_logging),
            ))
        })
    }

    pub fn create_object(&self, entity: &str) -> Result<ManagedObject, CoreError> {
        self.session()?.create_object(entity)
    }

    pub fn fetch(&self, entity: &str) -> Result<Vec<ManagedObject>, CoreError> {
        self.session()?.fetch(entity)
    }

    pub fn delete(&self, object: &ManagedObject) -> Result<(), CoreError> {
        self.session()?.delete(object)
    }

    /// True if the session exists and holds uncommitted changes. Never builds
    /// any stage.
    pub fn has_pending_changes(&self) -> bool {
        self.session
            .get()
            .is_some_and(|session| session.has_pending_changes())
    }

    /// Commit pending changes.
    ///
    /// A stack whose session was never built has nothing to save and returns
    /// `Ok` without any I/O. Commit failures are always returned; with debug
    /// logging on they are also logged.
    pub fn save(&self) -> Result<(), CoreError> {
        let Some(session) = self.session.settled()? else {
            debug!("save on '{}': session not materialized", self.identity);
            return Ok(());
        };
        session.commit().map(|_| ())
    }

    /// Run `changes` in a transaction and commit afterwards if `should_save`.
    pub fn write<R, F>(&self, should_save: bool, changes: F) -> Result<R, CoreError>
    where
        F: FnOnce(&Transaction<'_>) -> Result<R, CoreError>,
    {
        self.session()?.write(should_save, changes)
    }

    pub fn begin(&self) -> Result<Transaction<'_>, CoreError> {
        self.session()?.begin()
    }

    /// Discard pending changes. Does nothing if the session was never built.
    pub fn rollback(&self) -> Result<(), CoreError> {
        match self.session.settled()? {
            Some(session) => session.rollback(),
            None => Ok(()),
        }
    }

    pub fn status(&self) -> StackStatus {
        StackStatus {
            schema: self.schema.state(),
            coordinator: self.coordinator.state(),
            session: self.session.state(),
        }
    }

    pub fn debug_logging(&self) -> bool {
        self.debug_logging.load(Ordering::Relaxed)
    }

    /// Echo commit outcomes and stage failures at info/warn level. Does not
    /// change what any operation returns.
    pub fn set_debug_logging(&self, enabled: bool) {
        self.debug_logging.store(enabled, Ordering::Relaxed);
    }

    /// Echo a stage's own build failure. Failures of the stages it depends on
    /// were echoed where they happened.
    fn echo_failure(&self, stage: &str, e: &CoreError) {
        if self.debug_logging() {
            warn!("'{}' {stage} unavailable: {e}", self.identity);
        }
    }
}

impl fmt::Debug for PersistenceStack {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("PersistenceStack")
            .field("identity", &self.identity)
            .field("data_dir", &self.layout.root())
            .field("status", &self.status())
            .finish_non_exhaustive()
    }
}
