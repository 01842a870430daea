use crate::lifecycle::{validate_transition, ObjectState};
use crate::object::ManagedObject;
use crate::transaction::Transaction;
use crate::{CommitError, CoreError};
use cellar_schema::{AttributeValue, EntityDescription, EntityName, SchemaModel};
use cellar_store::{ChangeSet, CommitReceipt, ObjectId, StoreCoordinator, StoredRecord};
use std::collections::btree_map::Entry;
use std::collections::BTreeMap;
use std::fmt;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::thread::{self, ThreadId};
use tracing::{debug, info, warn};

pub(crate) type Values = BTreeMap<String, AttributeValue>;
pub(crate) type Tracked = BTreeMap<ObjectId, TrackedObject>;

#[derive(Debug, Clone)]
pub(crate) struct TrackedObject {
    pub(crate) entity: EntityName,
    pub(crate) values: Values,
    /// Values as of the last commit; `None` until first committed.
    pub(crate) committed: Option<Values>,
    pub(crate) state: ObjectState,
}

impl TrackedObject {
    fn unsaved(entity: EntityName, values: Values) -> Self {
        Self {
            entity,
            values,
            committed: None,
            state: ObjectState::Unsaved,
        }
    }

    fn committed(entity: EntityName, values: Values) -> Self {
        Self {
            entity,
            committed: Some(values.clone()),
            values,
            state: ObjectState::Committed,
        }
    }

    fn record(&self) -> StoredRecord {
        StoredRecord::new(self.entity.clone(), self.values.clone())
    }
}

/// State reachable from object handles.
pub(crate) struct SessionShared {
    schema: Arc<SchemaModel>,
    objects: Mutex<Tracked>,
    /// Thread that opened the current transaction. Always taken after
    /// `objects` when both are held.
    transaction_owner: Mutex<Option<ThreadId>>,
}

impl SessionShared {
    pub(crate) fn lock(&self) -> MutexGuard<'_, Tracked> {
        self.objects.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn owner(&self) -> MutexGuard<'_, Option<ThreadId>> {
        self.transaction_owner
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
    }

    /// Reject mutation from any thread other than the one holding the open
    /// transaction. Call with the `objects` lock held.
    pub(crate) fn ensure_writable(&self) -> Result<(), CoreError> {
        match *self.owner() {
            Some(owner) if owner != thread::current().id() => Err(CoreError::TransactionActive),
            _ => Ok(()),
        }
    }

    /// Reject session-wide commit or rollback while any transaction is open.
    /// Call with the `objects` lock held.
    fn ensure_no_transaction(&self) -> Result<(), CoreError> {
        if self.owner().is_some() {
            return Err(CoreError::TransactionActive);
        }
        Ok(())
    }

    pub(crate) fn entity(&self, name: &str) -> Result<&EntityDescription, CoreError> {
        self.schema
            .entity(name)
            .ok_or_else(|| CoreError::UnknownEntity {
                entity: name.to_owned(),
                schema: self.schema.name().to_owned(),
            })
    }
}

/// Mutable context tracking object changes on top of one store coordinator.
///
/// All mutation and commit calls are serialized by one internal mutex; a
/// commit holds it across the store write. The session never writes until
/// [`commit`](Self::commit) is called.
///
/// A session is a single unit of work even when shared between threads: a
/// commit writes every pending change in the session, including objects
/// another thread is still filling in. Callers that share a session must
/// either stage complete objects or give required attributes defaults.
/// While a [`Transaction`] is open, only the thread that opened it may
/// mutate the session; other threads get `TransactionActive`.
pub struct WorkingSession {
    coordinator: Arc<StoreCoordinator>,
    shared: Arc<SessionShared>,
    debug_logging: Arc<AtomicBool>,
}

impl WorkingSession {
    pub fn new(coordinator: Arc<StoreCoordinator>) -> Self {
        Self::with_debug_flag(coordinator, Arc::new(AtomicBool::new(false)))
    }

    pub(crate) fn with_debug_flag(
        coordinator: Arc<StoreCoordinator>,
        debug_logging: Arc<AtomicBool>,
    ) -> Self {
        let shared = Arc::new(SessionShared {
            schema: Arc::clone(coordinator.schema()),
            objects: Mutex::new(Tracked::new()),
            transaction_owner: Mutex::new(None),
        });
        Self {
            coordinator,
            shared,
            debug_logging,
        }
    }

    pub fn schema(&self) -> &Arc<SchemaModel> {
        &self.shared.schema
    }

    pub fn coordinator(&self) -> &Arc<StoreCoordinator> {
        &self.coordinator
    }

    pub fn debug_logging(&self) -> bool {
        self.debug_logging.load(Ordering::Relaxed)
    }

    pub fn set_debug_logging(&self, enabled: bool) {
        self.debug_logging.store(enabled, Ordering::Relaxed);
    }

    /// Insert a new object of `entity` with its schema defaults applied.
    ///
    /// The object is pending until the next commit. An unknown entity leaves
    /// the session untouched.
    pub fn create_object(&self, entity: &str) -> Result<ManagedObject, CoreError> {
        let desc = self.shared.entity(entity)?;
        let mut objects = self.shared.lock();
        self.shared.ensure_writable()?;
        let id = self.coordinator.allocate_id();
        let name = desc.name().clone();
        objects.insert(id, TrackedObject::unsaved(name.clone(), desc.defaults()));
        drop(objects);
        debug!("created {name} {id}");
        Ok(self.handle(id, name))
    }

    /// Every live object of `entity`, committed or pending, ordered by id.
    /// Objects pending deletion are left out.
    pub fn fetch(&self, entity: &str) -> Result<Vec<ManagedObject>, CoreError> {
        let name = self.shared.entity(entity)?.name().clone();
        let mut objects = self.shared.lock();
        for (id, record) in self.coordinator.records(entity) {
            objects
                .entry(id)
                .or_insert_with(|| TrackedObject::committed(record.entity, record.values));
        }
        Ok(objects
            .iter()
            .filter(|(_, o)| o.entity == name && o.state != ObjectState::Deleted)
            .map(|(id, _)| self.handle(*id, name.clone()))
            .collect())
    }

    /// Mark `object` for deletion. Objects never committed are discarded at once.
    pub fn delete(&self, object: &ManagedObject) -> Result<(), CoreError> {
        let id = object.id();
        if !object.is_owned_by(&self.shared) {
            return Err(CoreError::Detached(id));
        }
        let mut objects = self.shared.lock();
        self.shared.ensure_writable()?;
        let Some(state) = objects.get(&id).map(|o| o.state) else {
            return Err(CoreError::Detached(id));
        };
        match state {
            ObjectState::Deleted => {}
            ObjectState::Unsaved => {
                validate_transition(ObjectState::Unsaved, ObjectState::Discarded)?;
                objects.remove(&id);
                debug!("discarded unsaved {} {id}", object.entity());
            }
            from => {
                validate_transition(from, ObjectState::Deleted)?;
                if let Some(tracked) = objects.get_mut(&id) {
                    tracked.state = ObjectState::Deleted;
                }
            }
        }
        Ok(())
    }

    pub fn has_pending_changes(&self) -> bool {
        self.shared.lock().values().any(|o| o.state.is_pending())
    }

    /// Number of objects the next commit would write.
    pub fn pending_changes(&self) -> usize {
        self.shared
            .lock()
            .values()
            .filter(|o| o.state.is_pending())
            .count()
    }

    /// Write every pending change to the store in one atomic commit.
    ///
    /// Returns `Ok(None)` without touching the store when nothing is pending.
    /// On failure every tracked object stays exactly as it was, so the commit
    /// can be retried after fixing the cause.
    pub fn commit(&self) -> Result<Option<CommitReceipt>, CoreError> {
        let objects = self.shared.lock();
        self.shared.ensure_no_transaction()?;
        self.commit_locked(objects)
    }

    /// Drop every pending change: unsaved objects are discarded, edited and
    /// deleted objects return to their committed values.
    pub fn rollback(&self) -> Result<(), CoreError> {
        let mut objects = self.shared.lock();
        self.shared.ensure_no_transaction()?;
        objects.retain(|_, o| o.state != ObjectState::Unsaved);
        for object in objects.values_mut() {
            if matches!(object.state, ObjectState::Mutated | ObjectState::Deleted) {
                if let Some(committed) = &object.committed {
                    object.values = committed.clone();
                }
                object.state = ObjectState::Committed;
            }
        }
        Ok(())
    }

    /// Open a transaction scoped to the returned guard and bound to the
    /// calling thread.
    pub fn begin(&self) -> Result<Transaction<'_>, CoreError> {
        let objects = self.shared.lock();
        {
            let mut owner = self.shared.owner();
            if owner.is_some() {
                return Err(CoreError::TransactionActive);
            }
            *owner = Some(thread::current().id());
        }
        Ok(Transaction::new(self, objects.clone()))
    }

    /// Run `changes` inside a transaction, committing afterwards if
    /// `should_save`. Otherwise the changes stay pending in the session.
    ///
    /// If `changes` fails the transaction is rolled back and its error returned.
    pub fn write<R, F>(&self, should_save: bool, changes: F) -> Result<R, CoreError>
    where
        F: FnOnce(&Transaction<'_>) -> Result<R, CoreError>,
    {
        let tx = self.begin()?;
        let value = changes(&tx)?;
        if should_save {
            tx.commit()?;
        } else {
            tx.release();
        }
        Ok(value)
    }

    pub(crate) fn commit_pending(&self) -> Result<Option<CommitReceipt>, CoreError> {
        self.commit_locked(self.shared.lock())
    }

    fn commit_locked(
        &self,
        mut objects: MutexGuard<'_, Tracked>,
    ) -> Result<Option<CommitReceipt>, CoreError> {
        let changes = change_set(&objects);
        if changes.is_empty() {
            debug!("nothing to commit");
            return Ok(None);
        }

        match self.coordinator.commit(&changes) {
            Ok(receipt) => {
                objects.retain(|_, o| o.state != ObjectState::Deleted);
                for object in objects.values_mut() {
                    if matches!(object.state, ObjectState::Unsaved | ObjectState::Mutated) {
                        object.committed = Some(object.values.clone());
                        object.state = ObjectState::Committed;
                    }
                }
                if self.debug_logging() {
                    info!(
                        "saved {} change(s) to '{}' (generation {})",
                        receipt.total(),
                        self.schema().name(),
                        receipt.generation
                    );
                }
                Ok(Some(receipt))
            }
            Err(source) => {
                let err = CommitError::new(changes.len(), source);
                if self.debug_logging() {
                    warn!("save to '{}' failed: {err}", self.schema().name());
                }
                Err(err.into())
            }
        }
    }

    /// Return to `savepoint`. Objects fetched since then stay tracked as
    /// committed, since they exist in the store regardless.
    pub(crate) fn restore(&self, savepoint: Tracked) {
        let mut objects = self.shared.lock();
        let current = std::mem::replace(&mut *objects, savepoint);
        for (id, object) in current {
            if let (Entry::Vacant(slot), Some(committed)) = (objects.entry(id), object.committed)
            {
                slot.insert(TrackedObject::committed(object.entity, committed));
            }
        }
    }

    pub(crate) fn end_transaction(&self) {
        *self.shared.owner() = None;
    }

    fn handle(&self, id: ObjectId, entity: EntityName) -> ManagedObject {
        ManagedObject::new(id, entity, Arc::downgrade(&self.shared))
    }
}

impl fmt::Debug for WorkingSession {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("WorkingSession")
            .field("schema", &self.schema().name())
            .field("store", &self.coordinator.path())
            .field("pending", &self.pending_changes())
            .finish_non_exhaustive()
    }
}

impl Drop for WorkingSession {
    fn drop(&mut self) {
        let pending = self.pending_changes();
        if pending > 0 {
            debug!("session dropped with {pending} uncommitted change(s)");
        }
    }
}

fn change_set(objects: &Tracked) -> ChangeSet {
    let mut changes = ChangeSet::new();
    for (id, object) in objects {
        match object.state {
            ObjectState::Unsaved => changes.insert(*id, object.record()),
            ObjectState::Mutated => changes.update(*id, object.record()),
            ObjectState::Deleted => changes.delete(*id),
            ObjectState::Committed | ObjectState::Discarded => {}
        }
    }
    changes
}
