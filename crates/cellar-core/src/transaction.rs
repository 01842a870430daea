use crate::object::ManagedObject;
use crate::session::{Tracked, WorkingSession};
use crate::CoreError;
use cellar_store::CommitReceipt;
use tracing::debug;

/// A scoped unit of work on a [`WorkingSession`].
///
/// Captures the session's tracked objects when opened. Finish it with
/// [`commit`](Self::commit), [`rollback`](Self::rollback) or
/// [`release`](Self::release); dropping it unfinished rolls back to the
/// savepoint. Only one transaction can be open per session, and while it is
/// open the session rejects mutation from every other thread.
pub struct Transaction<'s> {
    session: &'s WorkingSession,
    savepoint: Option<Tracked>,
}

impl<'s> Transaction<'s> {
    pub(crate) fn new(session: &'s WorkingSession, savepoint: Tracked) -> Self {
        Self {
            session,
            savepoint: Some(savepoint),
        }
    }

    pub fn session(&self) -> &'s WorkingSession {
        self.session
    }

    pub fn create_object(&self, entity: &str) -> Result<ManagedObject, CoreError> {
        self.session.create_object(entity)
    }

    pub fn fetch(&self, entity: &str) -> Result<Vec<ManagedObject>, CoreError> {
        self.session.fetch(entity)
    }

    pub fn delete(&self, object: &ManagedObject) -> Result<(), CoreError> {
        self.session.delete(object)
    }

    pub fn has_pending_changes(&self) -> bool {
        self.session.has_pending_changes()
    }

    /// Commit everything pending in the session.
    ///
    /// On failure the staged changes stay pending in the session, not rolled
    /// back, so the caller can fix them and save again.
    pub fn commit(mut self) -> Result<Option<CommitReceipt>, CoreError> {
        self.savepoint = None;
        self.session.commit_pending()
    }

    /// Undo everything done since the transaction was opened.
    pub fn rollback(mut self) {
        if let Some(savepoint) = self.savepoint.take() {
            self.session.restore(savepoint);
        }
    }

    /// Close the transaction and keep its changes pending in the session.
    pub fn release(mut self) {
        self.savepoint = None;
    }
}

impl Drop for Transaction<'_> {
    fn drop(&mut self) {
        if let Some(savepoint) = self.savepoint.take() {
            debug!("transaction dropped unfinished, rolling back");
            self.session.restore(savepoint);
        }
        self.session.end_transaction();
    }
}
