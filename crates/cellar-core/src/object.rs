use crate::lifecycle::{validate_transition, ObjectState};
use crate::session::{SessionShared, Values};
use crate::CoreError;
use cellar_schema::{AttributeValue, EntityName, SchemaError};
use cellar_store::ObjectId;
use std::collections::BTreeMap;
use std::sync::{Arc, Weak};

/// Handle to an object tracked by a [`WorkingSession`](crate::WorkingSession).
///
/// Handles are cheap to clone and never keep the session alive. Once the
/// object is discarded, or its session is gone, the handle reports
/// [`ObjectState::Discarded`] and every accessor fails with `Detached`.
#[derive(Debug, Clone)]
pub struct ManagedObject {
    id: ObjectId,
    entity: EntityName,
    session: Weak<SessionShared>,
}

impl ManagedObject {
    pub(crate) fn new(id: ObjectId, entity: EntityName, session: Weak<SessionShared>) -> Self {
        Self {
            id,
            entity,
            session,
        }
    }

    pub fn id(&self) -> ObjectId {
        self.id
    }

    pub fn entity(&self) -> &str {
        &self.entity
    }

    pub fn state(&self) -> ObjectState {
        let Some(shared) = self.session.upgrade() else {
            return ObjectState::Discarded;
        };
        let state = shared.lock().get(&self.id).map(|o| o.state);
        state.unwrap_or(ObjectState::Discarded)
    }

    pub fn is_tracked(&self) -> bool {
        self.state() != ObjectState::Discarded
    }

    /// Current value of `attribute`, `None` when unset.
    pub fn get(&self, attribute: &str) -> Result<Option<AttributeValue>, CoreError> {
        let shared = self.shared()?;
        let entity = shared.entity(&self.entity)?;
        if entity.attribute(attribute).is_none() {
            return Err(CoreError::InvalidValue(SchemaError::UnknownAttribute {
                entity: self.entity.to_string(),
                attribute: attribute.to_owned(),
            }));
        }
        let objects = shared.lock();
        let object = objects.get(&self.id).ok_or(CoreError::Detached(self.id))?;
        Ok(object.values.get(attribute).cloned())
    }

    pub fn values(&self) -> Result<BTreeMap<String, AttributeValue>, CoreError> {
        let shared = self.shared()?;
        let objects = shared.lock();
        let object = objects.get(&self.id).ok_or(CoreError::Detached(self.id))?;
        Ok(object.values.clone())
    }

    /// Assign `value` to `attribute`, type-checked against the schema.
    ///
    /// Editing a committed object marks it mutated; restoring every value it
    /// had at the last commit marks it committed again. Deleted objects
    /// cannot be edited.
    pub fn set(&self, attribute: &str, value: impl Into<AttributeValue>) -> Result<(), CoreError> {
        let value = value.into();
        let shared = self.shared()?;
        shared
            .entity(&self.entity)?
            .check_value(attribute, &value)
            .map_err(CoreError::InvalidValue)?;
        self.edit(&shared, |values| {
            values.insert(attribute.to_owned(), value);
        })
    }

    /// Clear an optional attribute.
    pub fn unset(&self, attribute: &str) -> Result<(), CoreError> {
        let shared = self.shared()?;
        let entity = shared.entity(&self.entity)?;
        match entity.attribute(attribute) {
            None => {
                return Err(CoreError::InvalidValue(SchemaError::UnknownAttribute {
                    entity: self.entity.to_string(),
                    attribute: attribute.to_owned(),
                }))
            }
            Some(desc) if !desc.is_optional() => {
                return Err(CoreError::InvalidValue(SchemaError::MissingAttribute {
                    entity: self.entity.to_string(),
                    attribute: attribute.to_owned(),
                }))
            }
            Some(_) => {}
        }
        self.edit(&shared, |values| {
            values.remove(attribute);
        })
    }

    fn edit(
        &self,
        shared: &SessionShared,
        change: impl FnOnce(&mut Values),
    ) -> Result<(), CoreError> {
        let mut objects = shared.lock();
        shared.ensure_writable()?;
        let object = objects
            .get_mut(&self.id)
            .ok_or(CoreError::Detached(self.id))?;

        let mut values = object.values.clone();
        change(&mut values);
        let next = match object.state {
            ObjectState::Unsaved => ObjectState::Unsaved,
            ObjectState::Committed | ObjectState::Mutated
                if object.committed.as_ref() == Some(&values) =>
            {
                ObjectState::Committed
            }
            ObjectState::Committed | ObjectState::Mutated => ObjectState::Mutated,
            from => {
                validate_transition(from, ObjectState::Mutated)?;
                from
            }
        };
        if next != object.state {
            validate_transition(object.state, next)?;
        }
        object.values = values;
        object.state = next;
        Ok(())
    }

    fn shared(&self) -> Result<Arc<SessionShared>, CoreError> {
        self.session.upgrade().ok_or(CoreError::Detached(self.id))
    }

    pub(crate) fn is_owned_by(&self, shared: &Arc<SessionShared>) -> bool {
        Weak::as_ptr(&self.session) == Arc::as_ptr(shared)
    }
}

impl PartialEq for ManagedObject {
    fn eq(&self, other: &Self) -> bool {
        self.id == other.id && Weak::ptr_eq(&self.session, &other.session)
    }
}

impl Eq for ManagedObject {}
