use crate::CoreError;
use std::fmt;

/// Change-tracking state of a managed object within its session.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ObjectState {
    /// Created in the session, never committed.
    Unsaved,
    /// Matches the store.
    Committed,
    /// Committed once, edited since.
    Mutated,
    /// Committed once, deletion pending.
    Deleted,
    /// No longer tracked.
    Discarded,
}

impl ObjectState {
    /// Whether an object in this state contributes to the next commit.
    pub fn is_pending(self) -> bool {
        matches!(
            self,
            ObjectState::Unsaved | ObjectState::Mutated | ObjectState::Deleted
        )
    }
}

impl fmt::Display for ObjectState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ObjectState::Unsaved => write!(f, "unsaved"),
            ObjectState::Committed => write!(f, "committed"),
            ObjectState::Mutated => write!(f, "mutated"),
            ObjectState::Deleted => write!(f, "deleted"),
            ObjectState::Discarded => write!(f, "discarded"),
        }
    }
}

pub fn validate_transition(from: ObjectState, to: ObjectState) -> Result<(), CoreError> {
    let valid = matches!(
        (from, to),
        (
            ObjectState::Unsaved | ObjectState::Deleted,
            ObjectState::Committed | ObjectState::Discarded
        ) | (
            ObjectState::Committed,
            ObjectState::Mutated | ObjectState::Deleted
        ) | (
            ObjectState::Mutated,
            ObjectState::Committed | ObjectState::Deleted
        )
    );

    if valid {
        Ok(())
    } else {
        Err(CoreError::InvalidTransition {
            from: from.to_string(),
            to: to.to_string(),
        })
    }
}
