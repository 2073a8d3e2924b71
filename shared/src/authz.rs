//! Ownership-based authorization decisions.
//!
//! Pure functions consulted by list screens to decide whether to render
//! mutation affordances, and by [`crate::collection`] before any mutation
//! reaches the backend.

use crate::error::CoreError;
use crate::model::{RecordBase, UserId};

/// True iff a user is signed in and owns `record`.
pub fn can_mutate<R: RecordBase + ?Sized>(current_user_id: Option<&UserId>, record: &R) -> bool {
    current_user_id.is_some_and(|id| id == record.owner_id())
}

/// Any signed-in user may create listings.
pub fn can_list_new_item(current_user_id: Option<&UserId>) -> bool {
    current_user_id.is_some()
}

pub fn require_mutate<R: RecordBase + ?Sized>(
    current_user_id: Option<&UserId>,
    record: &R,
) -> Result<(), CoreError> {
    if can_mutate(current_user_id, record) {
        Ok(())
    } else {
        Err(CoreError::Forbidden {
            id: Some(record.id().clone()),
        })
    }
}

pub fn require_signed_in(current_user_id: Option<&UserId>) -> Result<(), CoreError> {
    if can_list_new_item(current_user_id) {
        Ok(())
    } else {
        Err(CoreError::Forbidden { id: None })
    }
}
