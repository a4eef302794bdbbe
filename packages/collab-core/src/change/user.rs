use serde::{Deserialize, Serialize};

use super::{Change, ChangeOperation, RouteTarget};
use crate::error::{CollabError, Result};
use crate::model::{AnnotationStore, Role, StoreEvent, User};

/// Creates a user or changes an existing user's role.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct UserChange {
    pub changed_ids: Vec<String>,
    pub user_id: String,
    pub role: Role,
    /// Role before the change; absent when the user was created
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub old_role: Option<Role>,
}

impl UserChange {
    pub fn new(user_id: impl Into<String>, role: Role) -> Self {
        let user_id = user_id.into();
        Self {
            changed_ids: vec![user_id.clone()],
            user_id,
            role,
            old_role: None,
        }
    }
}

impl ChangeOperation for UserChange {
    fn changed_ids(&self) -> &[String] {
        &self.changed_ids
    }

    fn apply(&mut self, store: &mut AnnotationStore) -> Result<Vec<StoreEvent>> {
        let previous = store.upsert_user(User::new(&self.user_id, self.role));
        self.old_role = previous.map(|user| user.role);
        Ok(vec![StoreEvent::UserUpdated {
            user_id: self.user_id.clone(),
        }])
    }

    fn inverse(&self) -> Result<Change> {
        Ok(match self.old_role {
            Some(old_role) => Change::User(UserChange {
                changed_ids: self.changed_ids.clone(),
                user_id: self.user_id.clone(),
                role: old_role,
                old_role: Some(self.role),
            }),
            None => Change::DeleteUser(DeleteUserChange {
                changed_ids: self.changed_ids.clone(),
                user_id: self.user_id.clone(),
                deleted_user: Some(User::new(&self.user_id, self.role)),
            }),
        })
    }

    fn route_target(&self, _store: &AnnotationStore) -> Result<RouteTarget> {
        Ok(RouteTarget::Unrouted)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DeleteUserChange {
    pub changed_ids: Vec<String>,
    pub user_id: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub deleted_user: Option<User>,
}

impl DeleteUserChange {
    pub fn new(user_id: impl Into<String>) -> Self {
        let user_id = user_id.into();
        Self {
            changed_ids: vec![user_id.clone()],
            user_id,
            deleted_user: None,
        }
    }
}

impl ChangeOperation for DeleteUserChange {
    fn changed_ids(&self) -> &[String] {
        &self.changed_ids
    }

    fn apply(&mut self, store: &mut AnnotationStore) -> Result<Vec<StoreEvent>> {
        self.deleted_user = Some(store.remove_user(&self.user_id)?);
        Ok(vec![StoreEvent::UserRemoved {
            user_id: self.user_id.clone(),
        }])
    }

    fn inverse(&self) -> Result<Change> {
        let user = self.deleted_user.as_ref().ok_or_else(|| {
            CollabError::InvalidChange(format!(
                "Cannot invert delete of user '{}' without a snapshot",
                self.user_id
            ))
        })?;
        Ok(Change::User(UserChange::new(&user.id, user.role)))
    }

    fn route_target(&self, _store: &AnnotationStore) -> Result<RouteTarget> {
        Ok(RouteTarget::Unrouted)
    }
}
