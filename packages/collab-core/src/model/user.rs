use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::error::CollabError;

/// Access level of an authenticated actor.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum Role {
    ReadOnly,
    User,
    Admin,
}

impl Role {
    fn rank(self) -> u8 {
        match self {
            Role::ReadOnly => 0,
            Role::User => 1,
            Role::Admin => 2,
        }
    }

    /// Whether this role is at least as privileged as `required`.
    pub fn permits(self, required: Role) -> bool {
        self.rank() >= required.rank()
    }

    pub fn as_str(self) -> &'static str {
        match self {
            Role::ReadOnly => "readOnly",
            Role::User => "user",
            Role::Admin => "admin",
        }
    }
}

impl fmt::Display for Role {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Role {
    type Err = CollabError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "readOnly" => Ok(Role::ReadOnly),
            "user" => Ok(Role::User),
            "admin" => Ok(Role::Admin),
            other => Err(CollabError::InvalidChange(format!("Unknown role '{}'", other))),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct User {
    #[serde(rename = "_id")]
    pub id: String,
    pub role: Role,
}

impl User {
    pub fn new(id: impl Into<String>, role: Role) -> Self {
        Self {
            id: id.into(),
            role,
        }
    }
}
