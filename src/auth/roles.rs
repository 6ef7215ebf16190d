use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::auth::middleware::AuthUser;
use crate::error::ApiError;

/// Church roles. Each maps to a boolean column on `users`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Role {
    Admin,
    Pastor,
    DeptHead,
    Member,
}

impl Role {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Admin => "admin",
            Self::Pastor => "pastor",
            Self::DeptHead => "dept_head",
            Self::Member => "member",
        }
    }
}

impl fmt::Display for Role {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Role {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "admin" => Ok(Self::Admin),
            "pastor" => Ok(Self::Pastor),
            "dept_head" => Ok(Self::DeptHead),
            "member" => Ok(Self::Member),
            other => anyhow::bail!("unknown role: {other}"),
        }
    }
}

/// The role flags stored on a user row.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize, sqlx::FromRow)]
#[allow(clippy::struct_excessive_bools)]
pub struct RoleFlags {
    pub is_admin: bool,
    pub is_pastor: bool,
    pub is_dept_head: bool,
    pub is_member: bool,
}

impl RoleFlags {
    pub fn has(self, role: Role) -> bool {
        match role {
            Role::Admin => self.is_admin,
            Role::Pastor => self.is_pastor,
            Role::DeptHead => self.is_dept_head,
            Role::Member => self.is_member,
        }
    }

    pub fn has_any(self, roles: &[Role]) -> bool {
        roles.iter().any(|r| self.has(*r))
    }

    pub fn roles(self) -> Vec<Role> {
        [Role::Admin, Role::Pastor, Role::DeptHead, Role::Member]
            .into_iter()
            .filter(|r| self.has(*r))
            .collect()
    }
}

/// Roles allowed to manage pastoral content (anonymous messages, baptisms,
/// broadcasts, deletions of announcements and events).
pub const PASTORAL: &[Role] = &[Role::Admin, Role::Pastor];

/// Roles allowed to publish announcements and events.
pub const PUBLISHERS: &[Role] = &[Role::Admin, Role::Pastor, Role::DeptHead];

pub const ADMIN_ONLY: &[Role] = &[Role::Admin];

/// Reject the request with 403 unless the user holds one of `roles`.
pub fn require_any_role(auth: &AuthUser, roles: &[Role]) -> Result<(), ApiError> {
    if auth.roles.has_any(roles) {
        Ok(())
    } else {
        tracing::debug!(user_id = %auth.user_id, required = ?roles, "role check denied");
        Err(ApiError::Forbidden)
    }
}
