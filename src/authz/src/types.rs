//! Core authorization types

use std::collections::BTreeSet;
use std::fmt;

use chrono::{DateTime, TimeZone, Utc};
use serde::{Deserialize, Serialize};

/// User identifier
pub type UserId = String;

/// Role name, unique within its scope
pub type RoleName = String;

/// Scope name, unique process-wide
pub type ScopeName = String;

/// A concrete occurrence of a scope, e.g. `("organization", "acme")`
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct ScopeRef {
    /// Scope level name
    pub scope: ScopeName,
    /// Scope instance identifier
    pub instance: String,
}

impl ScopeRef {
    pub fn new(scope: impl Into<String>, instance: impl Into<String>) -> Self {
        Self {
            scope: scope.into(),
            instance: instance.into(),
        }
    }
}

impl fmt::Display for ScopeRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}", self.scope, self.instance)
    }
}

/// The (user, role, scope, instance) tuple an assignment is keyed by
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Grant {
    /// User receiving or losing the role
    pub user: UserId,
    /// Role name
    pub role: RoleName,
    /// Where the role applies
    #[serde(flatten)]
    pub target: ScopeRef,
}

impl Grant {
    pub fn new(
        user: impl Into<String>,
        role: impl Into<String>,
        scope: impl Into<String>,
        instance: impl Into<String>,
    ) -> Self {
        Self {
            user: user.into(),
            role: role.into(),
            target: ScopeRef::new(scope, instance),
        }
    }

    pub fn scope(&self) -> &str {
        &self.target.scope
    }

    pub fn instance(&self) -> &str {
        &self.target.instance
    }
}

impl fmt::Display for Grant {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}@{}", self.user, self.role, self.target)
    }
}

/// A persisted role assignment fact
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RoleAssignment {
    pub user: UserId,
    pub role: RoleName,
    pub target: ScopeRef,
    /// Actor that created the assignment
    pub granted_by: UserId,
    pub granted_at: DateTime<Utc>,
}

/// A role held at a scope instance, as returned by `get_user_roles`
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct HeldRole {
    pub role: RoleName,
    pub target: ScopeRef,
}

/// Ordered set of roles currently held by a user
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct UserRoles {
    roles: BTreeSet<HeldRole>,
}

impl UserRoles {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&mut self, role: impl Into<String>, target: ScopeRef) -> bool {
        self.roles.insert(HeldRole {
            role: role.into(),
            target,
        })
    }

    /// Pure set-membership query
    pub fn has_role(&self, role: &str, scope: &str, instance: &str) -> bool {
        self.roles.iter().any(|held| {
            held.role == role && held.target.scope == scope && held.target.instance == instance
        })
    }

    /// Roles held at exactly the given scope instance
    pub fn at<'a>(&'a self, target: &'a ScopeRef) -> impl Iterator<Item = &'a HeldRole> + 'a {
        self.roles.iter().filter(move |held| &held.target == target)
    }

    pub fn iter(&self) -> impl Iterator<Item = &HeldRole> {
        self.roles.iter()
    }

    pub fn len(&self) -> usize {
        self.roles.len()
    }

    pub fn is_empty(&self) -> bool {
        self.roles.is_empty()
    }
}

impl FromIterator<HeldRole> for UserRoles {
    fn from_iter<I: IntoIterator<Item = HeldRole>>(iter: I) -> Self {
        Self {
            roles: iter.into_iter().collect(),
        }
    }
}

impl IntoIterator for UserRoles {
    type Item = HeldRole;
    type IntoIter = std::collections::btree_set::IntoIter<HeldRole>;

    fn into_iter(self) -> Self::IntoIter {
        self.roles.into_iter()
    }
}

/// Kind of an audit trail event
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum AssignmentEventKind {
    Granted,
    Revoked,
}

impl AssignmentEventKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Granted => "granted",
            Self::Revoked => "revoked",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "granted" => Some(Self::Granted),
            "revoked" => Some(Self::Revoked),
            _ => None,
        }
    }
}

/// Immutable audit trail entry for a grant or revocation
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AssignmentEvent {
    pub id: String,
    pub kind: AssignmentEventKind,
    pub grant: Grant,
    pub actor: UserId,
    pub occurred_at: DateTime<Utc>,
}

/// Converts stored unix milliseconds back into a timestamp
pub(crate) fn from_millis(millis: i64) -> DateTime<Utc> {
    Utc.timestamp_millis_opt(millis)
        .single()
        .unwrap_or_else(|| DateTime::<Utc>::from(std::time::UNIX_EPOCH))
}
