//! Route permission checks.

use std::collections::{BTreeSet, HashMap};
use std::fmt;
use std::sync::Arc;

use crate::request::Session;

/// Message shown to anonymous callers of a protected route.
pub const LOGIN_REQUIRED: &str = "You must be logged in to access this page.";

/// Message shown when a predicate gives no usable answer.
pub const PERMISSION_DENIED: &str = "You do not have permission to access this page.";

/// An allow/deny decision with a message for the user.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Decision {
    /// Whether the caller may proceed.
    pub allow: bool,
    /// Explanation, empty when allowed.
    pub message: String,
}

impl Decision {
    /// Allows the request.
    pub fn allow() -> Self {
        Self {
            allow: true,
            message: String::new(),
        }
    }

    /// Denies the request with a message.
    pub fn deny(message: impl Into<String>) -> Self {
        Self {
            allow: false,
            message: message.into(),
        }
    }
}

type Predicate = dyn Fn(&[String]) -> Option<Decision> + Send + Sync;

/// A permission predicate attached to a route.
///
/// The predicate receives the caller's roles. Returning `None` counts as a
/// denial.
#[derive(Clone)]
pub struct Permit {
    label: String,
    predicate: Arc<Predicate>,
}

impl Permit {
    /// Creates a permit from a predicate.
    pub fn new<F>(label: impl Into<String>, predicate: F) -> Self
    where
        F: Fn(&[String]) -> Option<Decision> + Send + Sync + 'static,
    {
        Self {
            label: label.into(),
            predicate: Arc::new(predicate),
        }
    }

    /// A permit only administrators pass (through the admin bypass).
    pub fn admin_only() -> Self {
        Self::new("admin", |_| Some(Decision::deny(PERMISSION_DENIED)))
    }

    /// A permit granted to any role holding `permission` in `map`.
    pub fn from_map(map: &PermissionMap, permission: &str) -> Self {
        let allowed = map.roles_for(permission);
        let message = format!("You need the `{permission}` permission to access this page.");
        Self::new(permission, move |roles| {
            if roles.iter().any(|r| allowed.contains(r)) {
                Some(Decision::allow())
            } else {
                Some(Decision::deny(message.clone()))
            }
        })
    }

    /// Returns the permit label.
    pub fn label(&self) -> &str {
        &self.label
    }

    /// Runs the predicate.
    pub fn evaluate(&self, roles: &[String]) -> Option<Decision> {
        (self.predicate)(roles)
    }
}

impl fmt::Debug for Permit {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Permit").field("label", &self.label).finish()
    }
}

/// Permission name to role set.
#[derive(Debug, Clone, Default)]
pub struct PermissionMap {
    permissions: HashMap<String, BTreeSet<String>>,
}

impl PermissionMap {
    /// Creates an empty map.
    pub fn new() -> Self {
        Self::default()
    }

    /// Grants `permission` to `role`.
    #[must_use]
    pub fn grant(mut self, permission: impl Into<String>, role: impl Into<String>) -> Self {
        self.permissions
            .entry(permission.into())
            .or_default()
            .insert(role.into());
        self
    }

    /// Returns the roles holding `permission`.
    pub fn roles_for(&self, permission: &str) -> BTreeSet<String> {
        self.permissions.get(permission).cloned().unwrap_or_default()
    }
}

/// Decides whether a caller may invoke a route.
#[derive(Debug, Clone, Copy, Default)]
pub struct PermissionGate;

impl PermissionGate {
    /// Checks `session` against an optional permit.
    ///
    /// Order: no permit allows, administrators always pass, anonymous callers
    /// are told to log in, everyone else gets the predicate's answer.
    pub fn check(permit: Option<&Permit>, session: &Session) -> Decision {
        let Some(permit) = permit else {
            return Decision::allow();
        };
        if session.is_admin() {
            return Decision::allow();
        }
        if !session.is_authenticated() {
            return Decision::deny(LOGIN_REQUIRED);
        }
        permit
            .evaluate(&session.roles())
            .unwrap_or_else(|| Decision::deny(PERMISSION_DENIED))
    }
}
