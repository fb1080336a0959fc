//! ---
//! rollcall_section: "06-security-access-control"
//! rollcall_subsection: "module"
//! rollcall_type: "source"
//! rollcall_scope: "code"
//! rollcall_description: "Permission evaluation for identities and resources."
//! rollcall_version: "v0.0.0-prealpha"
//! rollcall_owner: "tbd"
//! ---
//! Access decisions for a single identity.
//!
//! Every check returns a plain `bool` and never panics; malformed input is
//! logged and treated as "no access" so callers can evaluate on every render.

use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

use crate::identity::{Identity, SessionProvider};
use crate::registry::{Permission, RoleId, RoleRestrictions};

/// Label shown for identities without a recognised role.
pub const FALLBACK_ROLE_LABEL: &str = "User";

/// Permission clause of a [`ResourceRequirement`].
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum PermissionRequirement {
    /// The identity must hold this permission.
    One(Permission),
    /// The identity must hold at least one of these permissions.
    AnyOf(Vec<Permission>),
}

/// Access requirements attached to a menu item or action.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ResourceRequirement {
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub required_roles: Vec<RoleId>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub required_permission: Option<PermissionRequirement>,
    #[serde(default)]
    pub require_superuser: bool,
    #[serde(default)]
    pub view_only: bool,
    #[serde(default)]
    pub requires_scope_filter: bool,
}

impl ResourceRequirement {
    /// Requirement that every identity satisfies.
    pub fn new() -> Self {
        Self::default()
    }

    pub fn roles(mut self, roles: impl IntoIterator<Item = RoleId>) -> Self {
        self.required_roles = roles.into_iter().collect();
        self
    }

    pub fn permission(mut self, permission: Permission) -> Self {
        self.required_permission = Some(PermissionRequirement::One(permission));
        self
    }

    pub fn any_permission(mut self, permissions: impl IntoIterator<Item = Permission>) -> Self {
        self.required_permission = Some(PermissionRequirement::AnyOf(
            permissions.into_iter().collect(),
        ));
        self
    }

    pub fn superuser_only(mut self) -> Self {
        self.require_superuser = true;
        self
    }

    pub fn view_only(mut self) -> Self {
        self.view_only = true;
        self
    }

    pub fn scope_filtered(mut self) -> Self {
        self.requires_scope_filter = true;
        self
    }
}

/// Evaluates one identity (or its absence) against roles, permissions, and
/// resource requirements.
#[derive(Debug, Clone, Default)]
pub struct PermissionEngine {
    identity: Option<Identity>,
}

impl PermissionEngine {
    pub fn for_identity(identity: Identity) -> Self {
        Self {
            identity: Some(identity),
        }
    }

    /// Engine for a missing session; every non-superuser check is denied.
    pub fn anonymous() -> Self {
        Self::default()
    }

    /// Engine for whatever identity the session currently holds.
    pub fn from_session(session: &dyn SessionProvider) -> Self {
        Self {
            identity: session.current(),
        }
    }

    pub fn identity(&self) -> Option<&Identity> {
        self.identity.as_ref()
    }

    pub fn is_superuser(&self) -> bool {
        self.identity
            .as_ref()
            .map(|identity| identity.is_superuser)
            .unwrap_or(false)
    }

    pub fn has_permission(&self, permission: Permission) -> bool {
        match &self.identity {
            Some(identity) => identity.is_superuser || identity.permissions.contains(&permission),
            None => {
                debug!(%permission, "permission check without an identity");
                false
            }
        }
    }

    /// String form of [`has_permission`](Self::has_permission); empty or unknown ids are denied.
    pub fn has_permission_named(&self, id: &str) -> bool {
        if id.trim().is_empty() {
            warn!("permission check with an empty identifier");
            return false;
        }
        if self.is_superuser() {
            return true;
        }
        match id.parse::<Permission>() {
            Ok(permission) => self.has_permission(permission),
            Err(err) => {
                warn!(error = %err, "permission check with an unknown identifier");
                false
            }
        }
    }

    pub fn has_any_permission(&self, permissions: &[Permission]) -> bool {
        if self.is_superuser() {
            return true;
        }
        if permissions.is_empty() {
            warn!("any-permission check with an empty list");
            return false;
        }
        permissions
            .iter()
            .any(|permission| self.has_permission(*permission))
    }

    pub fn has_role(&self, role: RoleId) -> bool {
        match &self.identity {
            Some(identity) => identity.is_superuser || identity.role == Some(role),
            None => false,
        }
    }

    /// Case-insensitive role check. Unrecognised role names on either side fail closed.
    pub fn has_role_named(&self, role: &str) -> bool {
        if self.is_superuser() {
            return true;
        }
        match role.parse::<RoleId>() {
            Ok(role) => self.has_role(role),
            Err(err) => {
                warn!(error = %err, "role check against an unrecognised role");
                false
            }
        }
    }

    /// Superusers pass immediately when the list names the top-level role.
    pub fn has_any_role(&self, roles: &[RoleId]) -> bool {
        if self.is_superuser() && roles.contains(&RoleId::TOP) {
            return true;
        }
        roles.iter().any(|role| self.has_role(*role))
    }

    /// `level(actual) >= level(min)`; unknown names on either side yield `false`.
    pub fn has_min_role_level(actual: &str, min: &str) -> bool {
        match (actual.parse::<RoleId>(), min.parse::<RoleId>()) {
            (Ok(actual), Ok(min)) => actual.level() >= min.level(),
            (actual, min) => {
                warn!(
                    actual_known = actual.is_ok(),
                    min_known = min.is_ok(),
                    "role level comparison with an unrecognised role"
                );
                false
            }
        }
    }

    /// Whether this identity's role is at least as senior as `min`.
    pub fn meets_role_level(&self, min: RoleId) -> bool {
        match &self.identity {
            Some(identity) if identity.is_superuser => true,
            Some(identity) => identity
                .role
                .map(|role| role.level() >= min.level())
                .unwrap_or(false),
            None => false,
        }
    }

    pub fn can_access_resource(&self, requirement: &ResourceRequirement) -> bool {
        if self.is_superuser() {
            return true;
        }
        if requirement.require_superuser {
            return false;
        }
        if !requirement.required_roles.is_empty() && !self.has_any_role(&requirement.required_roles)
        {
            return false;
        }
        match &requirement.required_permission {
            Some(PermissionRequirement::One(permission)) => self.has_permission(*permission),
            Some(PermissionRequirement::AnyOf(permissions)) => self.has_any_permission(permissions),
            None => true,
        }
    }

    /// Echoes the flag; applies to superusers too.
    pub fn is_view_only(&self, requirement: &ResourceRequirement) -> bool {
        requirement.view_only
    }

    /// Echoes the flag; superusers always see unfiltered data.
    pub fn requires_scope_filter(&self, requirement: &ResourceRequirement) -> bool {
        requirement.requires_scope_filter && !self.is_superuser()
    }

    /// Scope restrictions of the identity's role; `{}` for superusers and unknown roles.
    pub fn restrictions(&self) -> RoleRestrictions {
        match &self.identity {
            Some(identity) if !identity.is_superuser => identity
                .role
                .map(|role| role.definition().restrictions)
                .unwrap_or_default(),
            _ => RoleRestrictions::default(),
        }
    }

    pub fn display_role(&self) -> &'static str {
        match &self.identity {
            Some(identity) if identity.is_superuser => RoleId::TOP.display_name(),
            Some(Identity {
                role: Some(role), ..
            }) => role.display_name(),
            _ => FALLBACK_ROLE_LABEL,
        }
    }
}
