//! ---
//! rollcall_section: "06-security-access-control"
//! rollcall_subsection: "module"
//! rollcall_type: "source"
//! rollcall_scope: "code"
//! rollcall_description: "Identity decoding and the session boundary."
//! rollcall_version: "v0.0.0-prealpha"
//! rollcall_owner: "tbd"
//! ---
use std::collections::HashSet;
use std::sync::Arc;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tokio::sync::watch;
use tracing::{info, warn};

use crate::registry::{Permission, RoleId};

/// Identity payload as supplied by the authentication backend.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct RawIdentity {
    /// Stable user identifier.
    pub id: String,
    /// Role string, decoded case-insensitively.
    #[serde(alias = "role")]
    pub role_id: String,
    /// Permission identifiers granted to the user.
    #[serde(default)]
    pub permissions: Vec<String>,
    /// Superuser flag; bypasses every role and permission check.
    #[serde(default)]
    pub is_superuser: bool,
}

/// Authenticated identity with roles and permissions decoded into closed sets.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Identity {
    /// Stable user identifier.
    pub id: String,
    /// Recognised role; `None` when the backend supplied an unknown role.
    pub role: Option<RoleId>,
    /// Role string exactly as supplied, kept for diagnostics.
    pub raw_role: String,
    /// Explicit permission grants.
    pub permissions: HashSet<Permission>,
    /// Superuser flag.
    pub is_superuser: bool,
    /// When the identity was decoded.
    pub authenticated_at: DateTime<Utc>,
}

impl Identity {
    /// Build an identity with a recognised role and explicit grants.
    pub fn new(
        id: impl Into<String>,
        role: RoleId,
        permissions: impl IntoIterator<Item = Permission>,
    ) -> Self {
        Self {
            id: id.into(),
            role: Some(role),
            raw_role: role.as_str().to_owned(),
            permissions: permissions.into_iter().collect(),
            is_superuser: false,
            authenticated_at: Utc::now(),
        }
    }

    /// Superuser identity holding the top-level role and no explicit grants.
    pub fn superuser(id: impl Into<String>) -> Self {
        Self::new(id, RoleId::TOP, []).with_superuser(true)
    }

    /// Toggle the superuser flag.
    pub fn with_superuser(mut self, is_superuser: bool) -> Self {
        self.is_superuser = is_superuser;
        self
    }

    /// Decode a backend payload. Unknown roles fail closed (`role = None`);
    /// unknown permission identifiers are dropped.
    pub fn decode(raw: RawIdentity) -> Self {
        let role = match raw.role_id.parse::<RoleId>() {
            Ok(role) => Some(role),
            Err(err) => {
                warn!(user = %raw.id, error = %err, "identity carries an unrecognised role");
                None
            }
        };
        let mut permissions = HashSet::with_capacity(raw.permissions.len());
        for id in &raw.permissions {
            match id.parse::<Permission>() {
                Ok(permission) => {
                    permissions.insert(permission);
                }
                Err(err) => warn!(user = %raw.id, error = %err, "dropping unknown permission"),
            }
        }
        Self {
            id: raw.id,
            role,
            raw_role: raw.role_id,
            permissions,
            is_superuser: raw.is_superuser,
            authenticated_at: Utc::now(),
        }
    }
}

/// Errors returned by the session holder.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum IdentityError {
    /// Login payload did not carry a user identifier.
    #[error("identity payload is missing a user id")]
    MissingId,
}

/// Owner of the current authenticated identity.
///
/// The access-control core only reads from it; login and logout happen on the
/// other side of this boundary.
pub trait SessionProvider: Send + Sync {
    /// Current identity, if a user is logged in.
    fn current(&self) -> Option<Identity>;

    /// Receiver notified whenever the identity changes.
    fn subscribe(&self) -> watch::Receiver<Option<Identity>>;
}

/// In-memory session holder suitable for embedding and tests.
#[derive(Debug, Clone)]
pub struct InMemorySession {
    current: Arc<watch::Sender<Option<Identity>>>,
}

impl Default for InMemorySession {
    fn default() -> Self {
        let (tx, _rx) = watch::channel(None);
        Self {
            current: Arc::new(tx),
        }
    }
}

impl InMemorySession {
    pub fn new() -> Self {
        Self::default()
    }

    /// Decode and install a new identity, replacing any previous one.
    pub fn login(&self, raw: RawIdentity) -> Result<Identity, IdentityError> {
        if raw.id.trim().is_empty() {
            return Err(IdentityError::MissingId);
        }
        let identity = Identity::decode(raw);
        info!(user = %identity.id, role = %identity.raw_role, "session established");
        self.current.send_replace(Some(identity.clone()));
        Ok(identity)
    }

    /// Drop the current identity, returning it if one was present.
    pub fn logout(&self) -> Option<Identity> {
        let previous = self.current.send_replace(None);
        if let Some(identity) = &previous {
            info!(user = %identity.id, "session ended");
        }
        previous
    }
}

impl SessionProvider for InMemorySession {
    fn current(&self) -> Option<Identity> {
        self.current.borrow().clone()
    }

    fn subscribe(&self) -> watch::Receiver<Option<Identity>> {
        self.current.subscribe()
    }
}
