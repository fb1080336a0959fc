//! ---
//! rollcall_section: "06-security-access-control"
//! rollcall_subsection: "module"
//! rollcall_type: "source"
//! rollcall_scope: "code"
//! rollcall_description: "Role registry, permission evaluation, and session boundary."
//! rollcall_version: "v0.0.0-prealpha"
//! rollcall_owner: "tbd"
//! ---
//! Role-gated access control for the attendance administration front end.

pub mod engine;
pub mod identity;
pub mod navigation;
pub mod registry;

pub use engine::{PermissionEngine, PermissionRequirement, ResourceRequirement};
pub use identity::{Identity, IdentityError, InMemorySession, RawIdentity, SessionProvider};
pub use navigation::{default_menu, visible_menu, AccessDecision, MenuItem};
pub use registry::{Permission, PermissionCategory, RoleDefinition, RoleId, RoleRestrictions, Scope};
