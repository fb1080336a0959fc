//! ---
//! rollcall_section: "06-security-access-control"
//! rollcall_subsection: "module"
//! rollcall_type: "source"
//! rollcall_scope: "code"
//! rollcall_description: "Menu descriptors evaluated through the permission engine."
//! rollcall_version: "v0.0.0-prealpha"
//! rollcall_owner: "tbd"
//! ---
use serde::{Deserialize, Serialize};

use crate::engine::{PermissionEngine, ResourceRequirement};
use crate::registry::{Permission, RoleId, RoleRestrictions};

/// Navigation entry guarded by a [`ResourceRequirement`].
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MenuItem {
    pub key: String,
    pub label: String,
    pub path: String,
    #[serde(default)]
    pub requirement: ResourceRequirement,
}

impl MenuItem {
    pub fn new(
        key: impl Into<String>,
        label: impl Into<String>,
        path: impl Into<String>,
        requirement: ResourceRequirement,
    ) -> Self {
        Self {
            key: key.into(),
            label: label.into(),
            path: path.into(),
            requirement,
        }
    }

    /// Evaluate this item for the identity behind `engine`.
    pub fn decide(&self, engine: &PermissionEngine) -> AccessDecision {
        let visible = engine.can_access_resource(&self.requirement);
        let scope_filtered = visible && engine.requires_scope_filter(&self.requirement);
        AccessDecision {
            key: self.key.clone(),
            label: self.label.clone(),
            path: self.path.clone(),
            visible,
            view_only: visible && engine.is_view_only(&self.requirement),
            scope_filtered,
            restrictions: if scope_filtered {
                engine.restrictions()
            } else {
                RoleRestrictions::default()
            },
        }
    }
}

/// Outcome of evaluating a [`MenuItem`].
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct AccessDecision {
    pub key: String,
    pub label: String,
    pub path: String,
    pub visible: bool,
    pub view_only: bool,
    pub scope_filtered: bool,
    pub restrictions: RoleRestrictions,
}

/// Decisions for the items the identity may see, in menu order.
pub fn visible_menu(engine: &PermissionEngine, items: &[MenuItem]) -> Vec<AccessDecision> {
    items
        .iter()
        .map(|item| item.decide(engine))
        .filter(|decision| decision.visible)
        .collect()
}

/// Administrative navigation of the attendance product.
pub fn default_menu() -> Vec<MenuItem> {
    vec![
        MenuItem::new(
            "dashboard",
            "Dashboard",
            "/",
            ResourceRequirement::new()
                .permission(Permission::ViewDashboard)
                .scope_filtered(),
        ),
        MenuItem::new(
            "students",
            "Students",
            "/students",
            ResourceRequirement::new()
                .any_permission([Permission::ViewStudents, Permission::ManageStudents])
                .scope_filtered(),
        ),
        MenuItem::new(
            "courses",
            "Courses",
            "/courses",
            ResourceRequirement::new()
                .any_permission([Permission::ViewCourses, Permission::ManageCourses])
                .scope_filtered(),
        ),
        MenuItem::new(
            "sessions",
            "Class Sessions",
            "/sessions",
            ResourceRequirement::new()
                .roles([RoleId::Admin, RoleId::Teacher, RoleId::TeachingAssistant])
                .permission(Permission::ViewSessions)
                .scope_filtered(),
        ),
        MenuItem::new(
            "attendance",
            "Attendance",
            "/attendance",
            ResourceRequirement::new()
                .permission(Permission::ViewAttendance)
                .scope_filtered(),
        ),
        MenuItem::new(
            "recognition",
            "Face Check-in",
            "/recognition",
            ResourceRequirement::new()
                .roles([RoleId::Admin, RoleId::Teacher, RoleId::TeachingAssistant])
                .permission(Permission::RunRecognition),
        ),
        MenuItem::new(
            "reports",
            "Reports",
            "/reports",
            ResourceRequirement::new()
                .permission(Permission::ViewReports)
                .view_only()
                .scope_filtered(),
        ),
        MenuItem::new(
            "users",
            "Users",
            "/users",
            ResourceRequirement::new()
                .roles([RoleId::Admin])
                .permission(Permission::ManageUsers),
        ),
        MenuItem::new(
            "system",
            "System Status",
            "/system",
            ResourceRequirement::new()
                .permission(Permission::ViewSystemStatus)
                .view_only(),
        ),
        MenuItem::new(
            "settings",
            "Settings",
            "/settings",
            ResourceRequirement::new().superuser_only(),
        ),
    ]
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::identity::Identity;
    use crate::registry::Scope;

    fn keys(decisions: &[AccessDecision]) -> Vec<&str> {
        decisions.iter().map(|d| d.key.as_str()).collect()
    }

    #[test]
    fn teacher_menu_is_scoped_and_excludes_admin_surfaces() {
        let identity = Identity::new(
            "t-1",
            RoleId::Teacher,
            RoleId::Teacher.definition().permissions.iter().copied(),
        );
        let engine = PermissionEngine::for_identity(identity);
        let menu = visible_menu(&engine, &default_menu());
        assert_eq!(
            keys(&menu),
            vec![
                "dashboard",
                "students",
                "courses",
                "sessions",
                "attendance",
                "recognition",
                "reports"
            ]
        );
        let attendance = menu.iter().find(|d| d.key == "attendance").unwrap();
        assert!(attendance.scope_filtered);
        assert_eq!(attendance.restrictions.session_scope, Some(Scope::Own));
        let reports = menu.iter().find(|d| d.key == "reports").unwrap();
        assert!(reports.view_only);
    }

    #[test]
    fn superuser_sees_everything_unfiltered() {
        let engine = PermissionEngine::for_identity(Identity::superuser("root"));
        let menu = visible_menu(&engine, &default_menu());
        assert_eq!(menu.len(), default_menu().len());
        assert!(menu.iter().all(|d| !d.scope_filtered));
        assert!(menu.iter().find(|d| d.key == "system").unwrap().view_only);
    }

    #[test]
    fn hidden_items_carry_no_flags() {
        let engine = PermissionEngine::anonymous();
        let decision = default_menu()[0].decide(&engine);
        assert!(!decision.visible);
        assert!(!decision.view_only);
        assert!(!decision.scope_filtered);
        assert!(visible_menu(&engine, &default_menu()).is_empty());
    }
}
