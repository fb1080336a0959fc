//! ---
//! rollcall_section: "06-security-access-control"
//! rollcall_subsection: "module"
//! rollcall_type: "source"
//! rollcall_scope: "code"
//! rollcall_description: "Static role and permission registry."
//! rollcall_version: "v0.0.0-prealpha"
//! rollcall_owner: "tbd"
//! ---
//! Immutable role table: permission bundles, precedence levels, and scope
//! restrictions for every recognised role.

use std::collections::HashSet;
use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Closed set of roles recognised by the administrative front end.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RoleId {
    /// Unrestricted platform owner.
    SuperAdmin,
    /// Institution administrator.
    Admin,
    /// Course teacher, limited to assigned courses.
    Teacher,
    /// Assistant helping a teacher run sessions.
    TeachingAssistant,
    /// Read-only observer.
    Viewer,
}

impl RoleId {
    /// Every role, highest level first.
    pub const ALL: [RoleId; 5] = [
        RoleId::SuperAdmin,
        RoleId::Admin,
        RoleId::Teacher,
        RoleId::TeachingAssistant,
        RoleId::Viewer,
    ];

    /// The top-level role a superuser identity is displayed as.
    pub const TOP: RoleId = RoleId::SuperAdmin;

    /// Canonical identifier.
    pub fn as_str(&self) -> &'static str {
        match self {
            RoleId::SuperAdmin => "super_admin",
            RoleId::Admin => "admin",
            RoleId::Teacher => "teacher",
            RoleId::TeachingAssistant => "teaching_assistant",
            RoleId::Viewer => "viewer",
        }
    }

    /// Registry entry for this role.
    pub fn definition(&self) -> &'static RoleDefinition {
        definition(*self)
    }

    /// Numeric precedence level.
    pub fn level(&self) -> u8 {
        self.definition().level
    }

    /// Human readable label.
    pub fn display_name(&self) -> &'static str {
        self.definition().display_name
    }
}

impl fmt::Display for RoleId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Raised when a role string does not name a recognised role.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("unrecognised role: {0:?}")]
pub struct RoleParseError(pub String);

impl FromStr for RoleId {
    type Err = RoleParseError;

    /// Case-insensitive; `-`, `_` and spaces are interchangeable.
    fn from_str(raw: &str) -> Result<Self, Self::Err> {
        let normalised: String = raw
            .trim()
            .chars()
            .map(|c| match c {
                '-' | ' ' => '_',
                other => other.to_ascii_lowercase(),
            })
            .collect();
        match normalised.as_str() {
            "super_admin" => Ok(RoleId::SuperAdmin),
            "admin" => Ok(RoleId::Admin),
            "teacher" => Ok(RoleId::Teacher),
            "teaching_assistant" => Ok(RoleId::TeachingAssistant),
            "viewer" => Ok(RoleId::Viewer),
            _ => Err(RoleParseError(raw.to_owned())),
        }
    }
}

/// Grouping used by administration screens when listing permissions.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PermissionCategory {
    Dashboard,
    Students,
    Courses,
    Sessions,
    Attendance,
    Recognition,
    Reports,
    Users,
    System,
}

/// Atomic capability a role may grant. Flat, no hierarchy.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Permission {
    ViewDashboard,
    ViewStudents,
    ManageStudents,
    ViewCourses,
    ManageCourses,
    ViewSessions,
    ManageSessions,
    ViewAttendance,
    EditAttendance,
    ExportAttendance,
    RunRecognition,
    EnrollFaces,
    ViewReports,
    ManageUsers,
    ManageSettings,
    ViewSystemStatus,
}

impl Permission {
    pub const ALL: [Permission; 16] = [
        Permission::ViewDashboard,
        Permission::ViewStudents,
        Permission::ManageStudents,
        Permission::ViewCourses,
        Permission::ManageCourses,
        Permission::ViewSessions,
        Permission::ManageSessions,
        Permission::ViewAttendance,
        Permission::EditAttendance,
        Permission::ExportAttendance,
        Permission::RunRecognition,
        Permission::EnrollFaces,
        Permission::ViewReports,
        Permission::ManageUsers,
        Permission::ManageSettings,
        Permission::ViewSystemStatus,
    ];

    /// Wire identifier, as issued by the backend at login.
    pub fn id(&self) -> &'static str {
        match self {
            Permission::ViewDashboard => "view_dashboard",
            Permission::ViewStudents => "view_students",
            Permission::ManageStudents => "manage_students",
            Permission::ViewCourses => "view_courses",
            Permission::ManageCourses => "manage_courses",
            Permission::ViewSessions => "view_sessions",
            Permission::ManageSessions => "manage_sessions",
            Permission::ViewAttendance => "view_attendance",
            Permission::EditAttendance => "edit_attendance",
            Permission::ExportAttendance => "export_attendance",
            Permission::RunRecognition => "run_recognition",
            Permission::EnrollFaces => "enroll_faces",
            Permission::ViewReports => "view_reports",
            Permission::ManageUsers => "manage_users",
            Permission::ManageSettings => "manage_settings",
            Permission::ViewSystemStatus => "view_system_status",
        }
    }

    pub fn category(&self) -> PermissionCategory {
        match self {
            Permission::ViewDashboard => PermissionCategory::Dashboard,
            Permission::ViewStudents | Permission::ManageStudents => PermissionCategory::Students,
            Permission::ViewCourses | Permission::ManageCourses => PermissionCategory::Courses,
            Permission::ViewSessions | Permission::ManageSessions => PermissionCategory::Sessions,
            Permission::ViewAttendance
            | Permission::EditAttendance
            | Permission::ExportAttendance => PermissionCategory::Attendance,
            Permission::RunRecognition | Permission::EnrollFaces => {
                PermissionCategory::Recognition
            }
            Permission::ViewReports => PermissionCategory::Reports,
            Permission::ManageUsers => PermissionCategory::Users,
            Permission::ManageSettings | Permission::ViewSystemStatus => PermissionCategory::System,
        }
    }
}

impl fmt::Display for Permission {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.id())
    }
}

/// Raised when a permission string is not a known identifier.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("unknown permission: {0:?}")]
pub struct PermissionParseError(pub String);

impl FromStr for Permission {
    type Err = PermissionParseError;

    fn from_str(raw: &str) -> Result<Self, Self::Err> {
        let trimmed = raw.trim();
        Permission::ALL
            .iter()
            .copied()
            .find(|permission| permission.id().eq_ignore_ascii_case(trimmed))
            .ok_or_else(|| PermissionParseError(raw.to_owned()))
    }
}

/// Subset of records a scoped role may see.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Scope {
    /// Records explicitly assigned to the identity.
    Assigned,
    /// Records of students enrolled in the identity's courses.
    Enrolled,
    /// Records created by the identity.
    Own,
    /// No records of this kind.
    Nothing,
}

/// Scope restrictions applied by consumers when listing records.
///
/// All fields empty (`{}`) means unrestricted.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct RoleRestrictions {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub course_scope: Option<Scope>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub student_scope: Option<Scope>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub session_scope: Option<Scope>,
}

impl RoleRestrictions {
    pub const NONE: RoleRestrictions = RoleRestrictions {
        course_scope: None,
        student_scope: None,
        session_scope: None,
    };

    pub fn is_unrestricted(&self) -> bool {
        *self == Self::NONE
    }
}

/// Registry entry for a role.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct RoleDefinition {
    pub id: RoleId,
    pub display_name: &'static str,
    pub level: u8,
    pub permissions: &'static [Permission],
    pub restrictions: RoleRestrictions,
}

impl RoleDefinition {
    pub fn grants(&self, permission: Permission) -> bool {
        self.permissions.contains(&permission)
    }

    pub fn permission_set(&self) -> HashSet<Permission> {
        self.permissions.iter().copied().collect()
    }
}

const ADMIN_PERMISSIONS: &[Permission] = &[
    Permission::ViewDashboard,
    Permission::ViewStudents,
    Permission::ManageStudents,
    Permission::ViewCourses,
    Permission::ManageCourses,
    Permission::ViewSessions,
    Permission::ManageSessions,
    Permission::ViewAttendance,
    Permission::EditAttendance,
    Permission::ExportAttendance,
    Permission::RunRecognition,
    Permission::EnrollFaces,
    Permission::ViewReports,
    Permission::ManageUsers,
    Permission::ViewSystemStatus,
];

const TEACHER_PERMISSIONS: &[Permission] = &[
    Permission::ViewDashboard,
    Permission::ViewStudents,
    Permission::ViewCourses,
    Permission::ViewSessions,
    Permission::ManageSessions,
    Permission::ViewAttendance,
    Permission::EditAttendance,
    Permission::ExportAttendance,
    Permission::RunRecognition,
    Permission::ViewReports,
];

const ASSISTANT_PERMISSIONS: &[Permission] = &[
    Permission::ViewDashboard,
    Permission::ViewStudents,
    Permission::ViewCourses,
    Permission::ViewSessions,
    Permission::ViewAttendance,
    Permission::EditAttendance,
    Permission::RunRecognition,
];

const VIEWER_PERMISSIONS: &[Permission] = &[
    Permission::ViewDashboard,
    Permission::ViewCourses,
    Permission::ViewAttendance,
    Permission::ViewReports,
];

// Ordered by descending level.
static ROLES: [RoleDefinition; 5] = [
    RoleDefinition {
        id: RoleId::SuperAdmin,
        display_name: "Super Admin",
        level: 100,
        permissions: &Permission::ALL,
        restrictions: RoleRestrictions::NONE,
    },
    RoleDefinition {
        id: RoleId::Admin,
        display_name: "Administrator",
        level: 80,
        permissions: ADMIN_PERMISSIONS,
        restrictions: RoleRestrictions::NONE,
    },
    RoleDefinition {
        id: RoleId::Teacher,
        display_name: "Teacher",
        level: 50,
        permissions: TEACHER_PERMISSIONS,
        restrictions: RoleRestrictions {
            course_scope: Some(Scope::Assigned),
            student_scope: Some(Scope::Enrolled),
            session_scope: Some(Scope::Own),
        },
    },
    RoleDefinition {
        id: RoleId::TeachingAssistant,
        display_name: "Teaching Assistant",
        level: 30,
        permissions: ASSISTANT_PERMISSIONS,
        restrictions: RoleRestrictions {
            course_scope: Some(Scope::Assigned),
            student_scope: Some(Scope::Enrolled),
            session_scope: Some(Scope::Assigned),
        },
    },
    RoleDefinition {
        id: RoleId::Viewer,
        display_name: "Viewer",
        level: 10,
        permissions: VIEWER_PERMISSIONS,
        restrictions: RoleRestrictions {
            course_scope: Some(Scope::Assigned),
            student_scope: Some(Scope::Nothing),
            session_scope: Some(Scope::Nothing),
        },
    },
];

/// Registry entry for a role.
pub fn definition(role: RoleId) -> &'static RoleDefinition {
    match role {
        RoleId::SuperAdmin => &ROLES[0],
        RoleId::Admin => &ROLES[1],
        RoleId::Teacher => &ROLES[2],
        RoleId::TeachingAssistant => &ROLES[3],
        RoleId::Viewer => &ROLES[4],
    }
}

/// All role definitions, highest level first.
pub fn roles() -> impl Iterator<Item = &'static RoleDefinition> {
    ROLES.iter()
}

/// Permissions granted by the named role; empty for unknown roles.
pub fn permissions_for_role(role: &str) -> HashSet<Permission> {
    role.parse::<RoleId>()
        .map(|id| id.definition().permission_set())
        .unwrap_or_default()
}

/// Restrictions of the named role; unrestricted (`{}`) for unknown roles.
pub fn restrictions_for_role(role: &str) -> RoleRestrictions {
    role.parse::<RoleId>()
        .map(|id| id.definition().restrictions)
        .unwrap_or_default()
}

/// Level of the named role, if recognised.
pub fn level_of(role: &str) -> Option<u8> {
    role.parse::<RoleId>().ok().map(|id| id.level())
}
