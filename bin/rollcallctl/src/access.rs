//! ---
//! rollcall_section: "06-security-access-control"
//! rollcall_subsection: "binary"
//! rollcall_type: "source"
//! rollcall_scope: "code"
//! rollcall_description: "Access report subcommand for rollcallctl."
//! rollcall_version: "v0.0.0-prealpha"
//! rollcall_owner: "tbd"
//! ---
use anyhow::{Context, Result};
use clap::Args;
use rollcall_security::registry::permissions_for_role;
use rollcall_security::{
    default_menu, visible_menu, AccessDecision, Identity, PermissionEngine, RawIdentity,
};
use serde::Serialize;

/// Options for `rollcallctl access`.
#[derive(Debug, Args)]
pub struct AccessOptions {
    /// Role identifier, e.g. `teacher` or `Teaching Assistant`.
    #[arg(long)]
    pub role: String,
    /// Granted permission id. Repeatable; defaults to the role's registered set.
    #[arg(long = "permission", value_name = "ID")]
    pub permissions: Vec<String>,
    /// Mark the identity as superuser.
    #[arg(long)]
    pub superuser: bool,
    /// Emit JSON instead of a table.
    #[arg(long)]
    pub json: bool,
}

#[derive(Debug, Serialize)]
struct AccessReport {
    role: &'static str,
    is_superuser: bool,
    items: Vec<AccessDecision>,
}

pub fn run(options: AccessOptions) -> Result<()> {
    let engine = PermissionEngine::for_identity(Identity::decode(synthetic_identity(&options)));
    let report = AccessReport {
        role: engine.display_role(),
        is_superuser: engine.is_superuser(),
        items: visible_menu(&engine, &default_menu()),
    };

    if options.json {
        let rendered =
            serde_json::to_string_pretty(&report).context("failed to render access report")?;
        println!("{rendered}");
        return Ok(());
    }

    println!(
        "Role: {}{}",
        report.role,
        if report.is_superuser { " (superuser)" } else { "" }
    );
    if report.items.is_empty() {
        println!("No accessible items");
    }
    for item in &report.items {
        let mut flags = Vec::new();
        if item.view_only {
            flags.push("view-only");
        }
        if item.scope_filtered {
            flags.push("scoped");
        }
        println!("{:<14} {:<14} {}", item.key, item.path, flags.join(","));
    }
    Ok(())
}

fn synthetic_identity(options: &AccessOptions) -> RawIdentity {
    let permissions = if options.permissions.is_empty() {
        let mut ids: Vec<String> = permissions_for_role(&options.role)
            .into_iter()
            .map(|permission| permission.id().to_owned())
            .collect();
        ids.sort();
        ids
    } else {
        options.permissions.clone()
    };
    RawIdentity {
        id: "rollcallctl".to_owned(),
        role_id: options.role.clone(),
        permissions,
        is_superuser: options.superuser,
    }
}
