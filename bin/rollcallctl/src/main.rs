//! ---
//! rollcall_section: "05-networking-external-interfaces"
//! rollcall_subsection: "binary"
//! rollcall_type: "source"
//! rollcall_scope: "code"
//! rollcall_description: "Control CLI for administrators interacting with rollcall."
//! rollcall_version: "v0.0.0-prealpha"
//! rollcall_owner: "tbd"
//! ---
use std::path::PathBuf;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use rollcall_common::config::{AppConfig, LoadedAppConfig};
use rollcall_common::logging::{init_console, init_tracing};

mod access;
mod connectivity;

#[derive(Debug, Parser)]
#[command(
    author,
    version,
    about = "rollcall administrative control utility",
    long_about = None
)]
struct Cli {
    #[arg(long, global = true, value_name = "FILE", help = "Path to configuration file")]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Debug, Subcommand)]
enum Commands {
    #[command(about = "Print the menu access report for a synthetic identity")]
    Access(access::AccessOptions),
    #[command(about = "Resolve the backend base URL once")]
    Resolve(connectivity::ResolveOptions),
    #[command(about = "Supervise backend connectivity until interrupted")]
    Monitor(connectivity::MonitorOptions),
    #[command(about = "Print the effective configuration as TOML")]
    Config,
}

fn main() -> Result<()> {
    let cli = Cli::parse();
    let loaded = load_config(cli.config.as_ref())?;

    match cli.command {
        Commands::Access(options) => {
            init_console();
            access::run(options)
        }
        Commands::Resolve(options) => {
            init_console();
            connectivity::resolve(&loaded.config, options)
        }
        Commands::Monitor(options) => {
            init_tracing("rollcallctl", &loaded.config.logging)?;
            connectivity::monitor(&loaded.config, options)
        }
        Commands::Config => {
            init_console();
            print_config(&loaded)
        }
    }
}

fn load_config(explicit: Option<&PathBuf>) -> Result<LoadedAppConfig> {
    let mut candidates = Vec::new();
    if let Some(path) = explicit {
        candidates.push(path.clone());
    }
    candidates.push(PathBuf::from("configs/rollcall.toml"));
    candidates.push(PathBuf::from("rollcall.toml"));
    AppConfig::load_with_source(&candidates)
}

fn print_config(loaded: &LoadedAppConfig) -> Result<()> {
    match &loaded.source {
        Some(path) => println!("# loaded from {}", path.display()),
        None => println!("# built-in defaults"),
    }
    let rendered =
        toml::to_string_pretty(&loaded.config).context("failed to render configuration")?;
    print!("{rendered}");
    Ok(())
}
