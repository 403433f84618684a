use std::path::Path;

use {anyhow::Result, clap::Subcommand, serde_json::json};

use subhost_config::{
    SubhostConfig,
    validate::{self, Severity},
};

#[derive(Subcommand)]
pub enum ConfigAction {
    /// Print the effective configuration and resolved paths as JSON.
    Show,
    /// Validate the configuration and report errors/warnings.
    Validate,
}

pub fn handle_config(action: ConfigAction, config: &SubhostConfig, data_dir: &Path) -> Result<()> {
    match action {
        ConfigAction::Show => show(config, data_dir),
        ConfigAction::Validate => check(config, data_dir),
    }
}

fn show(config: &SubhostConfig, data_dir: &Path) -> Result<()> {
    let paths = config.paths.resolve(data_dir);
    let out = json!({
        "config_file": subhost_config::find_config_file(),
        "data_dir": data_dir,
        "resolved_paths": {
            "plugins_dir": paths.plugins_dir,
            "envs_dir": paths.envs_dir,
            "tools_dir": paths.tools_dir,
            "registry_file": paths.registry_file,
        },
        "config": config,
    });
    println!("{}", serde_json::to_string_pretty(&out)?);
    Ok(())
}

/// ANSI color codes.
const RED: &str = "\x1b[31m";
const YELLOW: &str = "\x1b[33m";
const BOLD: &str = "\x1b[1m";
const RESET: &str = "\x1b[0m";

fn check(config: &SubhostConfig, data_dir: &Path) -> Result<()> {
    match subhost_config::find_config_file() {
        Some(path) => eprintln!("Checking {}\n", path.display()),
        None => eprintln!("No config file found; checking defaults.\n"),
    }

    let result = validate::validate(config, data_dir);

    for d in &result.diagnostics {
        let (color, label) = match d.severity {
            Severity::Error => (RED, "error"),
            Severity::Warning => (YELLOW, "warning"),
        };

        if d.path.is_empty() {
            eprintln!("  {BOLD}{color}{label}{RESET} {}", d.message);
        } else {
            eprintln!("  {BOLD}{color}{label}{RESET} {}: {}", d.path, d.message);
        }
    }

    let errors = result.count(Severity::Error);
    let warnings = result.count(Severity::Warning);

    if !result.diagnostics.is_empty() {
        eprintln!();
    }

    if errors == 0 && warnings == 0 {
        eprintln!("No issues found.");
    } else {
        eprintln!("{errors} error(s), {warnings} warning(s)");
    }

    if result.has_errors() {
        std::process::exit(1);
    }

    Ok(())
}
