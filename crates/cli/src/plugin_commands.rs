//! `update`, `list` and plugin dispatch.

use std::{
    io::{IsTerminal, Read},
    path::Path,
    time::Duration,
};

use {
    anyhow::Result,
    clap::Parser,
    serde_json::Value,
    subhost_common::protocol,
    subhost_config::SubhostConfig,
    subhost_plugins::{Orchestrator, UpdateAction, UpdateReport},
};

/// Arguments following the plugin name.
#[derive(Parser, Debug)]
#[command(no_binary_name = true)]
struct DispatchArgs {
    /// Plugin name.
    name: String,
    /// JSON payload, a path to a `.json` file, `-` for stdin, or a bare
    /// file path passed on as `{"file_path": ...}`.
    payload: Option<String>,
    /// Kill the plugin after this many seconds.
    #[arg(long)]
    timeout: Option<u64>,
}

pub async fn update(config: &SubhostConfig, data_dir: &Path) -> Result<()> {
    let orchestrator = Orchestrator::from_config(config, data_dir);
    let report = orchestrator.update().await?;
    eprint!("{}", render_report(&report));
    Ok(())
}

pub fn list(config: &SubhostConfig, data_dir: &Path) -> Result<()> {
    let orchestrator = Orchestrator::from_config(config, data_dir);
    let snapshot = orchestrator.list();
    println!("{}", serde_json::to_string_pretty(&snapshot.listing())?);
    Ok(())
}

pub async fn dispatch(config: &SubhostConfig, data_dir: &Path, args: Vec<String>) -> Result<()> {
    let args = match DispatchArgs::try_parse_from(args) {
        Ok(args) => args,
        Err(e) => e.exit(),
    };
    let orchestrator = Orchestrator::from_config(config, data_dir);

    match run_dispatch(&orchestrator, &args).await {
        Ok(value) => {
            println!("{}", serde_json::to_string(&value)?);
            Ok(())
        },
        Err(e) => {
            eprintln!("{}", serde_json::to_string(&e.report())?);
            std::process::exit(1);
        },
    }
}

async fn run_dispatch(
    orchestrator: &Orchestrator,
    args: &DispatchArgs,
) -> subhost_plugins::Result<Value> {
    orchestrator.lookup(&args.name)?;
    let payload = read_payload(args.payload.as_deref())?;
    orchestrator
        .dispatch(&args.name, &payload, args.timeout.map(Duration::from_secs))
        .await
}

fn read_payload(arg: Option<&str>) -> subhost_common::Result<Value> {
    let from_stdin = match arg {
        Some("-") => true,
        Some(_) => false,
        None => !std::io::stdin().is_terminal(),
    };
    if from_stdin {
        let mut raw = String::new();
        std::io::stdin().read_to_string(&mut raw)?;
        return protocol::decode_payload_stdin(&raw);
    }
    match arg {
        Some(arg) => protocol::decode_payload_arg(arg),
        None => Ok(Value::Object(Default::default())),
    }
}

fn render_report(report: &UpdateReport) -> String {
    let mut out = String::new();
    for plugin in &report.plugins {
        let action = match plugin.action {
            UpdateAction::Reused => "up to date",
            UpdateAction::Provisioned => "installed",
            UpdateAction::Skipped => "skipped",
            UpdateAction::Failed => "failed",
        };
        match &plugin.error {
            Some(error) => out.push_str(&format!("  {:<24} {action}: {error}\n", plugin.name)),
            None => out.push_str(&format!("  {:<24} {action}\n", plugin.name)),
        }
    }
    for name in &report.removed {
        out.push_str(&format!("  {name:<24} removed\n"));
    }
    out.push_str(&format!(
        "{} plugin(s): {} installed, {} up to date, {} failed, {} skipped, {} removed\n",
        report.plugins.len(),
        report.count(UpdateAction::Provisioned),
        report.count(UpdateAction::Reused),
        report.count(UpdateAction::Failed),
        report.count(UpdateAction::Skipped),
        report.removed.len(),
    ));
    out
}
