//! Output formatting for the `dockhand` binary.

use clap::ValueEnum;
use colored::Colorize;
use dockhand_agent::converge::{Outcome, OutcomeReport};
use dockhand_agent::{Probe, RuntimeError};
use dockhand_reconcile::ReconcileError;
use serde::Serialize;
use tabled::{Table, Tabled};

/// Output format.
#[derive(Debug, Clone, Copy, Default, ValueEnum)]
pub enum OutputFormat {
    /// Human-readable table format.
    #[default]
    Table,
    /// JSON format.
    Json,
}

/// Log output format.
#[derive(Debug, Clone, Copy, Default, ValueEnum)]
pub enum LogFormat {
    #[default]
    Json,
    Pretty,
}

#[derive(Debug, Tabled)]
struct OutcomeRow {
    #[tabled(rename = "Kind")]
    kind: &'static str,

    #[tabled(rename = "Name")]
    name: String,

    #[tabled(rename = "Action")]
    action: String,

    #[tabled(rename = "Changed")]
    changed: bool,

    #[tabled(rename = "State")]
    state: String,

    #[tabled(rename = "Error")]
    error: String,
}

fn display_option(opt: Option<String>) -> String {
    opt.unwrap_or_else(|| "-".to_string())
}

impl From<OutcomeReport> for OutcomeRow {
    fn from(report: OutcomeReport) -> Self {
        Self {
            kind: report.kind,
            name: report.name,
            action: report.action,
            changed: report.changed,
            state: display_option(report.state),
            error: display_option(report.error),
        }
    }
}

/// Print one line per converged resource.
pub fn print_outcomes(outcomes: &[Outcome], format: OutputFormat) {
    let reports: Vec<OutcomeReport> = outcomes.iter().map(Outcome::report).collect();
    match format {
        OutputFormat::Table => {
            if reports.is_empty() {
                println!("{}", "No resources declared.".dimmed());
                return;
            }
            let rows: Vec<OutcomeRow> = reports.into_iter().map(OutcomeRow::from).collect();
            println!("{}", Table::new(rows));
        }
        OutputFormat::Json => println!("{}", to_json(&reports)),
    }
}

#[derive(Debug, Serialize)]
struct ProbeReport<'a> {
    name: &'a str,
    state: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    id: Option<&'a str>,
    #[serde(skip_serializing_if = "Option::is_none")]
    spec_hash: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    spec: Option<dockhand_reconcile::ContainerSpec>,
}

/// Print a probed container.
pub fn print_probe(name: &str, probe: &Probe, format: OutputFormat) {
    let report = ProbeReport {
        name,
        state: probe.state.to_string(),
        id: probe.id(),
        spec_hash: probe
            .container
            .as_ref()
            .and_then(|c| c.spec_hash.as_ref())
            .map(ToString::to_string),
        spec: probe.container.as_ref().map(|c| c.actual_spec()),
    };

    match format {
        OutputFormat::Table => {
            println!("{} {}", "Name:".bold(), report.name);
            println!("{} {}", "State:".bold(), report.state);
            if let Some(id) = report.id {
                println!("{} {}", "ID:".bold(), id);
            }
            if let Some(hash) = &report.spec_hash {
                println!("{} {}", "Spec hash:".bold(), hash);
            }
            if let Some(spec) = &report.spec {
                println!("{} {}", "Image:".bold(), spec.image);
                println!("{} {}", "Command:".bold(), spec.command);
                let ports: Vec<String> = spec.ports.iter().map(ToString::to_string).collect();
                println!("{} {}", "Ports:".bold(), join_or_dash(&ports));
                let binds: Vec<String> = spec.binds.iter().map(ToString::to_string).collect();
                println!("{} {}", "Binds:".bold(), join_or_dash(&binds));
                println!("{} {}", "Volumes from:".bold(), join_or_dash(&spec.volumes_from));
                println!("{} {}", "Autoremove:".bold(), spec.autoremove);
            }
        }
        OutputFormat::Json => println!("{}", to_json(&report)),
    }
}

/// Print a summary line after a convergence pass.
pub fn print_summary(outcomes: &[Outcome]) {
    let failed = outcomes.iter().filter(|o| !o.is_ok()).count();
    let changed = outcomes.iter().filter(|o| o.changed()).count();
    let line = format!(
        "{} resources, {} changed, {} failed",
        outcomes.len(),
        changed,
        failed
    );
    if failed > 0 {
        eprintln!("{} {}", "Failed:".red().bold(), line);
    } else {
        eprintln!("{} {}", "Success:".green().bold(), line);
    }
}

fn join_or_dash(values: &[String]) -> String {
    if values.is_empty() {
        "-".to_string()
    } else {
        values.join(", ")
    }
}

fn to_json<T: Serialize>(value: &T) -> String {
    serde_json::to_string_pretty(value).unwrap_or_else(|_| "null".to_string())
}

/// Print an error in a user-friendly format.
pub fn print_error(err: &anyhow::Error) {
    eprintln!("{} {:#}", "Error:".red().bold(), err);

    let unavailable = err
        .downcast_ref::<ReconcileError>()
        .is_some_and(ReconcileError::is_retryable)
        || matches!(
            err.downcast_ref::<RuntimeError>(),
            Some(RuntimeError::Unavailable(_))
        );
    if unavailable {
        eprintln!(
            "\n{}",
            "Hint: Check that the Docker daemon is running and DOCKHAND_DOCKER_HOST points at its socket."
                .yellow()
        );
    }
}
