//! sshrun - Entry point
//!
//! Parses CLI arguments, loads the inventory, runs the command on every host
//! and prints one report per host. Exits non-zero if any host failed.

use std::process::ExitCode;

use anyhow::Context;
use clap::Parser;
use tracing::{error, info, warn};
use tracing_subscriber::{EnvFilter, FmtSubscriber};

use sshrun::config::{Args, Config};
use sshrun::{HostKeyPolicy, HostRunner, RunSummary, SshDialer};

#[tokio::main]
async fn main() -> anyhow::Result<ExitCode> {
    // Logs go to stderr, stdout carries the reports
    FmtSubscriber::builder()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .with_target(false)
        .with_writer(std::io::stderr)
        .init();

    let args = Args::parse();
    let inventory_path = args.config.clone();

    let config = Config::from_args(args)
        .with_context(|| format!("invalid configuration ({})", inventory_path.display()))?;

    info!("sshrun v{} starting...", env!("CARGO_PKG_VERSION"));

    if config.host_key_policy == HostKeyPolicy::AcceptAny {
        warn!("Host keys are not verified; pass --known-hosts to enable verification");
    }

    let dialer = SshDialer {
        connect_timeout: config.connect_timeout,
        host_key_policy: config.host_key_policy.clone(),
        exec: config.exec.clone(),
    };
    let runner = HostRunner::new(dialer).with_concurrency(config.concurrency);

    let summary = tokio::select! {
        summary = runner.run(&config.hosts, &config.command) => summary,
        _ = tokio::signal::ctrl_c() => {
            info!("Received SIGINT (Ctrl+C), aborting...");
            return Ok(ExitCode::from(130));
        }
    };

    print_summary(&summary, config.json)?;

    if summary.success() {
        Ok(ExitCode::SUCCESS)
    } else {
        Ok(ExitCode::FAILURE)
    }
}

fn print_summary(summary: &RunSummary, json: bool) -> anyhow::Result<()> {
    if json {
        for report in &summary.reports {
            println!("{}", serde_json::to_string(report)?);
        }
        for failure in &summary.failures {
            let line = serde_json::json!({
                "host": failure.host,
                "error": failure.error.to_string(),
                "exit_code": failure.error.exit_code(),
            });
            println!("{}", line);
        }
        return Ok(());
    }

    for report in &summary.reports {
        println!(
            "==> {} ({}) exit={}",
            report.host, report.address, report.exit_code
        );
        if !report.output.is_empty() {
            println!("{}", report.output);
        }
    }

    for failure in &summary.failures {
        error!("{}: {}", failure.host, failure.error);
    }

    Ok(())
}
