use anyhow::{Context, Result};
use clap::{CommandFactory, Parser};
use clap_complete::generate;
use std::io::BufRead;
use std::path::Path;
use tokio::sync::mpsc;
use tracing::warn;
use tracing_subscriber::EnvFilter;

use barrage::cli::config::{Config, Overrides};
use barrage::cli::{Cli, Commands};
use barrage::engine::control::{parse_control_command, ControlCommand};
use barrage::stats::db::HistoryDb;
use barrage::stats::Report;
use barrage::Engine;

/// Exit code when the run finished but a threshold failed.
const THRESHOLDS_FAILED_EXIT_CODE: i32 = 99;

fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .with_writer(std::io::stderr)
        .init();

    let cli = Cli::parse();

    match cli.command {
        Commands::Run {
            config,
            overrides,
            json,
            export_json,
            export_csv,
            interactive,
            history,
        } => {
            let report = run(&config, &overrides.into(), interactive)?;

            if json {
                println!("{}", report.to_json());
            } else {
                println!("{}", report.to_text());
            }
            if let Some(path) = export_json {
                std::fs::write(&path, report.to_json())
                    .with_context(|| format!("failed to write {}", path.display()))?;
                println!("Summary exported to {:?}", path);
            }
            if let Some(path) = export_csv {
                let csv_content = barrage::stats::csv::generate_csv(&report);
                if let Err(e) = std::fs::write(&path, csv_content) {
                    eprintln!("CSV export failed: {}", e);
                } else {
                    println!("CSV exported to {:?}", path);
                }
            }
            if let Some(path) = history {
                save_history(&path, &report);
            }

            if !report.passed {
                std::process::exit(THRESHOLDS_FAILED_EXIT_CODE);
            }
            Ok(())
        }
        Commands::Validate { config, overrides } => {
            barrage::cli::validate::run_validate(&config, &overrides.into()).map(|_| ())
        }
        Commands::Schema { output } => {
            let schema = schemars::schema_for!(Config);
            let schema_json = serde_json::to_string_pretty(&schema)?;
            if let Some(out_path) = output {
                std::fs::write(&out_path, schema_json)?;
                println!("JSON Schema written to {:?}", out_path);
            } else {
                println!("{}", schema_json);
            }
            Ok(())
        }
        Commands::History { id, db, limit } => show_history(&db, id, limit),
        Commands::Completion { shell } => {
            let mut cmd = Cli::command();
            generate(shell, &mut cmd, "barrage", &mut std::io::stdout());
            Ok(())
        }
    }
}

fn run(config_path: &Path, overrides: &Overrides, interactive: bool) -> Result<Report> {
    let mut config = Config::load(config_path)?;
    config.apply_overrides(overrides);
    let plan = config.resolve()?;

    let rt = tokio::runtime::Builder::new_multi_thread()
        .worker_threads(num_cpus::get())
        .enable_all()
        .build()?;

    rt.block_on(async move {
        let engine = Engine::new(plan)?;

        let cancel = engine.cancellation();
        tokio::spawn(async move {
            if tokio::signal::ctrl_c().await.is_ok() {
                warn!("interrupted, stopping VUs");
                cancel.cancel();
            }
        });

        let control_rx = if interactive {
            Some(spawn_control_input())
        } else {
            None
        };

        engine.run(control_rx).await
    })
}

/// Read control commands from stdin on a plain thread; stdin reads block.
fn spawn_control_input() -> mpsc::UnboundedReceiver<ControlCommand> {
    let (tx, rx) = mpsc::unbounded_channel();

    println!("Interactive mode enabled. Commands: ramp <N>, pause, resume, status, stop");
    println!("   Type commands and press Enter.\n");

    std::thread::spawn(move || {
        let stdin = std::io::stdin();
        for line in stdin.lock().lines().map_while(Result::ok) {
            if let Some(cmd) = parse_control_command(&line) {
                if tx.send(cmd).is_err() {
                    break;
                }
            } else if !line.trim().is_empty() {
                println!("Unknown command: {}", line.trim());
            }
        }
    });

    rx
}

fn save_history(path: &Path, report: &Report) {
    match HistoryDb::open(path).and_then(|db| db.save_run(report)) {
        Ok(id) => println!("Run saved to history as #{} ({})", id, path.display()),
        Err(e) => eprintln!("Failed to save run history: {:#}", e),
    }
}

fn show_history(path: &Path, id: Option<i64>, limit: usize) -> Result<()> {
    let db = HistoryDb::open(path)?;
    if let Some(id) = id {
        let report = db.get_report(id)?;
        println!("{}", report.to_text());
        return Ok(());
    }

    let runs = db.list_runs(limit)?;
    if runs.is_empty() {
        println!("No runs recorded in {}", path.display());
        return Ok(());
    }
    println!("{:<6} {:<32} {:<20} RESULT", "ID", "STARTED", "SCENARIO");
    for run in runs {
        println!(
            "{:<6} {:<32} {:<20} {}",
            run.id,
            run.start_time,
            run.scenario,
            if run.passed { "PASSED" } else { "FAILED" }
        );
    }
    Ok(())
}
