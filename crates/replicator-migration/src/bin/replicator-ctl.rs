// Copyright (C) 2025 SyncMyOrders Sp. z o.o.
// SPDX-License-Identifier: AGPL-3.0-or-later
//! Replicator Control CLI
//!
//! Inspects force-replication runs stored in the engine database.
//!
//! Usage:
//!   replicator-ctl <command> [options]
//!
//! Commands:
//!   list [--limit <n>]                 List runs
//!   status <run_id>                    Latest status snapshot of a run
//!   params <run_id>                    Continuation record of a run
//!   heartbeat <run_id> <activity_id>   Latest heartbeat of an activity

use std::process::ExitCode;

use anyhow::{Context, Result, anyhow, bail};
use replicator_engine::{EngineConfig, Persistence, SqlitePersistence};
use replicator_migration::{MigrationParams, MigrationStatus};
use tracing::debug;

fn print_usage() {
    eprintln!(
        r#"Usage: replicator-ctl <command> [options]

Inspect force-replication runs.

COMMANDS:
    list                            List runs, most recently updated first
    status <run_id>                 Show the latest status snapshot
    params <run_id>                 Show the continuation record (restart input)
    heartbeat <run_id> <activity_id>  Show the latest heartbeat of an activity

LIST OPTIONS:
    --limit <n>                     Max results (default: 100)

ENVIRONMENT:
    REPLICATOR_DATABASE_PATH        SQLite file (default: .data/replicator.db)

EXAMPLES:
    # Where did the migration get to?
    replicator-ctl status orders-migration

    # Where will user-data seeding resume?
    replicator-ctl heartbeat orders-migration seed-user-data
"#
    );
}

#[derive(Debug)]
enum Command {
    List { limit: i64 },
    Status { run_id: String },
    Params { run_id: String },
    Heartbeat { run_id: String, activity_id: String },
}

fn parse_args() -> Result<Command, String> {
    let args: Vec<String> = std::env::args().collect();
    parse_args_from_vec(&args)
}

fn parse_args_from_vec(args: &[String]) -> Result<Command, String> {
    if args.len() < 2 {
        return Err("No command specified".to_string());
    }

    match args[1].as_str() {
        "help" | "--help" | "-h" => {
            print_usage();
            std::process::exit(0);
        }
        "list" => {
            let mut limit: i64 = 100;

            let mut i = 2;
            while i < args.len() {
                match args[i].as_str() {
                    "--limit" => {
                        i += 1;
                        limit = args
                            .get(i)
                            .ok_or("--limit requires a number")?
                            .parse()
                            .map_err(|_| "Invalid limit")?;
                        if limit <= 0 {
                            return Err("Invalid limit".to_string());
                        }
                    }
                    arg => return Err(format!("Unknown argument: {}", arg)),
                }
                i += 1;
            }

            Ok(Command::List { limit })
        }
        "status" => {
            let run_id = args.get(2).ok_or("Run ID required")?.clone();
            Ok(Command::Status { run_id })
        }
        "params" => {
            let run_id = args.get(2).ok_or("Run ID required")?.clone();
            Ok(Command::Params { run_id })
        }
        "heartbeat" => {
            let run_id = args.get(2).ok_or("Run ID required")?.clone();
            let activity_id = args.get(3).ok_or("Activity ID required")?.clone();
            Ok(Command::Heartbeat {
                run_id,
                activity_id,
            })
        }
        cmd => Err(format!("Unknown command: {}", cmd)),
    }
}

fn init_tracing() -> Result<()> {
    tracing_subscriber::fmt()
        .with_writer(std::io::stderr)
        .with_env_filter(
            tracing_subscriber::EnvFilter::from_default_env()
                .add_directive("replicator_migration=info".parse()?),
        )
        .init();
    Ok(())
}

#[tokio::main]
async fn main() -> ExitCode {
    dotenvy::dotenv().ok();

    if let Err(e) = init_tracing() {
        eprintln!("Failed to initialize logging: {}", e);
        return ExitCode::FAILURE;
    }

    let cmd = match parse_args() {
        Ok(cmd) => cmd,
        Err(e) => {
            eprintln!("Error: {}", e);
            eprintln!();
            print_usage();
            return ExitCode::FAILURE;
        }
    };

    let config = match EngineConfig::from_env() {
        Ok(c) => c,
        Err(e) => {
            eprintln!("Configuration error: {}", e);
            return ExitCode::FAILURE;
        }
    };
    debug!(database = %config.database_path.display(), "Opening run store");

    let persistence = match SqlitePersistence::from_path(&config.database_path).await {
        Ok(p) => p,
        Err(e) => {
            eprintln!("Failed to open {}: {}", config.database_path.display(), e);
            return ExitCode::FAILURE;
        }
    };

    match execute_command(&persistence, cmd).await {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            eprintln!("Error: {:#}", e);
            ExitCode::FAILURE
        }
    }
}

async fn execute_command(persistence: &dyn Persistence, cmd: Command) -> Result<()> {
    match cmd {
        Command::List { limit } => {
            let runs = persistence.list_runs(limit).await?;
            if runs.is_empty() {
                println!("No runs");
            }
            for run in runs {
                println!(
                    "{}\t{}\t{}\texecution={}\tupdated={}",
                    run.run_id,
                    run.kind,
                    run.status,
                    run.execution,
                    run.updated_at.to_rfc3339()
                );
                if let Some(error) = run.error {
                    println!("\terror: {}", error);
                }
            }
        }

        Command::Status { run_id } => {
            let run = persistence
                .get_run(&run_id)
                .await?
                .ok_or_else(|| anyhow!("Run not found: {}", run_id))?;
            let snapshot = run
                .status_snapshot
                .ok_or_else(|| anyhow!("No status recorded for {} yet", run_id))?;
            let status: MigrationStatus = serde_json::from_slice(&snapshot)
                .with_context(|| format!("Status of {} is not a migration status", run_id))?;
            println!("{}", serde_json::to_string_pretty(&status)?);
            if let Some(error) = run.error {
                println!("error: {}", error);
            }
        }

        Command::Params { run_id } => {
            let run = persistence
                .get_run(&run_id)
                .await?
                .ok_or_else(|| anyhow!("Run not found: {}", run_id))?;
            let params: MigrationParams = serde_json::from_slice(&run.params)
                .with_context(|| format!("Params of {} are not migration params", run_id))?;
            println!("{}", serde_json::to_string_pretty(&params)?);
        }

        Command::Heartbeat {
            run_id,
            activity_id,
        } => {
            let Some(record) = persistence.load_heartbeat(&run_id, &activity_id).await? else {
                bail!("No heartbeat for {} / {}", run_id, activity_id);
            };
            let details: serde_json::Value = serde_json::from_slice(&record.details)
                .context("Heartbeat details are not JSON")?;
            println!(
                "{}",
                serde_json::to_string_pretty(&serde_json::json!({
                    "run_id": record.run_id,
                    "activity_id": record.activity_id,
                    "attempt": record.attempt,
                    "recorded_at": record.recorded_at,
                    "details": details,
                }))?
            );
        }
    }

    Ok(())
}
