/**
 * FinTrack Sync command line
 *
 * Inspects and drives the local sync queue: status, a manual drain pass,
 * conflict resolution and failed-operation handling.
 */

use std::path::PathBuf;
use std::str::FromStr;

use fintrack_sync::shared::config::SyncConfig;
use fintrack_sync::shared::operation::ConflictResolution;
use fintrack_sync::sync::engine::PassOutcome;
use fintrack_sync::sync::SyncService;
use uuid::Uuid;

const USAGE: &str = "\
usage: fintrack-sync [--config <path>] <command>

commands:
  status                          show sync status
  sync                            run a drain pass now
  operations                      list queued operations
  conflicts                       list conflicts awaiting a decision
  resolve <entity-id> <mode>      resolve a conflict (local, remote, merge)
  retry <operation-id>            retry a failed operation
  discard <operation-id>          drop a failed or conflicted operation";

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let env_filter = std::env::var("RUST_LOG").unwrap_or_else(|_| "info".to_string());
    tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::new(&env_filter))
        .with_writer(std::io::stderr)
        .init();

    let mut args: Vec<String> = std::env::args().skip(1).collect();
    let config_path = match args.iter().position(|arg| arg == "--config") {
        Some(index) => {
            if index + 1 >= args.len() {
                eprintln!("{}", USAGE);
                std::process::exit(2);
            }
            let path = PathBuf::from(args.remove(index + 1));
            args.remove(index);
            Some(path)
        }
        None => None,
    };

    let config = SyncConfig::load(config_path.as_deref())?;
    tracing::debug!(database = %config.database_path.display(), "Configuration loaded");
    let command: Vec<&str> = args.iter().map(String::as_str).collect();
    // Only a drain pass needs the remote
    let service = match command.as_slice() {
        ["sync"] => SyncService::open(config).await?,
        _ => SyncService::open_local(config).await?,
    };

    match command.as_slice() {
        ["status"] | [] => {
            let status = service.status().await;
            println!("{}", serde_json::to_string_pretty(&status)?);
        }
        ["sync"] => match service.trigger_manual_sync().await? {
            PassOutcome::Completed(report) => println!("{}", serde_json::to_string_pretty(&report)?),
            PassOutcome::Skipped(reason) => println!("skipped: {:?}", reason),
        },
        ["operations"] => {
            for op in service.operations().await? {
                println!(
                    "{}  {:<10} {:<7} {:<18} {}  retries={}{}",
                    op.id,
                    op.status.as_str(),
                    op.operation_type.as_str(),
                    op.entity_type.as_str(),
                    op.entity_id,
                    op.retry_count,
                    op.last_error.map(|e| format!("  error={}", e)).unwrap_or_default(),
                );
            }
        }
        ["conflicts"] => {
            let conflicts = service.conflicts().await?;
            println!("{}", serde_json::to_string_pretty(&conflicts)?);
        }
        ["resolve", entity_id, mode] => {
            let resolution = ConflictResolution::from_str(mode)?;
            let outcome = service.resolve_conflict(entity_id, resolution).await?;
            println!("{:?}", outcome);
        }
        ["retry", id] => {
            let op = service.retry_failed(Uuid::parse_str(id)?).await?;
            println!("{} is {}", op.id, op.status);
        }
        ["discard", id] => {
            let op = service.discard_operation(Uuid::parse_str(id)?).await?;
            println!("discarded {}", op.id);
        }
        _ => {
            eprintln!("{}", USAGE);
            std::process::exit(2);
        }
    }

    Ok(())
}
