use std::path::PathBuf;
use std::process;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use serde::Serialize;

use carelink_backup::backup::catalog::format_bytes;
use carelink_backup::{BackupConfig, BackupKind, BackupService};

const APP_IDENTIFIER: &str = "com.carelink.app";
const DB_FILE_NAME: &str = "carelink.db";

#[derive(Debug, Parser)]
#[command(
    name = "carelink-backup",
    about = "CareLink database backup maintenance",
    version
)]
struct Cli {
    /// Live database file. Defaults to the app's data directory.
    #[arg(long, global = true)]
    db: Option<PathBuf>,
    /// Application data directory that holds the `backups/` folder.
    #[arg(long, global = true)]
    appdata: Option<PathBuf>,
    #[command(subcommand)]
    command: Command,
}

#[derive(Debug, Subcommand)]
enum Command {
    /// Snapshot the live database into a new archive.
    Create {
        #[arg(long, default_value = "manual")]
        kind: BackupKind,
    },
    /// List archives, newest first.
    List {
        #[arg(long)]
        json: bool,
    },
    /// Show aggregate statistics for the backup folder.
    Status {
        #[arg(long)]
        json: bool,
    },
    /// Replace the live database with the payload of an archive.
    Restore { filename: String },
    /// Delete one archive.
    Delete { filename: String },
    /// Copy an archive out of the backup folder.
    Export { filename: String, dest: PathBuf },
    /// Copy a file into the backup folder as an import archive.
    Import { source: PathBuf },
    /// Delete archives older than the retention window.
    Rotate {
        #[arg(long)]
        days: Option<u32>,
    },
    /// Remove leftovers from interrupted runs and report what was found.
    Sweep,
    /// Take automatic backups in the foreground until interrupted.
    Run,
}

fn main() {
    carelink_backup::init_logging();

    let cli = Cli::parse();
    match run(cli) {
        Ok(code) => process::exit(code),
        Err(err) => {
            eprintln!("Error: {err:#}");
            process::exit(1);
        }
    }
}

fn run(cli: Cli) -> Result<i32> {
    let (db_path, app_data_dir) = resolve_paths(cli.db, cli.appdata)?;
    let config = BackupConfig::load(db_path, app_data_dir);

    let runtime = tokio::runtime::Builder::new_multi_thread()
        .enable_all()
        .build()
        .context("start async runtime")?;
    runtime.block_on(async move {
        let service = BackupService::initialize(config)
            .await
            .context("initialize backup service")?;
        let code = handle_command(&service, cli.command).await;
        service.cleanup().await;
        code
    })
}

async fn handle_command(service: &BackupService, command: Command) -> Result<i32> {
    match command {
        Command::Create { kind } => {
            let path = service
                .create_backup(kind)
                .await
                .with_context(|| format!("create {kind} backup"))?;
            println!("Backup stored at {}", path.display());
        }
        Command::List { json } => {
            let records = service.list_backups().await.context("list backups")?;
            if json {
                print_json(&records)?;
            } else if records.is_empty() {
                println!("No backups in {}", service.backup_folder().display());
            } else {
                for record in &records {
                    println!(
                        "{:<7} {:<25} {:>10}  {}",
                        record.kind.as_str(),
                        record.timestamp.to_rfc3339(),
                        format_bytes(record.size_bytes),
                        record.filename
                    );
                }
            }
        }
        Command::Status { json } => {
            let status = service.backup_status().await.context("read backup status")?;
            if json {
                print_json(&status)?;
            } else {
                println!("Folder:  {}", status.backup_folder.display());
                println!("Backups: {}", status.total_backups);
                println!("Size:    {}", status.total_size_formatted);
                if let Some(newest) = status.newest_backup_time {
                    println!("Newest:  {}", newest.to_rfc3339());
                }
                if let Some(oldest) = status.oldest_backup_time {
                    println!("Oldest:  {}", oldest.to_rfc3339());
                }
            }
        }
        Command::Restore { filename } => {
            let outcome = service
                .restore_backup(&filename)
                .await
                .with_context(|| format!("restore {filename}"))?;
            println!(
                "Restored {} ({} bytes). Previous database kept at {}",
                outcome.filename,
                outcome.restored_bytes,
                outcome.safety_backup_path.display()
            );
        }
        Command::Delete { filename } => {
            service
                .delete_backup(&filename)
                .await
                .with_context(|| format!("delete {filename}"))?;
            println!("Deleted {filename}");
        }
        Command::Export { filename, dest } => {
            let bytes = service
                .export_backup(&filename, &dest)
                .await
                .with_context(|| format!("export {filename}"))?;
            println!("Exported {filename} to {} ({bytes} bytes)", dest.display());
        }
        Command::Import { source } => {
            let filename = service
                .import_backup(&source)
                .await
                .with_context(|| format!("import {}", source.display()))?;
            println!("Imported as {filename}");
        }
        Command::Rotate { days } => {
            let days = days.unwrap_or(service.config().retention_days);
            let deleted = service.rotate(days).await.context("rotate backups")?;
            println!("Deleted {deleted} backup(s) older than {days} days");
        }
        Command::Sweep => {
            print_json(service.recovery_report())?;
        }
        Command::Run => {
            service
                .start_automatic_backups()
                .context("start automatic backups")?;
            tokio::signal::ctrl_c()
                .await
                .context("wait for interrupt")?;
            service.backup_on_close(None).await;
        }
    }
    Ok(0)
}

fn print_json<T: Serialize + ?Sized>(value: &T) -> Result<()> {
    let serialized = serde_json::to_string_pretty(value).context("serialize output")?;
    println!("{serialized}");
    Ok(())
}

/// `--appdata` wins over `CARELINK_FAKE_APPDATA`, which wins over the
/// platform data directory. The database defaults to a file in that folder.
fn resolve_paths(db: Option<PathBuf>, appdata: Option<PathBuf>) -> Result<(PathBuf, PathBuf)> {
    let app_data_dir = match appdata {
        Some(dir) => dir,
        None => default_app_data_dir()?,
    };
    let db_path = db.unwrap_or_else(|| app_data_dir.join(DB_FILE_NAME));
    Ok((db_path, app_data_dir))
}

fn default_app_data_dir() -> Result<PathBuf> {
    if let Ok(fake) = std::env::var("CARELINK_FAKE_APPDATA") {
        return Ok(PathBuf::from(fake));
    }

    let base = dirs::data_dir()
        .or_else(|| std::env::current_dir().ok())
        .ok_or_else(|| anyhow::anyhow!("failed to resolve application data directory"))?;
    Ok(base.join(APP_IDENTIFIER))
}
