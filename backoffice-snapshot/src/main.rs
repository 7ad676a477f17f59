//! Backoffice Snapshot - command line entry point

use backoffice_snapshot::{utils, AppConfig, ArchiveKind, BackupError, CreateArchiveRequest, SnapshotEngine};
use chrono::Utc;
use clap::{Parser, Subcommand, ValueEnum};
use std::path::PathBuf;
use std::process::ExitCode;

#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
struct Args {
    /// Log level (trace, debug, info, warn, error)
    #[arg(short, long, global = true)]
    log_level: Option<String>,

    /// Id of the user performing the operation, recorded in the audit log
    #[arg(long, global = true)]
    user: Option<i64>,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Create a new archive
    Create {
        #[arg(long)]
        name: String,
        #[arg(short, long)]
        description: Option<String>,
        #[arg(long, value_enum, default_value_t = KindArg::Full)]
        kind: KindArg,
        /// Leave uploaded file contents out of the archive
        #[arg(long)]
        no_files: bool,
    },
    /// List archives, newest first
    List {
        #[arg(long)]
        json: bool,
    },
    /// Show one archive
    Show {
        id: i64,
        #[arg(long)]
        json: bool,
    },
    /// Replace all current data with the contents of an archive
    Restore {
        id: i64,
        /// Required: the restore discards everything changed since the archive
        #[arg(long)]
        confirm: bool,
    },
    /// Copy an archive out of the backup directory
    Download {
        id: i64,
        /// Directory to write into (defaults to the current directory)
        #[arg(short, long)]
        out: Option<PathBuf>,
    },
    /// Delete an archive file and its registry entry
    Delete { id: i64 },
    /// Delete archives older than the retention period
    Prune,
    /// Show the most recent audit entries
    Audit {
        #[arg(short = 'n', long, default_value_t = 20)]
        limit: i64,
    },
}

#[derive(Clone, Copy, Debug, ValueEnum)]
enum KindArg {
    Full,
    Partial,
}

impl From<KindArg> for ArchiveKind {
    fn from(kind: KindArg) -> Self {
        match kind {
            KindArg::Full => ArchiveKind::Full,
            KindArg::Partial => ArchiveKind::Partial,
        }
    }
}

fn main() -> ExitCode {
    let args = Args::parse();
    let config = AppConfig::from_env();

    let log_level = args.log_level.as_deref().unwrap_or(&config.log_level);
    if let Err(e) = utils::logger::init(log_level) {
        eprintln!("Failed to initialize logging: {e}");
    }

    let engine = match SnapshotEngine::open(config) {
        Ok(engine) => engine,
        Err(e) => {
            tracing::error!("Startup failed: {e:#}");
            eprintln!("Startup failed: {e}");
            return ExitCode::FAILURE;
        }
    };

    match run(&engine, args.command, args.user) {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            eprintln!("{}", e.user_message());
            ExitCode::FAILURE
        }
    }
}

fn run(engine: &SnapshotEngine, command: Command, user: Option<i64>) -> Result<(), BackupError> {
    match command {
        Command::Create { name, description, kind, no_files } => {
            let record = engine.create_archive(&CreateArchiveRequest {
                name,
                description,
                kind: kind.into(),
                include_payloads: !no_files,
                requested_by: user,
            })?;
            println!("{}", serde_json::to_string_pretty(&record)?);
        }
        Command::List { json } => {
            let records = engine.list_archives()?;
            if json {
                println!("{}", serde_json::to_string_pretty(&records)?);
                return Ok(());
            }
            for record in records {
                println!(
                    "{:>5}  {:<10} {:<8} {:>12}  {}  {}",
                    record.id,
                    record.status,
                    record.kind,
                    record.size_bytes,
                    record.created_at,
                    record.name
                );
            }
        }
        Command::Show { id, json } => {
            let record = engine.get_archive(id)?;
            if json {
                println!("{}", serde_json::to_string_pretty(&record)?);
            } else {
                println!("id:          {}", record.id);
                println!("name:        {}", record.name);
                println!("description: {}", record.description.as_deref().unwrap_or("-"));
                println!("kind:        {}", record.kind);
                println!("status:      {}", record.status);
                println!("size:        {} bytes", record.size_bytes);
                println!("created:     {}", record.created_at);
                println!("file:        {}", record.storage_path.as_deref().unwrap_or("-"));
            }
        }
        Command::Restore { id, confirm } => {
            if !confirm {
                return Err(BackupError::InvalidRequest(
                    "Restore replaces all current data; pass --confirm to proceed".into(),
                ));
            }
            let report = engine.restore(id, user)?;
            println!("{}", serde_json::to_string_pretty(&report)?);
        }
        Command::Download { id, out } => {
            let download = engine.download_archive(id, user)?;
            let dest = out.unwrap_or_else(|| PathBuf::from(".")).join(&download.download_name);
            std::fs::copy(&download.path, &dest)?;
            println!("{}", dest.display());
        }
        Command::Delete { id } => {
            engine.delete_archive(id, user)?;
            println!("Archive {id} deleted");
        }
        Command::Prune => {
            let report = engine.prune(Utc::now())?;
            println!("{}", serde_json::to_string_pretty(&report)?);
        }
        Command::Audit { limit } => {
            for entry in engine.recent_audit(limit)? {
                println!(
                    "{}  {:<8} {:<8} {}",
                    entry.created_at, entry.category, entry.severity, entry.message
                );
            }
        }
    }
    Ok(())
}
