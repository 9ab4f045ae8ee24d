//! fxgate — multi-LP broker core.
//!
//! Exit codes: 0 success, 1 fatal configuration, 2 storage error,
//! 3 network error.

use clap::{Parser, Subcommand};
use tracing::{error, info};

use fxgate_server::{AppConfig, Application};

#[derive(Parser, Debug)]
#[command(name = "fxgate", version, about = "Multi-LP market-data and order-routing core")]
struct Args {
    /// Configuration file (or set FXGATE_CONFIG).
    #[arg(short, long)]
    config: Option<String>,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Run the broker core.
    Serve,
    /// Initialize storage: rule store schema and data directories.
    Migrate,
    /// Close out one date's tick storage behind a durability barrier.
    Rotate {
        #[arg(long)]
        date: String,
    },
    /// List storage files eligible for external compression.
    Compress {
        /// Age threshold, e.g. "7d".
        #[arg(long = "older-than", default_value = "7d")]
        older_than: String,
    },
    /// Print a local state summary.
    Status,
}

const EXIT_OK: i32 = 0;
const EXIT_CONFIG: i32 = 1;
const EXIT_STORAGE: i32 = 2;
const EXIT_NETWORK: i32 = 3;

#[tokio::main]
async fn main() {
    std::process::exit(real_main().await);
}

async fn real_main() -> i32 {
    let args = Args::parse();

    if let Err(e) = fxgate_telemetry::init_logging() {
        eprintln!("logging init failed: {e}");
        return EXIT_CONFIG;
    }

    let config_path = args
        .config
        .or_else(|| std::env::var("FXGATE_CONFIG").ok())
        .unwrap_or_else(|| "config/default".to_string());

    info!(config_path = %config_path, "Loading configuration");
    let config = match AppConfig::from_file(&config_path) {
        Ok(config) => config,
        Err(e) => {
            error!(?e, "Configuration rejected");
            return EXIT_CONFIG;
        }
    };

    match args.command {
        Command::Serve => serve(config).await,
        Command::Migrate => migrate(config),
        Command::Rotate { date } => rotate(config, &date),
        Command::Compress { older_than } => compress(config, &older_than),
        Command::Status => status(config),
    }
}

async fn serve(config: AppConfig) -> i32 {
    info!("Starting fxgate v{}", env!("CARGO_PKG_VERSION"));
    let app = match Application::new(config) {
        Ok(app) => app,
        Err(e) => {
            error!(?e, "Startup failed");
            return classify(&e);
        }
    };
    match app.run().await {
        Ok(()) => EXIT_OK,
        Err(e) => {
            error!(?e, "Fatal error");
            classify(&e)
        }
    }
}

/// Map an error chain to the documented exit codes.
fn classify(e: &anyhow::Error) -> i32 {
    for cause in e.chain() {
        if cause.downcast_ref::<fxgate_store::StoreError>().is_some()
            || cause.downcast_ref::<fxgate_rules::RuleStoreError>().is_some()
        {
            return EXIT_STORAGE;
        }
        if cause.downcast_ref::<fxgate_fix::FixError>().is_some()
            || cause.downcast_ref::<fxgate_hub::HubError>().is_some()
            || cause.downcast_ref::<std::io::Error>().is_some()
        {
            return EXIT_NETWORK;
        }
    }
    EXIT_CONFIG
}

fn migrate(config: AppConfig) -> i32 {
    let run = || -> Result<(), String> {
        std::fs::create_dir_all(&config.data_dir).map_err(|e| e.to_string())?;
        std::fs::create_dir_all(&config.store.base_dir).map_err(|e| e.to_string())?;
        std::fs::create_dir_all(config.seq_dir()).map_err(|e| e.to_string())?;
        fxgate_rules::RuleStore::open(config.rules_db_path()).map_err(|e| e.to_string())?;
        Ok(())
    };
    match run() {
        Ok(()) => {
            info!(data_dir = %config.data_dir.display(), "Migration complete");
            EXIT_OK
        }
        Err(e) => {
            error!(e, "Migration failed");
            EXIT_STORAGE
        }
    }
}

fn rotate(config: AppConfig, date: &str) -> i32 {
    // Rotation works directly on the backend; no workers needed.
    let backend = fxgate_store::open_backend(config.store.backend, &config.store.base_dir);
    let result = backend.barrier().and_then(|()| backend.rotate_out(date));
    match result {
        Ok(()) => {
            info!(date, "Rotation complete");
            EXIT_OK
        }
        Err(e) => {
            error!(?e, date, "Rotation failed");
            EXIT_STORAGE
        }
    }
}

fn compress(config: AppConfig, older_than: &str) -> i32 {
    let days: u32 = match older_than.strip_suffix('d').and_then(|d| d.parse().ok()) {
        Some(days) => days,
        None => {
            error!(older_than, "Expected an age like \"7d\"");
            return EXIT_CONFIG;
        }
    };

    let cutoff = (chrono::Utc::now() - chrono::Duration::days(i64::from(days)))
        .format("%Y-%m-%d")
        .to_string();
    let entries = match std::fs::read_dir(&config.store.base_dir) {
        Ok(entries) => entries,
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
            info!("No storage directory yet; nothing to compress");
            return EXIT_OK;
        }
        Err(e) => {
            error!(?e, "Storage listing failed");
            return EXIT_STORAGE;
        }
    };

    let mut candidates = Vec::new();
    for entry in entries.flatten() {
        let name = entry.file_name().to_string_lossy().into_owned();
        let date_part = name
            .strip_prefix("ticks_")
            .and_then(|s| s.strip_suffix(".db"))
            .unwrap_or(&name)
            .to_string();
        if chrono::NaiveDate::parse_from_str(&date_part, "%Y-%m-%d").is_ok()
            && date_part.as_str() < cutoff.as_str()
        {
            candidates.push(entry.path());
        }
    }
    candidates.sort();

    // The compressor itself is external; it must take the advisory file
    // lock before rewriting anything listed here.
    for path in &candidates {
        println!("{}", path.display());
    }
    info!(count = candidates.len(), cutoff = %cutoff, "Compression candidates listed");
    EXIT_OK
}

fn status(config: AppConfig) -> i32 {
    let seq_dir = config.seq_dir();
    let mut sessions = Vec::new();
    if let Ok(entries) = std::fs::read_dir(&seq_dir) {
        for entry in entries.flatten() {
            if let Ok(content) = std::fs::read_to_string(entry.path()) {
                sessions.push(serde_json::json!({
                    "session": entry.file_name().to_string_lossy(),
                    "seqnums": serde_json::from_str::<serde_json::Value>(&content)
                        .unwrap_or(serde_json::Value::Null),
                }));
            }
        }
    }

    let mut storage_dates = Vec::new();
    if let Ok(entries) = std::fs::read_dir(&config.store.base_dir) {
        for entry in entries.flatten() {
            storage_dates.push(entry.file_name().to_string_lossy().into_owned());
        }
    }
    storage_dates.sort();

    let rules = match fxgate_rules::RuleStore::open(config.rules_db_path()) {
        Ok(store) => store.list().map(|r| r.len()).unwrap_or(0),
        Err(_) => 0,
    };

    let summary = serde_json::json!({
        "data_dir": config.data_dir.display().to_string(),
        "backend": format!("{:?}", config.store.backend),
        "lps": config.lps.iter().map(|lp| lp.id.clone()).collect::<Vec<_>>(),
        "symbols": config.symbols,
        "sessions": sessions,
        "storage_dates": storage_dates,
        "routing_rules": rules,
    });
    match serde_json::to_string_pretty(&summary) {
        Ok(text) => {
            println!("{text}");
            EXIT_OK
        }
        Err(e) => {
            error!(?e, "Status encode failed");
            EXIT_STORAGE
        }
    }
}
