use clap::Parser;
use polydex_api::RestApi;
use polydex_core::IndexerConfig;
use polydex_storage::StorageManager;
use std::path::PathBuf;
use std::sync::Arc;
use tracing::{error, info, Level};
use tracing_subscriber::FmtSubscriber;

/// Multimodal search indexer with weighted vector and BM25 scoring
#[derive(Parser, Debug)]
#[command(name = "polydex")]
#[command(about = "A multimodal search indexer", long_about = None)]
struct Args {
    /// Data directory for persistent indexes; in-memory when omitted
    #[arg(short, long)]
    data_dir: Option<PathBuf>,

    /// Indexer config (JSON) for an index created at start-up
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Name of the start-up index
    #[arg(long, default_value = "default")]
    index_name: String,

    /// HTTP API port
    #[arg(long, default_value_t = 8080)]
    http_port: u16,

    /// Log level
    #[arg(long, default_value = "info")]
    log_level: String,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let args = Args::parse();

    let log_level = match args.log_level.as_str() {
        "trace" => Level::TRACE,
        "debug" => Level::DEBUG,
        "info" => Level::INFO,
        "warn" => Level::WARN,
        "error" => Level::ERROR,
        _ => Level::INFO,
    };

    let subscriber = FmtSubscriber::builder()
        .with_max_level(log_level)
        .finish();
    tracing::subscriber::set_global_default(subscriber)?;

    info!("Starting polydex v{}", env!("CARGO_PKG_VERSION"));

    let storage = match &args.data_dir {
        Some(dir) => {
            info!("Data directory: {:?}", dir);
            StorageManager::open(dir)?
        }
        None => {
            info!("No data directory given, indexes are kept in memory");
            StorageManager::in_memory()
        }
    };
    let storage = Arc::new(storage);
    info!(indexes = storage.list_indexes().len(), "Storage initialized");

    if let Some(path) = &args.config {
        let config = IndexerConfig::from_file(path)?;
        let indexer = storage.get_or_create_index(&args.index_name, &config)?;
        info!(
            index = %args.index_name,
            backend = indexer.backend_kind(),
            documents = indexer.count()?,
            "Start-up index ready"
        );
    }

    let storage_http = storage.clone();
    let http_port = args.http_port;
    let http_handle = std::thread::spawn(move || {
        info!("Starting HTTP server on port {}", http_port);
        let sys = actix_web::rt::System::new();
        sys.block_on(async {
            if let Err(e) = RestApi::start(storage_http, http_port).await {
                error!("HTTP server error: {}", e);
            }
        })
    });

    info!("HTTP API: http://localhost:{}/indexes", args.http_port);

    tokio::select! {
        _ = tokio::signal::ctrl_c() => {
            info!("Shutdown signal received");
        }
        _ = tokio::task::spawn_blocking(move || {
            http_handle.join().ok();
        }) => {
            info!("HTTP server stopped");
        }
    }

    info!("Shutting down...");
    Ok(())
}
