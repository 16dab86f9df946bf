use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use tracing::{info, warn};

use rust_dlq::config::AppConfig;
use rust_dlq::downloader::{DownloadManager, YtDlpCommandBuilder};
use rust_dlq::persist::{JsonFileAdapter, PersistenceAdapter};
use rust_dlq::queue::{JobStore, NewJob, QueueEvent};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    rust_dlq::logging::init();

    // Load environment variables
    dotenvy::dotenv().ok();

    let data_dir = std::env::var_os("RUST_DLQ_DATA_DIR")
        .map(PathBuf::from)
        .unwrap_or_else(JsonFileAdapter::default_dir);
    let adapter = JsonFileAdapter::new(&data_dir);
    info!(dir = %data_dir.display(), "Using data directory");

    let config = match adapter.load_config().await {
        Ok(config) => config,
        Err(e) => {
            warn!("Could not load config, using defaults: {e}");
            AppConfig::default()
        }
    };

    let store = Arc::new(JobStore::new());
    match adapter.load_jobs().await {
        Ok(snapshots) => {
            let restored = store.restore(snapshots);
            if restored > 0 {
                info!(count = restored, "Restored persisted queue");
            }
        }
        Err(e) => {
            warn!("Could not load queue, starting empty: {e}");
        }
    }

    let manager = Arc::new(DownloadManager::new(
        Arc::clone(&store),
        Arc::new(YtDlpCommandBuilder::new()),
        config,
    ));

    for url in std::env::args().skip(1) {
        manager.enqueue(NewJob::new(url))?;
    }

    if store.is_empty() {
        info!("Queue is empty, nothing to do");
        return Ok(());
    }

    match YtDlpCommandBuilder::detect_version(&manager.config().ytdlp_path) {
        Some(version) => info!(%version, "Found yt-dlp"),
        None => warn!("yt-dlp not found at configured path; downloads will fail to spawn"),
    }

    // Relay queue events into the log for the terminal user.
    let mut events = store.subscribe();
    tokio::spawn(async move {
        loop {
            match events.recv().await {
                Ok(QueueEvent::JobUpdated(job)) => {
                    if let Some(message) = &job.last_message {
                        info!(job = %job.url, status = %job.status, "{message}");
                    }
                }
                Ok(_) => {}
                Err(tokio::sync::broadcast::error::RecvError::Lagged(_)) => {}
                Err(tokio::sync::broadcast::error::RecvError::Closed) => break,
            }
        }
    });

    manager.start();

    let mut poll = tokio::time::interval(Duration::from_millis(500));
    loop {
        tokio::select! {
            _ = tokio::signal::ctrl_c() => {
                info!("Interrupted, saving queue for next run");
                break;
            }
            _ = poll.tick() => {
                if !store.has_pending_work() {
                    info!("Queue drained");
                    break;
                }
            }
        }
    }

    manager.shutdown().await;
    adapter.save_jobs(&store.snapshots()).await?;
    adapter.save_config(&manager.config()).await?;

    Ok(())
}
