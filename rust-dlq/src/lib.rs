//! A supervised download queue for yt-dlp.
//!
//! Jobs are held in an ordered [`queue::JobStore`]; the
//! [`downloader::DownloadManager`] admits up to a configured number of
//! them at once, supervising one external yt-dlp process per running job
//! with fixed-delay retries. Queue state is persisted across restarts via
//! [`persist::PersistenceAdapter`].

pub mod config;
pub mod downloader;
pub mod error;
pub mod logging;
pub mod persist;
pub mod queue;

pub use error::{Error, Result};
