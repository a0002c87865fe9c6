//! mp3tube - convert video URLs to audio files and keep a library of the results
//!
//! The heavy lifting (download, format selection, transcoding) is delegated to
//! yt-dlp and ffmpeg. This crate coordinates each conversion job, keeps the
//! storage directory and the metadata store consistent, and serves the
//! library over HTTP.

pub mod cli;
pub mod config;
pub mod extractors;
pub mod jobs;
pub mod output;
pub mod server;
pub mod store;
pub mod utils;

pub use cli::{Cli, Commands, OutputFormat};
pub use config::Config;
pub use extractors::{ExtractedAudio, JobOutcome, MediaExtractor};
pub use jobs::{DeleteOutcome, JobManager, SubmitOutcome};
pub use store::{JobRecord, JobStatus, MetadataStore, Page, PAGE_SIZE};

/// Result type used throughout the library
pub type Result<T> = anyhow::Result<T>;

/// Error types for conversion and library management
#[derive(thiserror::Error, Debug)]
pub enum JobError {
    #[error("Please enter a YouTube URL")]
    InvalidInput,

    #[error("Conversion failed for the provided URL.")]
    ExtractionFailure,

    #[error("Metadata store failure: {0}")]
    StorageWriteFailure(#[from] store::StoreError),

    #[error("File not found: {0}")]
    FileNotFound(String),

    #[error("Error deleting file: {source}")]
    DeletionFailure {
        file: String,
        #[source]
        source: std::io::Error,
    },

    #[error("Too many concurrent conversions (max: {0})")]
    Busy(usize),
}
