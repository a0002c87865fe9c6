use clap::{Parser, Subcommand, ValueEnum};
use std::path::PathBuf;

#[derive(Parser)]
#[command(
    name = "mp3tube",
    about = "mp3tube - Convert video URLs to audio files and manage the resulting library",
    version,
    long_about = "A small web service and CLI that hands video URLs to yt-dlp, transcodes the audio with ffmpeg, and keeps a paginated library of the produced files with download and delete operations."
)]
pub struct Cli {
    #[command(subcommand)]
    pub command: Commands,

    /// Configuration file (defaults to ./config.yaml or the user config directory)
    #[arg(short, long, global = true, env = "MP3TUBE_CONFIG", value_name = "FILE")]
    pub config: Option<PathBuf>,

    /// Enable verbose logging
    #[arg(short, long, global = true)]
    pub verbose: bool,

    /// Emit logs as JSON lines
    #[arg(long, global = true)]
    pub log_json: bool,
}

#[derive(Subcommand)]
pub enum Commands {
    /// Run the HTTP service
    Serve {
        /// Address to bind, overrides server.listen_addr
        #[arg(short, long, value_name = "ADDR")]
        listen: Option<String>,
    },

    /// Convert a single URL from the terminal
    Convert {
        /// Video URL to convert
        #[arg(value_name = "URL")]
        url: String,
    },

    /// List converted files
    List {
        /// Page number (1-based)
        #[arg(short, long, default_value = "1")]
        page: usize,

        /// Output format
        #[arg(short, long, value_enum, default_value = "text")]
        format: OutputFormat,
    },

    /// Delete a converted file and its record
    Delete {
        /// Filename inside the download folder (may be URL-encoded)
        #[arg(value_name = "FILE")]
        file: String,
    },

    /// Show configuration
    Config {
        /// Show current configuration
        #[arg(short, long)]
        show: bool,
    },
}

#[derive(ValueEnum, Clone, Debug)]
pub enum OutputFormat {
    /// Plain text table
    Text,
    /// JSON page object
    Json,
}

impl std::fmt::Display for OutputFormat {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            OutputFormat::Text => write!(f, "text"),
            OutputFormat::Json => write!(f, "json"),
        }
    }
}
