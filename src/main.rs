use std::sync::Arc;
use std::time::Duration;

use anyhow::Result;
use clap::Parser;
use indicatif::{ProgressBar, ProgressStyle};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use mp3tube::cli::{Cli, Commands};
use mp3tube::config::{Config, ToolPaths};
use mp3tube::extractors::YtDlpExtractor;
use mp3tube::jobs::{DeleteOutcome, JobManager};
use mp3tube::{output, server, store, utils};

#[actix_web::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    // Initialize tracing
    let default_filter = if cli.verbose {
        "mp3tube=debug,actix_web=debug"
    } else {
        "mp3tube=info,actix_web=info"
    };
    let env_filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| default_filter.into());
    tracing_subscriber::registry()
        .with(env_filter)
        .with(cli.log_json.then(|| tracing_subscriber::fmt::layer().json()))
        .with((!cli.log_json).then(|| tracing_subscriber::fmt::layer()))
        .init();

    let config = Config::load(cli.config.as_deref())?;

    match cli.command {
        Commands::Serve { listen } => {
            config.ensure_storage_dir()?;
            let tools = config.resolve_tools().await?;
            let manager = build_manager(&config, tools)?;
            let listen_addr = listen.unwrap_or_else(|| config.server.listen_addr.clone());

            println!("========================================");
            println!("  mp3tube");
            println!("  http://{}", listen_addr);
            println!("========================================");
            println!();

            server::run(&listen_addr, manager).await?;
        }
        Commands::Convert { url } => {
            config.ensure_storage_dir()?;
            let tools = config.resolve_tools().await?;
            let manager = build_manager(&config, tools)?;

            let progress = ProgressBar::new_spinner();
            progress.set_style(
                ProgressStyle::default_spinner()
                    .template("{spinner:.green} [{elapsed_precise}] {msg}")?,
            );
            progress.set_message("Converting with yt-dlp...");
            progress.enable_steady_tick(Duration::from_millis(100));

            match manager.submit(&url).await {
                Ok(record) => {
                    progress.finish_with_message("Conversion complete");
                    println!("Successfully converted: {}", record.title);
                    println!(
                        "  {} ({})",
                        config.storage.download_dir.join(&record.file).display(),
                        utils::format_megabytes(record.size)
                    );
                }
                Err(e) => {
                    progress.abandon_with_message("Conversion failed");
                    return Err(e.into());
                }
            }
        }
        Commands::List { page, format } => {
            let store = store::open_store(&config.storage)?;
            output::print_page(&store.page(page)?, &format)?;
        }
        Commands::Delete { file } => {
            config.ensure_storage_dir()?;
            // Deleting never runs the extractor, so the tools are not checked.
            let tools = ToolPaths {
                yt_dlp: config.extractor.yt_dlp_path.clone(),
                ffmpeg: config.extractor.ffmpeg_location.clone(),
            };
            let manager = build_manager(&config, tools)?;

            match manager.delete(&file)? {
                DeleteOutcome::Deleted { file, record } => {
                    println!("File deleted successfully: {}", file);
                    if record.is_none() {
                        println!("  (no metadata record referenced it)");
                    }
                }
                DeleteOutcome::NotFound(file) => {
                    println!("File not found: {}", file);
                    std::process::exit(2);
                }
            }
        }
        Commands::Config { show } => {
            if show {
                config.display();
            } else {
                match &cli.config {
                    Some(path) => println!("Config file: {}", path.display()),
                    None => println!("Config file: {}", Config::config_path()?.display()),
                }
                println!("Run with --show to print the effective settings.");
            }
        }
    }

    Ok(())
}

fn build_manager(config: &Config, tools: ToolPaths) -> Result<Arc<JobManager>> {
    let store = store::open_store(&config.storage)?;
    let extractor = Arc::new(YtDlpExtractor::new(config, tools));
    Ok(Arc::new(JobManager::from_config(config, extractor, store)))
}
