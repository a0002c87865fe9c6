use anyhow::{anyhow, Context};
use async_trait::async_trait;
use std::collections::VecDeque;
use std::path::{Path, PathBuf};
use std::process::Stdio;
use std::sync::Arc;
use tokio::io::{AsyncBufReadExt, AsyncReadExt, BufReader};
use tokio::process::{ChildStderr, Command};
use tokio::sync::Mutex;
use uuid::Uuid;

use super::{AudioFormat, ExtractedAudio, JobOutcome, MediaExtractor};
use crate::config::{Config, FileNaming, ToolPaths};
use crate::utils;
use crate::Result;

/// Per-job working directories live here, inside the storage directory.
pub const STAGING_DIR: &str = ".staging";

const STDERR_TAIL_LINES: usize = 50;

/// Audio extractor driving the yt-dlp binary
pub struct YtDlpExtractor {
    yt_dlp_path: PathBuf,
    ffmpeg_location: Option<PathBuf>,
    download_dir: PathBuf,
    audio_format: AudioFormat,
    audio_quality: String,
    naming: FileNaming,
    // Held while a final name is picked and the staged file is moved there.
    publish_lock: Mutex<()>,
}

impl YtDlpExtractor {
    pub fn new(config: &Config, tools: ToolPaths) -> Self {
        Self {
            yt_dlp_path: tools.yt_dlp,
            ffmpeg_location: tools.ffmpeg,
            download_dir: config.storage.download_dir.clone(),
            audio_format: config.extractor.audio_format,
            audio_quality: config.extractor.audio_quality.clone(),
            naming: config.storage.naming,
            publish_lock: Mutex::new(()),
        }
    }

    fn build_command(&self, url: &str, output_template: &Path) -> Command {
        let mut cmd = Command::new(&self.yt_dlp_path);

        cmd.arg("--no-playlist")
            .arg("--no-cache-dir")
            .args(["--format", "bestaudio/best"])
            .arg("--extract-audio")
            .args(["--audio-format", self.audio_format.as_str()])
            .args(["--audio-quality", self.audio_quality.as_str()]);

        if let Some(ffmpeg) = &self.ffmpeg_location {
            cmd.arg("--ffmpeg-location").arg(ffmpeg);
        }

        cmd.arg("--output")
            .arg(output_template)
            // --print implies --simulate unless told otherwise
            .arg("--no-simulate")
            .args(["--print", "after_move:title"])
            .arg("--")
            .arg(url)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true);

        cmd
    }

    async fn run(&self, url: &str) -> Result<ExtractedAudio> {
        tracing::debug!("Starting download for URL: {}", url);

        let staging_root = self.download_dir.join(STAGING_DIR);
        fs_err::create_dir_all(&staging_root)?;
        let staging = tempfile::Builder::new()
            .prefix("job-")
            .tempdir_in(&staging_root)
            .context("Failed to create staging directory")?;

        let template = staging.path().join("%(title)s.%(ext)s");
        let mut child = self
            .build_command(url, &template)
            .spawn()
            .with_context(|| format!("Failed to start {}", self.yt_dlp_path.display()))?;

        if let Some(pid) = child.id() {
            tracing::debug!("yt-dlp started (pid={})", pid);
        }

        let tail = Arc::new(Mutex::new(VecDeque::new()));
        let stderr_task = child
            .stderr
            .take()
            .map(|stderr| tokio::spawn(collect_stderr(stderr, tail.clone())));

        let mut stdout = String::new();
        if let Some(mut out) = child.stdout.take() {
            out.read_to_string(&mut stdout)
                .await
                .context("Failed to read yt-dlp output")?;
        }

        let status = child.wait().await.context("Failed waiting for yt-dlp")?;
        if let Some(task) = stderr_task {
            let _ = task.await;
        }

        if !status.success() {
            let tail = tail.lock().await;
            let tail = tail.iter().cloned().collect::<Vec<_>>().join("\n");
            return Err(anyhow!("yt-dlp exited with error (status={}): {}", status, tail));
        }

        let title = stdout
            .lines()
            .map(str::trim)
            .filter(|line| !line.is_empty())
            .last()
            .ok_or_else(|| anyhow!("No title found in video info"))?
            .to_string();
        tracing::debug!("Downloaded title: {}", title);

        let staged = self.find_output(staging.path())?;
        let bytes = fs_err::metadata(&staged)?.len();
        if bytes == 0 {
            return Err(anyhow!("Output file is empty: {}", staged.display()));
        }

        let (file, path) = self.publish(&staged, &title).await?;
        let size = utils::bytes_to_megabytes(bytes);
        tracing::debug!("File size after conversion: {} MB", size);

        Ok(ExtractedAudio {
            title,
            file,
            path,
            size,
        })
    }

    /// Find the transcoded file in a staging directory
    fn find_output(&self, staging: &Path) -> Result<PathBuf> {
        let wanted = self.audio_format.as_str();

        for entry in fs_err::read_dir(staging)? {
            let path = entry?.path();
            let matches = path
                .extension()
                .and_then(|ext| ext.to_str())
                .map(|ext| ext.eq_ignore_ascii_case(wanted))
                .unwrap_or(false);
            if matches && path.is_file() {
                return Ok(path);
            }
        }

        Err(anyhow!(
            "Expected .{} output missing in {}",
            wanted,
            staging.display()
        ))
    }

    /// Move a staged file into the storage directory under a free name
    async fn publish(&self, staged: &Path, title: &str) -> Result<(String, PathBuf)> {
        let mut stem = self.naming.apply(title);
        if stem.is_empty() {
            stem = format!("audio_{}", &Uuid::new_v4().simple().to_string()[..8]);
        }

        let _guard = self.publish_lock.lock().await;
        let file = utils::unique_file_name(&self.download_dir, &stem, self.audio_format.as_str());
        let path = self.download_dir.join(&file);
        fs_err::rename(staged, &path)?;

        Ok((file, path))
    }
}

#[async_trait]
impl MediaExtractor for YtDlpExtractor {
    async fn extract(&self, url: &str) -> JobOutcome {
        match self.run(url).await {
            Ok(audio) => JobOutcome::Success(audio),
            Err(e) => {
                tracing::error!("Error during download of {}: {:#}", url, e);
                JobOutcome::Failed
            }
        }
    }

    fn tool_name(&self) -> &'static str {
        "yt-dlp"
    }
}

async fn collect_stderr(stderr: ChildStderr, tail: Arc<Mutex<VecDeque<String>>>) {
    let mut lines = BufReader::new(stderr).lines();
    while let Ok(Some(line)) = lines.next_line().await {
        let line = line.trim_end().to_string();
        if line.is_empty() {
            continue;
        }
        tracing::debug!(target: "mp3tube::yt_dlp", "{}", line);
        let mut tail = tail.lock().await;
        if tail.len() >= STDERR_TAIL_LINES {
            tail.pop_front();
        }
        tail.push_back(line);
    }
}
