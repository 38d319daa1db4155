use std::path::PathBuf;
use std::time::Duration;

use anyhow::{anyhow, bail, ensure, Context, Result};
use log::{error, info};
use regex::Regex;
use reqwest::header::CONTENT_TYPE;
use serde::Serialize;
use url::Url;

use crate::layout::OutputLayout;
use crate::prompts::{LineNo, SheetRow};
use crate::utilities::preview;

const DRIVE_HOST: &str = "drive.google.com";

/// Where Drive downloads are fetched from unless overridden.
pub const DRIVE_BASE: &str = "https://drive.google.com";

const AUDIO_EXTENSIONS: &[&str] = &[".mp3", ".wav", ".m4a", ".aac", ".ogg", ".flac", ".wma"];

/// File id of a Google Drive share link, in any of its usual shapes:
/// `/file/d/<id>/view`, `/open?id=<id>` or `/uc?id=<id>`.
pub fn drive_file_id(link: &str) -> Option<String> {
    if !link.contains(DRIVE_HOST) {
        return None;
    }
    let path_id = Regex::new(r"/file/d/([a-zA-Z0-9_-]+)").ok()?;
    if let Some(caps) = path_id.captures(link) {
        return Some(caps[1].to_string());
    }
    let url = Url::parse(link).ok()?;
    url.query_pairs()
        .find(|(key, _)| key == "id")
        .map(|(_, value)| value.into_owned())
}

pub fn direct_download_url(base: &str, file_id: &str) -> String {
    format!("{}/uc?id={}&export=download", base.trim_end_matches('/'), file_id)
}

/// Finds the follow-up link on the interstitial page Drive serves for files
/// it cannot virus-scan. Relative links resolve against `base`.
pub fn confirmation_link(html: &str, base: &str) -> Option<String> {
    let patterns = [
        r#"href="([^"]*uc[^"]*export=download[^"]*)""#,
        r#""(https://drive\.google\.com/uc[^"]*)""#,
        r#""(https://drive\.google\.com/file/d/[^"]*)""#,
    ];
    let found = patterns.iter().find_map(|pattern| {
        Regex::new(pattern)
            .ok()?
            .captures(html)
            .map(|caps| caps[1].to_string())
    })?;
    let found = found.replace("&amp;", "&");
    if found.starts_with('/') {
        Some(format!("{}{}", base.trim_end_matches('/'), found))
    } else {
        Some(found)
    }
}

/// Extension (with its dot) for a downloaded audio file: the URL's own
/// suffix if it has a known one, else the content type, else `.mp3`.
pub fn audio_extension(link: &str, content_type: Option<&str>) -> &'static str {
    let path = Url::parse(link)
        .map(|url| url.path().to_lowercase())
        .unwrap_or_else(|_| link.to_lowercase());
    if let Some(ext) = AUDIO_EXTENSIONS.iter().copied().find(|ext| path.ends_with(ext)) {
        return ext;
    }

    match content_type.map(str::to_lowercase) {
        Some(ct) if ct.contains("audio/mpeg") || ct.contains("audio/mp3") => ".mp3",
        Some(ct) if ct.contains("audio/wav") => ".wav",
        Some(ct) if ct.contains("audio/mp4") || ct.contains("audio/aac") => ".m4a",
        Some(ct) if ct.contains("audio/ogg") => ".ogg",
        Some(ct) if ct.contains("audio/flac") => ".flac",
        _ => ".mp3",
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct AudioResult {
    pub line_no: LineNo,
    pub success: bool,
    pub file_path: Option<PathBuf>,
    pub bytes: u64,
    pub error: Option<String>,
}

#[derive(Debug, Clone, Serialize)]
pub struct AudioReport {
    pub success: bool,
    pub reel_number: String,
    pub downloaded: usize,
    pub failed: usize,
    pub total_bytes: u64,
    pub audio_directory: PathBuf,
    pub results: Vec<AudioResult>,
}

/// Fetches the audio linked from each sheet row of a reel.
pub struct AudioDownloader {
    client: reqwest::Client,
    pause: Duration,
    drive_base: String,
}

impl AudioDownloader {
    pub fn new(timeout: Duration, pause: Duration) -> Result<Self> {
        let client = reqwest::Client::builder()
            .timeout(timeout)
            .build()
            .context("building HTTP client")?;
        Ok(AudioDownloader {
            client,
            pause,
            drive_base: DRIVE_BASE.to_string(),
        })
    }

    /// Fetches Drive files from `base` instead of [`DRIVE_BASE`].
    pub fn with_drive_base(mut self, base: impl Into<String>) -> Self {
        self.drive_base = base.into();
        self
    }

    /// Downloads every row's audio to the reel's audio directory. A failed
    /// file is recorded and skipped; the report succeeds if any file landed.
    pub async fn download_reel(
        &self,
        rows: &[SheetRow],
        layout: &OutputLayout,
        reel: &str,
    ) -> AudioReport {
        let audio_directory = layout.audio_dir(reel);
        info!(
            "Downloading {} audio file(s) to {}",
            rows.len(),
            audio_directory.display()
        );

        let mut results = Vec::with_capacity(rows.len());
        for (index, row) in rows.iter().enumerate() {
            if index > 0 {
                tokio::time::sleep(self.pause).await;
            }
            info!(
                "Audio {}/{} (line {}): {}",
                index + 1,
                rows.len(),
                row.line_no,
                preview(&row.audio_link, 60)
            );
            let result = match self
                .download_one(&row.audio_link, layout, reel, &row.line_no)
                .await
            {
                Ok((path, bytes)) => {
                    info!("Saved {} ({} bytes)", path.display(), bytes);
                    AudioResult {
                        line_no: row.line_no.clone(),
                        success: true,
                        file_path: Some(path),
                        bytes,
                        error: None,
                    }
                }
                Err(err) => {
                    error!("Audio for line {} failed: {:#}", row.line_no, err);
                    AudioResult {
                        line_no: row.line_no.clone(),
                        success: false,
                        file_path: None,
                        bytes: 0,
                        error: Some(format!("{:#}", err)),
                    }
                }
            };
            results.push(result);
        }

        let downloaded = results.iter().filter(|r| r.success).count();
        AudioReport {
            success: downloaded > 0,
            reel_number: reel.trim().to_string(),
            downloaded,
            failed: results.len() - downloaded,
            total_bytes: results.iter().map(|r| r.bytes).sum(),
            audio_directory,
            results,
        }
    }

    async fn download_one(
        &self,
        link: &str,
        layout: &OutputLayout,
        reel: &str,
        line_no: &LineNo,
    ) -> Result<(PathBuf, u64)> {
        let is_drive = link.contains(DRIVE_HOST);
        let url = if is_drive {
            let id = drive_file_id(link)
                .ok_or_else(|| anyhow!("could not extract file id from Google Drive URL"))?;
            direct_download_url(&self.drive_base, &id)
        } else {
            link.to_string()
        };

        let mut response = self.client.get(&url).send().await?;
        ensure!(
            response.status().is_success(),
            "HTTP error {}",
            response.status()
        );

        if is_drive && content_type(&response).map_or(false, |ct| ct.contains("text/html")) {
            let html = response.text().await?;
            let Some(next) = confirmation_link(&html, &self.drive_base) else {
                bail!("could not find download URL in confirmation page");
            };
            info!("Following Drive confirmation link");
            response = self.client.get(&next).send().await?;
            ensure!(
                response.status().is_success(),
                "HTTP error {} after confirmation",
                response.status()
            );
        }

        let extension = audio_extension(link, content_type(&response).as_deref());
        let body = response.bytes().await?;
        ensure!(!body.is_empty(), "downloaded file is empty");

        let path = layout.audio_path(reel, line_no, extension);
        if let Some(parent) = path.parent() {
            tokio::fs::create_dir_all(parent).await?;
        }
        tokio::fs::write(&path, &body)
            .await
            .with_context(|| format!("writing {}", path.display()))?;
        Ok((path, body.len() as u64))
    }
}

fn content_type(response: &reqwest::Response) -> Option<String> {
    response
        .headers()
        .get(CONTENT_TYPE)
        .and_then(|value| value.to_str().ok())
        .map(str::to_string)
}
