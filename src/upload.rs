use std::path::Path;
use std::time::Duration;

use anyhow::{Context, Result};
use log::{error, info, warn};
use serde::Serialize;
use tokio::time::Instant;

use crate::error::PipelineError;
use crate::layout::OutputLayout;
use crate::pairing::{find_pairs, FilePair};
use crate::poll::{PollOutcome, Poller};
use crate::prompts::LineNo;
use crate::surface::{UploadStatus, UploadSurface};

const ERROR_PHRASES: &[&str] = &[
    "too many people",
    "a lot of people",
    "try again later",
    "failed",
    "unavailable",
    "error",
];

const GENERATING_PHRASES: &[&str] = &["generating", "processing", "creating", "progress"];

/// Maps the visible text of the video app to a status. Error phrases win
/// over progress phrases because a failed job can leave both on screen.
pub fn classify_status(page_text: &str) -> UploadStatus {
    let text = page_text.to_lowercase();
    if let Some(phrase) = ERROR_PHRASES.iter().find(|p| text.contains(*p)) {
        return UploadStatus::Error {
            message: error_line(page_text, phrase).unwrap_or_else(|| phrase.to_string()),
        };
    }
    if GENERATING_PHRASES.iter().any(|p| text.contains(p)) {
        return UploadStatus::Generating;
    }
    UploadStatus::Unknown
}

fn error_line(page_text: &str, phrase: &str) -> Option<String> {
    page_text
        .lines()
        .map(str::trim)
        .find(|line| line.to_lowercase().contains(phrase))
        .map(str::to_string)
}

#[derive(Debug, Clone)]
pub struct GenerationWatch {
    pub poller: Poller,
    /// With no error for this long the job is assumed to be generating.
    pub settle: Duration,
}

impl Default for GenerationWatch {
    fn default() -> Self {
        GenerationWatch {
            poller: Poller::new(Duration::from_secs(5), Duration::from_secs(300)),
            settle: Duration::from_secs(60),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "state", rename_all = "snake_case")]
pub enum GenerationState {
    Started,
    AssumedStarted,
    Failed { message: String },
}

/// Watches the app after a submission until it shows progress, shows an
/// error, stays quiet for the settle window, or the ceiling passes.
pub async fn wait_for_generation(
    surface: &mut dyn UploadSurface,
    watch: &GenerationWatch,
) -> GenerationState {
    let started = Instant::now();
    let settle = watch.settle;
    let outcome = watch
        .poller
        .until(surface, |surface| {
            Box::pin(async move {
                match surface.status().await {
                    Ok(UploadStatus::Generating) => return Some(GenerationState::Started),
                    Ok(UploadStatus::Error { message }) => {
                        error!("Video app reported an error: {}", message);
                        return Some(GenerationState::Failed { message });
                    }
                    Ok(UploadStatus::Unknown) => {}
                    Err(err) => warn!("Could not read upload status: {:#}", err),
                }
                if started.elapsed() >= settle {
                    info!("No errors for {:?}, assuming generation is in progress", settle);
                    return Some(GenerationState::AssumedStarted);
                }
                None
            })
        })
        .await;

    match outcome {
        PollOutcome::Ready(state) => state,
        PollOutcome::TimedOut => {
            warn!("Generation timeout reached");
            GenerationState::Failed {
                message: "Generation timeout reached".to_string(),
            }
        }
    }
}

#[derive(Debug, Clone, Default)]
pub struct UploadOptions {
    pub watch: GenerationWatch,
}

#[derive(Debug, Clone, Serialize)]
pub struct PairResult {
    pub line_no: LineNo,
    pub image: String,
    pub audio: String,
    pub success: bool,
    pub status: Option<GenerationState>,
    pub error: Option<String>,
}

#[derive(Debug, Clone, Serialize)]
pub struct UploadReport {
    pub success: bool,
    pub reel_number: String,
    pub total_pairs: usize,
    pub uploaded_pairs: usize,
    pub results: Vec<PairResult>,
}

/// Uploads every image/audio pair of a reel, one at a time. The first pair
/// that fails stops the run.
pub async fn upload_reel(
    surface: &mut dyn UploadSurface,
    layout: &OutputLayout,
    reel: &str,
    options: &UploadOptions,
) -> Result<UploadReport> {
    let reel = reel.trim();
    info!("Starting upload for reel {}", reel);

    let pairs = find_pairs(&layout.images_dir(reel), &layout.audio_dir(reel))?;
    if pairs.is_empty() {
        return Err(PipelineError::NoPairs(reel.to_string()).into());
    }

    surface.open().await.context("opening the video app")?;

    let mut results = Vec::with_capacity(pairs.len());
    for pair in &pairs {
        let result = upload_pair(surface, pair, options).await;
        let failed = !result.success;
        results.push(result);
        if failed {
            warn!("Stopping upload after failure on line {}", pair.line_no);
            break;
        }
    }

    let uploaded_pairs = results.iter().filter(|r| r.success).count();
    info!(
        "Uploaded {}/{} pair(s) for reel {}",
        uploaded_pairs,
        pairs.len(),
        reel
    );
    Ok(UploadReport {
        success: uploaded_pairs == pairs.len(),
        reel_number: reel.to_string(),
        total_pairs: pairs.len(),
        uploaded_pairs,
        results,
    })
}

async fn upload_pair(
    surface: &mut dyn UploadSurface,
    pair: &FilePair,
    options: &UploadOptions,
) -> PairResult {
    info!(
        "Uploading pair {}: {} + {}",
        pair.line_no,
        file_name(&pair.image),
        file_name(&pair.audio)
    );
    let mut result = PairResult {
        line_no: pair.line_no.clone(),
        image: file_name(&pair.image),
        audio: file_name(&pair.audio),
        success: false,
        status: None,
        error: None,
    };

    if let Err(err) = submit_pair(surface, pair).await {
        error!("Pair {} failed: {:#}", pair.line_no, err);
        result.error = Some(format!("{:#}", err));
        return result;
    }

    let state = wait_for_generation(surface, &options.watch).await;
    match &state {
        GenerationState::Failed { message } => {
            result.error = Some(message.clone());
        }
        GenerationState::Started | GenerationState::AssumedStarted => {
            result.success = true;
            if let Err(err) = surface.clear_inputs().await {
                warn!(
                    "Could not clear inputs after pair {}: {:#}",
                    pair.line_no, err
                );
            }
        }
    }
    result.status = Some(state);
    result
}

async fn submit_pair(surface: &mut dyn UploadSurface, pair: &FilePair) -> Result<()> {
    surface
        .attach_image(&pair.image)
        .await
        .context("Failed to upload image")?;
    surface
        .attach_audio(&pair.audio)
        .await
        .context("Failed to upload audio")?;
    surface.submit().await.context("Failed to submit upload")?;
    Ok(())
}

fn file_name(path: &Path) -> String {
    path.file_name()
        .map(|n| n.to_string_lossy().to_string())
        .unwrap_or_default()
}
