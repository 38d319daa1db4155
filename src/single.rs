//! One prompt, one image: the single-snippet counterpart of a batch.

use std::path::PathBuf;
use std::slice;

use log::{error, info};
use serde::Serialize;

use crate::baseline::capture_baseline;
use crate::batch::BatchOptions;
use crate::downloader::save_image;
use crate::error::PipelineError;
use crate::generation::wait_for_replies;
use crate::layout::OutputLayout;
use crate::prompts::{LineNo, PromptItem};
use crate::submitter::submit_prompts;
use crate::surface::ChatSurface;

#[derive(Debug, Clone, Serialize)]
pub struct SingleImageResult {
    pub success: bool,
    pub message: String,
    pub reel_number: String,
    pub snippet_number: LineNo,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub file_path: Option<PathBuf>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl SingleImageResult {
    fn failed(item: &PromptItem, error: impl Into<String>) -> Self {
        let error = error.into();
        error!(
            "Snippet {} of reel {}: {}",
            item.key.line_no, item.key.reel_no, error
        );
        SingleImageResult {
            success: false,
            message: "Image generation failed".to_string(),
            reel_number: item.key.reel_no.clone(),
            snippet_number: item.key.line_no.clone(),
            file_path: None,
            error: Some(error),
        }
    }
}

/// Sends one prompt and saves the newest image that answers it to the
/// snippet's image path. A refusal ends the wait at once.
pub async fn generate_single(
    surface: &mut dyn ChatSurface,
    item: &PromptItem,
    layout: &OutputLayout,
    options: &BatchOptions,
) -> Result<SingleImageResult, PipelineError> {
    let baseline = capture_baseline(surface).await?;

    let submitted = submit_prompts(surface, slice::from_ref(item), &options.submit).await;
    if submitted.sent.is_empty() {
        return Ok(SingleImageResult::failed(item, "Failed to send prompt"));
    }

    let wait = wait_for_replies(surface, &baseline, 1, options.generation).await;
    let replies = wait.replies();
    let Some(handle) = replies.images.last() else {
        let error = match replies.refusals.first() {
            Some(refusal) => format!("Image generation refused: {}", refusal),
            None => "Image generation failed or timed out".to_string(),
        };
        return Ok(SingleImageResult::failed(item, error));
    };

    let target = layout.image_path(&item.key.reel_no, &item.key.line_no);
    if !save_image(surface, handle, &target).await {
        return Ok(SingleImageResult::failed(item, "Failed to download image"));
    }

    info!(
        "Snippet {} of reel {} saved to {}",
        item.key.line_no,
        item.key.reel_no,
        target.display()
    );
    Ok(SingleImageResult {
        success: true,
        message: "Image generated successfully".to_string(),
        reel_number: item.key.reel_no.clone(),
        snippet_number: item.key.line_no.clone(),
        file_path: Some(target),
        error: None,
    })
}
