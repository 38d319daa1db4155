use std::time::Duration;

use log::info;
use serde::Serialize;

use crate::baseline::capture_baseline;
use crate::collector::{collect_images, CollectOptions, MatchResult};
use crate::error::PipelineError;
use crate::generation::{wait_for_replies, GenerationWait};
use crate::layout::OutputLayout;
use crate::poll::Poller;
use crate::prompts::{LineNo, PromptItem};
use crate::submitter::{submit_prompts, SubmitOptions};
use crate::surface::ChatSurface;

#[derive(Debug, Clone)]
pub struct BatchOptions {
    pub submit: SubmitOptions,
    pub collect: CollectOptions,
    /// Ceiling and check interval for waiting on generated images.
    pub generation: Poller,
}

impl Default for BatchOptions {
    fn default() -> Self {
        BatchOptions {
            submit: SubmitOptions::default(),
            collect: CollectOptions::default(),
            generation: Poller::new(Duration::from_secs(15), Duration::from_secs(10 * 60)),
        }
    }
}

#[derive(Debug, Clone, Serialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum BatchIssue {
    SendFailed {
        line_no: LineNo,
        reel_no: String,
        error: String,
    },
    GenerationWaitExpired {
        visible: usize,
        expected: usize,
    },
    /// The chat answered a prompt with a refusal instead of an image.
    GenerationRefused {
        message: String,
    },
}

#[derive(Debug, Clone, Serialize)]
pub struct BatchSummary {
    pub success: bool,
    pub message: String,
    pub sent: usize,
    pub downloaded: usize,
    pub missing: usize,
    pub scrolls: u32,
    pub results: Vec<MatchResult>,
    pub errors: Vec<BatchIssue>,
}

/// Runs one batch end to end on a single chat page: baseline, submission,
/// generation wait, bottom-up collection.
///
/// Only a failed baseline read is returned as an error. Send failures,
/// refusals, a generation wait that hits its ceiling and missing images all
/// end up in the summary.
pub async fn run_batch(
    surface: &mut dyn ChatSurface,
    prompts: &[PromptItem],
    layout: &OutputLayout,
    options: &BatchOptions,
) -> Result<BatchSummary, PipelineError> {
    let baseline = capture_baseline(surface).await?;

    info!("Sending {} prompt(s)", prompts.len());
    let submitted = submit_prompts(surface, prompts, &options.submit).await;
    let mut errors = Vec::new();
    if let Some(failure) = &submitted.failed {
        errors.push(BatchIssue::SendFailed {
            line_no: failure.item.key.line_no.clone(),
            reel_no: failure.item.key.reel_no.clone(),
            error: failure.error.clone(),
        });
    }

    if submitted.sent.is_empty() {
        return Ok(BatchSummary {
            success: false,
            message: "No prompts were sent successfully.".to_string(),
            sent: 0,
            downloaded: 0,
            missing: 0,
            scrolls: 0,
            results: Vec::new(),
            errors,
        });
    }

    let expected = submitted.sent_count();
    let wait = wait_for_replies(surface, &baseline, expected, options.generation).await;
    errors.extend(
        wait.replies()
            .refusals
            .iter()
            .map(|message| BatchIssue::GenerationRefused {
                message: message.clone(),
            }),
    );
    if let GenerationWait::Expired(replies) = &wait {
        errors.push(BatchIssue::GenerationWaitExpired {
            visible: replies.images.len(),
            expected,
        });
    }

    let collected = collect_images(
        surface,
        &submitted.sent,
        &baseline,
        layout,
        &options.collect,
    )
    .await;

    Ok(BatchSummary {
        success: collected.success(),
        message: format!(
            "Downloaded {}/{} images via bottom-up scrolling.",
            collected.matched, expected
        ),
        sent: expected,
        downloaded: collected.matched,
        missing: collected.missing,
        scrolls: collected.scrolls,
        results: collected.results,
        errors,
    })
}
