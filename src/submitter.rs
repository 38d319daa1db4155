use std::time::Duration;

use log::{error, info, warn};

use crate::prompts::PromptItem;
use crate::surface::ChatSurface;
use crate::utilities::preview;

#[derive(Debug, Clone)]
pub struct SubmitOptions {
    pub max_attempts: u32,
    pub retry_delay: Duration,
    /// Pause after every delivered prompt.
    pub inter_prompt_delay: Duration,
}

impl Default for SubmitOptions {
    fn default() -> Self {
        SubmitOptions {
            max_attempts: 3,
            retry_delay: Duration::from_secs(5),
            inter_prompt_delay: Duration::from_secs(10),
        }
    }
}

#[derive(Debug, Clone)]
pub struct SubmitFailure {
    pub item: PromptItem,
    pub error: String,
}

#[derive(Debug, Clone, Default)]
pub struct SubmitOutcome {
    /// Always a prefix of the input.
    pub sent: Vec<PromptItem>,
    pub failed: Option<SubmitFailure>,
}

impl SubmitOutcome {
    pub fn sent_count(&self) -> usize {
        self.sent.len()
    }
}

/// Delivers prompts in order. The first prompt that exhausts its attempts
/// ends the run; later prompts are never tried.
pub async fn submit_prompts(
    surface: &mut dyn ChatSurface,
    prompts: &[PromptItem],
    options: &SubmitOptions,
) -> SubmitOutcome {
    let mut outcome = SubmitOutcome::default();
    let total = prompts.len();

    for item in prompts {
        match send_with_retry(surface, &item.prompt, options).await {
            Ok(()) => {
                info!(
                    "Sent prompt {}/{}: {}",
                    item.sequence_index + 1,
                    total,
                    preview(&item.prompt, 80)
                );
                outcome.sent.push(item.clone());
                tokio::time::sleep(options.inter_prompt_delay).await;
            }
            Err(err) => {
                error!(
                    "Giving up on prompt {} after {} attempts; {} prompt(s) left unsent",
                    item.sequence_index + 1,
                    options.max_attempts,
                    total - outcome.sent.len()
                );
                outcome.failed = Some(SubmitFailure {
                    item: item.clone(),
                    error: format!("{:#}", err),
                });
                break;
            }
        }
    }

    outcome
}

async fn send_with_retry(
    surface: &mut dyn ChatSurface,
    prompt: &str,
    options: &SubmitOptions,
) -> anyhow::Result<()> {
    let attempts = options.max_attempts.max(1);
    let mut attempt = 1;
    loop {
        match surface.submit(prompt).await {
            Ok(()) => return Ok(()),
            Err(err) if attempt < attempts => {
                warn!("Attempt {} to send prompt failed: {:#}", attempt, err);
                tokio::time::sleep(options.retry_delay).await;
                attempt += 1;
            }
            Err(err) => return Err(err),
        }
    }
}
