//! Bottom-up image collection.
//!
//! The chat appends replies at the bottom of a list that may drop its oldest
//! entries, so only the newest messages are reliably on screen. Collection
//! therefore starts at the newest message, hands each unseen image to the
//! most recently sent prompt that still lacks one, and scrolls toward older
//! messages until every prompt has an image or the scroll budget runs out.
//! Loading older history shifts every message down, so new messages are told
//! apart from old ones by the baseline anchor, never by position.

use std::collections::{HashMap, HashSet};
use std::path::PathBuf;
use std::time::Duration;

use log::{debug, info, warn};
use serde::{Deserialize, Serialize, Serializer};

use crate::baseline::MessageBaseline;
use crate::downloader::save_image;
use crate::layout::OutputLayout;
use crate::prompts::PromptItem;
use crate::surface::{ChatSurface, ImageHandle};

/// What happens to an image whose download failed.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "policy", rename_all = "snake_case")]
pub enum MissPolicy {
    /// The image is burned and an older image may fill the slot.
    SkipAndContinue,
    /// The image is offered to the same slot again on the next pass, until it
    /// has failed `max_attempts` times.
    RetrySame { max_attempts: u32 },
}

impl Default for MissPolicy {
    fn default() -> Self {
        MissPolicy::SkipAndContinue
    }
}

#[derive(Debug, Clone)]
pub struct CollectOptions {
    /// Passes after the first one. Scrolls, same-image retries and swallowed
    /// scan errors all count against it.
    pub max_scrolls: u32,
    pub scroll_pause: Duration,
    pub miss_policy: MissPolicy,
}

impl Default for CollectOptions {
    fn default() -> Self {
        CollectOptions {
            max_scrolls: 200,
            scroll_pause: Duration::from_millis(500),
            miss_policy: MissPolicy::default(),
        }
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct MatchResult {
    #[serde(flatten)]
    pub prompt: PromptItem,
    #[serde(rename = "image_key", serialize_with = "serialize_handle_key")]
    pub handle: Option<ImageHandle>,
    pub downloaded: bool,
    pub file_path: Option<PathBuf>,
}

fn serialize_handle_key<S: Serializer>(
    handle: &Option<ImageHandle>,
    serializer: S,
) -> Result<S::Ok, S::Error> {
    match handle {
        Some(handle) => serializer.serialize_some(handle.key()),
        None => serializer.serialize_none(),
    }
}

#[derive(Debug, Clone, Default)]
pub struct CollectOutcome {
    /// One entry per download attempt in the order attempted, followed by one
    /// handle-less entry per prompt left without an image.
    pub results: Vec<MatchResult>,
    pub matched: usize,
    pub missing: usize,
    pub scrolls: u32,
}

impl CollectOutcome {
    pub fn success(&self) -> bool {
        self.missing == 0
    }
}

/// Pairs each sent prompt, last sent first, with a distinct new image and
/// downloads it to the prompt's path.
pub async fn collect_images(
    surface: &mut dyn ChatSurface,
    sent: &[PromptItem],
    baseline: &MessageBaseline,
    layout: &OutputLayout,
    options: &CollectOptions,
) -> CollectOutcome {
    // slots 0..remaining are still open; the next image goes to remaining - 1
    let mut remaining = sent.len();
    let mut seen: HashSet<String> = HashSet::new();
    let mut failures: HashMap<String, u32> = HashMap::new();
    let mut outcome = CollectOutcome::default();
    let mut scan = baseline.scan();

    while remaining > 0 && outcome.scrolls <= options.max_scrolls {
        let handles: Vec<ImageHandle> = match scan.read(surface).await {
            Ok(messages) => messages.into_iter().filter_map(|m| m.image).collect(),
            Err(err) => {
                warn!("Error while scanning for images: {:#}", err);
                outcome.scrolls += 1;
                tokio::time::sleep(options.scroll_pause).await;
                continue;
            }
        };
        debug!("Scan found {} image(s) after the baseline", handles.len());

        let mut retry_same = false;
        for handle in handles.iter().rev() {
            if remaining == 0 {
                break;
            }
            if seen.contains(handle.key()) {
                continue;
            }

            let slot = &sent[remaining - 1];
            let target = layout.image_path(&slot.key.reel_no, &slot.key.line_no);
            let ok = save_image(surface, handle, &target).await;
            outcome.results.push(MatchResult {
                prompt: slot.clone(),
                handle: Some(handle.clone()),
                downloaded: ok,
                file_path: ok.then(|| target.clone()),
            });

            if ok {
                seen.insert(handle.key().to_string());
                remaining -= 1;
                outcome.matched += 1;
                continue;
            }

            match options.miss_policy {
                MissPolicy::SkipAndContinue => {
                    seen.insert(handle.key().to_string());
                }
                MissPolicy::RetrySame { max_attempts } => {
                    let count = failures.entry(handle.key().to_string()).or_insert(0);
                    *count += 1;
                    if *count >= max_attempts.max(1) {
                        warn!(
                            "Image {} failed {} time(s), moving on",
                            handle.key(),
                            count
                        );
                        seen.insert(handle.key().to_string());
                    } else {
                        retry_same = true;
                        break;
                    }
                }
            }
        }

        if remaining == 0 {
            break;
        }

        if !retry_same {
            if let Err(err) = surface.scroll_older().await {
                warn!("Scrolling to older messages failed: {:#}", err);
            }
        }
        outcome.scrolls += 1;
        tokio::time::sleep(options.scroll_pause).await;
    }

    if remaining > 0 {
        warn!(
            "Collection ended with {} image(s) still missing after {} scroll(s)",
            remaining, outcome.scrolls
        );
    } else {
        info!(
            "Collected {} image(s) after {} scroll(s)",
            outcome.matched, outcome.scrolls
        );
    }

    outcome.missing = remaining;
    outcome
        .results
        .extend(sent[..remaining].iter().map(|prompt| MatchResult {
            prompt: prompt.clone(),
            handle: None,
            downloaded: false,
            file_path: None,
        }));
    outcome
}
