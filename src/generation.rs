//! Waiting for the chat to answer submitted prompts.
//!
//! Every prompt is answered either by an image or by a text reply declining
//! to make one. The wait ends as soon as every prompt has an answer.

use log::{info, warn};

use crate::baseline::MessageBaseline;
use crate::poll::{PollOutcome, Poller};
use crate::surface::{ChatSurface, ImageHandle};

/// Reply phrases meaning the chat will not produce an image for a prompt.
const REFUSAL_PHRASES: &[&str] = &[
    "sorry, i can't generate that image",
    "i'm unable to create this image",
    "error generating image",
    "unable to process",
    "sorry, i can't do that",
];

/// The refusal phrase found in `text`, matched case-insensitively.
pub fn refusal(text: &str) -> Option<&'static str> {
    let text = text.to_lowercase().replace('\u{2019}', "'");
    REFUSAL_PHRASES
        .iter()
        .copied()
        .find(|phrase| text.contains(*phrase))
}

/// Answers seen after the baseline, oldest first.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Replies {
    pub images: Vec<ImageHandle>,
    /// Text of each refusal reply.
    pub refusals: Vec<String>,
}

impl Replies {
    pub fn answered(&self) -> usize {
        self.images.len() + self.refusals.len()
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum GenerationWait {
    /// Every prompt got an image or a refusal.
    Answered(Replies),
    /// The ceiling passed first; holds the last replies seen.
    Expired(Replies),
}

impl GenerationWait {
    pub fn replies(&self) -> &Replies {
        match self {
            GenerationWait::Answered(replies) | GenerationWait::Expired(replies) => replies,
        }
    }
}

struct WaitState<'s> {
    surface: &'s mut dyn ChatSurface,
    baseline: &'s MessageBaseline,
    last: Replies,
}

impl WaitState<'_> {
    async fn check(&mut self, expected: usize) -> Option<Replies> {
        // the page sits at the bottom during the wait, so each read starts a
        // fresh scan
        let messages = match self.baseline.scan().read(&mut *self.surface).await {
            Ok(messages) => messages,
            Err(err) => {
                warn!("Checking for generated images failed: {:#}", err);
                return None;
            }
        };

        let mut replies = Replies::default();
        for message in messages {
            if let Some(image) = message.image {
                replies.images.push(image);
            } else if let Some(phrase) = refusal(&message.text) {
                warn!("Chat declined a prompt ({})", phrase);
                replies.refusals.push(message.text.trim().to_string());
            }
        }
        self.last = replies;
        (self.last.answered() >= expected).then(|| self.last.clone())
    }
}

/// Polls the chat until `expected` prompts have been answered or the ceiling
/// passes.
pub async fn wait_for_replies(
    surface: &mut dyn ChatSurface,
    baseline: &MessageBaseline,
    expected: usize,
    poller: Poller,
) -> GenerationWait {
    info!(
        "Waiting up to {:?} for {} image(s) after {} earlier message(s)",
        poller.timeout,
        expected,
        baseline.count()
    );
    let mut state = WaitState {
        surface,
        baseline,
        last: Replies::default(),
    };
    let outcome = poller
        .until(&mut state, |state| {
            Box::pin(async move { state.check(expected).await })
        })
        .await;

    match outcome {
        PollOutcome::Ready(replies) => {
            info!(
                "{} image(s) and {} refusal(s) after the baseline",
                replies.images.len(),
                replies.refusals.len()
            );
            GenerationWait::Answered(replies)
        }
        PollOutcome::TimedOut => {
            warn!(
                "Generation wait ended with {}/{} prompt(s) answered",
                state.last.answered(),
                expected
            );
            GenerationWait::Expired(state.last)
        }
    }
}
