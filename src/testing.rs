//! In-memory surfaces for unit tests.

use std::collections::{HashMap, HashSet, VecDeque};
use std::path::{Path, PathBuf};

use anyhow::{anyhow, bail, Result};
use async_trait::async_trait;

use crate::baseline::MessageBaseline;
use crate::prompts::{ExternalKey, LineNo, PromptItem};
use crate::surface::{ChatSurface, ImageHandle, InboundMessage, UploadStatus, UploadSurface};

pub fn prompts(count: usize, reel: &str) -> Vec<PromptItem> {
    (0..count)
        .map(|i| {
            PromptItem::new(
                format!("prompt {}", i + 1),
                i,
                ExternalKey {
                    line_no: LineNo::from_index(i + 1),
                    reel_no: reel.to_string(),
                },
            )
        })
        .collect()
}

/// One inbound message of a [`FakeChat`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FakeMessage {
    pub id: String,
    pub text: String,
    pub image: Option<String>,
}

/// A chat whose inbound messages are a list, newest last. Only messages from
/// `visible_from` onward are on screen; scrolling reveals `reveal_step` more.
/// Once everything is on screen, a scroll loads `history` above the oldest
/// message, the way the real page fetches older history.
#[derive(Debug, Default)]
pub struct FakeChat {
    pub messages: Vec<FakeMessage>,
    pub visible_from: usize,
    pub reveal_step: usize,
    /// Older messages not loaded yet, oldest first.
    pub history: Vec<Option<String>>,
    /// Each accepted prompt appends an image message `blob:<prompt>`.
    pub reply_with_images: bool,
    /// Prompts answered with a refusal instead of an image.
    pub refused_prompts: HashSet<String>,
    pub failing_prompts: HashSet<String>,
    pub submit_attempts: Vec<String>,
    pub sent: Vec<String>,
    /// Remaining failures before a key downloads successfully.
    pub download_failures: HashMap<String, usize>,
    pub download_attempts: Vec<String>,
    pub downloads: Vec<(String, PathBuf)>,
    pub scan_errors: usize,
    pub scans: usize,
    pub scrolls: usize,
    pub dismissals: usize,
    pub count_fails: bool,
    pub next_id: usize,
}

impl FakeChat {
    pub fn with_messages(messages: Vec<Option<&str>>) -> Self {
        let mut chat = FakeChat::default();
        for image in messages {
            chat.push(String::new(), image.map(str::to_string));
        }
        chat
    }

    pub fn with_history(mut self, history: Vec<Option<&str>>) -> Self {
        self.history = history
            .into_iter()
            .map(|m| m.map(|key| key.to_string()))
            .collect();
        self
    }

    fn message(&mut self, text: String, image: Option<String>) -> FakeMessage {
        self.next_id += 1;
        FakeMessage {
            id: format!("msg-{}", self.next_id),
            text,
            image,
        }
    }

    fn push(&mut self, text: String, image: Option<String>) {
        let message = self.message(text, image);
        self.messages.push(message);
    }

    pub fn push_image(&mut self, key: &str) {
        self.push(String::new(), Some(key.to_string()));
    }

    pub fn push_text(&mut self, text: &str) {
        self.push(text.to_string(), None);
    }

    /// The baseline a capture would take once the first `count` messages
    /// exist.
    pub fn baseline_after(&self, count: usize) -> MessageBaseline {
        let anchor = count
            .checked_sub(1)
            .and_then(|index| self.messages.get(index))
            .map(|message| message.id.clone());
        MessageBaseline::new(count, anchor)
    }

    pub fn downloaded_keys(&self) -> Vec<String> {
        self.downloads.iter().map(|(key, _)| key.clone()).collect()
    }
}

#[async_trait]
impl ChatSurface for FakeChat {
    async fn submit(&mut self, text: &str) -> Result<()> {
        self.submit_attempts.push(text.to_string());
        if self.failing_prompts.contains(text) {
            bail!("input box not found");
        }
        self.sent.push(text.to_string());
        if self.refused_prompts.contains(text) {
            self.push_text("Sorry, I can't generate that image.");
        } else if self.reply_with_images {
            self.push_image(&format!("blob:{}", text));
        }
        Ok(())
    }

    async fn count_messages(&mut self) -> Result<usize> {
        if self.count_fails {
            bail!("message list not rendered");
        }
        Ok(self.messages.len())
    }

    async fn visible_messages(&mut self) -> Result<Vec<InboundMessage>> {
        self.scans += 1;
        if self.scan_errors > 0 {
            self.scan_errors -= 1;
            bail!("stale element reference");
        }
        Ok(self
            .messages
            .iter()
            .skip(self.visible_from)
            .map(|message| InboundMessage {
                id: message.id.clone(),
                text: message.text.clone(),
                image: message.image.as_deref().map(ImageHandle::new),
            })
            .collect())
    }

    async fn download(&mut self, handle: &ImageHandle, target: &Path) -> Result<()> {
        self.download_attempts.push(handle.key().to_string());
        if let Some(remaining) = self.download_failures.get_mut(handle.key()) {
            if *remaining > 0 {
                *remaining -= 1;
                return Err(anyhow!("timed out waiting for download"));
            }
        }
        std::fs::write(target, handle.key().as_bytes())?;
        self.downloads
            .push((handle.key().to_string(), target.to_path_buf()));
        Ok(())
    }

    async fn dismiss_viewer(&mut self) -> Result<()> {
        self.dismissals += 1;
        Ok(())
    }

    async fn scroll_older(&mut self) -> Result<()> {
        self.scrolls += 1;
        if self.visible_from > 0 {
            self.visible_from = self.visible_from.saturating_sub(self.reveal_step);
            return Ok(());
        }
        let older: Vec<Option<String>> = std::mem::take(&mut self.history);
        let mut loaded: Vec<FakeMessage> = older
            .into_iter()
            .map(|image| self.message(String::new(), image))
            .collect();
        loaded.append(&mut self.messages);
        self.messages = loaded;
        Ok(())
    }
}

/// A video form that replays a scripted sequence of statuses per submission.
#[derive(Debug, Default)]
pub struct FakeUploader {
    pub opened: bool,
    pub attached: Vec<PathBuf>,
    pub submissions: usize,
    pub clears: usize,
    pub fail_attach_for: Option<String>,
    /// Statuses returned by `status()`, one per call, for all submissions.
    pub statuses: VecDeque<UploadStatus>,
}

#[async_trait]
impl UploadSurface for FakeUploader {
    async fn open(&mut self) -> Result<()> {
        self.opened = true;
        Ok(())
    }

    async fn attach_image(&mut self, path: &Path) -> Result<()> {
        self.attach(path)
    }

    async fn attach_audio(&mut self, path: &Path) -> Result<()> {
        self.attach(path)
    }

    async fn submit(&mut self) -> Result<()> {
        self.submissions += 1;
        Ok(())
    }

    async fn status(&mut self) -> Result<UploadStatus> {
        Ok(self.statuses.pop_front().unwrap_or(UploadStatus::Unknown))
    }

    async fn clear_inputs(&mut self) -> Result<()> {
        self.clears += 1;
        Ok(())
    }
}

impl FakeUploader {
    fn attach(&mut self, path: &Path) -> Result<()> {
        let name = path
            .file_name()
            .map(|n| n.to_string_lossy().to_string())
            .unwrap_or_default();
        if self.fail_attach_for.as_deref() == Some(name.as_str()) {
            bail!("file input not found");
        }
        self.attached.push(path.to_path_buf());
        Ok(())
    }
}
