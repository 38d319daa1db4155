//! Capability interfaces for the two remote web applications.
//!
//! Neither application offers a stable protocol, so the pipeline only ever
//! talks to them through these traits. `crate::browser` drives a real page;
//! tests drive in-memory fakes.

use std::path::Path;

use anyhow::Result;
use async_trait::async_trait;
use serde::Serialize;

/// A generated-image element seen during one page session.
///
/// `key` is the dedup key (the element's resource URI).
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct ImageHandle {
    key: String,
}

impl ImageHandle {
    pub fn new(key: impl Into<String>) -> Self {
        ImageHandle { key: key.into() }
    }

    pub fn key(&self) -> &str {
        &self.key
    }
}

/// One inbound message as currently rendered.
///
/// `id` is assigned by the application and stays the same when older history
/// is loaded above the message.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct InboundMessage {
    pub id: String,
    pub text: String,
    pub image: Option<ImageHandle>,
}

/// The chat application that turns prompts into images.
#[async_trait]
pub trait ChatSurface: Send {
    /// Deliver one prompt to the chat input.
    async fn submit(&mut self, text: &str) -> Result<()>;

    /// Number of inbound message elements currently present.
    async fn count_messages(&mut self) -> Result<usize>;

    /// Inbound messages currently rendered, oldest first. Loading older
    /// history may prepend entries.
    async fn visible_messages(&mut self) -> Result<Vec<InboundMessage>>;

    /// Save the image behind `handle` to `target` through the application's
    /// own download action.
    async fn download(&mut self, handle: &ImageHandle, target: &Path) -> Result<()>;

    /// Close any viewer or modal left open by a download.
    async fn dismiss_viewer(&mut self) -> Result<()>;

    /// Reveal older messages.
    async fn scroll_older(&mut self) -> Result<()>;
}

/// What the video application shows after a submission.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum UploadStatus {
    Generating,
    Error { message: String },
    Unknown,
}

/// The video application that turns an image/audio pair into a video.
#[async_trait]
pub trait UploadSurface: Send {
    /// Navigate to the avatar generation form.
    async fn open(&mut self) -> Result<()>;

    async fn attach_image(&mut self, path: &Path) -> Result<()>;

    async fn attach_audio(&mut self, path: &Path) -> Result<()>;

    async fn submit(&mut self) -> Result<()>;

    async fn status(&mut self) -> Result<UploadStatus>;

    /// Remove attached files so the form is ready for the next pair.
    async fn clear_inputs(&mut self) -> Result<()>;
}
