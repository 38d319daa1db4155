use anyhow::Result;
use log::{debug, info};
use serde::Serialize;

use crate::error::PipelineError;
use crate::surface::{ChatSurface, InboundMessage};

/// Chat position captured right before the first prompt is sent.
///
/// `anchor` is the id of the newest inbound message at that moment. Messages
/// at or above it are never matched, however much older history the page
/// loads above them later. `None` means no inbound message was rendered, so
/// everything that shows up counts as new.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct MessageBaseline {
    count: usize,
    anchor: Option<String>,
}

impl MessageBaseline {
    pub fn new(count: usize, anchor: Option<String>) -> Self {
        MessageBaseline { count, anchor }
    }

    pub fn count(&self) -> usize {
        self.count
    }

    pub fn anchor(&self) -> Option<&str> {
        self.anchor.as_deref()
    }

    /// Starts a scan that follows the page as it scrolls toward older
    /// messages.
    pub fn scan(&self) -> NewMessageScan {
        NewMessageScan {
            anchor: self.anchor.clone(),
            anchor_seen: false,
        }
    }
}

/// Separates new messages from old ones across successive reads of one page.
///
/// The rendered window only ever grows toward older messages during a scan.
/// Until the anchor has been rendered, the window is entirely below it; once
/// it has, a window without it can only lie above it.
#[derive(Debug, Clone)]
pub struct NewMessageScan {
    anchor: Option<String>,
    anchor_seen: bool,
}

impl NewMessageScan {
    /// Reads the rendered messages and keeps those newer than the anchor.
    pub async fn read(&mut self, surface: &mut dyn ChatSurface) -> Result<Vec<InboundMessage>> {
        let rendered = surface.visible_messages().await?;
        Ok(self.select(rendered))
    }

    pub fn select(&mut self, mut rendered: Vec<InboundMessage>) -> Vec<InboundMessage> {
        let Some(anchor) = &self.anchor else {
            return rendered;
        };
        match rendered.iter().position(|message| &message.id == anchor) {
            Some(index) => {
                self.anchor_seen = true;
                rendered.split_off(index + 1)
            }
            None if self.anchor_seen => {
                debug!("Window is above the baseline anchor");
                Vec::new()
            }
            None => rendered,
        }
    }
}

/// Reads the baseline once. There is no retry: if the chat cannot be read,
/// nothing downstream can be trusted.
pub async fn capture_baseline(
    surface: &mut dyn ChatSurface,
) -> Result<MessageBaseline, PipelineError> {
    let fatal = |err: anyhow::Error| PipelineError::Baseline(format!("{:#}", err));
    let count = surface.count_messages().await.map_err(fatal)?;
    let rendered = surface.visible_messages().await.map_err(fatal)?;
    let anchor = rendered
        .iter()
        .rev()
        .find(|message| !message.id.is_empty())
        .map(|message| message.id.clone());
    info!(
        "Messages before prompts: {} (anchor {})",
        count,
        anchor.as_deref().unwrap_or("none")
    );
    Ok(MessageBaseline { count, anchor })
}
