use std::collections::HashSet;
use std::path::{Path, PathBuf};
use std::time::Duration;

use anyhow::{anyhow, Context, Result};
use async_trait::async_trait;
use log::{debug, info, warn};
use serde::Deserialize;

use super::{first_match, wait_for_element, BrowserSession};
use crate::config::ChatConfig;
use crate::downloader::relocate;
use crate::poll::Poller;
use crate::surface::{ChatSurface, ImageHandle, InboundMessage};

const INBOUND_MESSAGE: &str = ".message-in";

const INPUT_SELECTORS: &[&str] = &[
    "div[contenteditable='true'][data-tab='10']",
    "footer div[contenteditable='true']",
];

const DOWNLOAD_BUTTON_SELECTORS: &[&str] = &[
    "span[data-icon='download-refreshed']",
    "span[data-icon='download']",
    "div[aria-label='Download']",
];

/// One entry per inbound message, in page order. WhatsApp keeps a stable
/// `data-id` on the row that wraps each message.
const INBOUND_MESSAGES_JS: &str = r#"
Array.from(document.querySelectorAll('.message-in')).map(message => {
    const row = message.closest('[data-id]') || message.querySelector('[data-id]');
    const img = message.querySelector("img[src^='blob:']");
    return {
        id: row ? row.getAttribute('data-id') : null,
        text: message.innerText || '',
        src: img ? img.getAttribute('src') : null,
    };
})
"#;

const SCROLL_UP_JS: &str = r#"
(() => {
    const pane = document.querySelector('[data-testid="conversation-panel-messages"]')
        || document.querySelector('#main div[role="application"]')
        || document.querySelector('#main .copyable-area > div');
    if (pane) { pane.scrollTop = Math.max(0, pane.scrollTop - 1000); return true; }
    window.scrollBy(0, -1000);
    return false;
})()
"#;

#[derive(Debug, Deserialize)]
struct RenderedMessage {
    id: Option<String>,
    #[serde(default)]
    text: String,
    src: Option<String>,
}

impl From<RenderedMessage> for InboundMessage {
    fn from(message: RenderedMessage) -> Self {
        InboundMessage {
            id: message.id.unwrap_or_default(),
            text: message.text,
            image: message.src.map(ImageHandle::new),
        }
    }
}

/// WhatsApp Web, logged in through a persistent profile, with the assistant
/// chat open.
pub struct WhatsAppChat {
    session: BrowserSession,
    downloads_dir: PathBuf,
}

impl WhatsAppChat {
    pub async fn open(config: &ChatConfig) -> Result<Self> {
        let session =
            BrowserSession::launch(&config.profile_dir, config.headless, &config.url).await?;
        session.allow_downloads(&config.downloads_dir).await?;

        info!("Waiting for chat '{}' (scan the QR code on first run)", config.chat_name);
        let selector = format!("span[title='{}']", config.chat_name);
        let chat = wait_for_element(session.page(), &selector, Duration::from_secs(120))
            .await
            .with_context(|| format!("chat '{}' not found", config.chat_name))?;
        chat.click().await?;
        tokio::time::sleep(Duration::from_secs(3)).await;
        info!("Opened chat '{}'", config.chat_name);

        Ok(WhatsAppChat {
            session,
            downloads_dir: config.downloads_dir.clone(),
        })
    }

    pub async fn close(self) {
        self.session.close().await;
    }


    async fn landed_files(&self) -> Result<HashSet<PathBuf>> {
        let mut files = HashSet::new();
        let mut entries = tokio::fs::read_dir(&self.downloads_dir).await?;
        while let Some(entry) = entries.next_entry().await? {
            let path = entry.path();
            let partial = path
                .extension()
                .map_or(false, |ext| ext == "crdownload" || ext == "tmp");
            if path.is_file() && !partial {
                files.insert(path);
            }
        }
        Ok(files)
    }

    /// Waits for a completed file that was not in `before`.
    async fn wait_for_download(&self, before: &HashSet<PathBuf>) -> Result<PathBuf> {
        let mut clock = Poller::new(Duration::from_millis(500), Duration::from_secs(30)).start();
        loop {
            if let Some(path) = self.landed_files().await?.difference(before).next() {
                return Ok(path.clone());
            }
            if !clock.wait().await {
                return Err(anyhow!("download did not finish within 30s"));
            }
        }
    }
}

#[async_trait]
impl ChatSurface for WhatsAppChat {
    async fn submit(&mut self, text: &str) -> Result<()> {
        let input = first_match(self.session.page(), INPUT_SELECTORS, Duration::from_secs(10))
            .await
            .context("message input not found")?;
        input.click().await?;
        input.type_str(text).await?;
        tokio::time::sleep(Duration::from_millis(500)).await;
        input.press_key("Enter").await?;
        Ok(())
    }

    async fn count_messages(&mut self) -> Result<usize> {
        let messages = self.session.page().find_elements(INBOUND_MESSAGE).await?;
        Ok(messages.len())
    }

    async fn visible_messages(&mut self) -> Result<Vec<InboundMessage>> {
        let messages: Vec<InboundMessage> = self
            .session
            .page()
            .evaluate(INBOUND_MESSAGES_JS)
            .await?
            .into_value::<Vec<RenderedMessage>>()?
            .into_iter()
            .map(InboundMessage::from)
            .collect();
        debug!("{} inbound message(s) rendered", messages.len());
        Ok(messages)
    }

    async fn download(&mut self, handle: &ImageHandle, target: &Path) -> Result<()> {
        let page = self.session.page();
        let selector = format!("img[src='{}']", handle.key());
        let image = page
            .find_element(selector)
            .await
            .context("image is no longer on the page")?;
        image.scroll_into_view().await?;
        image.click().await?;

        let button = first_match(page, DOWNLOAD_BUTTON_SELECTORS, Duration::from_secs(10))
            .await
            .context("download button not found")?;
        let before = self.landed_files().await?;
        button.click().await?;

        let landed = self.wait_for_download(&before).await?;
        relocate(&landed, target).await?;
        self.dismiss_viewer().await
    }

    async fn dismiss_viewer(&mut self) -> Result<()> {
        self.session.press_key("Escape").await?;
        tokio::time::sleep(Duration::from_millis(500)).await;
        Ok(())
    }

    async fn scroll_older(&mut self) -> Result<()> {
        let scrolled_pane = self
            .session
            .page()
            .evaluate(SCROLL_UP_JS)
            .await?
            .into_value::<bool>()
            .unwrap_or(false);
        if !scrolled_pane {
            warn!("Message pane not found, scrolled the window instead");
        }
        Ok(())
    }
}
