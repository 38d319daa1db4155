use std::path::Path;
use std::time::Duration;

use anyhow::{anyhow, bail, Context, Result};
use async_trait::async_trait;
use chromiumoxide::cdp::browser_protocol::dom::SetFileInputFilesParams;
use log::{debug, info, warn};

use super::{first_match, BrowserSession};
use crate::config::VideoConfig;
use crate::poll::Poller;
use crate::surface::{UploadStatus, UploadSurface};
use crate::upload::classify_status;

const IMAGE_INPUT: &[&str] = &[
    "input[type='file'][accept*='image']",
    "input[type='file']",
];

const AUDIO_INPUT: &[&str] = &["input[type='file'][accept*='audio']"];

const SUBMIT_SELECTORS: &[&str] = &[
    "button[class*='submit-button']",
    "button[class*='generate']",
    "button.lv-btn-primary",
];

const REMOVE_SELECTOR: &str = "[class*='remove-button'], [class*='delete-icon']";

/// Clicks the first button or tab whose text contains the given label.
const CLICK_BY_TEXT_JS: &str = r#"
((label) => {
    const candidates = Array.from(
        document.querySelectorAll('button, [role="tab"], a, div[class*="tab"]')
    );
    const hit = candidates.find(el => el.innerText && el.innerText.trim().includes(label));
    if (hit) { hit.click(); return true; }
    return false;
})"#;

/// The avatar generation form of the video application. The browser starts
/// on the first `open`.
pub struct DreaminaForm {
    config: VideoConfig,
    session: Option<BrowserSession>,
}

impl DreaminaForm {
    pub fn new(config: &VideoConfig) -> Self {
        DreaminaForm {
            config: config.clone(),
            session: None,
        }
    }

    pub async fn close(self) {
        if let Some(session) = self.session {
            session.close().await;
        }
    }

    fn session(&self) -> Result<&BrowserSession> {
        self.session.as_ref().context("form is not open")
    }

    async fn click_by_text(&self, label: &str) -> Result<bool> {
        let script = format!("{}({})", CLICK_BY_TEXT_JS, serde_json::to_string(label)?);
        let clicked = self
            .session()?
            .page()
            .evaluate(script)
            .await?
            .into_value::<bool>()?;
        Ok(clicked)
    }

    async fn attach(&self, selectors: &[&str], path: &Path) -> Result<()> {
        let page = self.session()?.page();
        let input = first_match(page, selectors, Duration::from_secs(10))
            .await
            .context("file input not found")?;
        let absolute = tokio::fs::canonicalize(path)
            .await
            .with_context(|| format!("resolving {}", path.display()))?;
        let params = SetFileInputFilesParams::builder()
            .file(absolute.to_string_lossy().to_string())
            .backend_node_id(input.backend_node_id)
            .build()
            .map_err(|e| anyhow!(e))?;
        page.execute(params).await?;
        info!("Attached {}", path.display());
        tokio::time::sleep(Duration::from_secs(3)).await;
        Ok(())
    }
}

#[async_trait]
impl UploadSurface for DreaminaForm {
    async fn open(&mut self) -> Result<()> {
        if self.session.is_none() {
            let config = &self.config;
            let session =
                BrowserSession::launch(&config.profile_dir, config.headless, &config.url).await?;
            self.session = Some(session);
        }
        tokio::time::sleep(Duration::from_secs(5)).await;
        for label in ["Create", "AI Avatar"] {
            if self.click_by_text(label).await? {
                debug!("Clicked '{}'", label);
                tokio::time::sleep(Duration::from_secs(2)).await;
            } else {
                warn!("'{}' not found, assuming the form is already showing", label);
            }
        }
        first_match(self.session()?.page(), IMAGE_INPUT, Duration::from_secs(20))
            .await
            .context("avatar form did not load")?;
        Ok(())
    }

    async fn attach_image(&mut self, path: &Path) -> Result<()> {
        self.attach(IMAGE_INPUT, path).await
    }

    async fn attach_audio(&mut self, path: &Path) -> Result<()> {
        self.attach(AUDIO_INPUT, path).await
    }

    async fn submit(&mut self) -> Result<()> {
        let page = self.session()?.page();
        let button = first_match(page, SUBMIT_SELECTORS, Duration::from_secs(10))
            .await
            .context("submit button not found")?;

        let mut clock = Poller::new(Duration::from_secs(1), Duration::from_secs(30)).start();
        while button.attribute("disabled").await?.is_some() {
            if !clock.wait().await {
                bail!("submit button stayed disabled for 30s");
            }
        }
        button.click().await?;
        info!("Submitted pair");
        tokio::time::sleep(Duration::from_secs(5)).await;
        Ok(())
    }

    async fn status(&mut self) -> Result<UploadStatus> {
        let text = self
            .session()?
            .page()
            .evaluate("document.body.innerText")
            .await?
            .into_value::<String>()?;
        Ok(classify_status(&text))
    }

    async fn clear_inputs(&mut self) -> Result<()> {
        let buttons = self.session()?.page().find_elements(REMOVE_SELECTOR).await?;
        if buttons.is_empty() {
            bail!("no remove buttons on the form");
        }
        for button in buttons {
            button.click().await?;
            tokio::time::sleep(Duration::from_millis(500)).await;
        }
        Ok(())
    }
}
