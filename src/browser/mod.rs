//! chromiumoxide-backed implementations of the surface traits.
//!
//! Each job launches its own browser on a persistent profile directory and
//! closes it when the job ends. A profile can only be held by one browser at
//! a time, which the job lanes guarantee.

pub mod dreamina;
pub mod whatsapp;

use std::path::Path;
use std::time::Duration;

use anyhow::{anyhow, Context, Result};
use chromiumoxide::cdp::browser_protocol::browser::{
    SetDownloadBehaviorBehavior, SetDownloadBehaviorParams,
};
use chromiumoxide::element::Element;
use chromiumoxide::{Browser, BrowserConfig, Page};
use futures::StreamExt;
use log::{debug, info, warn};
use tokio::task::JoinHandle;

use crate::poll::Poller;

const LAUNCH_ARGS: &[&str] = &[
    "--no-sandbox",
    "--disable-dev-shm-usage",
    "--disable-blink-features=AutomationControlled",
];

pub struct BrowserSession {
    browser: Browser,
    page: Page,
    handler_task: JoinHandle<()>,
}

impl BrowserSession {
    pub async fn launch(profile_dir: &Path, headless: bool, url: &str) -> Result<Self> {
        tokio::fs::create_dir_all(profile_dir)
            .await
            .with_context(|| format!("creating profile dir {}", profile_dir.display()))?;

        let mut builder = BrowserConfig::builder()
            .user_data_dir(profile_dir)
            .args(LAUNCH_ARGS.iter().copied());
        if !headless {
            builder = builder.with_head();
        }
        let config = builder.build().map_err(|e| anyhow!(e))?;

        let (browser, mut handler) = Browser::launch(config)
            .await
            .context("launching browser")?;
        let handler_task = tokio::spawn(async move {
            while let Some(event) = handler.next().await {
                if let Err(e) = event {
                    debug!("browser handler event error: {}", e);
                }
            }
        });

        let page = browser
            .new_page(url)
            .await
            .with_context(|| format!("opening {}", url))?;
        info!("Browser launched on {}", url);

        Ok(BrowserSession {
            browser,
            page,
            handler_task,
        })
    }

    pub fn page(&self) -> &Page {
        &self.page
    }

    /// Lets downloads land in `dir` under their suggested names.
    pub async fn allow_downloads(&self, dir: &Path) -> Result<()> {
        tokio::fs::create_dir_all(dir).await?;
        let params = SetDownloadBehaviorParams::builder()
            .behavior(SetDownloadBehaviorBehavior::Allow)
            .download_path(dir.to_string_lossy().to_string())
            .build()
            .map_err(|e| anyhow!(e))?;
        self.browser.execute(params).await?;
        Ok(())
    }

    pub async fn press_key(&self, key: &str) -> Result<()> {
        self.page.find_element("body").await?.press_key(key).await?;
        Ok(())
    }

    pub async fn close(mut self) {
        if let Err(e) = self.browser.close().await {
            warn!("Closing browser failed: {}", e);
        }
        if let Err(e) = self.browser.wait().await {
            warn!("Waiting for browser exit failed: {}", e);
        }
        self.handler_task.abort();
        info!("Browser closed");
    }
}

/// Waits for `selector` to match, checking every half second.
pub async fn wait_for_element(page: &Page, selector: &str, timeout: Duration) -> Result<Element> {
    let mut clock = Poller::new(Duration::from_millis(500), timeout).start();
    loop {
        if let Ok(element) = page.find_element(selector).await {
            return Ok(element);
        }
        if !clock.wait().await {
            return Err(anyhow!(
                "timed out after {:?} waiting for {}",
                timeout,
                selector
            ));
        }
    }
}

/// Returns the first selector in `selectors` that matches.
pub async fn first_match(page: &Page, selectors: &[&str], timeout: Duration) -> Result<Element> {
    for selector in selectors {
        if let Ok(element) = wait_for_element(page, selector, timeout).await {
            debug!("Matched selector {}", selector);
            return Ok(element);
        }
    }
    Err(anyhow!("none of {:?} matched", selectors))
}
