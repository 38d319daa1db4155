use std::time::Duration;

use anyhow::Result;
use async_trait::async_trait;
use log::info;

use crate::audio::AudioDownloader;
use crate::batch::run_batch;
use crate::browser::dreamina::DreaminaForm;
use crate::browser::whatsapp::WhatsAppChat;
use crate::config::Config;
use crate::layout::OutputLayout;
use crate::queue::{Job, JobOutcome, JobRunner};
use crate::single::generate_single;
use crate::upload::{upload_reel, UploadOptions};

/// Runs jobs against real browser sessions. Every job that needs a browser
/// gets a fresh one that is closed when the job ends, whatever the outcome.
pub struct PipelineRunner {
    config: Config,
    layout: OutputLayout,
    audio: AudioDownloader,
}

impl PipelineRunner {
    pub fn new(config: Config) -> Result<Self> {
        let audio = AudioDownloader::new(
            Duration::from_secs(config.audio.timeout_secs),
            Duration::from_millis(config.audio.pause_ms),
        )?;
        Ok(PipelineRunner {
            layout: OutputLayout::new(&config.paths.output_root),
            config,
            audio,
        })
    }
}

#[async_trait]
impl JobRunner for PipelineRunner {
    async fn run(&self, job: Job) -> Result<JobOutcome> {
        match job {
            Job::GenerateImages { prompts, options } => {
                let mut chat = WhatsAppChat::open(&self.config.chat).await?;
                let summary = run_batch(&mut chat, &prompts, &self.layout, &options).await;
                chat.close().await;
                Ok(JobOutcome::Batch(summary?))
            }
            Job::GenerateImage { item, options } => {
                let mut chat = WhatsAppChat::open(&self.config.chat).await?;
                let result = generate_single(&mut chat, &item, &self.layout, &options).await;
                chat.close().await;
                Ok(JobOutcome::Single(result?))
            }
            Job::UploadReel { reel } => {
                // the browser only starts once the reel has pairs to upload
                let mut form = DreaminaForm::new(&self.config.video);
                let report =
                    upload_reel(&mut form, &self.layout, &reel, &UploadOptions::default()).await;
                form.close().await;
                Ok(JobOutcome::Upload(report?))
            }
            Job::DownloadAudio { reel, rows } => {
                let report = self.audio.download_reel(&rows, &self.layout, &reel).await;
                info!(
                    "Reel {}: {} audio file(s) downloaded, {} failed",
                    reel, report.downloaded, report.failed
                );
                Ok(JobOutcome::Audio(report))
            }
        }
    }
}
