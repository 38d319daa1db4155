use std::env;
use std::path::PathBuf;
use std::time::Duration;

use log::warn;

use crate::batch::BatchOptions;
use crate::collector::{CollectOptions, MissPolicy};
use crate::poll::Poller;

const ENV_PREFIX: &str = "REEL_PIPELINE";

/// Longest generation wait a request or the configuration may ask for.
pub const MAX_WAIT_MINUTES: u64 = 24 * 60;

#[derive(Debug, Clone, PartialEq, Default)]
pub struct Config {
    pub server: ServerConfig,
    pub paths: PathsConfig,
    pub chat: ChatConfig,
    pub video: VideoConfig,
    pub audio: AudioConfig,
}

#[derive(Debug, Clone, PartialEq)]
pub struct ServerConfig {
    pub host: String,
    pub port: u16,
    /// How long a request waits for its queued job before answering 408.
    pub request_timeout_secs: u64,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            host: "0.0.0.0".to_string(),
            port: 5003,
            request_timeout_secs: 15 * 60,
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct PathsConfig {
    pub output_root: PathBuf,
    /// JSON export of the prompt worksheet.
    pub sheet_export: PathBuf,
}

impl Default for PathsConfig {
    fn default() -> Self {
        Self {
            output_root: PathBuf::from("output"),
            sheet_export: PathBuf::from("sheet_export.json"),
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct ChatConfig {
    pub url: String,
    pub chat_name: String,
    pub profile_dir: PathBuf,
    pub downloads_dir: PathBuf,
    pub headless: bool,
    pub max_scrolls: u32,
    pub generation_wait_minutes: u64,
    /// Attempts per image before it is given up; 1 means skip-and-continue.
    pub download_attempts: u32,
}

impl Default for ChatConfig {
    fn default() -> Self {
        Self {
            url: "https://web.whatsapp.com/".to_string(),
            chat_name: "ChatGPT".to_string(),
            profile_dir: PathBuf::from("whatsapp_session"),
            downloads_dir: PathBuf::from(".whatsapp_downloads"),
            headless: false,
            max_scrolls: 200,
            generation_wait_minutes: 10,
            download_attempts: 1,
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct VideoConfig {
    pub url: String,
    pub profile_dir: PathBuf,
    pub headless: bool,
}

impl Default for VideoConfig {
    fn default() -> Self {
        Self {
            url: "https://dreamina.capcut.com/ai-tool/generate?type=digitalHuman".to_string(),
            profile_dir: PathBuf::from("vpn_browser_session"),
            headless: false,
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct AudioConfig {
    pub timeout_secs: u64,
    pub pause_ms: u64,
}

impl Default for AudioConfig {
    fn default() -> Self {
        Self {
            timeout_secs: 30,
            pause_ms: 1000,
        }
    }
}

impl Config {
    /// Defaults overridden by `REEL_PIPELINE_<SECTION>__<FIELD>` variables,
    /// e.g. `REEL_PIPELINE_SERVER__PORT=8080`.
    pub fn from_env() -> Self {
        Self::from_vars(env::vars())
    }

    pub fn from_vars(vars: impl IntoIterator<Item = (String, String)>) -> Self {
        let prefix = format!("{}_", ENV_PREFIX);
        let mut cfg = Config::default();
        for (key, value) in vars {
            if let Some(stripped) = key.strip_prefix(&prefix) {
                let normalized = stripped.to_ascii_lowercase().replace("__", ".");
                cfg.apply(&normalized, value);
            }
        }
        cfg
    }

    fn apply(&mut self, key: &str, value: String) {
        match key {
            "server.host" => self.server.host = value,
            "server.port" => parse_into(key, &value, &mut self.server.port),
            "server.request_timeout_secs" => {
                parse_into(key, &value, &mut self.server.request_timeout_secs)
            }
            "paths.output_root" => self.paths.output_root = PathBuf::from(value),
            "paths.sheet_export" => self.paths.sheet_export = PathBuf::from(value),
            "chat.url" => self.chat.url = value,
            "chat.chat_name" => self.chat.chat_name = value,
            "chat.profile_dir" => self.chat.profile_dir = PathBuf::from(value),
            "chat.downloads_dir" => self.chat.downloads_dir = PathBuf::from(value),
            "chat.headless" => self.chat.headless = parse_flag(&value),
            "chat.max_scrolls" => parse_into(key, &value, &mut self.chat.max_scrolls),
            "chat.generation_wait_minutes" => {
                parse_into(key, &value, &mut self.chat.generation_wait_minutes)
            }
            "chat.download_attempts" => {
                parse_into(key, &value, &mut self.chat.download_attempts)
            }
            "video.url" => self.video.url = value,
            "video.profile_dir" => self.video.profile_dir = PathBuf::from(value),
            "video.headless" => self.video.headless = parse_flag(&value),
            "audio.timeout_secs" => parse_into(key, &value, &mut self.audio.timeout_secs),
            "audio.pause_ms" => parse_into(key, &value, &mut self.audio.pause_ms),
            _ => warn!("Ignoring unknown setting {}", key),
        }
    }

    pub fn request_timeout(&self) -> Duration {
        Duration::from_secs(self.server.request_timeout_secs)
    }

    /// Batch options for one request; `wait_minutes` overrides the
    /// configured generation ceiling. Either is capped at
    /// [`MAX_WAIT_MINUTES`].
    pub fn batch_options(&self, wait_minutes: Option<u64>) -> BatchOptions {
        let defaults = BatchOptions::default();
        let minutes = wait_minutes
            .unwrap_or(self.chat.generation_wait_minutes)
            .min(MAX_WAIT_MINUTES);
        let miss_policy = if self.chat.download_attempts > 1 {
            MissPolicy::RetrySame {
                max_attempts: self.chat.download_attempts,
            }
        } else {
            MissPolicy::SkipAndContinue
        };
        BatchOptions {
            collect: CollectOptions {
                max_scrolls: self.chat.max_scrolls,
                miss_policy,
                ..defaults.collect
            },
            generation: Poller::new(
                defaults.generation.interval,
                Duration::from_secs(minutes.saturating_mul(60)),
            ),
            ..defaults
        }
    }
}

fn parse_into<T: std::str::FromStr>(key: &str, value: &str, slot: &mut T) {
    match value.trim().parse() {
        Ok(parsed) => *slot = parsed,
        Err(_) => warn!("Ignoring invalid value {:?} for {}", value, key),
    }
}

fn parse_flag(value: &str) -> bool {
    matches!(value.trim(), "1" | "true" | "TRUE" | "True" | "yes")
}
