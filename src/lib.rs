pub mod api;
pub mod audio;
pub mod baseline;
pub mod batch;
pub mod browser;
pub mod collector;
pub mod config;
pub mod downloader;
pub mod error;
pub mod generation;
pub mod layout;
pub mod pairing;
pub mod poll;
pub mod prompts;
pub mod queue;
pub mod runner;
pub mod single;
pub mod submitter;
pub mod surface;
pub mod upload;
pub mod utilities;

#[cfg(test)]
mod testing;
