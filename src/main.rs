use std::sync::Arc;

use actix_web::web;
use anyhow::Result;
use log::info;

use reel_pipeline::api::{self, AppState};
use reel_pipeline::config::Config;
use reel_pipeline::runner::PipelineRunner;

#[tokio::main]
async fn main() -> Result<()> {
    env_logger::init();

    let config = Config::from_env();
    info!(
        "Output root {}, sheet export {}",
        config.paths.output_root.display(),
        config.paths.sheet_export.display()
    );

    let runner = Arc::new(PipelineRunner::new(config.clone())?);
    let state = web::Data::new(AppState::new(config, runner));

    api::run_api_server(state).await?;
    Ok(())
}
