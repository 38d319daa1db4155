use std::path::Path;

use anyhow::{Context, Result};
use log::{error, info, warn};
use tokio::fs;

use crate::surface::{ChatSurface, ImageHandle};

/// Saves one matched image to `target`. Never fails: every error is logged
/// and reported as `false`, and the surface is asked to close its viewer so
/// the next scan starts from a clean page.
pub async fn save_image(
    surface: &mut dyn ChatSurface,
    handle: &ImageHandle,
    target: &Path,
) -> bool {
    match try_save(surface, handle, target).await {
        Ok(()) => {
            info!("Saved image to {}", target.display());
            true
        }
        Err(err) => {
            error!("Download of {} failed: {:#}", handle.key(), err);
            if let Err(err) = surface.dismiss_viewer().await {
                warn!("Could not close image viewer: {:#}", err);
            }
            false
        }
    }
}

async fn try_save(
    surface: &mut dyn ChatSurface,
    handle: &ImageHandle,
    target: &Path,
) -> Result<()> {
    if let Some(parent) = target.parent() {
        fs::create_dir_all(parent)
            .await
            .with_context(|| format!("creating {}", parent.display()))?;
    }
    surface.download(handle, target).await
}

/// Moves a file from where the browser left it to its final place.
pub async fn relocate(landing: &Path, target: &Path) -> Result<()> {
    if let Some(parent) = target.parent() {
        fs::create_dir_all(parent).await?;
    }
    if fs::rename(landing, target).await.is_ok() {
        return Ok(());
    }
    // rename fails across filesystems
    fs::copy(landing, target).await.with_context(|| {
        format!("copying {} to {}", landing.display(), target.display())
    })?;
    fs::remove_file(landing).await?;
    Ok(())
}
