use std::path::PathBuf;

use crate::prompts::LineNo;

const IMAGES_DIR: &str = "images";
const AUDIO_DIR: &str = "audio";

/// Where a reel's images and audio live on disk.
#[derive(Debug, Clone)]
pub struct OutputLayout {
    root: PathBuf,
}

impl OutputLayout {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        OutputLayout { root: root.into() }
    }

    pub fn images_dir(&self, reel_no: &str) -> PathBuf {
        self.root.join(reel_no.trim()).join(IMAGES_DIR)
    }

    pub fn audio_dir(&self, reel_no: &str) -> PathBuf {
        self.root.join(reel_no.trim()).join(AUDIO_DIR)
    }

    pub fn image_path(&self, reel_no: &str, line_no: &LineNo) -> PathBuf {
        self.images_dir(reel_no).join(format!("{}.png", line_no))
    }

    /// `extension` includes its leading dot.
    pub fn audio_path(&self, reel_no: &str, line_no: &LineNo, extension: &str) -> PathBuf {
        self.audio_dir(reel_no).join(format!("{}{}", line_no, extension))
    }
}
