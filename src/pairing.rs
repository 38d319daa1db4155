use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

use anyhow::Result;
use log::{debug, info};
use serde::Serialize;

use crate::error::PipelineError;
use crate::prompts::LineNo;

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct FilePair {
    pub line_no: LineNo,
    pub image: PathBuf,
    pub audio: PathBuf,
}

/// Pairs images with audio files whose canonical stems are equal, so
/// `1.png` pairs with `001.mp3` but never with `10.mp3`. Pairs come back in
/// line order. Files without a partner are skipped.
pub fn find_pairs(images_dir: &Path, audio_dir: &Path) -> Result<Vec<FilePair>> {
    let images = files_by_line(images_dir)?;
    let mut audio = files_by_line(audio_dir)?;

    let pairs: Vec<FilePair> = images
        .into_iter()
        .filter_map(|(line_no, image)| {
            audio.remove(&line_no).map(|audio| FilePair {
                line_no,
                image,
                audio,
            })
        })
        .collect();

    info!(
        "Found {} image/audio pair(s) in {} and {}",
        pairs.len(),
        images_dir.display(),
        audio_dir.display()
    );
    Ok(pairs)
}

fn files_by_line(dir: &Path) -> Result<BTreeMap<LineNo, PathBuf>> {
    if !dir.is_dir() {
        return Err(PipelineError::MissingDirectory(dir.to_path_buf()).into());
    }

    let mut files: BTreeMap<LineNo, PathBuf> = BTreeMap::new();
    for entry in std::fs::read_dir(dir)? {
        let path = entry?.path();
        if !path.is_file() {
            continue;
        }
        let Some(stem) = path.file_stem().and_then(|s| s.to_str()) else {
            continue;
        };
        if stem.starts_with('.') {
            continue;
        }
        let line_no = LineNo::parse(stem);
        if let Some(previous) = files.get(&line_no) {
            debug!(
                "Ignoring {} because {} has the same line number",
                path.display(),
                previous.display()
            );
            continue;
        }
        files.insert(line_no, path);
    }
    Ok(files)
}
