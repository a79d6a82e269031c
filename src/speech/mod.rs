//! Speech Output
//!
//! Turns announcement text into audio and plays it back.

pub mod announcement;
pub mod google;

use anyhow::{Context, Result};
use std::path::{Path, PathBuf};
use tracing::info;

use crate::config::SpeechConfig;

pub use google::GoogleSpeaker;

/// Produces and plays spoken announcements
pub trait Speaker {
    /// Render `text` to an audio artifact and return its path
    fn speak(&mut self, text: &str) -> Result<PathBuf>;

    /// Play a rendered artifact
    fn play(&mut self, path: &Path) -> Result<()>;
}

/// Speaker that only logs and writes the text next to the audio path
pub struct LogSpeaker {
    output_path: PathBuf,
}

impl LogSpeaker {
    pub fn new(output_path: PathBuf) -> Self {
        Self {
            output_path: output_path.with_extension("txt"),
        }
    }
}

impl Speaker for LogSpeaker {
    fn speak(&mut self, text: &str) -> Result<PathBuf> {
        info!("Announcement: {}", text);
        std::fs::write(&self.output_path, text)
            .with_context(|| format!("Failed to write {:?}", self.output_path))?;
        Ok(self.output_path.clone())
    }

    fn play(&mut self, path: &Path) -> Result<()> {
        info!("Playback skipped for {:?}", path);
        Ok(())
    }
}

/// Google speaker when an API key is configured, log speaker otherwise
pub fn build_speaker(config: &SpeechConfig) -> Result<Box<dyn Speaker>> {
    match config.api_key.as_deref().filter(|key| !key.is_empty()) {
        Some(key) => Ok(Box::new(GoogleSpeaker::new(key.to_string(), config.clone())?)),
        None => {
            info!("No speech API key configured, announcements are logged only");
            Ok(Box::new(LogSpeaker::new(config.output_path.clone())))
        }
    }
}

/// Speak a text and play it when playback is enabled
pub fn announce(speaker: &mut dyn Speaker, text: &str, playback: bool) -> Result<()> {
    let path = speaker.speak(text)?;
    if playback {
        speaker.play(&path)?;
    }
    Ok(())
}
