use async_trait::async_trait;
use std::path::PathBuf;
use std::sync::atomic::{AtomicU64, Ordering};
use tracing::debug;

use super::AudioSink;
use crate::error::{SpeechError, SpeechResult};

/// Sink that writes each utterance to `<dir>/utterance-<n>.mp3`. Playback
/// completes as soon as the file is written.
pub struct FileSink {
    dir: PathBuf,
    counter: AtomicU64,
}

impl FileSink {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self {
            dir: dir.into(),
            counter: AtomicU64::new(0),
        }
    }
}

#[async_trait]
impl AudioSink for FileSink {
    async fn play(&self, audio: Vec<u8>) -> SpeechResult<()> {
        let n = self.counter.fetch_add(1, Ordering::SeqCst) + 1;
        let path = self.dir.join(format!("utterance-{:03}.mp3", n));

        tokio::fs::create_dir_all(&self.dir)
            .await
            .map_err(|e| SpeechError::Playback {
                message: format!("Cannot create {}: {}", self.dir.display(), e),
            })?;
        tokio::fs::write(&path, &audio)
            .await
            .map_err(|e| SpeechError::Playback {
                message: format!("Cannot write {}: {}", path.display(), e),
            })?;

        debug!(path = %path.display(), bytes = audio.len(), "Utterance written");
        Ok(())
    }
}
