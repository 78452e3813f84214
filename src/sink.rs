//! Episode sinks
//!
//! The controller hands each completed episode to an [`EpisodeSink`] before it
//! returns to idle. Persistence belongs to the sink.

use crate::error::EntrainError;
use crate::types::AnxietyEpisode;
use std::fs::{File, OpenOptions};
use std::io::{BufWriter, Write};
use std::path::Path;
use std::sync::{Arc, Mutex};

/// Error type returned by sinks
pub type SinkError = Box<dyn std::error::Error + Send + Sync>;

pub trait EpisodeSink: Send + Sync {
    fn record(&self, episode: &AnxietyEpisode) -> Result<(), SinkError>;
}

impl<F> EpisodeSink for F
where
    F: Fn(&AnxietyEpisode) + Send + Sync,
{
    fn record(&self, episode: &AnxietyEpisode) -> Result<(), SinkError> {
        self(episode);
        Ok(())
    }
}

/// Keeps episodes in memory; clones share the same log
#[derive(Debug, Clone, Default)]
pub struct MemoryEpisodeSink {
    episodes: Arc<Mutex<Vec<AnxietyEpisode>>>,
}

impl MemoryEpisodeSink {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn episodes(&self) -> Vec<AnxietyEpisode> {
        match self.episodes.lock() {
            Ok(episodes) => episodes.clone(),
            Err(poisoned) => poisoned.into_inner().clone(),
        }
    }

    pub fn len(&self) -> usize {
        self.episodes.lock().map(|e| e.len()).unwrap_or(0)
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl EpisodeSink for MemoryEpisodeSink {
    fn record(&self, episode: &AnxietyEpisode) -> Result<(), SinkError> {
        self.episodes
            .lock()
            .map_err(|_| "episode log poisoned")?
            .push(episode.clone());
        Ok(())
    }
}

/// Appends one JSON object per episode to a file
pub struct JsonLinesEpisodeSink {
    writer: Mutex<BufWriter<File>>,
}

impl JsonLinesEpisodeSink {
    pub fn open(path: &Path) -> Result<Self, EntrainError> {
        let file = OpenOptions::new().create(true).append(true).open(path)?;
        Ok(Self {
            writer: Mutex::new(BufWriter::new(file)),
        })
    }
}

impl EpisodeSink for JsonLinesEpisodeSink {
    fn record(&self, episode: &AnxietyEpisode) -> Result<(), SinkError> {
        let line = serde_json::to_string(episode)?;
        let mut writer = self.writer.lock().map_err(|_| "episode writer poisoned")?;
        writeln!(writer, "{line}")?;
        writer.flush()?;
        Ok(())
    }
}
