//! Append-only, per-participant message history.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Participant channel.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Channel {
    /// Code proposer traffic
    Coder,
    /// Test proposer traffic
    Tester,
    /// Execution, analysis and round bookkeeping
    Executor,
}

/// One recorded message.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TranscriptEntry {
    pub channel: Channel,
    /// Who sent it (`controller`, `coder`, `tester`, `executor`)
    pub speaker: String,
    pub message: String,
    pub at: DateTime<Utc>,
}

/// Message history of one workflow invocation.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Transcript {
    entries: Vec<TranscriptEntry>,
}

impl Transcript {
    /// Create an empty transcript.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Append a message.
    pub fn record(&mut self, channel: Channel, speaker: &str, message: impl Into<String>) {
        self.entries.push(TranscriptEntry {
            channel,
            speaker: speaker.to_string(),
            message: message.into(),
            at: Utc::now(),
        });
    }

    /// Messages of one channel, oldest first.
    pub fn channel(&self, channel: Channel) -> impl Iterator<Item = &TranscriptEntry> + '_ {
        self.entries.iter().filter(move |e| e.channel == channel)
    }

    /// All entries, oldest first.
    #[must_use]
    pub fn entries(&self) -> &[TranscriptEntry] {
        &self.entries
    }

    /// Number of entries.
    #[must_use]
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// Whether nothing was recorded.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Forget everything; only done when a fresh workflow starts.
    pub(crate) fn clear(&mut self) {
        self.entries.clear();
    }
}
