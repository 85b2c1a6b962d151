//! Conversation transcript state for one call.
//!
//! Two views are maintained. The permanent transcript is an ordered,
//! append-only sequence of committed [`TranscriptLine`]s. The live call
//! view interleaves progress notes from tool execution with in-place
//! updated content anchors, so progressive search output overwrites its
//! previous partial rendering instead of duplicating it. Assistant speech
//! that is still being produced sits in a separate in-progress buffer until
//! the final transcript event commits it.

use chrono::{DateTime, Utc};
use serde::Serialize;

/// Who produced a transcript line.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum Speaker {
    User,
    Assistant,
    System,
}

/// One committed, immutable line of the permanent transcript.
#[derive(Debug, Clone, Serialize)]
pub struct TranscriptLine {
    pub speaker: Speaker,
    pub text: String,
    pub timestamp: DateTime<Utc>,
}

/// One entry of the live call view. Notes are append-only; content anchors
/// are updated in place as the running search result grows.
#[derive(Debug, Clone, Serialize)]
pub struct LiveEntry {
    pub id: u64,
    pub text: String,
}

#[derive(Debug, Default)]
pub struct TranscriptStore {
    lines: Vec<TranscriptLine>,
    partial: String,
    live: Vec<LiveEntry>,
    next_id: u64,
}

impl TranscriptStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Appends a transcript delta to the in-progress assistant line and
    /// returns the accumulated text so far.
    pub fn push_partial(&mut self, delta: &str) -> &str {
        self.partial.push_str(delta);
        &self.partial
    }

    /// Commits a finished line and clears the in-progress buffer. The final
    /// text wins over the accumulated deltas, since the model may revise
    /// content before finalizing.
    pub fn commit(&mut self, speaker: Speaker, text: &str) -> TranscriptLine {
        self.partial.clear();
        let line = TranscriptLine {
            speaker,
            text: text.to_string(),
            timestamp: Utc::now(),
        };
        self.lines.push(line.clone());
        line
    }

    /// Appends a progress note to the live call view.
    pub fn note(&mut self, text: &str) -> LiveEntry {
        let entry = LiveEntry {
            id: self.allocate_id(),
            text: text.to_string(),
        };
        self.live.push(entry.clone());
        entry
    }

    /// Reserves an empty live entry whose text will be replaced as content
    /// arrives.
    pub fn begin_anchor(&mut self) -> u64 {
        let id = self.allocate_id();
        self.live.push(LiveEntry {
            id,
            text: String::new(),
        });
        id
    }

    /// Replaces the text shown at an anchor. Returns the updated entry, or
    /// `None` if the anchor does not exist.
    pub fn update_anchor(&mut self, id: u64, text: &str) -> Option<LiveEntry> {
        let entry = self.live.iter_mut().find(|e| e.id == id)?;
        entry.text = text.to_string();
        Some(entry.clone())
    }

    pub fn partial(&self) -> &str {
        &self.partial
    }

    pub fn lines(&self) -> &[TranscriptLine] {
        &self.lines
    }

    pub fn live(&self) -> &[LiveEntry] {
        &self.live
    }

    fn allocate_id(&mut self) -> u64 {
        let id = self.next_id;
        self.next_id += 1;
        id
    }
}
