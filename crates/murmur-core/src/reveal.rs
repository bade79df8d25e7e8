//! Progressive reveal of an already received reply.
//!
//! The completion transport returns the full text at once; a `Reveal` hands it
//! back out in growing prefixes, one per tick, so the reply appears to stream.

use std::time::Duration;

use crate::state::MessageId;

/// Delay between two reveal steps.
pub const REVEAL_INTERVAL: Duration = Duration::from_millis(30);

/// Number of steps a reply is spread over.
pub const TARGET_STEPS: usize = 40;

/// Smallest number of characters revealed per step.
pub const MIN_CHUNK: usize = 8;

/// Convert a character index to a byte index for UTF-8 safe string operations
pub fn char_to_byte_index(s: &str, char_idx: usize) -> usize {
    s.char_indices()
        .nth(char_idx)
        .map(|(i, _)| i)
        .unwrap_or(s.len())
}

/// Characters revealed per step for a text of `len` characters.
pub fn chunk_size(len: usize) -> usize {
    (len / TARGET_STEPS).max(MIN_CHUNK)
}

/// What a single tick produced.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RevealStep {
    /// A prefix of the text; more ticks follow.
    Partial(String),
    /// The complete text. The reveal is finished.
    Done(String),
}

impl RevealStep {
    pub fn content(&self) -> &str {
        match self {
            RevealStep::Partial(s) | RevealStep::Done(s) => s,
        }
    }

    pub fn is_done(&self) -> bool {
        matches!(self, RevealStep::Done(_))
    }
}

/// A reveal bound to one assistant message.
#[derive(Debug, Clone)]
pub struct Reveal {
    message_id: MessageId,
    text: String,
    len: usize,
    step: usize,
    cursor: usize,
    finished: bool,
}

impl Reveal {
    pub fn new(message_id: MessageId, text: String) -> Self {
        let len = text.chars().count();
        Self {
            message_id,
            step: chunk_size(len),
            text,
            len,
            cursor: 0,
            finished: false,
        }
    }

    pub fn message_id(&self) -> MessageId {
        self.message_id
    }

    pub fn is_finished(&self) -> bool {
        self.finished
    }

    /// Advance the cursor by one chunk. Returns `None` once finished.
    pub fn tick(&mut self) -> Option<RevealStep> {
        if self.finished {
            return None;
        }

        self.cursor += self.step;
        if self.cursor >= self.len {
            self.finished = true;
            return Some(RevealStep::Done(self.text.clone()));
        }

        let end = char_to_byte_index(&self.text, self.cursor);
        Some(RevealStep::Partial(self.text[..end].to_string()))
    }
}
