//! Transcript types returned to clients.
//!
//! The JSON shape follows the common offline-recognizer result format:
//! ```json
//! { "text": "hello world", "result": [{ "word": "hello", "start": 0.0, "end": 0.4, "conf": 0.93 }] }
//! ```
//! `result` is left out when there are no words, so silence serializes as
//! `{"text": ""}`.

use serde::{Deserialize, Serialize};

/// Final recognizer output for one file.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Transcript {
    pub text: String,

    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub result: Vec<WordTiming>,
}

/// Timing and confidence of one recognized word, in seconds from the start of the file.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct WordTiming {
    pub word: String,
    pub start: f64,
    pub end: f64,
    pub conf: f32,
}

/// What a session reports after consuming a chunk of samples.
#[derive(Debug, Clone, PartialEq)]
pub enum DecodingState {
    /// Still inside an utterance; `partial` is the best guess so far, if any
    Running { partial: Option<String> },
    /// A segment was finalized while consuming this chunk
    Finalized { segment: String },
}

impl Transcript {
    /// Join per-segment transcripts, in order, into one.
    pub fn concat(parts: impl IntoIterator<Item = Transcript>) -> Self {
        let mut text = String::new();
        let mut result = Vec::new();
        for part in parts {
            let part_text = part.text.trim();
            if !part_text.is_empty() {
                if !text.is_empty() {
                    text.push(' ');
                }
                text.push_str(part_text);
            }
            result.extend(part.result);
        }
        Self { text, result }
    }
}
