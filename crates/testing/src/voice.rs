//! No-op speech collaborators: silence in, fixed transcript out; text in, a
//! deterministic byte marker out. Lets voice-pipeline ordering/flush-boundary
//! invariants be tested without network access (§4.7 ambient).

use async_trait::async_trait;
use cso_domain::error::Result;
use cso_voice::{SpeechToText, TextToSpeech};

pub struct NoopSpeechToText {
    pub fixed_transcript: String,
}

impl NoopSpeechToText {
    pub fn new(fixed_transcript: impl Into<String>) -> Self {
        Self {
            fixed_transcript: fixed_transcript.into(),
        }
    }
}

#[async_trait]
impl SpeechToText for NoopSpeechToText {
    async fn transcribe(&self, _audio: &[u8]) -> Result<String> {
        Ok(self.fixed_transcript.clone())
    }
}

pub struct NoopTextToSpeech;

#[async_trait]
impl TextToSpeech for NoopTextToSpeech {
    async fn synthesize(&self, text: &str) -> Result<Vec<u8>> {
        Ok(text.bytes().collect())
    }
}
