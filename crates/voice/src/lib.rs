//! Voice Pipeline (C7, §4.7): wraps the orchestrator with STT in front and
//! sentence-buffered TTS behind it.

use cso_domain::chunk::Chunk;
use cso_orchestrator::Orchestrator;
use std::sync::Arc;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;

/// Provider-agnostic speech-to-text collaborator, mirroring `LlmProvider`'s
/// shape (§4.7 ambient).
#[async_trait::async_trait]
pub trait SpeechToText: Send + Sync {
    async fn transcribe(&self, audio: &[u8]) -> cso_domain::error::Result<String>;
}

/// Provider-agnostic text-to-speech collaborator.
#[async_trait::async_trait]
pub trait TextToSpeech: Send + Sync {
    async fn synthesize(&self, text: &str) -> cso_domain::error::Result<Vec<u8>>;
}

/// One unit of voice output: synthesized audio plus the exact text it
/// covers (P9: concatenated transcripts equal the full assistant text).
#[derive(Debug, Clone)]
pub struct VoiceChunk {
    pub audio: Vec<u8>,
    pub transcript: String,
}

const SENTENCE_TERMINATORS: [char; 3] = ['.', '!', '?'];

pub struct VoicePipeline {
    orchestrator: Arc<Orchestrator>,
    stt: Arc<dyn SpeechToText>,
    tts: Arc<dyn TextToSpeech>,
    s_max: usize,
}

impl VoicePipeline {
    pub fn new(
        orchestrator: Arc<Orchestrator>,
        stt: Arc<dyn SpeechToText>,
        tts: Arc<dyn TextToSpeech>,
        s_max: usize,
    ) -> Self {
        Self {
            orchestrator,
            stt,
            tts,
            s_max,
        }
    }

    /// Buffer inbound audio frames until an end-of-utterance marker, then
    /// transcribe and run one orchestrator turn, returning its voice
    /// output stream (§4.7 "Inbound"/"Outbound").
    pub async fn handle_utterance(
        &self,
        session_id: String,
        audio_frames: Vec<Vec<u8>>,
        cancel: CancellationToken,
    ) -> cso_domain::error::Result<mpsc::Receiver<VoiceChunk>> {
        let audio: Vec<u8> = audio_frames.into_iter().flatten().collect();
        let transcript = self.stt.transcribe(&audio).await?;

        let chunk_rx = self.orchestrator.turn(session_id, transcript, cancel).await?;
        Ok(self.spawn_tts_sink(chunk_rx))
    }

    fn spawn_tts_sink(&self, mut chunks: mpsc::Receiver<Chunk>) -> mpsc::Receiver<VoiceChunk> {
        let (voice_tx, voice_rx) = mpsc::channel(32);
        let tts = self.tts.clone();
        let s_max = self.s_max;

        tokio::spawn(async move {
            let mut buffer = String::new();
            while let Some(chunk) = chunks.recv().await {
                match chunk {
                    Chunk::Token { text } => {
                        buffer.push_str(&text);
                        let ends_sentence = text
                            .chars()
                            .last()
                            .map(|c| SENTENCE_TERMINATORS.contains(&c))
                            .unwrap_or(false);
                        if ends_sentence || buffer.len() >= s_max {
                            if flush(&tts, &mut buffer, &voice_tx).await.is_err() {
                                return;
                            }
                        }
                    }
                    Chunk::Done { .. } => {
                        let _ = flush(&tts, &mut buffer, &voice_tx).await;
                    }
                    Chunk::ToolCallBegin { .. } | Chunk::ToolCallEnd { .. } => {}
                }
            }
            if !buffer.is_empty() {
                let _ = flush(&tts, &mut buffer, &voice_tx).await;
            }
        });

        voice_rx
    }
}

async fn flush(
    tts: &Arc<dyn TextToSpeech>,
    buffer: &mut String,
    voice_tx: &mpsc::Sender<VoiceChunk>,
) -> Result<(), ()> {
    if buffer.is_empty() {
        return Ok(());
    }
    let transcript = std::mem::take(buffer);
    let audio = tts.synthesize(&transcript).await.unwrap_or_default();
    voice_tx
        .send(VoiceChunk { audio, transcript })
        .await
        .map_err(|_| ())
}

#[cfg(test)]
mod tests {
    use super::*;

    struct NoopTts;
    #[async_trait::async_trait]
    impl TextToSpeech for NoopTts {
        async fn synthesize(&self, text: &str) -> cso_domain::error::Result<Vec<u8>> {
            Ok(text.as_bytes().to_vec())
        }
    }

    #[tokio::test]
    async fn sentence_terminator_triggers_flush() {
        let (tx, mut rx) = mpsc::channel(8);
        tokio::spawn(async move {
            let _ = tx.send(Chunk::Token { text: "Hello there.".into() }).await;
            let _ = tx
                .send(Chunk::Done {
                    assistant_text: "Hello there.".into(),
                    usage: None,
                })
                .await;
        });

        let tts: Arc<dyn TextToSpeech> = Arc::new(NoopTts);
        let (voice_tx, mut voice_rx) = mpsc::channel(8);
        tokio::spawn(async move {
            let mut buffer = String::new();
            while let Some(chunk) = rx.recv().await {
                if let Chunk::Token { text } = &chunk {
                    buffer.push_str(text);
                    if text.ends_with('.') {
                        let _ = flush(&tts, &mut buffer, &voice_tx).await;
                    }
                }
            }
        });

        let voice_chunk = voice_rx.recv().await.unwrap();
        assert_eq!(voice_chunk.transcript, "Hello there.");
    }
}
