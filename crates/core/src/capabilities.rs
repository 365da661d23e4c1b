//! Backend Capability Contracts
//!
//! The session controller never talks to a concrete speech or model backend.
//! It is handed a [`Capabilities`] bundle at construction and only uses the
//! narrow operations defined here.

use crate::error::BackendError;
use crate::instructions::SystemInstruction;
use async_trait::async_trait;
use std::sync::Arc;
use tokio::sync::mpsc;

/// Events a transcript producer delivers to the running session.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SessionEvent {
    /// A transcription of the participant's speech.
    Transcript { text: String, is_final: bool },
    /// A failure raised by a backend while the session is live.
    Error(BackendError),
}

/// Speech-to-text: turns the participant's audio into transcript events.
#[async_trait]
pub trait SpeechToText: Send + Sync {
    /// Attaches the recognizer to the live audio stream.
    ///
    /// On success the recognizer keeps clones of `events` for as long as it
    /// produces transcripts. Dropping every clone signals end of input.
    async fn attach(&self, events: mpsc::Sender<SessionEvent>) -> Result<(), BackendError>;

    /// Releases the recognizer. Called once when the session terminates.
    async fn close(&self) {}
}

/// Text-to-speech and playback to the connected participant.
#[async_trait]
pub trait TextToSpeech: Send + Sync {
    /// Speaks `text` and returns once playback has completed.
    async fn speak(&self, text: &str) -> Result<(), BackendError>;
}

/// The language model that produces the agent's replies.
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait LanguageModel: Send + Sync {
    /// Generates a reply to `user_turn` under the session's system instruction.
    async fn generate_reply(
        &self,
        instruction: &SystemInstruction,
        user_turn: &str,
    ) -> Result<String, BackendError>;
}

/// Voice-activity detection. Gates which input frames reach the recognizer.
///
/// The controller never drives this directly; recognizers are constructed with one.
pub trait VoiceActivityDetector: Send + Sync {
    fn is_speech(&self, frame: &[u8]) -> bool;
}

/// The realtime room the participant is connected through.
#[async_trait]
pub trait Room: Send + Sync {
    async fn join(&self) -> Result<(), BackendError>;
    async fn leave(&self);
}

/// Every backend a session needs, owned by exactly one controller.
#[derive(Clone)]
pub struct Capabilities {
    pub stt: Arc<dyn SpeechToText>,
    pub tts: Arc<dyn TextToSpeech>,
    pub llm: Arc<dyn LanguageModel>,
    pub room: Arc<dyn Room>,
}
