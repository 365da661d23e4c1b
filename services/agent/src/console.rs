//! Console Transport
//!
//! A text stand-in for the realtime voice pipeline: the participant types on
//! stdin and the agent "speaks" on stdout. Handy for exercising a corpus
//! without any speech backend.

use async_trait::async_trait;
use concierge_core::capabilities::{
    Room, SessionEvent, SpeechToText, TextToSpeech, VoiceActivityDetector,
};
use concierge_core::error::{BackendError, ErrorKind};
use std::io::BufRead;
use std::sync::{Arc, Mutex as StdMutex};
use tokio::io::{AsyncWrite, AsyncWriteExt, Stdout};
use tokio::sync::{Mutex, mpsc};
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

const LINE_CHANNEL_SIZE: usize = 16;

/// Treats frames with nothing but whitespace as silence.
#[derive(Debug, Clone, Copy, Default)]
pub struct SilenceGate;

impl VoiceActivityDetector for SilenceGate {
    fn is_speech(&self, frame: &[u8]) -> bool {
        frame.iter().any(|b| !b.is_ascii_whitespace())
    }
}

/// Turns lines of text into final transcripts.
///
/// Lines arrive on a channel so that the blocking terminal read never runs on
/// the async runtime. The channel can only be attached once.
pub struct ConsoleTranscriber {
    lines: StdMutex<Option<mpsc::Receiver<String>>>,
    vad: Arc<dyn VoiceActivityDetector>,
    reader: StdMutex<Option<JoinHandle<()>>>,
}

impl ConsoleTranscriber {
    pub fn new(lines: mpsc::Receiver<String>, vad: Arc<dyn VoiceActivityDetector>) -> Self {
        Self {
            lines: StdMutex::new(Some(lines)),
            vad,
            reader: StdMutex::new(None),
        }
    }

    /// Reads lines from the process's standard input on a dedicated thread.
    pub fn stdin(vad: Arc<dyn VoiceActivityDetector>) -> Self {
        let (tx, rx) = mpsc::channel(LINE_CHANNEL_SIZE);
        std::thread::spawn(move || {
            for line in std::io::stdin().lock().lines() {
                match line {
                    Ok(line) => {
                        if tx.blocking_send(line).is_err() {
                            break;
                        }
                    }
                    Err(e) => {
                        warn!(error = %e, "Failed to read from stdin");
                        break;
                    }
                }
            }
        });
        Self::new(rx, vad)
    }
}

#[async_trait]
impl SpeechToText for ConsoleTranscriber {
    async fn attach(&self, events: mpsc::Sender<SessionEvent>) -> Result<(), BackendError> {
        let mut lines = self
            .lines
            .lock()
            .map_err(|_| BackendError::stt(ErrorKind::AttachFailed, "input lock poisoned"))?
            .take()
            .ok_or_else(|| BackendError::stt(ErrorKind::AttachFailed, "input already attached"))?;

        let vad = self.vad.clone();
        let handle = tokio::spawn(async move {
            while let Some(line) = lines.recv().await {
                if !vad.is_speech(line.as_bytes()) {
                    continue;
                }
                let event = SessionEvent::Transcript {
                    text: line.trim().to_string(),
                    is_final: true,
                };
                if events.send(event).await.is_err() {
                    debug!("Session stopped listening to the console.");
                    return;
                }
            }
            info!("Console input closed.");
        });

        if let Ok(mut reader) = self.reader.lock() {
            *reader = Some(handle);
        }
        Ok(())
    }

    async fn close(&self) {
        let handle = self.reader.lock().ok().and_then(|mut reader| reader.take());
        if let Some(handle) = handle {
            handle.abort();
            debug!("Console reader stopped.");
        }
    }
}

/// Writes every utterance as an `agent: ...` line.
pub struct ConsoleSpeaker<W> {
    output: Mutex<W>,
}

impl ConsoleSpeaker<Stdout> {
    pub fn stdout() -> Self {
        Self::new(tokio::io::stdout())
    }
}

impl<W> ConsoleSpeaker<W>
where
    W: AsyncWrite + Unpin + Send,
{
    pub fn new(output: W) -> Self {
        Self {
            output: Mutex::new(output),
        }
    }

    pub fn into_inner(self) -> W {
        self.output.into_inner()
    }
}

#[async_trait]
impl<W> TextToSpeech for ConsoleSpeaker<W>
where
    W: AsyncWrite + Unpin + Send,
{
    async fn speak(&self, text: &str) -> Result<(), BackendError> {
        let mut output = self.output.lock().await;
        let line = format!("agent: {}\n", text);
        output
            .write_all(line.as_bytes())
            .await
            .map_err(|e| BackendError::tts(ErrorKind::PlaybackFailed, e.to_string()))?;
        output
            .flush()
            .await
            .map_err(|e| BackendError::tts(ErrorKind::PlaybackFailed, e.to_string()))
    }
}

/// The local terminal as a one-participant room.
#[derive(Debug, Default)]
pub struct ConsoleRoom;

#[async_trait]
impl Room for ConsoleRoom {
    async fn join(&self) -> Result<(), BackendError> {
        info!("Participant connected on the console. Type to talk, say 'bye' to leave.");
        Ok(())
    }

    async fn leave(&self) {
        info!("Console room closed.");
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_silence_gate() {
        let gate = SilenceGate;
        assert!(gate.is_speech(b"hello"));
        assert!(gate.is_speech(b"  hi  "));
        assert!(!gate.is_speech(b""));
        assert!(!gate.is_speech(b" \t\r"));
    }

    #[tokio::test]
    async fn test_transcriber_emits_spoken_lines() {
        let (lines_tx, lines_rx) = mpsc::channel(8);
        for line in ["What plans do you have?", "", "   ", "  Bye  "] {
            lines_tx.send(line.to_string()).await.unwrap();
        }
        drop(lines_tx);
        let stt = ConsoleTranscriber::new(lines_rx, Arc::new(SilenceGate));
        let (tx, mut rx) = mpsc::channel(8);

        stt.attach(tx).await.unwrap();

        let mut received = Vec::new();
        while let Some(event) = rx.recv().await {
            received.push(event);
        }
        assert_eq!(
            received,
            vec![
                SessionEvent::Transcript {
                    text: "What plans do you have?".into(),
                    is_final: true
                },
                SessionEvent::Transcript {
                    text: "Bye".into(),
                    is_final: true
                },
            ]
        );
    }

    #[tokio::test]
    async fn test_transcriber_attaches_once() {
        let (_lines_tx, lines_rx) = mpsc::channel(1);
        let stt = ConsoleTranscriber::new(lines_rx, Arc::new(SilenceGate));
        let (tx, _rx) = mpsc::channel(1);

        stt.attach(tx.clone()).await.unwrap();
        let err = stt.attach(tx).await.unwrap_err();
        assert_eq!(err.kind, ErrorKind::AttachFailed);
        stt.close().await;
    }

    #[tokio::test]
    async fn test_speaker_writes_lines() {
        let speaker = ConsoleSpeaker::new(Vec::new());
        speaker.speak("Hello there.").await.unwrap();
        speaker.speak("Goodbye, have a great day!").await.unwrap();

        let written = String::from_utf8(speaker.into_inner()).unwrap();
        assert_eq!(
            written,
            "agent: Hello there.\nagent: Goodbye, have a great day!\n"
        );
    }
}
