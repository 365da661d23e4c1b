//! Backend Failure Types
//!
//! Every capability implementation translates its own failures into a
//! [`BackendError`] before handing them to the session. The classifier only
//! ever looks at the tags carried here, never at the message text.

use std::fmt;

/// The external capability a failure originated from.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Backend {
    Stt,
    Tts,
    Llm,
    Room,
}

impl fmt::Display for Backend {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Backend::Stt => write!(f, "stt"),
            Backend::Tts => write!(f, "tts"),
            Backend::Llm => write!(f, "llm"),
            Backend::Room => write!(f, "room"),
        }
    }
}

/// The closed set of failure kinds a backend binding may report.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorKind {
    /// The backend hung up because nobody spoke for too long.
    SilenceTimeout,
    /// The backend connection dropped for any other reason.
    ConnectionClosed,
    /// The capability could not be attached to the live session.
    AttachFailed,
    /// The language model did not produce a reply.
    GenerationFailed,
    /// An utterance could not be played back.
    PlaybackFailed,
    Other,
}

impl fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            ErrorKind::SilenceTimeout => "silence timeout",
            ErrorKind::ConnectionClosed => "connection closed",
            ErrorKind::AttachFailed => "attach failed",
            ErrorKind::GenerationFailed => "generation failed",
            ErrorKind::PlaybackFailed => "playback failed",
            ErrorKind::Other => "other",
        };
        f.write_str(name)
    }
}

/// A tagged failure raised by one of the session's backend capabilities.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("{backend} backend error ({kind}): {message}")]
pub struct BackendError {
    pub backend: Backend,
    pub kind: ErrorKind,
    pub message: String,
}

impl BackendError {
    pub fn new(backend: Backend, kind: ErrorKind, message: impl Into<String>) -> Self {
        Self {
            backend,
            kind,
            message: message.into(),
        }
    }

    pub fn stt(kind: ErrorKind, message: impl Into<String>) -> Self {
        Self::new(Backend::Stt, kind, message)
    }

    pub fn tts(kind: ErrorKind, message: impl Into<String>) -> Self {
        Self::new(Backend::Tts, kind, message)
    }

    pub fn llm(kind: ErrorKind, message: impl Into<String>) -> Self {
        Self::new(Backend::Llm, kind, message)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_backend_error_display() {
        let err = BackendError::stt(ErrorKind::SilenceTimeout, "socket idle for 30s");
        assert_eq!(
            err.to_string(),
            "stt backend error (silence timeout): socket idle for 30s"
        );

        let err = BackendError::new(Backend::Room, ErrorKind::Other, "kicked");
        assert_eq!(err.to_string(), "room backend error (other): kicked");
    }
}
