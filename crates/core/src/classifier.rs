//! Backend Failure Classification
//!
//! Decides what the session does about a [`BackendError`]: keep listening,
//! retry the failed operation, or close the session.

use crate::error::{Backend, BackendError, ErrorKind};
use std::str::FromStr;
use tracing::{info, warn};

/// What the session should do about a failure.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Disposition {
    /// Log it and return to listening.
    Ignore,
    /// Run the failed operation again.
    Retry,
    /// Close the session.
    Fatal,
}

impl FromStr for Disposition {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_lowercase().as_str() {
            "ignore" => Ok(Disposition::Ignore),
            "retry" => Ok(Disposition::Retry),
            "terminate" | "fatal" => Ok(Disposition::Fatal),
            other => Err(format!(
                "'{}' is not one of 'ignore', 'retry' or 'terminate'",
                other
            )),
        }
    }
}

/// Operator-selected handling for failures the classifier cannot decide on
/// its own.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ErrorPolicy {
    pub on_model_failure: Disposition,
    pub on_playback_failure: Disposition,
    /// How many times a `Retry` disposition re-runs an operation before the
    /// failure is treated as `Ignore`.
    pub max_retries: u32,
}

impl Default for ErrorPolicy {
    fn default() -> Self {
        Self {
            on_model_failure: Disposition::Ignore,
            on_playback_failure: Disposition::Ignore,
            max_retries: 1,
        }
    }
}

/// Maps tagged backend failures to a [`Disposition`].
#[derive(Debug, Clone, Default)]
pub struct ErrorClassifier {
    policy: ErrorPolicy,
}

impl ErrorClassifier {
    pub fn new(policy: ErrorPolicy) -> Self {
        Self { policy }
    }

    pub fn policy(&self) -> &ErrorPolicy {
        &self.policy
    }

    pub fn classify(&self, error: &BackendError) -> Disposition {
        let disposition = match (error.backend, error.kind) {
            // The recognizer hung up on a quiet line. Close without alarm.
            (Backend::Stt, ErrorKind::SilenceTimeout) => Disposition::Fatal,
            (Backend::Llm, ErrorKind::GenerationFailed) => self.policy.on_model_failure,
            (Backend::Tts, ErrorKind::PlaybackFailed) => self.policy.on_playback_failure,
            _ => Disposition::Ignore,
        };

        match disposition {
            Disposition::Fatal => {
                info!(backend = %error.backend, kind = %error.kind, "Backend failure ends the session")
            }
            _ => {
                warn!(error = %error, ?disposition, "Backend failure classified")
            }
        }
        disposition
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_stt_silence_is_fatal() {
        let classifier = ErrorClassifier::default();
        let err = BackendError::stt(ErrorKind::SilenceTimeout, "closed after idle period");
        assert_eq!(classifier.classify(&err), Disposition::Fatal);
    }

    #[test]
    fn test_unrecognized_failures_are_ignored() {
        let classifier = ErrorClassifier::default();
        let cases = [
            BackendError::stt(ErrorKind::ConnectionClosed, "reset by peer"),
            BackendError::stt(ErrorKind::Other, "garbled frame"),
            BackendError::llm(ErrorKind::GenerationFailed, "503"),
            BackendError::tts(ErrorKind::PlaybackFailed, "device busy"),
            BackendError::new(Backend::Room, ErrorKind::Other, "kicked"),
        ];
        for err in cases {
            assert_eq!(classifier.classify(&err), Disposition::Ignore, "{}", err);
        }
    }

    #[test]
    fn test_classification_ignores_message_text() {
        let classifier = ErrorClassifier::default();
        let err = BackendError::stt(ErrorKind::Other, "STT connection closed due to silence");
        assert_eq!(classifier.classify(&err), Disposition::Ignore);
    }

    #[test]
    fn test_policy_overrides_model_and_playback_failures() {
        let classifier = ErrorClassifier::new(ErrorPolicy {
            on_model_failure: Disposition::Retry,
            on_playback_failure: Disposition::Fatal,
            max_retries: 2,
        });
        assert_eq!(
            classifier.classify(&BackendError::llm(ErrorKind::GenerationFailed, "timeout")),
            Disposition::Retry
        );
        assert_eq!(
            classifier.classify(&BackendError::tts(ErrorKind::PlaybackFailed, "timeout")),
            Disposition::Fatal
        );
        // The policy only covers the matching backend.
        assert_eq!(
            classifier.classify(&BackendError::tts(ErrorKind::GenerationFailed, "odd")),
            Disposition::Ignore
        );
    }

    #[test]
    fn test_disposition_from_str() {
        assert_eq!("ignore".parse::<Disposition>(), Ok(Disposition::Ignore));
        assert_eq!(" Retry ".parse::<Disposition>(), Ok(Disposition::Retry));
        assert_eq!("terminate".parse::<Disposition>(), Ok(Disposition::Fatal));
        assert!("explode".parse::<Disposition>().is_err());
    }
}
