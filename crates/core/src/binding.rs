//! Resilient Speech-to-Text Attachment
//!
//! The recognizer backend is the most volatile piece of the pipeline. Rather
//! than failing the session when it cannot be attached, the binding keeps
//! retrying with a fixed backoff until it succeeds or the session is cancelled.

use crate::capabilities::{SessionEvent, SpeechToText};
use std::time::Duration;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

/// Pause between two attach attempts when none is configured.
pub const DEFAULT_RECONNECT_BACKOFF: Duration = Duration::from_secs(2);

/// How an attach loop ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AttachOutcome {
    /// The recognizer is attached after `attempts` tries.
    Attached { attempts: u32 },
    /// The session was cancelled before the recognizer could be attached.
    GaveUp { attempts: u32 },
}

/// Retries recognizer attachment until it succeeds.
///
/// There is no attempt cap. The only way out of a failing loop is the
/// cancellation token, which the session fires when it terminates.
#[derive(Debug, Clone)]
pub struct ResilientBinding {
    backoff: Duration,
    cancel: CancellationToken,
}

impl ResilientBinding {
    pub fn new(backoff: Duration, cancel: CancellationToken) -> Self {
        Self { backoff, cancel }
    }

    pub async fn attach_with_retry(
        &self,
        stt: &dyn SpeechToText,
        events: mpsc::Sender<SessionEvent>,
    ) -> AttachOutcome {
        let mut attempts = 0u32;
        loop {
            // No attempt may start once the session is over.
            if self.cancel.is_cancelled() {
                info!(attempts, "Session ended before speech-to-text was attached");
                return AttachOutcome::GaveUp { attempts };
            }

            attempts += 1;
            let result = tokio::select! {
                biased;
                _ = self.cancel.cancelled() => {
                    info!(attempts, "Speech-to-text attach abandoned");
                    return AttachOutcome::GaveUp { attempts };
                }
                result = stt.attach(events.clone()) => result,
            };

            match result {
                Ok(()) => {
                    info!(attempts, "Speech-to-text attached");
                    return AttachOutcome::Attached { attempts };
                }
                Err(e) => {
                    warn!(attempt = attempts, error = %e, backoff = ?self.backoff, "Speech-to-text attach failed, retrying");
                    tokio::select! {
                        _ = self.cancel.cancelled() => {
                            info!(attempts, "Speech-to-text reconnect loop stopped");
                            return AttachOutcome::GaveUp { attempts };
                        }
                        _ = tokio::time::sleep(self.backoff) => {}
                    }
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::{BackendError, ErrorKind};
    use async_trait::async_trait;
    use std::sync::atomic::{AtomicU32, Ordering};
    use tokio::time::Instant;

    /// Fails the first `failures` attach calls, then succeeds.
    struct FlakyStt {
        failures: u32,
        calls: AtomicU32,
    }

    impl FlakyStt {
        fn new(failures: u32) -> Self {
            Self {
                failures,
                calls: AtomicU32::new(0),
            }
        }

        fn calls(&self) -> u32 {
            self.calls.load(Ordering::SeqCst)
        }
    }

    #[async_trait]
    impl SpeechToText for FlakyStt {
        async fn attach(&self, _events: mpsc::Sender<SessionEvent>) -> Result<(), BackendError> {
            let call = self.calls.fetch_add(1, Ordering::SeqCst) + 1;
            if call <= self.failures {
                Err(BackendError::stt(ErrorKind::AttachFailed, "backend unavailable"))
            } else {
                Ok(())
            }
        }
    }

    #[tokio::test(start_paused = true)]
    async fn test_retries_until_attached() {
        let stt = FlakyStt::new(3);
        let binding = ResilientBinding::new(DEFAULT_RECONNECT_BACKOFF, CancellationToken::new());
        let (tx, _rx) = mpsc::channel(1);

        let started = Instant::now();
        let outcome = binding.attach_with_retry(&stt, tx).await;

        assert_eq!(outcome, AttachOutcome::Attached { attempts: 4 });
        assert_eq!(stt.calls(), 4);
        assert_eq!(started.elapsed(), Duration::from_secs(6));
    }

    #[tokio::test(start_paused = true)]
    async fn test_first_attempt_success_has_no_delay() {
        let stt = FlakyStt::new(0);
        let binding = ResilientBinding::new(DEFAULT_RECONNECT_BACKOFF, CancellationToken::new());
        let (tx, _rx) = mpsc::channel(1);

        let started = Instant::now();
        let outcome = binding.attach_with_retry(&stt, tx).await;

        assert_eq!(outcome, AttachOutcome::Attached { attempts: 1 });
        assert_eq!(started.elapsed(), Duration::ZERO);
    }

    #[tokio::test(start_paused = true)]
    async fn test_cancellation_stops_the_loop() {
        let stt = std::sync::Arc::new(FlakyStt::new(u32::MAX));
        let cancel = CancellationToken::new();
        let binding = ResilientBinding::new(DEFAULT_RECONNECT_BACKOFF, cancel.clone());
        let (tx, _rx) = mpsc::channel(1);

        let task_stt = stt.clone();
        let handle = tokio::spawn(async move { binding.attach_with_retry(&*task_stt, tx).await });

        tokio::time::sleep(Duration::from_secs(5)).await;
        cancel.cancel();
        let outcome = handle.await.unwrap();

        // Attempts at t=0, 2 and 4 before the cancel at t=5.
        assert_eq!(outcome, AttachOutcome::GaveUp { attempts: 3 });
        tokio::time::sleep(Duration::from_secs(60)).await;
        assert_eq!(stt.calls(), 3);
    }

    #[tokio::test]
    async fn test_no_attempt_after_cancellation() {
        let stt = FlakyStt::new(0);
        let cancel = CancellationToken::new();
        cancel.cancel();
        let binding = ResilientBinding::new(DEFAULT_RECONNECT_BACKOFF, cancel);
        let (tx, _rx) = mpsc::channel(1);

        let outcome = binding.attach_with_retry(&stt, tx).await;
        assert_eq!(outcome, AttachOutcome::GaveUp { attempts: 0 });
        assert_eq!(stt.calls(), 0);
    }
}
