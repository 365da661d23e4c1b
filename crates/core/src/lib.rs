//! Concierge Core
//!
//! The session orchestration core of a voice agent that only answers from a
//! fixed set of operator-supplied documents. Speech, model and transport
//! backends are consumed through the traits in [`capabilities`].

pub mod binding;
pub mod capabilities;
pub mod classifier;
pub mod context;
pub mod error;
pub mod instructions;
pub mod llm_client;
pub mod session;

pub use capabilities::{Capabilities, SessionEvent};
pub use error::{Backend, BackendError, ErrorKind};
pub use session::{SessionConfig, SessionController, SessionSummary, TerminationReason};
