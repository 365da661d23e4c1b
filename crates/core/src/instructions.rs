//! System Instruction Composition
//!
//! Renders the fixed behavioral policy around the grounding corpus. The result
//! is handed to the language model once per session and never changes.

use crate::context::Corpus;
use std::fmt;
use std::sync::Arc;

/// The phrase the agent must use when a question is not covered by the corpus.
pub const REFUSAL_PHRASE: &str = "I don't have that information";

/// Role the agent plays when the operator does not configure one.
pub const DEFAULT_ROLE: &str = "sales agent";

/// The immutable system instruction for one session.
///
/// Cloning is cheap; all clones share the same text.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SystemInstruction(Arc<str>);

impl SystemInstruction {
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for SystemInstruction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Builds system instructions for a given agent role.
#[derive(Debug, Clone)]
pub struct InstructionComposer {
    role: String,
}

impl Default for InstructionComposer {
    fn default() -> Self {
        Self::new(DEFAULT_ROLE)
    }
}

impl InstructionComposer {
    pub fn new(role: impl Into<String>) -> Self {
        Self { role: role.into() }
    }

    /// Renders the voice constraint, the corpus and the closed-world policy,
    /// in that order.
    pub fn compose(&self, corpus: &Corpus) -> SystemInstruction {
        let role = &self.role;
        let text = format!(
            "You are a {role} communicating by voice. All text that you return \
will be spoken aloud, so don't use things like bullets, slashes, markdown, or any \
other punctuation that cannot be pronounced.

# Available Information

You have access to the following information:

{corpus}

# Critical Rules

- ONLY use information from the available information above
- If asked about something not in the available information, say \"{REFUSAL_PHRASE}\"
- DO NOT make up prices, specifications, features, or any other details
- Quote directly from the available information when possible
- Act as a {role} but only use the provided information
"
        );
        SystemInstruction(Arc::from(text))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::context::{Document, EMPTY_CORPUS};

    fn sample_corpus() -> Corpus {
        Corpus::from_documents(&[Document {
            name: "plans.txt".into(),
            text: "The Pro plan costs 49 dollars per month.".into(),
        }])
    }

    #[test]
    fn test_compose_is_deterministic() {
        let composer = InstructionComposer::default();
        let corpus = sample_corpus();
        assert_eq!(composer.compose(&corpus), composer.compose(&corpus));
    }

    #[test]
    fn test_sections_appear_in_order() {
        let instruction = InstructionComposer::default().compose(&sample_corpus());
        let text = instruction.as_str();

        let voice = text.find("spoken aloud").unwrap();
        let info = text.find("# Available Information").unwrap();
        let corpus = text.find("=== plans.txt ===").unwrap();
        let rules = text.find("# Critical Rules").unwrap();

        assert!(voice < info);
        assert!(info < corpus);
        assert!(corpus < rules);
        assert!(text.contains("The Pro plan costs 49 dollars per month."));
        assert!(text.contains(REFUSAL_PHRASE));
    }

    #[test]
    fn test_role_is_rendered() {
        let instruction = InstructionComposer::new("support agent").compose(&sample_corpus());
        assert!(instruction.as_str().starts_with("You are a support agent"));
        assert!(!instruction.as_str().contains(DEFAULT_ROLE));
    }

    #[test]
    fn test_placeholder_corpus_is_embedded() {
        let corpus = Corpus::from_documents(&[]);
        let instruction = InstructionComposer::default().compose(&corpus);
        assert!(instruction.as_str().contains(EMPTY_CORPUS));
    }
}
