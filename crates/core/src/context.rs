//! Grounding Corpus Loader
//!
//! Reads the operator-supplied documents from a single directory and joins
//! them into one delimited corpus string. Every document is wrapped with a
//! `=== <file name> ===` header so the model can tell where a fact came from.

use anyhow::{Context, Result};
use std::fmt;
use std::fs;
use std::path::Path;
use tracing::{debug, info, warn};

/// Directory the agent reads its documents from when none is configured.
pub const DEFAULT_CONTEXT_DIR: &str = "context";

/// Placeholder corpus used when no document could be read.
pub const EMPTY_CORPUS: &str = "No content available";

/// A single document read from the context directory.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Document {
    pub name: String,
    pub text: String,
}

/// The concatenated, provenance-tagged text of every loaded document.
///
/// A corpus is never empty: when nothing could be read it holds [`EMPTY_CORPUS`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Corpus(String);

impl Corpus {
    /// Joins the documents in the order given.
    pub fn from_documents(documents: &[Document]) -> Self {
        let mut joined = String::new();
        for doc in documents {
            joined.push_str(&format!("\n=== {} ===\n{}\n", doc.name, doc.text));
        }
        let trimmed = joined.trim();
        if trimmed.is_empty() {
            Self(EMPTY_CORPUS.to_string())
        } else {
            Self(trimmed.to_string())
        }
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// True when no document contributed any text.
    pub fn is_placeholder(&self) -> bool {
        self.0 == EMPTY_CORPUS
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }
}

impl fmt::Display for Corpus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Loads every readable text file directly under `dir` into a [`Corpus`].
///
/// The directory is created if it does not exist yet. When `topic` is given,
/// only files whose name contains it (case-insensitively) are read. Files that
/// cannot be read or are not valid UTF-8 are skipped; they never abort the load.
///
/// Documents are ordered by file name so that the output is reproducible.
pub fn load_context(dir: &Path, topic: Option<&str>) -> Result<Corpus> {
    fs::create_dir_all(dir)
        .with_context(|| format!("Failed to create context directory {}", dir.display()))?;

    let filter = topic
        .map(|t| t.trim().to_lowercase())
        .filter(|t| !t.is_empty());

    let mut documents = read_documents(dir, filter.as_deref())?;
    documents.sort_by(|a, b| a.name.cmp(&b.name));

    let corpus = Corpus::from_documents(&documents);
    info!(
        dir = %dir.display(),
        topic = filter.as_deref().unwrap_or("*"),
        documents = documents.len(),
        chars = corpus.len(),
        "Loaded grounding context"
    );
    Ok(corpus)
}

fn read_documents(dir: &Path, filter: Option<&str>) -> Result<Vec<Document>> {
    let entries = fs::read_dir(dir)
        .with_context(|| format!("Failed to list context directory {}", dir.display()))?;

    let mut documents = Vec::new();
    for entry in entries {
        let entry = match entry {
            Ok(entry) => entry,
            Err(e) => {
                warn!(error = %e, "Skipping unreadable directory entry");
                continue;
            }
        };
        let path = entry.path();
        if !path.is_file() {
            continue;
        }

        let name = entry.file_name().to_string_lossy().into_owned();
        if let Some(filter) = filter {
            if !name.to_lowercase().contains(filter) {
                continue;
            }
        }

        let bytes = match fs::read(&path) {
            Ok(bytes) => bytes,
            Err(e) => {
                warn!(file = %name, error = %e, "Skipping unreadable document");
                continue;
            }
        };
        match String::from_utf8(bytes) {
            Ok(text) => documents.push(Document { name, text }),
            Err(_) => debug!(file = %name, "Skipping document that is not valid UTF-8"),
        }
    }
    Ok(documents)
}
