//! Corpus readers that yield the plain text of every ingestible document.
//!
//! Text extraction from rich formats (PDF) is owned by the caller, which
//! implements [`CorpusReader`]. Two readers ship with the crate:
//! [`StaticCorpus`] for in-memory corpora and [`DirectoryCorpusReader`] for a
//! directory of plain-text files.

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

use async_trait::async_trait;
use tokio::fs;
use tracing::{debug, warn};

use crate::error::{RagError, Result};

/// A source of (identifier, text) pairs for ingestion.
///
/// A document that cannot be read maps to an empty string and is logged by
/// the reader; only failures affecting the whole corpus return `Err`.
#[async_trait]
pub trait CorpusReader: Send + Sync {
    /// Extract the text of every document, keyed by identifier.
    async fn extract_all(&self) -> Result<BTreeMap<String, String>>;
}

/// An in-memory corpus.
#[derive(Debug, Clone, Default)]
pub struct StaticCorpus {
    documents: BTreeMap<String, String>,
}

impl StaticCorpus {
    pub fn new() -> Self {
        Self::default()
    }

    /// Add or replace a document.
    pub fn with_document(mut self, identifier: impl Into<String>, text: impl Into<String>) -> Self {
        self.documents.insert(identifier.into(), text.into());
        self
    }
}

impl<S: Into<String>> FromIterator<(S, S)> for StaticCorpus {
    fn from_iter<I: IntoIterator<Item = (S, S)>>(documents: I) -> Self {
        Self {
            documents: documents.into_iter().map(|(id, text)| (id.into(), text.into())).collect(),
        }
    }
}

#[async_trait]
impl CorpusReader for StaticCorpus {
    async fn extract_all(&self) -> Result<BTreeMap<String, String>> {
        Ok(self.documents.clone())
    }
}

/// Reads every plain-text file (`.txt`, `.md`) directly inside a directory.
///
/// Identifiers are file names. Sub-directories and other extensions are
/// ignored. A file that is unreadable or not UTF-8 yields an empty string.
#[derive(Debug, Clone)]
pub struct DirectoryCorpusReader {
    dir: PathBuf,
}

impl DirectoryCorpusReader {
    const EXTENSIONS: &'static [&'static str] = &["txt", "md"];

    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self { dir: dir.into() }
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    fn is_ingestible(path: &Path) -> bool {
        path.extension()
            .and_then(|ext| ext.to_str())
            .is_some_and(|ext| Self::EXTENSIONS.iter().any(|e| ext.eq_ignore_ascii_case(e)))
    }
}

#[async_trait]
impl CorpusReader for DirectoryCorpusReader {
    async fn extract_all(&self) -> Result<BTreeMap<String, String>> {
        let mut entries = fs::read_dir(&self.dir).await.map_err(|e| RagError::io(&self.dir, e))?;
        let mut texts = BTreeMap::new();

        while let Some(entry) =
            entries.next_entry().await.map_err(|e| RagError::io(&self.dir, e))?
        {
            let path = entry.path();
            let is_file = entry.file_type().await.map(|t| t.is_file()).unwrap_or(false);
            if !is_file || !Self::is_ingestible(&path) {
                continue;
            }
            let Some(name) = path.file_name().and_then(|n| n.to_str()).map(str::to_string) else {
                warn!(path = %path.display(), "skipping file with a non UTF-8 name");
                continue;
            };

            let text = match fs::read_to_string(&path).await {
                Ok(text) => text,
                Err(e) => {
                    warn!(path = %path.display(), error = %e, "failed to read document");
                    String::new()
                }
            };
            texts.insert(name, text);
        }

        debug!(dir = %self.dir.display(), documents = texts.len(), "read corpus directory");
        Ok(texts)
    }
}
