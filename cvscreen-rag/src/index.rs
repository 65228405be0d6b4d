//! Persisted vector index using cosine similarity.
//!
//! A [`VectorIndex`] holds every [`EmbeddedPassage`] of one ingestion run. On
//! disk it is a directory containing a single `index.json` manifest. Saving
//! stages the new manifest next to the live one and swaps it in with a rename,
//! so readers only ever observe the previous index or the new one.

use std::cmp::Ordering;
use std::io::ErrorKind;
use std::path::Path;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tokio::fs;
use tokio::io::AsyncWriteExt;
use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::document::{EmbeddedPassage, SearchResult};
use crate::error::{RagError, Result};

/// File name of the manifest inside an index directory.
pub const MANIFEST_FILE: &str = "index.json";

const FORMAT_VERSION: u32 = 1;

/// An immutable nearest-neighbour index over embedded passages.
///
/// # Example
///
/// ```rust,ignore
/// use cvscreen_rag::VectorIndex;
///
/// let index = VectorIndex::build(entries, "models/text-embedding-004")?;
/// index.save("cv_index").await?;
/// let index = VectorIndex::load("cv_index").await?;
/// let hits = index.search(&query_vector, 4)?;
/// ```
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct VectorIndex {
    format_version: u32,
    embedding_model: String,
    dimensions: usize,
    created_at: DateTime<Utc>,
    entries: Vec<EmbeddedPassage>,
}

impl VectorIndex {
    /// Build an index in memory from embedded passages.
    ///
    /// # Errors
    ///
    /// - [`RagError::EmptyIndex`] if `entries` is empty
    /// - [`RagError::InvalidArgument`] if a vector is empty or vectors differ in length
    pub fn build(
        entries: Vec<EmbeddedPassage>,
        embedding_model: impl Into<String>,
    ) -> Result<Self> {
        let Some(first) = entries.first() else {
            return Err(RagError::EmptyIndex);
        };
        let dimensions = first.vector.len();
        if dimensions == 0 {
            return Err(RagError::InvalidArgument("embedding vectors must not be empty".into()));
        }
        if let Some(bad) = entries.iter().find(|e| e.vector.len() != dimensions) {
            return Err(RagError::InvalidArgument(format!(
                "embedding for a passage of '{}' has {} dimensions, expected {dimensions}",
                bad.passage.source_identifier,
                bad.vector.len()
            )));
        }

        Ok(Self {
            format_version: FORMAT_VERSION,
            embedding_model: embedding_model.into(),
            dimensions,
            created_at: Utc::now(),
            entries,
        })
    }

    /// Persist the index into `dir`, replacing whatever index it held.
    ///
    /// The directory is created if missing. Everything in it other than the
    /// live manifest is removed before the new manifest is renamed into place.
    pub async fn save(&self, dir: impl AsRef<Path>) -> Result<()> {
        let dir = dir.as_ref();
        fs::create_dir_all(dir).await.map_err(|e| RagError::io(dir, e))?;

        let bytes = serde_json::to_vec(self)?;
        let staging_name = format!(".{MANIFEST_FILE}.{}.tmp", Uuid::new_v4());
        let staging = dir.join(&staging_name);

        if let Err(e) = write_synced(&staging, &bytes).await {
            let _ = fs::remove_file(&staging).await;
            return Err(RagError::io(&staging, e));
        }

        if let Err(e) = clear_dir_except(dir, &[MANIFEST_FILE, staging_name.as_str()]).await {
            let _ = fs::remove_file(&staging).await;
            return Err(e);
        }

        let manifest = dir.join(MANIFEST_FILE);
        fs::rename(&staging, &manifest).await.map_err(|e| RagError::io(&manifest, e))?;

        info!(
            index_dir = %dir.display(),
            entries = self.entries.len(),
            dimensions = self.dimensions,
            "saved vector index"
        );
        Ok(())
    }

    /// Load a previously saved index from `dir`.
    ///
    /// # Errors
    ///
    /// Returns [`RagError::IndexNotFound`] if `dir` or its manifest does not
    /// exist, or if the manifest is not a recognisable index.
    pub async fn load(dir: impl AsRef<Path>) -> Result<Self> {
        let dir = dir.as_ref();
        let manifest = dir.join(MANIFEST_FILE);

        let bytes = match fs::read(&manifest).await {
            Ok(bytes) => bytes,
            Err(e) if e.kind() == ErrorKind::NotFound => {
                return Err(RagError::IndexNotFound {
                    path: dir.to_path_buf(),
                    message: "no index has been built yet; run ingest first".into(),
                });
            }
            Err(e) => return Err(RagError::io(&manifest, e)),
        };

        let unrecognised =
            |message: String| RagError::IndexNotFound { path: dir.to_path_buf(), message };

        let index: VectorIndex = serde_json::from_slice(&bytes).map_err(|e| {
            warn!(index_dir = %dir.display(), error = %e, "unreadable index manifest");
            unrecognised(format!("unrecognisable index manifest: {e}"))
        })?;

        if index.format_version != FORMAT_VERSION {
            return Err(unrecognised(format!(
                "unsupported index format version {}",
                index.format_version
            )));
        }
        if index.entries.is_empty()
            || index.entries.iter().any(|e| e.vector.len() != index.dimensions)
        {
            return Err(unrecognised("index manifest is inconsistent".into()));
        }

        debug!(index_dir = %dir.display(), entries = index.entries.len(), "loaded vector index");
        Ok(index)
    }

    /// Whether `dir` currently holds an index manifest.
    pub async fn exists(dir: impl AsRef<Path>) -> bool {
        fs::try_exists(dir.as_ref().join(MANIFEST_FILE)).await.unwrap_or(false)
    }

    /// Return at most `k` passages ranked by descending cosine similarity.
    ///
    /// Ties keep insertion order.
    ///
    /// # Errors
    ///
    /// Returns [`RagError::InvalidArgument`] if `k == 0` or the query vector's
    /// length differs from the index dimensionality.
    pub fn search(&self, query: &[f32], k: usize) -> Result<Vec<SearchResult>> {
        if k == 0 {
            return Err(RagError::InvalidArgument("k must be greater than zero".into()));
        }
        if query.len() != self.dimensions {
            return Err(RagError::InvalidArgument(format!(
                "query vector has {} dimensions, index has {}",
                query.len(),
                self.dimensions
            )));
        }

        let mut scored: Vec<(usize, f32)> = self
            .entries
            .iter()
            .enumerate()
            .map(|(i, entry)| (i, cosine_similarity(&entry.vector, query)))
            .collect();

        // `sort_by` is stable, so equal scores keep insertion order.
        scored.sort_by(|a, b| b.1.partial_cmp(&a.1).unwrap_or(Ordering::Equal));
        scored.truncate(k);

        Ok(scored
            .into_iter()
            .map(|(i, score)| SearchResult { passage: self.entries[i].passage.clone(), score })
            .collect())
    }

    pub fn embedding_model(&self) -> &str {
        &self.embedding_model
    }

    pub fn dimensions(&self) -> usize {
        self.dimensions
    }

    pub fn created_at(&self) -> DateTime<Utc> {
        self.created_at
    }

    pub fn entries(&self) -> &[EmbeddedPassage] {
        &self.entries
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

/// Compute cosine similarity between two vectors.
///
/// Returns 0.0 if either vector has zero magnitude.
fn cosine_similarity(a: &[f32], b: &[f32]) -> f32 {
    let dot: f32 = a.iter().zip(b.iter()).map(|(x, y)| x * y).sum();
    let norm_a: f32 = a.iter().map(|x| x * x).sum::<f32>().sqrt();
    let norm_b: f32 = b.iter().map(|x| x * x).sum::<f32>().sqrt();
    if norm_a == 0.0 || norm_b == 0.0 {
        return 0.0;
    }
    dot / (norm_a * norm_b)
}

async fn write_synced(path: &Path, bytes: &[u8]) -> std::io::Result<()> {
    let mut file = fs::File::create(path).await?;
    file.write_all(bytes).await?;
    file.sync_all().await
}

async fn clear_dir_except(dir: &Path, keep: &[&str]) -> Result<()> {
    let mut entries = fs::read_dir(dir).await.map_err(|e| RagError::io(dir, e))?;
    while let Some(entry) = entries.next_entry().await.map_err(|e| RagError::io(dir, e))? {
        if entry.file_name().to_str().is_some_and(|name| keep.contains(&name)) {
            continue;
        }
        let path = entry.path();
        let file_type = entry.file_type().await.map_err(|e| RagError::io(&path, e))?;
        let removed = if file_type.is_dir() {
            fs::remove_dir_all(&path).await
        } else {
            fs::remove_file(&path).await
        };
        removed.map_err(|e| RagError::io(&path, e))?;
    }
    Ok(())
}
