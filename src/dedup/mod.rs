//! # Content Deduplication Module
//!
//! Converted pages are split into segments on blank lines. Each segment is
//! fingerprinted and checked against the run's shared `HashStore`; only the
//! segments seen for the first time are written out. Navigation, footers and
//! other boilerplate shared by many pages therefore land in exactly one
//! document, while each page still keeps its own content.
//!
//! ## Key Components
//!
//! - `ContentDeduplicator`: filters a document against the store and writes the survivors
//! - `DedupMode`: best-effort `exists` + `add`, or one atomic `insert_if_absent` per segment
//! - `document_key` / `sanitize_filename`: derive the output filename from the page URL
//! - `convert`: HTML to markdown conversion feeding the deduplicator

mod convert;
pub mod error;

pub use convert::convert;
pub use error::DedupError;

use std::path::{Path, PathBuf};
use std::sync::Arc;
use tracing::{debug, info, warn};
use url::Url;

use crate::store::{Fingerprint, HashStore};

/// Boundary between two segments of a markdown document
pub const SEGMENT_SEPARATOR: &str = "\n\n";

/// Default extension of written documents
pub const DEFAULT_EXTENSION: &str = ".md";

/// How segment novelty is decided against the store
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum DedupMode {
    /// `exists` then `add`. Two tasks racing on the same new segment may both keep it.
    #[default]
    BestEffort,

    /// One atomic `insert_if_absent` per segment
    Strict,
}

/// Result of deduplicating one document
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DedupOutcome {
    /// At least one segment was new and the document was written
    Written {
        /// Destination file
        path: PathBuf,
        /// Segments kept
        kept: usize,
        /// Segments dropped as duplicates
        dropped: usize,
    },

    /// Every segment had been seen before; nothing was written
    Duplicate {
        /// Segments dropped as duplicates
        dropped: usize,
    },
}

/// Surviving segments of a document, joined back together
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Synthesized {
    /// Novel segments joined with `SEGMENT_SEPARATOR`
    pub content: String,
    /// Number of segments kept
    pub kept: usize,
    /// Number of segments dropped
    pub dropped: usize,
}

/// Filters documents against the shared fingerprint store and writes what is new
pub struct ContentDeduplicator {
    store: Arc<dyn HashStore>,
    output_dir: PathBuf,
    extension: String,
    mode: DedupMode,
}

impl ContentDeduplicator {
    /// Create a deduplicator writing into `output_dir`
    pub fn new(store: Arc<dyn HashStore>, output_dir: impl Into<PathBuf>) -> Self {
        Self {
            store,
            output_dir: output_dir.into(),
            extension: DEFAULT_EXTENSION.to_string(),
            mode: DedupMode::default(),
        }
    }

    /// Set the novelty mode
    pub fn with_mode(mut self, mode: DedupMode) -> Self {
        self.mode = mode;
        self
    }

    /// Set the extension appended to written documents
    pub fn with_extension(mut self, extension: impl Into<String>) -> Self {
        self.extension = extension.into();
        self
    }

    /// Directory documents are written into
    pub fn output_dir(&self) -> &Path {
        &self.output_dir
    }

    /// Destination path for a document key
    pub fn destination(&self, key: &str) -> PathBuf {
        self.output_dir
            .join(format!("{}{}", sanitize_filename(key), self.extension))
    }

    /// Keep only the segments of `content` the store has not seen, in order
    pub async fn synthesize(&self, content: &str) -> Synthesized {
        let mut unique = Vec::new();
        let mut dropped = 0;

        for segment in content.split(SEGMENT_SEPARATOR) {
            if self.is_novel(segment).await {
                unique.push(segment);
            } else {
                dropped += 1;
            }
        }

        Synthesized {
            kept: unique.len(),
            content: unique.join(SEGMENT_SEPARATOR),
            dropped,
        }
    }

    /// Deduplicate a converted document and write what survives
    pub async fn process(&self, key: &str, content: &str) -> Result<DedupOutcome, DedupError> {
        let synthesized = self.synthesize(content).await;

        if synthesized.kept == 0 {
            debug!("All {} segments of {} already seen", synthesized.dropped, key);
            return Ok(DedupOutcome::Duplicate {
                dropped: synthesized.dropped,
            });
        }

        let path = self.destination(key);
        tokio::fs::write(&path, synthesized.content.as_bytes())
            .await
            .map_err(|source| DedupError::Write {
                path: path.clone(),
                source,
            })?;

        info!("Successfully wrote {}", path.display());
        Ok(DedupOutcome::Written {
            path,
            kept: synthesized.kept,
            dropped: synthesized.dropped,
        })
    }

    /// Record the segment and report whether it had been seen before.
    /// Store failures count as unseen so content is kept rather than lost.
    async fn is_novel(&self, segment: &str) -> bool {
        let fingerprint = Fingerprint::of(segment);

        match self.mode {
            DedupMode::BestEffort => {
                match self.store.exists(&fingerprint).await {
                    Ok(true) => return false,
                    Ok(false) => {}
                    Err(e) => warn!("Failed to check hash existence: {}", e),
                }
                if let Err(e) = self.store.add(&fingerprint).await {
                    warn!("Failed to insert hash: {}", e);
                }
                true
            }
            DedupMode::Strict => match self.store.insert_if_absent(&fingerprint).await {
                Ok(inserted) => inserted,
                Err(e) => {
                    warn!("Failed to insert hash: {}", e);
                    true
                }
            },
        }
    }
}

/// Document key of a page: its host followed by its path
pub fn document_key(url: &Url) -> Result<String, DedupError> {
    let host = url
        .host_str()
        .ok_or_else(|| DedupError::InvalidUrl(url.to_string()))?;
    Ok(format!("{}{}", host, url.path()))
}

/// Turn a document key into a filename
pub fn sanitize_filename(key: &str) -> String {
    if key.is_empty() {
        return "index".to_string();
    }
    key.chars()
        .map(|c| match c {
            '/' | '\\' | ':' | '*' | '?' | '"' | '<' | '>' | '|' => '_',
            c => c,
        })
        .collect()
}
