//! Document Text Extraction
//!
//! Turns uploaded artifacts (single PDFs or ZIP archives of PDFs) into
//! `ExtractedDocument`s. Every artifact is written into a transient
//! workspace directory that is removed when the extraction call returns,
//! whichever way it returns.
//!
//! Failures are isolated per document: a corrupt PDF inside an archive
//! becomes an `ExtractedDocument` with `error` set and empty text, and its
//! siblings are still extracted.

pub mod archive;
pub mod pdf;

use std::panic::{catch_unwind, AssertUnwindSafe};
use std::path::{Path, PathBuf};

use bytes::Bytes;
use serde::Serialize;
use tempfile::TempDir;
use tracing::{info, warn};

const WORKSPACE_PREFIX: &str = "case-upload-";

pub const DEFAULT_MAX_ARCHIVE_ENTRY_BYTES: u64 = 256 * 1024 * 1024;

/// One uploaded file, as received from the client.
#[derive(Debug, Clone)]
pub struct Artifact {
    pub filename: String,
    pub data: Bytes,
}

impl Artifact {
    pub fn new(filename: impl Into<String>, data: impl Into<Bytes>) -> Self {
        Self {
            filename: filename.into(),
            data: data.into(),
        }
    }

    pub fn kind(&self) -> ArtifactKind {
        ArtifactKind::from_filename(&self.filename)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ArtifactKind {
    Pdf,
    Zip,
    Unsupported,
}

impl ArtifactKind {
    pub fn from_filename(filename: &str) -> Self {
        let lower = filename.to_lowercase();
        if lower.ends_with(".pdf") {
            ArtifactKind::Pdf
        } else if lower.ends_with(".zip") {
            ArtifactKind::Zip
        } else {
            ArtifactKind::Unsupported
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ExtractionError {
    #[error("unsupported file type: {0}")]
    UnsupportedType(String),

    #[error("failed to parse PDF: {0}")]
    PdfParsing(String),

    #[error("failed to read archive: {0}")]
    Archive(String),

    #[error("archive entry escapes the workspace: {0}")]
    UnsafePath(String),

    #[error("workspace I/O failed: {0}")]
    Io(String),

    #[error("extraction aborted unexpectedly: {0}")]
    Fault(String),
}

impl From<std::io::Error> for ExtractionError {
    fn from(err: std::io::Error) -> Self {
        ExtractionError::Io(err.to_string())
    }
}

/// Text extracted from one document.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ExtractedDocument {
    pub name: String,
    pub text: String,
    pub error: Option<ExtractionError>,
}

impl ExtractedDocument {
    pub fn success(name: impl Into<String>, text: String) -> Self {
        Self {
            name: name.into(),
            text,
            error: None,
        }
    }

    pub fn failure(name: impl Into<String>, error: ExtractionError) -> Self {
        Self {
            name: name.into(),
            text: String::new(),
            error: Some(error),
        }
    }

    pub fn is_failed(&self) -> bool {
        self.error.is_some()
    }
}

impl Serialize for ExtractionError {
    fn serialize<S: serde::Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&self.to_string())
    }
}

/// Joins the texts of a batch into the text that corpora are matched against.
pub fn aggregate_text(documents: &[ExtractedDocument]) -> String {
    documents
        .iter()
        .filter(|d| !d.text.is_empty())
        .map(|d| d.text.as_str())
        .collect::<Vec<_>>()
        .join("\n")
}

#[derive(Debug, Clone)]
pub struct TextExtractor {
    workspace_root: Option<PathBuf>,
    max_archive_entry_bytes: u64,
}

impl Default for TextExtractor {
    fn default() -> Self {
        Self {
            workspace_root: None,
            max_archive_entry_bytes: DEFAULT_MAX_ARCHIVE_ENTRY_BYTES,
        }
    }
}

impl TextExtractor {
    pub fn new() -> Self {
        Self::default()
    }

    /// Create transient workspaces under `root` instead of the system temp dir.
    pub fn with_workspace_root(root: impl Into<PathBuf>) -> Self {
        Self {
            workspace_root: Some(root.into()),
            ..Self::default()
        }
    }

    /// Largest number of bytes a single archive entry may unpack to.
    pub fn with_max_archive_entry_bytes(mut self, limit: u64) -> Self {
        self.max_archive_entry_bytes = limit;
        self
    }

    /// Extract every artifact of a batch in order. Never fails; problems
    /// surface as documents with `error` set.
    pub fn extract_batch(&self, artifacts: &[Artifact]) -> Vec<ExtractedDocument> {
        artifacts.iter().flat_map(|a| self.extract(a)).collect()
    }

    /// Async wrapper running the blocking extraction on the blocking pool.
    pub async fn extract_batch_async(&self, artifacts: Vec<Artifact>) -> Vec<ExtractedDocument> {
        let extractor = self.clone();
        let names: Vec<String> = artifacts.iter().map(|a| a.filename.clone()).collect();

        match tokio::task::spawn_blocking(move || extractor.extract_batch(&artifacts)).await {
            Ok(documents) => documents,
            Err(e) => {
                warn!(error = %e, "Extraction task failed");
                names
                    .into_iter()
                    .map(|name| ExtractedDocument::failure(name, ExtractionError::Fault(e.to_string())))
                    .collect()
            }
        }
    }

    pub fn extract(&self, artifact: &Artifact) -> Vec<ExtractedDocument> {
        let kind = artifact.kind();
        if kind == ArtifactKind::Unsupported {
            warn!(filename = %artifact.filename, "Skipping unsupported upload");
            return vec![ExtractedDocument::failure(
                &artifact.filename,
                ExtractionError::UnsupportedType(artifact.filename.clone()),
            )];
        }

        // Dropping the TempDir removes the workspace, also while unwinding.
        let workspace = match self.create_workspace() {
            Ok(dir) => dir,
            Err(e) => {
                warn!(error = %e, "Could not create extraction workspace");
                return vec![ExtractedDocument::failure(&artifact.filename, e)];
            }
        };

        let documents = match kind {
            ArtifactKind::Pdf => vec![extract_saved_pdf(workspace.path(), artifact)],
            ArtifactKind::Zip => {
                archive::extract_archive(workspace.path(), artifact, self.max_archive_entry_bytes)
            }
            ArtifactKind::Unsupported => Vec::new(),
        };

        let failed = documents.iter().filter(|d| d.is_failed()).count();
        info!(
            filename = %artifact.filename,
            documents = documents.len(),
            failed,
            "Artifact extracted"
        );

        if let Err(e) = workspace.close() {
            warn!(error = %e, "Failed to remove extraction workspace");
        }

        documents
    }

    fn create_workspace(&self) -> Result<TempDir, ExtractionError> {
        let mut builder = tempfile::Builder::new();
        builder.prefix(WORKSPACE_PREFIX);
        let dir = match &self.workspace_root {
            Some(root) => builder.tempdir_in(root)?,
            None => builder.tempdir()?,
        };
        Ok(dir)
    }
}

fn extract_saved_pdf(workspace: &Path, artifact: &Artifact) -> ExtractedDocument {
    let path = workspace.join("upload.pdf");
    if let Err(e) = std::fs::write(&path, &artifact.data) {
        return ExtractedDocument::failure(&artifact.filename, e.into());
    }
    extract_isolated(&artifact.filename, &path)
}

/// Extract one PDF from disk, converting any panic inside the parser into an
/// extraction error for this document only.
pub(crate) fn extract_isolated(name: &str, path: &Path) -> ExtractedDocument {
    let outcome = catch_unwind(AssertUnwindSafe(|| pdf::extract_pdf_file(path)));
    match outcome {
        Ok(Ok(text)) => ExtractedDocument::success(name, text),
        Ok(Err(e)) => {
            warn!(document = %name, error = %e, "PDF extraction failed");
            ExtractedDocument::failure(name, e)
        }
        Err(panic) => {
            let message = panic
                .downcast_ref::<&str>()
                .map(|s| s.to_string())
                .or_else(|| panic.downcast_ref::<String>().cloned())
                .unwrap_or_else(|| "parser panicked".to_string());
            warn!(document = %name, error = %message, "PDF parser panicked");
            ExtractedDocument::failure(name, ExtractionError::Fault(message))
        }
    }
}
