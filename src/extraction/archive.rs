use std::fs::{self, File};
use std::io::{self, Read};
use std::path::Path;

use tracing::{debug, warn};
use zip::ZipArchive;

use super::{extract_isolated, Artifact, ArtifactKind, ExtractedDocument, ExtractionError};

const MACOS_METADATA_DIR: &str = "__MACOSX/";

/// Unpack a ZIP upload into `workspace` and extract every PDF entry.
/// Non-PDF entries are ignored. A broken archive yields a single failed
/// document named after the upload. Entries unpacking to more than
/// `max_entry_bytes` are reported as failed without being parsed.
pub fn extract_archive(
    workspace: &Path,
    artifact: &Artifact,
    max_entry_bytes: u64,
) -> Vec<ExtractedDocument> {
    let saved = workspace.join("upload.zip");
    if let Err(e) = fs::write(&saved, &artifact.data) {
        return vec![ExtractedDocument::failure(&artifact.filename, e.into())];
    }

    let mut archive = match File::open(&saved)
        .map_err(ExtractionError::from)
        .and_then(|f| ZipArchive::new(f).map_err(|e| ExtractionError::Archive(e.to_string())))
    {
        Ok(archive) => archive,
        Err(e) => {
            warn!(filename = %artifact.filename, error = %e, "Unreadable archive");
            return vec![ExtractedDocument::failure(&artifact.filename, e)];
        }
    };

    let unpack_dir = workspace.join("entries");
    if let Err(e) = fs::create_dir_all(&unpack_dir) {
        return vec![ExtractedDocument::failure(&artifact.filename, e.into())];
    }

    let mut documents = Vec::new();
    for index in 0..archive.len() {
        let mut entry = match archive.by_index(index) {
            Ok(entry) => entry,
            Err(e) => {
                documents.push(ExtractedDocument::failure(
                    format!("{}#{}", artifact.filename, index),
                    ExtractionError::Archive(e.to_string()),
                ));
                continue;
            }
        };

        let name = entry.name().to_string();
        if entry.is_dir()
            || name.starts_with(MACOS_METADATA_DIR)
            || ArtifactKind::from_filename(&name) != ArtifactKind::Pdf
        {
            debug!(entry = %name, "Ignoring archive entry");
            continue;
        }

        let relative = match entry.enclosed_name() {
            Some(path) => path,
            None => {
                warn!(entry = %name, "Archive entry escapes workspace");
                documents.push(ExtractedDocument::failure(&name, ExtractionError::UnsafePath(name.clone())));
                continue;
            }
        };

        let target = unpack_dir.join(relative);
        let unpacked = target
            .parent()
            .map(fs::create_dir_all)
            .unwrap_or(Ok(()))
            .and_then(|_| File::create(&target))
            .and_then(|mut out| {
                let mut limited = entry.by_ref().take(max_entry_bytes.saturating_add(1));
                io::copy(&mut limited, &mut out)
            });

        match unpacked {
            Ok(written) if written > max_entry_bytes => {
                warn!(entry = %name, limit = max_entry_bytes, "Archive entry exceeds size limit");
                documents.push(ExtractedDocument::failure(
                    &name,
                    ExtractionError::Archive(format!("entry larger than {} bytes", max_entry_bytes)),
                ));
            }
            Ok(_) => documents.push(extract_isolated(&name, &target)),
            Err(e) => {
                warn!(entry = %name, error = %e, "Failed to unpack archive entry");
                documents.push(ExtractedDocument::failure(&name, ExtractionError::Archive(e.to_string())));
            }
        }
    }

    documents
}
