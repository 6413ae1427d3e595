use std::path::Path;

use lopdf::Document;

use super::ExtractionError;

/// Extract the text of every page of the PDF at `path`, in page order.
/// Pages that yield no text contribute an empty string.
pub fn extract_pdf_file(path: &Path) -> Result<String, ExtractionError> {
    let doc = Document::load(path).map_err(|e| ExtractionError::PdfParsing(e.to_string()))?;
    extract_document_text(&doc)
}

fn extract_document_text(doc: &Document) -> Result<String, ExtractionError> {
    let pages = doc.get_pages();
    if pages.is_empty() {
        return Err(ExtractionError::PdfParsing("document has no pages".to_string()));
    }

    // get_pages is keyed by page number, so iteration is in reading order
    let texts: Vec<String> = pages
        .keys()
        .map(|page_number| doc.extract_text(&[*page_number]).unwrap_or_default())
        .collect();

    Ok(texts.join("\n"))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::extraction::test_support::make_pdf;
    use std::path::PathBuf;
    use tempfile::TempDir;

    fn write_pdf(bytes: &[u8]) -> (TempDir, PathBuf) {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("doc.pdf");
        std::fs::write(&path, bytes).unwrap();
        (dir, path)
    }

    #[test]
    fn test_pages_are_concatenated_in_order() {
        let (_dir, path) = write_pdf(&make_pdf(&["first page", "second page", "third page"]));
        let text = extract_pdf_file(&path).unwrap();

        let first = text.find("first page").unwrap();
        let second = text.find("second page").unwrap();
        let third = text.find("third page").unwrap();
        assert!(first < second && second < third);
    }

    #[test]
    fn test_invalid_pdf_returns_error() {
        let (_dir, path) = write_pdf(b"not a pdf");
        let result = extract_pdf_file(&path);
        assert!(matches!(result, Err(ExtractionError::PdfParsing(_))));
    }

    #[test]
    fn test_missing_file_returns_error() {
        let dir = tempfile::tempdir().unwrap();
        let result = extract_pdf_file(&dir.path().join("absent.pdf"));
        assert!(result.is_err());
    }
}
