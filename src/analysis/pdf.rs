use super::{AnalysisError, MAX_PDF_PAGES};

/// Text of the first pages, each under a `Page N:` header.
pub(super) fn extract_pdf(bytes: &[u8]) -> Result<String, AnalysisError> {
    let document = lopdf::Document::load_mem(bytes)?;
    let pages: Vec<u32> = document.get_pages().keys().copied().take(MAX_PDF_PAGES).collect();

    let mut sections = Vec::with_capacity(pages.len());
    for (index, page) in pages.iter().enumerate() {
        let text = match document.extract_text(&[*page]) {
            Ok(text) => text,
            Err(err) => {
                tracing::debug!(page, error = %err, "no extractable text on pdf page");
                String::new()
            }
        };
        sections.push(format!("Page {}:\n{text}", index + 1));
    }
    Ok(sections.join("\n\n"))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_corrupt_pdf_is_an_error() {
        assert!(extract_pdf(b"%PDF-1.7\nthis is not really a pdf").is_err());
    }

    #[test]
    fn test_empty_input_is_an_error() {
        assert!(extract_pdf(b"").is_err());
    }
}
