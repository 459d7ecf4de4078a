use super::ExtractError;

/// Extracts PDF text page by page, separated by explicit page markers
/// so per-page references survive into the analysis.
pub fn pdf_to_marked_text(bytes: &[u8]) -> Result<String, ExtractError> {
    let raw = pdf_extract::extract_text_from_mem(bytes)
        .map_err(|e| ExtractError::Pdf(e.to_string()))?;

    Ok(mark_pages(&raw))
}

/// Splits extracted text on form feeds and prefixes each non-empty page
/// with `--- Page N ---`.
fn mark_pages(raw: &str) -> String {
    let mut sections = Vec::new();

    for (i, page) in raw.split('\x0c').enumerate() {
        let page = page.trim();
        if page.is_empty() {
            continue;
        }
        sections.push(format!("--- Page {} ---\n{}", i + 1, page));
    }

    sections.join("\n\n")
}
