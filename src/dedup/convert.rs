//! HTML to markdown conversion

use html2md::parse_html;

use crate::dedup::error::DedupError;

/// Convert a raw response body to markdown
///
/// Bytes that are not valid UTF-8 are replaced. A body that converts to
/// nothing but whitespace is reported as an error.
pub fn convert(body: &[u8]) -> Result<String, DedupError> {
    let html = String::from_utf8_lossy(body);
    let markdown = parse_html(&html);

    if markdown.trim().is_empty() {
        return Err(DedupError::Convert(format!(
            "no text in {} byte body",
            body.len()
        )));
    }
    Ok(markdown)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_convert_keeps_text() {
        let markdown = convert(b"<html><body><h1>Title</h1><p>Hello world</p></body></html>")
            .unwrap();

        assert!(markdown.contains("Title"));
        assert!(markdown.contains("Hello world"));
    }

    #[test]
    fn test_convert_rejects_empty_body() {
        assert!(matches!(convert(b""), Err(DedupError::Convert(_))));
        assert!(matches!(
            convert(b"<html><body></body></html>"),
            Err(DedupError::Convert(_))
        ));
    }
}
