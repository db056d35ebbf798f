//! Raw file handling: extension allow-list, text decoding, PDF extraction.

use tracing::warn;

use docvault_core::{Error, Result};

/// Extensions accepted for uploaded files.
pub const ALLOWED_EXTENSIONS: [&str; 2] = [".txt", ".pdf"];

/// Supported file types for text extraction.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FileType {
    PlainText,
    Pdf,
}

impl FileType {
    /// Detect file type from an extension such as `.pdf`.
    pub fn from_extension(ext: &str) -> Option<Self> {
        match ext.to_ascii_lowercase().as_str() {
            ".txt" => Some(Self::PlainText),
            ".pdf" => Some(Self::Pdf),
            _ => None,
        }
    }
}

/// Lowercased extension of `name` including the dot, or an empty string.
pub fn file_extension(name: &str) -> String {
    std::path::Path::new(name)
        .extension()
        .and_then(|e| e.to_str())
        .map(|e| format!(".{}", e.to_ascii_lowercase()))
        .unwrap_or_default()
}

/// Reject names whose extension is not on the allow-list.
pub fn check_allowed(name: &str) -> Result<FileType> {
    let ext = file_extension(name);
    FileType::from_extension(&ext).ok_or_else(|| {
        Error::UnsupportedContent(format!(
            "Only files with extensions {:?} supported. {} is invalid",
            ALLOWED_EXTENSIONS, name
        ))
    })
}

/// Decode text bytes, sniffing UTF-8/UTF-16 from the BOM or the NUL byte pattern.
pub fn decode_text(bytes: &[u8]) -> String {
    if let Some(rest) = bytes.strip_prefix(&[0xEF, 0xBB, 0xBF]) {
        return decode_utf8(rest);
    }
    if let Some(rest) = bytes.strip_prefix(&[0xFF, 0xFE]) {
        return decode_utf16(rest, u16::from_le_bytes);
    }
    if let Some(rest) = bytes.strip_prefix(&[0xFE, 0xFF]) {
        return decode_utf16(rest, u16::from_be_bytes);
    }
    // No BOM: ASCII text in UTF-16 leaves every other byte zero.
    if bytes.len() >= 2 {
        match (bytes[0], bytes[1]) {
            (0, b) if b != 0 => return decode_utf16(bytes, u16::from_be_bytes),
            (a, 0) if a != 0 && bytes.get(2).map_or(true, |&c| c != 0) => {
                return decode_utf16(bytes, u16::from_le_bytes)
            }
            _ => {}
        }
    }
    decode_utf8(bytes)
}

fn decode_utf8(bytes: &[u8]) -> String {
    match std::str::from_utf8(bytes) {
        Ok(s) => s.to_string(),
        Err(e) => {
            warn!("Invalid UTF-8 at byte {}, decoding lossily", e.valid_up_to());
            String::from_utf8_lossy(bytes).into_owned()
        }
    }
}

fn decode_utf16(bytes: &[u8], read: fn([u8; 2]) -> u16) -> String {
    let units: Vec<u16> = bytes.chunks_exact(2).map(|b| read([b[0], b[1]])).collect();
    String::from_utf16_lossy(&units)
}

/// Extract text from PDF bytes.
pub fn extract_pdf_text(bytes: &[u8]) -> Result<String> {
    // pdf-extract panics on some malformed files.
    match std::panic::catch_unwind(|| pdf_extract::extract_text_from_mem(bytes)) {
        Ok(Ok(text)) => Ok(text),
        Ok(Err(e)) => Err(Error::Extraction(format!("PDF text extraction failed: {}", e))),
        Err(_) => Err(Error::Extraction("PDF parser aborted on malformed input".into())),
    }
}

/// Decode stored bytes according to their extension. Anything that is not a PDF is text.
pub fn decode(bytes: &[u8], extension: &str) -> Result<String> {
    match FileType::from_extension(extension) {
        Some(FileType::Pdf) => extract_pdf_text(bytes),
        _ => Ok(decode_text(bytes)),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_extension_allow_list() {
        assert_eq!(check_allowed("notes.txt").unwrap(), FileType::PlainText);
        assert_eq!(check_allowed("Paper.PDF").unwrap(), FileType::Pdf);
        assert!(matches!(check_allowed("image.png"), Err(Error::UnsupportedContent(_))));
        assert!(check_allowed("README").is_err());
    }

    #[test]
    fn test_file_extension() {
        assert_eq!(file_extension("a/b/report.Pdf"), ".pdf");
        assert_eq!(file_extension("noext"), "");
    }

    #[test]
    fn test_decode_utf8_with_and_without_bom() {
        assert_eq!(decode_text("héllo".as_bytes()), "héllo");
        let mut bom = vec![0xEF, 0xBB, 0xBF];
        bom.extend_from_slice(b"hi");
        assert_eq!(decode_text(&bom), "hi");
    }

    #[test]
    fn test_decode_utf16() {
        let le: Vec<u8> = [0xFF, 0xFE].into_iter().chain("hé".encode_utf16().flat_map(|u| u.to_le_bytes())).collect();
        assert_eq!(decode_text(&le), "hé");
        let be: Vec<u8> = [0xFE, 0xFF].into_iter().chain("ok".encode_utf16().flat_map(|u| u.to_be_bytes())).collect();
        assert_eq!(decode_text(&be), "ok");
        let bare_le: Vec<u8> = "abc".encode_utf16().flat_map(|u| u.to_le_bytes()).collect();
        assert_eq!(decode_text(&bare_le), "abc");
    }

    #[test]
    fn test_invalid_utf8_is_lossy() {
        assert_eq!(decode_text(&[b'a', 0xFF, b'b']), "a\u{FFFD}b");
    }

    #[test]
    fn test_garbage_pdf_is_extraction_error() {
        assert!(matches!(decode(b"not a pdf", ".pdf"), Err(Error::Extraction(_))));
        assert_eq!(decode(b"plain", ".txt").unwrap(), "plain");
    }
}
