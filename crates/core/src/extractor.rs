use crate::error::IngestError;
use lopdf::Document;
use std::path::Path;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FileKind {
    Pdf,
    Text,
}

impl FileKind {
    pub fn from_filename(filename: &str) -> Result<Self, IngestError> {
        let extension = Path::new(filename)
            .extension()
            .and_then(|ext| ext.to_str())
            .map(str::to_lowercase)
            .unwrap_or_default();

        match extension.as_str() {
            "pdf" => Ok(Self::Pdf),
            "txt" => Ok(Self::Text),
            _ => Err(IngestError::UnsupportedFileType(format!(
                "{filename}: expected .pdf or .txt"
            ))),
        }
    }
}

pub fn extract_text(bytes: &[u8], filename: &str) -> Result<String, IngestError> {
    match FileKind::from_filename(filename)? {
        FileKind::Pdf => extract_pdf_text(bytes),
        FileKind::Text => Ok(decode_text(bytes)),
    }
}

pub fn extract_pdf_text(bytes: &[u8]) -> Result<String, IngestError> {
    let document =
        Document::load_mem(bytes).map_err(|error| IngestError::PdfParse(error.to_string()))?;

    let mut pages = Vec::new();
    for page_no in document.get_pages().keys() {
        let text = document
            .extract_text(&[*page_no])
            .map_err(|error| IngestError::PdfParse(error.to_string()))?;

        if !text.trim().is_empty() {
            pages.push(text);
        }
    }

    if pages.is_empty() {
        return Err(IngestError::PdfParse(
            "pdf had no readable page text".to_string(),
        ));
    }

    Ok(pages.join("\n\n"))
}

/// UTF-8 when valid, otherwise Latin-1, which maps every byte to a character.
pub fn decode_text(bytes: &[u8]) -> String {
    match std::str::from_utf8(bytes) {
        Ok(text) => text.to_string(),
        Err(_) => bytes.iter().map(|&byte| char::from(byte)).collect(),
    }
}
