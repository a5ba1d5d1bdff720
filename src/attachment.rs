//! Attachment extraction: uploaded file to prompt text or image.
//!
//! Images are decoded and normalized to JPEG; PDFs are reduced to their
//! text; everything else is treated as UTF-8 text. Extraction never
//! aborts a turn: unreadable PDFs degrade to a fixed placeholder and
//! other failures degrade to an empty attachment.

use std::io::Cursor;

use image::{GenericImageView, ImageOutputFormat};

use crate::error::ExtractionError;
use crate::types::{Attachment, EncodedImage};

/// Placeholder substituted when a PDF cannot be parsed.
pub const PDF_PLACEHOLDER: &str = "unable to read PDF content";

/// File extensions the attachment control accepts.
pub const ACCEPTED_EXTENSIONS: &[&str] = &["txt", "pdf", "md", "py", "png", "jpg", "jpeg"];

const JPEG_QUALITY: u8 = 85;

/// Wrap extracted document text in the delimiter template that marks
/// attachment content inside the outgoing prompt.
pub fn wrap_document_text(text: &str) -> String {
    format!("\n【attachment content】:\n{}\n", text)
}

pub fn is_accepted(file_name: &str) -> bool {
    ACCEPTED_EXTENSIONS.contains(&extension_of(file_name).as_str())
}

fn extension_of(file_name: &str) -> String {
    std::path::Path::new(file_name)
        .extension()
        .and_then(|e| e.to_str())
        .unwrap_or("")
        .to_lowercase()
}

/// Convert an uploaded file into either wrapped text or an image.
///
/// Exactly one of text or image is populated; images short-circuit
/// before any text wrapping is attempted.
pub fn extract(file_name: &str, bytes: &[u8]) -> Attachment {
    match extension_of(file_name).as_str() {
        "png" | "jpg" | "jpeg" => match decode_image(bytes) {
            Ok(image) => Attachment::Image(image),
            Err(e) => {
                tracing::warn!(file = file_name, error = %e, "dropping unreadable image");
                Attachment::None
            }
        },
        "pdf" => {
            let text = match extract_pdf_text(bytes) {
                Ok(text) => text,
                Err(e) => {
                    tracing::warn!(file = file_name, error = %e, "substituting PDF placeholder");
                    PDF_PLACEHOLDER.to_string()
                }
            };
            Attachment::Text(wrap_document_text(&text))
        }
        _ => {
            let text = String::from_utf8_lossy(bytes);
            Attachment::Text(wrap_document_text(text.trim_end()))
        }
    }
}

fn decode_image(bytes: &[u8]) -> Result<EncodedImage, ExtractionError> {
    let image =
        image::load_from_memory(bytes).map_err(|e| ExtractionError::ImageDecode(e.to_string()))?;
    let (width, height) = image.dimensions();
    let mut jpeg = Vec::new();
    image
        .write_to(&mut Cursor::new(&mut jpeg), ImageOutputFormat::Jpeg(JPEG_QUALITY))
        .map_err(|e| ExtractionError::ImageDecode(e.to_string()))?;
    Ok(EncodedImage {
        jpeg,
        width,
        height,
    })
}

fn extract_pdf_text(bytes: &[u8]) -> Result<String, ExtractionError> {
    let text = pdf_extract::extract_text_from_mem(bytes)
        .map_err(|e| ExtractionError::Pdf(e.to_string()))?;
    // Page texts arrive newline-separated already; normalize trailing space.
    Ok(text.trim_end().to_string())
}
