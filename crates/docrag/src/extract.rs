//! Text extraction for uploaded files, dispatched on extension.
//!
//! | Extension | Extractor |
//! |-----------|-----------|
//! | `.pdf` | pdf-extract |
//! | `.docx` | `word/document.xml` runs via zip + quick-xml |
//! | `.txt`, `.md` | strict UTF-8 |
//! | `.png`, `.jpg`, `.jpeg`, `.gif`, `.webp`, `.bmp` | header-only metadata; caption comes later |
//!
//! Every failure is [`RagError::Extraction`] so the orchestrator can skip
//! the file and keep going.

use std::io::{Cursor, Read};

use docrag_core::models::ImageMetadata;
use docrag_core::{RagError, Result};

/// Maximum decompressed bytes read from a single ZIP entry.
const MAX_XML_ENTRY_BYTES: u64 = 50 * 1024 * 1024;

const IMAGE_EXTENSIONS: &[&str] = &["png", "jpg", "jpeg", "gif", "webp", "bmp"];

/// What an upload turned into.
#[derive(Debug, Clone)]
pub enum Extracted {
    Text(String),
    Image {
        bytes: Vec<u8>,
        mime: &'static str,
        metadata: ImageMetadata,
    },
}

fn extension(filename: &str) -> String {
    filename
        .rsplit_once('.')
        .map(|(_, ext)| ext.to_ascii_lowercase())
        .unwrap_or_default()
}

pub fn is_image_filename(filename: &str) -> bool {
    IMAGE_EXTENSIONS.contains(&extension(filename).as_str())
}

pub fn image_mime(filename: &str) -> &'static str {
    match extension(filename).as_str() {
        "png" => "image/png",
        "jpg" | "jpeg" => "image/jpeg",
        "gif" => "image/gif",
        "webp" => "image/webp",
        "bmp" => "image/bmp",
        _ => "application/octet-stream",
    }
}

/// Extract `bytes` uploaded as `filename`.
pub fn extract(filename: &str, bytes: &[u8]) -> Result<Extracted> {
    let fail = |message: String| RagError::extraction(filename, message);
    let text = match extension(filename).as_str() {
        "pdf" => pdf_extract::extract_text_from_mem(bytes)
            .map_err(|e| fail(format!("PDF extraction failed: {}", e)))?,
        "docx" => extract_docx(bytes).map_err(fail)?,
        "txt" | "md" => String::from_utf8(bytes.to_vec())
            .map_err(|_| fail("file is not valid UTF-8".to_string()))?,
        ext if IMAGE_EXTENSIONS.contains(&ext) => {
            let metadata = image_metadata(bytes).map_err(fail)?;
            return Ok(Extracted::Image {
                bytes: bytes.to_vec(),
                mime: image_mime(filename),
                metadata,
            });
        }
        _ => return Err(fail("unsupported file type".to_string())),
    };
    if text.trim().is_empty() {
        return Err(fail("no text could be extracted".to_string()));
    }
    Ok(Extracted::Text(text))
}

/// Width, height and format from the image header, without decoding pixels.
pub fn image_metadata(bytes: &[u8]) -> std::result::Result<ImageMetadata, String> {
    let reader = image::ImageReader::new(Cursor::new(bytes))
        .with_guessed_format()
        .map_err(|e| format!("unreadable image: {}", e))?;
    let format = reader
        .format()
        .map(|f| format!("{:?}", f).to_lowercase())
        .ok_or_else(|| "unrecognized image format".to_string())?;
    let (width, height) = reader
        .into_dimensions()
        .map_err(|e| format!("corrupt image: {}", e))?;
    Ok(ImageMetadata {
        width,
        height,
        format,
        size_bytes: bytes.len() as u64,
    })
}

fn extract_docx(bytes: &[u8]) -> std::result::Result<String, String> {
    let mut archive =
        zip::ZipArchive::new(Cursor::new(bytes)).map_err(|e| format!("invalid docx: {}", e))?;
    let entry = archive
        .by_name("word/document.xml")
        .map_err(|_| "word/document.xml not found".to_string())?;
    let mut xml = Vec::new();
    entry
        .take(MAX_XML_ENTRY_BYTES)
        .read_to_end(&mut xml)
        .map_err(|e| e.to_string())?;
    if xml.len() as u64 >= MAX_XML_ENTRY_BYTES {
        return Err("word/document.xml exceeds size limit".to_string());
    }
    docx_text(&xml)
}

/// Concatenate `w:t` runs; `w:p` ends a line, `w:tab` and `w:br` map to
/// tab and newline.
fn docx_text(xml: &[u8]) -> std::result::Result<String, String> {
    use quick_xml::events::Event;

    let mut reader = quick_xml::Reader::from_reader(xml);
    let mut buf = Vec::new();
    let mut out = String::new();
    let mut in_text = false;
    loop {
        match reader.read_event_into(&mut buf) {
            Ok(Event::Start(e)) if e.local_name().as_ref() == b"t" => in_text = true,
            Ok(Event::End(e)) => match e.local_name().as_ref() {
                b"t" => in_text = false,
                b"p" => out.push('\n'),
                _ => {}
            },
            Ok(Event::Empty(e)) => match e.local_name().as_ref() {
                b"tab" => out.push('\t'),
                b"br" => out.push('\n'),
                _ => {}
            },
            Ok(Event::Text(te)) if in_text => {
                out.push_str(te.unescape().unwrap_or_default().as_ref());
            }
            Ok(Event::Eof) => break,
            Err(e) => return Err(format!("malformed document.xml: {}", e)),
            _ => {}
        }
        buf.clear();
    }
    Ok(out)
}
