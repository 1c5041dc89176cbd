//! Page-wise text extraction for uploaded documents (PDF, DOCX, plain text).
//!
//! Extraction runs before anything touches the corpus, so a corrupt or
//! unsupported file aborts the whole ingestion with no partial writes.

use std::io::Read;
use std::path::Path;

use crate::error::{Error, Result};
use crate::models::PageText;

/// Maximum decompressed bytes to read from a single ZIP entry (zip-bomb protection).
const MAX_XML_ENTRY_BYTES: u64 = 50 * 1024 * 1024;

/// Supported document kinds, detected from the file extension.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DocumentKind {
    Pdf,
    Docx,
    PlainText,
}

impl DocumentKind {
    pub fn from_filename(filename: &str) -> Result<Self> {
        let ext = Path::new(filename)
            .extension()
            .and_then(|e| e.to_str())
            .map(|e| e.to_ascii_lowercase())
            .unwrap_or_default();
        match ext.as_str() {
            "pdf" => Ok(DocumentKind::Pdf),
            "docx" => Ok(DocumentKind::Docx),
            "txt" | "md" => Ok(DocumentKind::PlainText),
            "" => Err(Error::UnsupportedDocument(format!(
                "'{}' has no file extension; upload a PDF, DOCX, TXT or MD document",
                filename
            ))),
            other => Err(Error::UnsupportedDocument(format!(
                ".{} (upload a PDF, DOCX, TXT or MD document)",
                other
            ))),
        }
    }
}

/// Extract text page by page. Non-paginated formats yield a single page.
pub fn extract_pages(bytes: &[u8], kind: DocumentKind, filename: &str) -> Result<Vec<PageText>> {
    let pages = match kind {
        DocumentKind::Pdf => extract_pdf(bytes),
        DocumentKind::Docx => extract_docx(bytes).map(|t| vec![t]),
        DocumentKind::PlainText => std::str::from_utf8(bytes)
            .map(|t| vec![t.to_string()])
            .map_err(|e| format!("not valid UTF-8: {}", e)),
    }
    .map_err(|message| Error::parse(filename, message))?;

    Ok(pages
        .into_iter()
        .enumerate()
        .map(|(i, text)| PageText {
            page_number: i as u32 + 1,
            text,
        })
        .collect())
}

fn extract_pdf(bytes: &[u8]) -> std::result::Result<Vec<String>, String> {
    pdf_extract::extract_text_from_mem_by_pages(bytes).map_err(|e| e.to_string())
}

fn extract_docx(bytes: &[u8]) -> std::result::Result<String, String> {
    let mut archive =
        zip::ZipArchive::new(std::io::Cursor::new(bytes)).map_err(|e| e.to_string())?;
    let entry = archive
        .by_name("word/document.xml")
        .map_err(|_| "word/document.xml not found".to_string())?;
    let mut doc_xml = Vec::new();
    entry
        .take(MAX_XML_ENTRY_BYTES)
        .read_to_end(&mut doc_xml)
        .map_err(|e| e.to_string())?;
    if doc_xml.len() as u64 >= MAX_XML_ENTRY_BYTES {
        return Err("word/document.xml exceeds size limit".to_string());
    }
    docx_paragraphs(&doc_xml)
}

/// Collect `<w:t>` runs, separating `<w:p>` paragraphs with a blank line so the
/// splitter can cut on paragraph boundaries.
fn docx_paragraphs(xml: &[u8]) -> std::result::Result<String, String> {
    use quick_xml::events::Event;

    let mut paragraphs: Vec<String> = Vec::new();
    let mut current = String::new();
    let mut in_text = false;
    let mut reader = quick_xml::Reader::from_reader(xml);
    let mut buf = Vec::new();
    loop {
        match reader.read_event_into(&mut buf) {
            Ok(Event::Start(e)) if e.local_name().as_ref() == b"t" => in_text = true,
            Ok(Event::Text(te)) if in_text => {
                current.push_str(te.unescape().unwrap_or_default().as_ref());
            }
            Ok(Event::End(e)) => match e.local_name().as_ref() {
                b"t" => in_text = false,
                b"p" => {
                    let para = current.trim();
                    if !para.is_empty() {
                        paragraphs.push(para.to_string());
                    }
                    current.clear();
                }
                _ => {}
            },
            Ok(Event::Eof) => break,
            Err(e) => return Err(e.to_string()),
            _ => {}
        }
        buf.clear();
    }
    let tail = current.trim();
    if !tail.is_empty() {
        paragraphs.push(tail.to_string());
    }
    Ok(paragraphs.join("\n\n"))
}
