//! Document text extraction.
//!
//! Turns an uploaded file into an [`ExtractedDocument`]: an ordered
//! sequence of pages of plain text. Supported: `.txt`/`.md` (read
//! directly), `.pdf` (via `pdf-extract`), `.docx` (ZIP + `word/document.xml`).
//! Unrecognized extensions fail with [`ServiceError::UnsupportedType`].
//!
//! Pages may legitimately come back empty (e.g. scanned PDFs without an
//! OCR pass); the chunker drops them and the upload path decides whether
//! a fully empty document is an error.

use std::io::Read;
use std::path::Path;

use anyhow::{anyhow, Context};
use quick_xml::events::Event;
use quick_xml::Reader;

use crate::error::ServiceError;
use crate::models::{ExtractedDocument, Page};

/// Approximate characters per synthetic page when a document carries no
/// explicit page breaks.
const CHARS_PER_PAGE: usize = 3000;

/// Maximum decompressed bytes read from a ZIP entry (zip-bomb protection).
const MAX_XML_ENTRY_BYTES: u64 = 50 * 1024 * 1024;

pub const SUPPORTED_EXTENSIONS: &[&str] = &["txt", "md", "pdf", "docx"];

/// Load and extract a document from disk.
pub fn load(path: &Path) -> Result<ExtractedDocument, ServiceError> {
    let filename = path
        .file_name()
        .and_then(|n| n.to_str())
        .unwrap_or("upload")
        .to_string();

    let ext = path
        .extension()
        .and_then(|e| e.to_str())
        .map(|e| e.to_ascii_lowercase())
        .unwrap_or_default();

    let pages = match ext.as_str() {
        "txt" | "md" => extract_text_file(path)?,
        "pdf" => extract_pdf(path)?,
        "docx" => extract_docx(path)?,
        _ => return Err(ServiceError::UnsupportedType(ext)),
    };

    Ok(ExtractedDocument { filename, pages })
}

fn extract_text_file(path: &Path) -> Result<Vec<Page>, ServiceError> {
    let text = std::fs::read_to_string(path)
        .with_context(|| format!("Failed to read {}", path.display()))
        .map_err(ServiceError::Internal)?;
    Ok(split_pages(&text))
}

fn extract_pdf(path: &Path) -> Result<Vec<Page>, ServiceError> {
    let text = pdf_extract::extract_text(path)
        .map_err(|e| ServiceError::Internal(anyhow!("PDF extraction failed: {}", e)))?;
    Ok(split_pages(&text))
}

fn extract_docx(path: &Path) -> Result<Vec<Page>, ServiceError> {
    let file = std::fs::File::open(path)
        .with_context(|| format!("Failed to open {}", path.display()))
        .map_err(ServiceError::Internal)?;
    let mut archive = zip::ZipArchive::new(file)
        .map_err(|e| ServiceError::Internal(anyhow!("Not a DOCX archive: {}", e)))?;

    let mut doc_xml = Vec::new();
    {
        let entry = archive
            .by_name("word/document.xml")
            .map_err(|e| ServiceError::Internal(anyhow!("DOCX missing document.xml: {}", e)))?;
        entry
            .take(MAX_XML_ENTRY_BYTES)
            .read_to_end(&mut doc_xml)
            .map_err(|e| ServiceError::Internal(anyhow!("DOCX read failed: {}", e)))?;
        if doc_xml.len() as u64 >= MAX_XML_ENTRY_BYTES {
            return Err(ServiceError::Internal(anyhow!(
                "word/document.xml exceeds size limit"
            )));
        }
    }

    let text = docx_xml_to_text(&doc_xml).map_err(ServiceError::Internal)?;
    Ok(split_pages(&text))
}

/// Pull the visible text out of `word/document.xml`: `<w:t>` runs joined
/// in order, one newline per closed paragraph, a form feed per explicit
/// page break.
fn docx_xml_to_text(xml: &[u8]) -> anyhow::Result<String> {
    let mut reader = Reader::from_reader(xml);
    let mut buf = Vec::new();
    let mut out = String::new();
    let mut in_text_run = false;

    loop {
        match reader.read_event_into(&mut buf) {
            Ok(Event::Start(ref e)) if e.name().as_ref() == b"w:t" => {
                in_text_run = true;
            }
            Ok(Event::End(ref e)) if e.name().as_ref() == b"w:t" => {
                in_text_run = false;
            }
            Ok(Event::Text(ref t)) if in_text_run => {
                out.push_str(&t.unescape().unwrap_or_default());
            }
            Ok(Event::End(ref e)) if e.name().as_ref() == b"w:p" => {
                out.push('\n');
            }
            Ok(Event::Empty(ref e)) if e.name().as_ref() == b"w:br" => {
                let is_page_break = e.attributes().flatten().any(|a| {
                    a.key.as_ref() == b"w:type" && a.value.as_ref() == b"page"
                });
                if is_page_break {
                    out.push('\u{c}');
                }
            }
            Ok(Event::Eof) => break,
            Ok(_) => {}
            Err(e) => return Err(anyhow!("DOCX XML parse error: {}", e)),
        }
        buf.clear();
    }

    Ok(out)
}

/// Split extracted text into pages: explicit form-feed breaks win; long
/// break-free text is cut into ~3000-character pages on word boundaries;
/// short text is a single page.
fn split_pages(text: &str) -> Vec<Page> {
    if text.contains('\u{c}') {
        return text
            .split('\u{c}')
            .enumerate()
            .filter(|(_, t)| !t.trim().is_empty())
            .map(|(i, t)| Page {
                page: i as u32 + 1,
                text: t.trim().to_string(),
            })
            .collect();
    }

    if text.chars().count() > CHARS_PER_PAGE {
        return split_by_length(text);
    }

    vec![Page {
        page: 1,
        text: text.to_string(),
    }]
}

fn split_by_length(text: &str) -> Vec<Page> {
    let mut pages = Vec::new();
    let mut current: Vec<&str> = Vec::new();
    let mut current_len = 0usize;
    let mut page_num = 1u32;

    for word in text.split_whitespace() {
        current.push(word);
        current_len += word.chars().count() + 1;

        if current_len >= CHARS_PER_PAGE {
            pages.push(Page {
                page: page_num,
                text: current.join(" "),
            });
            page_num += 1;
            current.clear();
            current_len = 0;
        }
    }

    if !current.is_empty() {
        pages.push(Page {
            page: page_num,
            text: current.join(" "),
        });
    }

    pages
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn test_unsupported_extension_rejected() {
        let dir = tempfile::TempDir::new().unwrap();
        let path = dir.path().join("image.png");
        std::fs::write(&path, b"not text").unwrap();
        let err = load(&path).unwrap_err();
        assert!(matches!(err, ServiceError::UnsupportedType(ref e) if e == "png"));
    }

    #[test]
    fn test_short_txt_single_page() {
        let dir = tempfile::TempDir::new().unwrap();
        let path = dir.path().join("note.txt");
        std::fs::write(&path, "just a short note").unwrap();
        let doc = load(&path).unwrap();
        assert_eq!(doc.filename, "note.txt");
        assert_eq!(doc.pages.len(), 1);
        assert_eq!(doc.pages[0].page, 1);
        assert_eq!(doc.pages[0].text, "just a short note");
    }

    #[test]
    fn test_form_feed_splits_pages() {
        let dir = tempfile::TempDir::new().unwrap();
        let path = dir.path().join("pages.txt");
        let mut f = std::fs::File::create(&path).unwrap();
        write!(f, "page one\u{c}page two\u{c}  \u{c}page four").unwrap();
        let doc = load(&path).unwrap();
        // Blank page dropped; numbering follows split position.
        assert_eq!(doc.pages.len(), 3);
        assert_eq!(doc.pages[0].text, "page one");
        assert_eq!(doc.pages[2].text, "page four");
    }

    #[test]
    fn test_long_text_split_by_length() {
        let dir = tempfile::TempDir::new().unwrap();
        let path = dir.path().join("long.txt");
        let word = "lorem ";
        std::fs::write(&path, word.repeat(2000)).unwrap(); // 12000 chars
        let doc = load(&path).unwrap();
        assert!(doc.pages.len() > 1);
        for (i, p) in doc.pages.iter().enumerate() {
            assert_eq!(p.page, i as u32 + 1);
            assert!(!p.text.is_empty());
        }
    }

    #[test]
    fn test_docx_xml_text_extraction() {
        let xml = br#"<?xml version="1.0"?>
<w:document xmlns:w="http://schemas.openxmlformats.org/wordprocessingml/2006/main">
  <w:body>
    <w:p><w:r><w:t>Hello</w:t></w:r><w:r><w:t xml:space="preserve"> world</w:t></w:r></w:p>
    <w:p><w:r><w:br w:type="page"/><w:t>Second page</w:t></w:r></w:p>
  </w:body>
</w:document>"#;
        let text = docx_xml_to_text(xml).unwrap();
        assert!(text.contains("Hello world"));
        assert!(text.contains('\u{c}'));
        assert!(text.contains("Second page"));
    }
}
