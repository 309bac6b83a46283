use crate::error::ParseError;
use crate::models::DocumentKind;
use crate::traits::DocumentParser;
use docx_rs::{read_docx, DocumentChild};
use lopdf::Document;
use tracing::debug;

const FORM_FEED: char = '\u{000c}';

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PageText {
    pub number: u32,
    pub text: String,
}

#[derive(Debug, Default, Clone, Copy)]
pub struct LopdfParser;

impl DocumentParser for LopdfParser {
    fn parse_pages(&self, bytes: &[u8]) -> Result<Vec<PageText>, ParseError> {
        let document = Document::load_mem(bytes).map_err(|error| corrupt(DocumentKind::Pdf, error))?;

        if document.is_encrypted() {
            return Err(ParseError::Encrypted);
        }

        let mut pages = Vec::new();
        for (page_no, _page_id) in document.get_pages() {
            let text = document
                .extract_text(&[page_no])
                .map_err(|error| corrupt(DocumentKind::Pdf, error))?;

            pages.push(PageText {
                number: page_no,
                text,
            });
        }

        Ok(pages)
    }
}

/// DOCX carries no page geometry, so the whole body is reported as page 1.
#[derive(Debug, Default, Clone, Copy)]
pub struct DocxParser;

impl DocumentParser for DocxParser {
    fn parse_pages(&self, bytes: &[u8]) -> Result<Vec<PageText>, ParseError> {
        let docx = read_docx(bytes).map_err(|error| corrupt(DocumentKind::Docx, error))?;

        let paragraphs = docx
            .document
            .children
            .iter()
            .filter_map(|child| match child {
                DocumentChild::Paragraph(paragraph) => Some(paragraph.raw_text()),
                _ => None,
            })
            .collect::<Vec<_>>();

        Ok(vec![PageText {
            number: 1,
            text: paragraphs.join("\n\n"),
        }])
    }
}

/// Plain text and markdown. Form feeds separate pages.
#[derive(Debug, Default, Clone, Copy)]
pub struct PlainTextParser;

impl DocumentParser for PlainTextParser {
    fn parse_pages(&self, bytes: &[u8]) -> Result<Vec<PageText>, ParseError> {
        let decoded = match std::str::from_utf8(bytes) {
            Ok(text) => text.to_string(),
            Err(_) => {
                debug!("text document is not utf-8, decoding as latin-1");
                bytes.iter().map(|&byte| byte as char).collect()
            }
        };

        Ok(decoded
            .split(FORM_FEED)
            .enumerate()
            .map(|(index, text)| PageText {
                number: (index + 1) as u32,
                text: text.to_string(),
            })
            .collect())
    }
}

static PARSERS: &[(DocumentKind, &dyn DocumentParser)] = &[
    (DocumentKind::Pdf, &LopdfParser),
    (DocumentKind::Docx, &DocxParser),
    (DocumentKind::Text, &PlainTextParser),
];

pub fn parser_for(kind: DocumentKind) -> Option<&'static dyn DocumentParser> {
    PARSERS
        .iter()
        .find(|(candidate, _)| *candidate == kind)
        .map(|(_, parser)| *parser)
}

/// Parses a document into normalized, non-empty pages in page order.
pub fn parse_document(
    bytes: &[u8],
    kind: DocumentKind,
    max_bytes: usize,
) -> Result<Vec<PageText>, ParseError> {
    if bytes.is_empty() {
        return Err(ParseError::Empty);
    }
    if bytes.len() > max_bytes {
        return Err(ParseError::TooLarge {
            size: bytes.len(),
            limit: max_bytes,
        });
    }

    let parser = parser_for(kind).ok_or_else(|| ParseError::Unsupported(kind.to_string()))?;

    let pages = parser
        .parse_pages(bytes)?
        .into_iter()
        .filter_map(|page| {
            let text = normalize_text(&page.text);
            if text.is_empty() {
                None
            } else {
                Some(PageText {
                    number: page.number,
                    text,
                })
            }
        })
        .collect::<Vec<_>>();

    if pages.is_empty() {
        return Err(ParseError::NoReadableText { kind });
    }

    Ok(pages)
}

pub fn normalize_whitespace(text: &str) -> String {
    text.split_whitespace().collect::<Vec<_>>().join(" ")
}

/// Strips control characters and collapses whitespace. Paragraphs (runs of lines
/// separated by a blank line) are kept apart by a single `\n`.
pub fn normalize_text(raw: &str) -> String {
    let cleaned = raw
        .chars()
        .filter_map(|c| match c {
            '\n' => Some('\n'),
            c if c.is_whitespace() => Some(' '),
            c if c.is_control() => None,
            c => Some(c),
        })
        .collect::<String>();

    let mut paragraphs = Vec::new();
    let mut current = Vec::new();
    for line in cleaned.lines() {
        if line.trim().is_empty() {
            if !current.is_empty() {
                paragraphs.push(normalize_whitespace(&current.join(" ")));
                current.clear();
            }
        } else {
            current.push(line);
        }
    }
    if !current.is_empty() {
        paragraphs.push(normalize_whitespace(&current.join(" ")));
    }

    paragraphs.join("\n")
}

fn corrupt(kind: DocumentKind, error: impl std::fmt::Display) -> ParseError {
    ParseError::Corrupt {
        kind,
        details: error.to_string(),
    }
}
