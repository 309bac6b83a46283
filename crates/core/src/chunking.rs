use crate::config::{ChunkUnit, ChunkingConfig};
use crate::error::IngestError;
use crate::extractor::PageText;
use crate::models::ChunkDraft;
use crate::traits::KeywordExtractor;

/// Normalized page texts joined into one string, remembering where each page starts.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DocumentText {
    pub text: String,
    /// (char offset, page number), ascending by offset.
    page_starts: Vec<(usize, u32)>,
}

impl DocumentText {
    pub fn from_pages(pages: &[PageText]) -> Self {
        let mut text = String::new();
        let mut page_starts = Vec::with_capacity(pages.len());
        let mut offset = 0usize;

        for (index, page) in pages.iter().enumerate() {
            if index > 0 {
                text.push('\n');
                offset += 1;
            }
            page_starts.push((offset, page.number));
            text.push_str(&page.text);
            offset += page.text.chars().count();
        }

        Self { text, page_starts }
    }

    /// Page containing the given char offset.
    pub fn page_at(&self, offset: usize) -> u32 {
        let position = self
            .page_starts
            .partition_point(|(start, _)| *start <= offset);
        self.page_starts
            .get(position.saturating_sub(1))
            .map_or(1, |(_, page)| *page)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
enum Boundary {
    None,
    Word,
    Sentence,
    Paragraph,
}

pub fn chunk_pages(
    pages: &[PageText],
    config: &ChunkingConfig,
    keywords: &dyn KeywordExtractor,
) -> Result<Vec<ChunkDraft>, IngestError> {
    chunk_document(&DocumentText::from_pages(pages), config, keywords)
}

/// Slides a window of `max_chunk_size` units over the text, stepping back `overlap_size`
/// units between windows. Window ends are pulled back to the strongest nearby boundary.
pub fn chunk_document(
    document: &DocumentText,
    config: &ChunkingConfig,
    keywords: &dyn KeywordExtractor,
) -> Result<Vec<ChunkDraft>, IngestError> {
    config.validate().map_err(IngestError::InvalidChunkConfig)?;

    let chars = document.text.chars().collect::<Vec<_>>();
    let units = unit_starts(&chars, config.unit);
    let unit_count = units.len();
    if unit_count == 0 {
        return Ok(Vec::new());
    }

    let char_at_unit = |index: usize| -> usize {
        if index == 0 {
            0
        } else if index < unit_count {
            units[index]
        } else {
            chars.len()
        }
    };

    let mut drafts = Vec::new();
    let mut start_unit = 0usize;

    loop {
        let hard_end = (start_unit + config.max_chunk_size).min(unit_count);
        let end_unit = if hard_end == unit_count {
            unit_count
        } else {
            choose_break(&chars, &units, start_unit, hard_end, config)
        };

        let char_start = char_at_unit(start_unit);
        let char_end = char_at_unit(end_unit);
        let text = chars[char_start..char_end].iter().collect::<String>();

        drafts.push(ChunkDraft {
            ordinal: drafts.len() as u32,
            keywords: keywords.extract(&text),
            page: document.page_at(char_start),
            text,
            char_start,
            char_end,
        });

        if end_unit == unit_count {
            break;
        }

        let mut next = end_unit - config.overlap_size;
        if config.unit == ChunkUnit::Chars {
            let stepped = next;
            while next < end_unit && !starts_word(&chars, units[next]) {
                next += 1;
            }
            if next == end_unit {
                next = stepped;
            }
        }
        start_unit = next;
    }

    Ok(drafts)
}

fn unit_starts(chars: &[char], unit: ChunkUnit) -> Vec<usize> {
    match unit {
        ChunkUnit::Chars => (0..chars.len()).collect(),
        ChunkUnit::Words => (0..chars.len())
            .filter(|&index| starts_word(chars, index))
            .collect(),
    }
}

fn starts_word(chars: &[char], index: usize) -> bool {
    !chars[index].is_whitespace() && (index == 0 || chars[index - 1].is_whitespace())
}

/// Picks the end unit for a window that would otherwise end at `hard_end`. Candidates
/// leave more than `overlap_size` units in the window so the next window always advances.
fn choose_break(
    chars: &[char],
    units: &[usize],
    start_unit: usize,
    hard_end: usize,
    config: &ChunkingConfig,
) -> usize {
    let lowest = (start_unit + config.overlap_size + 1)
        .max(hard_end.saturating_sub(config.boundary_tolerance));

    let mut best = (Boundary::None, hard_end);
    for candidate in lowest..=hard_end {
        let kind = boundary_before(chars, units[candidate]);
        if kind >= best.0 && kind > Boundary::None {
            best = (kind, candidate);
        }
    }

    if best.0 == Boundary::None {
        hard_end
    } else {
        best.1
    }
}

fn boundary_before(chars: &[char], position: usize) -> Boundary {
    if position == 0 {
        return Boundary::None;
    }
    let previous = chars[position - 1];
    if previous == '\n' {
        Boundary::Paragraph
    } else if previous.is_whitespace() {
        let ends_sentence = position >= 2 && matches!(chars[position - 2], '.' | '!' | '?');
        if ends_sentence {
            Boundary::Sentence
        } else {
            Boundary::Word
        }
    } else {
        Boundary::None
    }
}

/// Rebuilds the source text from chunks by dropping each chunk's overlap with its predecessor.
pub fn reassemble(drafts: &[ChunkDraft]) -> String {
    let mut text = String::new();
    let mut covered = 0usize;
    for draft in drafts {
        let skip = covered.saturating_sub(draft.char_start);
        text.extend(draft.text.chars().skip(skip));
        covered = covered.max(draft.char_end);
    }
    text
}
