use crate::models::{
    AssembledContext, ContextOutcome, RetrievalResult, RetrievedChunk, SourceAttribution,
};
use tracing::debug;

const BLOCK_SEPARATOR: &str = "\n\n";
const PREVIEW_CHARS: usize = 150;

/// Builds a bounded, attributed context from ranked chunks.
#[derive(Debug, Clone, Copy)]
pub struct ContextAssembler {
    max_context_chars: usize,
}

impl ContextAssembler {
    pub fn new(max_context_chars: usize) -> Self {
        Self { max_context_chars }
    }

    /// Admits chunks best-score-first until the budget would be exceeded, then emits them
    /// in document order with overlapping text removed.
    pub fn assemble(&self, result: &RetrievalResult) -> ContextOutcome {
        let mut ranked = result.hits.iter().collect::<Vec<_>>();
        ranked.sort_by(|left, right| {
            right
                .score
                .total_cmp(&left.score)
                .then_with(|| left.chunk_id.cmp(&right.chunk_id))
        });

        let mut admitted: Vec<RetrievedChunk> = Vec::new();
        let mut used = 0usize;
        for hit in ranked {
            let cost = block_chars(hit, &hit.text) + separator_cost(admitted.len());
            if used + cost <= self.max_context_chars {
                used += cost;
                admitted.push(hit.clone());
                continue;
            }
            if admitted.is_empty() {
                if let Some(truncated) = self.truncate_to_budget(hit) {
                    admitted.push(truncated);
                }
            }
            break;
        }

        admitted.sort_by(|left, right| left.chunk_id.cmp(&right.chunk_id));
        let blocks = remove_overlaps(admitted);
        if blocks.is_empty() {
            return ContextOutcome::NoRelevantContext;
        }

        let text = blocks
            .iter()
            .map(|block| render_block(block, &block.text))
            .collect::<Vec<_>>()
            .join(BLOCK_SEPARATOR);

        let attributions = blocks
            .iter()
            .map(|block| SourceAttribution {
                chunk_id: block.chunk_id.clone(),
                document_name: block.document_name.clone(),
                page: block.page,
                score: block.score,
                preview: block.text.trim().chars().take(PREVIEW_CHARS).collect(),
            })
            .collect::<Vec<_>>();

        debug!(
            blocks = blocks.len(),
            chars = text.chars().count(),
            budget = self.max_context_chars,
            "context assembled"
        );

        ContextOutcome::Assembled(AssembledContext { text, attributions })
    }

    fn truncate_to_budget(&self, hit: &RetrievedChunk) -> Option<RetrievedChunk> {
        let room = self.max_context_chars.checked_sub(block_chars(hit, ""))?;
        if room == 0 {
            return None;
        }
        let text = hit.text.chars().take(room).collect::<String>();
        let taken = text.chars().count();
        Some(RetrievedChunk {
            char_end: hit.char_start + taken,
            text,
            ..hit.clone()
        })
    }
}

fn header(chunk: &RetrievedChunk) -> String {
    format!("[{}, page {}]\n", chunk.document_name, chunk.page)
}

fn render_block(chunk: &RetrievedChunk, text: &str) -> String {
    format!("{}{}", header(chunk), text.trim())
}

fn block_chars(chunk: &RetrievedChunk, text: &str) -> usize {
    header(chunk).chars().count() + text.chars().count()
}

fn separator_cost(admitted: usize) -> usize {
    if admitted == 0 {
        0
    } else {
        BLOCK_SEPARATOR.len()
    }
}

/// Expects chunks in document order. Trims the part of each chunk already covered by an
/// earlier chunk of the same document and drops chunks that are fully covered.
fn remove_overlaps(chunks: Vec<RetrievedChunk>) -> Vec<RetrievedChunk> {
    let mut kept: Vec<RetrievedChunk> = Vec::with_capacity(chunks.len());
    let mut covered: Option<(String, usize)> = None;

    for mut chunk in chunks {
        if let Some((document_id, end)) = &covered {
            if document_id == chunk.document_id() && chunk.char_start < *end {
                if chunk.char_end <= *end {
                    continue;
                }
                let skip = end - chunk.char_start;
                chunk.text = chunk.text.chars().skip(skip).collect();
                chunk.char_start = *end;
            }
        }

        let reaches = match &covered {
            Some((document_id, end)) if document_id == chunk.document_id() => (*end).max(chunk.char_end),
            _ => chunk.char_end,
        };
        covered = Some((chunk.document_id().to_string(), reaches));
        if !chunk.text.trim().is_empty() {
            kept.push(chunk);
        }
    }

    kept
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::{ChunkId, RetrievalMode};

    fn hit(document: &str, ordinal: u32, range: (usize, usize), text: &str, score: f32) -> RetrievedChunk {
        RetrievedChunk {
            chunk_id: ChunkId::new(document, ordinal),
            document_name: format!("{document}.pdf"),
            page: ordinal + 1,
            char_start: range.0,
            char_end: range.1,
            text: text.to_string(),
            score,
        }
    }

    fn result(hits: Vec<RetrievedChunk>) -> RetrievalResult {
        RetrievalResult {
            query: "q".to_string(),
            mode: RetrievalMode::Semantic,
            degraded_reason: None,
            hits,
        }
    }

    #[test]
    fn empty_result_is_the_no_context_sentinel() {
        let outcome = ContextAssembler::new(1_000).assemble(&result(Vec::new()));
        assert_eq!(outcome, ContextOutcome::NoRelevantContext);
        assert!(outcome.context().is_none());
    }

    #[test]
    fn chunks_are_emitted_in_document_order() {
        let hits = vec![
            hit("b", 0, (0, 10), "Bravo text", 0.9),
            hit("a", 3, (40, 50), "Later text", 0.8),
            hit("a", 1, (0, 10), "Early text", 0.7),
        ];
        let outcome = ContextAssembler::new(1_000).assemble(&result(hits));
        let context = outcome.context().unwrap();

        let order = context
            .attributions
            .iter()
            .map(|source| source.chunk_id.to_string())
            .collect::<Vec<_>>();
        assert_eq!(order, vec!["a#1", "a#3", "b#0"]);
        assert_eq!(
            context.text,
            "[a.pdf, page 2]\nEarly text\n\n[a.pdf, page 4]\nLater text\n\n[b.pdf, page 1]\nBravo text"
        );
    }

    #[test]
    fn budget_admits_highest_scores_first() {
        let hits = vec![
            hit("a", 0, (0, 20), "low scoring chunk...", 0.3),
            hit("a", 5, (90, 110), "top scoring chunk...", 0.9),
            hit("a", 7, (130, 150), "next best chunk.....", 0.6),
        ];
        // One block is 16 header chars + 20 text chars.
        let outcome = ContextAssembler::new(36 + 2 + 36).assemble(&result(hits));
        let context = outcome.context().unwrap();

        let ordinals = context
            .attributions
            .iter()
            .map(|source| source.chunk_id.ordinal)
            .collect::<Vec<_>>();
        assert_eq!(ordinals, vec![5, 7]);
        assert!(context.text.chars().count() <= 74);
    }

    #[test]
    fn overlapping_chunks_are_trimmed() {
        let hits = vec![
            hit("a", 0, (0, 12), "First part. ", 0.9),
            hit("a", 1, (6, 25), "part. Second part. ", 0.8),
        ];
        let context = ContextAssembler::new(1_000)
            .assemble(&result(hits))
            .context()
            .cloned()
            .unwrap();
        assert_eq!(
            context.text,
            "[a.pdf, page 1]\nFirst part.\n\n[a.pdf, page 2]\nSecond part."
        );
        assert_eq!(context.attributions[1].preview, "Second part.");
    }

    #[test]
    fn fully_covered_chunk_is_dropped() {
        let hits = vec![
            hit("a", 0, (0, 30), "A long chunk covering a range.", 0.5),
            hit("a", 1, (10, 20), "covering a", 0.9),
        ];
        let context = ContextAssembler::new(1_000)
            .assemble(&result(hits))
            .context()
            .cloned()
            .unwrap();
        assert_eq!(context.attributions.len(), 1);
        assert_eq!(context.attributions[0].chunk_id, ChunkId::new("a", 0));
    }

    #[test]
    fn oversized_first_chunk_is_truncated_to_budget() {
        let long = "x".repeat(500);
        let hits = vec![hit("a", 0, (0, 500), &long, 0.9)];
        let outcome = ContextAssembler::new(100).assemble(&result(hits));
        let context = outcome.context().unwrap();
        assert_eq!(context.text.chars().count(), 100);
    }

    #[test]
    fn budget_smaller_than_a_header_yields_no_context() {
        let hits = vec![hit("a", 0, (0, 4), "text", 0.9)];
        let outcome = ContextAssembler::new(5).assemble(&result(hits));
        assert_eq!(outcome, ContextOutcome::NoRelevantContext);
    }
}
