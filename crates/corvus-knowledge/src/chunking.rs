use sha2::{Digest, Sha256};

use crate::types::Chunk;

/// Target chunk size and overlap, expressed in whitespace-delimited words.
/// The word count is our stand-in for "tokens" when the caller has no
/// tokenizer handy (English text); Thai text is pre-segmented by the
/// tokenizer sidecar before it ever reaches this module, so each element
/// of its segment list is already counted as one token.
const TARGET_TOKENS: usize = 750;
const MIN_TOKENS: usize = 500;
const MAX_TOKENS: usize = 1000;
const OVERLAP_TOKENS: usize = 100;

/// Split `content` into paragraphs on blank lines, each paragraph into
/// sentences, each sentence into words — in that preference order — and
/// pack the result into chunks within `[MIN_TOKENS, MAX_TOKENS]` words with
/// `OVERLAP_TOKENS` words of trailing context carried into the next chunk.
///
/// `tokens` is the pre-tokenised word/segment list to pack when the caller
/// already ran text through the Thai tokenizer sidecar; pass `None` to fall
/// back to whitespace+punctuation splitting for plain English input.
pub fn chunk_document(document_id: &str, content: &str, tokens: Option<&[String]>) -> Vec<Chunk> {
    let units = match tokens {
        Some(t) if !t.is_empty() => t.to_vec(),
        _ => split_into_units(content),
    };

    if units.is_empty() {
        return Vec::new();
    }

    let packs = pack_with_overlap(&units);
    let total = packs.len() as u32;

    packs
        .into_iter()
        .enumerate()
        .map(|(index, words)| {
            let text = words.join(" ");
            let token_count = words.len() as u32;
            Chunk {
                id: chunk_id(document_id, index as u32, &text),
                document_id: document_id.to_string(),
                index: index as u32,
                total,
                content: text,
                token_count,
                embedding_model: None,
            }
        })
        .collect()
}

/// Deterministic chunk id from `(document_id, index, content)`. Re-chunking
/// identical content yields identical ids.
fn chunk_id(document_id: &str, index: u32, content: &str) -> String {
    let mut hasher = Sha256::new();
    hasher.update(document_id.as_bytes());
    hasher.update(index.to_le_bytes());
    hasher.update(content.as_bytes());
    hex::encode(&hasher.finalize()[..16])
}

/// Paragraph → sentence → word split, flattened into a single ordered list
/// of "units" (words, but sentence- and paragraph-boundary words are never
/// split apart from their sentence so packing can fall back cleanly).
fn split_into_units(content: &str) -> Vec<String> {
    let mut units = Vec::new();
    for paragraph in content.split("\n\n") {
        let paragraph = paragraph.trim();
        if paragraph.is_empty() {
            continue;
        }
        for sentence in split_sentences(paragraph) {
            for word in sentence.split_whitespace() {
                units.push(word.to_string());
            }
        }
    }
    units
}

/// Splits on sentence-ending punctuation followed by whitespace. Good
/// enough for English prose; does not attempt clause-level segmentation.
fn split_sentences(paragraph: &str) -> Vec<&str> {
    let mut sentences = Vec::new();
    let mut start = 0;
    let mut chars = paragraph.char_indices().peekable();

    while let Some((i, c)) = chars.next() {
        if matches!(c, '.' | '!' | '?') {
            let next_is_boundary = chars
                .peek()
                .map(|(_, nc)| nc.is_whitespace())
                .unwrap_or(true);
            if next_is_boundary {
                let end = i + c.len_utf8();
                sentences.push(&paragraph[start..end]);
                start = end;
            }
        }
    }
    if start < paragraph.len() {
        sentences.push(paragraph[start..].trim());
    }
    sentences.into_iter().filter(|s| !s.trim().is_empty()).collect()
}

/// Greedily pack `units` into windows of `[MIN_TOKENS, MAX_TOKENS]`,
/// carrying the trailing `OVERLAP_TOKENS` units of each chunk into the
/// start of the next one so search results keep surrounding context.
fn pack_with_overlap(units: &[String]) -> Vec<Vec<String>> {
    if units.len() <= MAX_TOKENS {
        return vec![units.to_vec()];
    }

    let mut packs = Vec::new();
    let mut start = 0;
    while start < units.len() {
        let end = (start + TARGET_TOKENS).min(units.len());
        packs.push(units[start..end].to_vec());
        if end == units.len() {
            break;
        }
        let next_start = end.saturating_sub(OVERLAP_TOKENS);
        // Guard against a zero-progress loop if overlap ever meets or exceeds
        // the target window.
        start = if next_start > start { next_start } else { end };
    }

    // A trailing pack shorter than MIN_TOKENS reads as an abrupt, overly
    // narrow chunk; fold it into its predecessor instead of shipping it.
    if packs.len() > 1 && packs.last().map(|p| p.len()).unwrap_or(0) < MIN_TOKENS {
        let tail = packs.pop().unwrap();
        let overlap_already_shared = OVERLAP_TOKENS.min(packs.last().unwrap().len());
        let previous = packs.last_mut().unwrap();
        previous.extend(tail.into_iter().skip(overlap_already_shared));
    }

    packs
}

#[cfg(test)]
mod tests {
    use super::*;

    fn words(n: usize) -> String {
        (0..n).map(|i| format!("word{i}")).collect::<Vec<_>>().join(" ")
    }

    #[test]
    fn short_document_yields_a_single_chunk() {
        let chunks = chunk_document("d1", "hello there. how are you?", None);
        assert_eq!(chunks.len(), 1);
        assert_eq!(chunks[0].index, 0);
        assert_eq!(chunks[0].total, 1);
    }

    #[test]
    fn long_document_is_split_into_multiple_overlapping_chunks() {
        let content = words(3000);
        let chunks = chunk_document("d1", &content, None);
        assert!(chunks.len() > 1);
        for c in &chunks {
            assert!(c.token_count as usize <= MAX_TOKENS);
        }
    }

    #[test]
    fn consecutive_chunks_share_overlap_words() {
        let content = words(2500);
        let chunks = chunk_document("d1", &content, None);
        assert!(chunks.len() >= 2);
        let first_words: Vec<&str> = chunks[0].content.split_whitespace().collect();
        let second_words: Vec<&str> = chunks[1].content.split_whitespace().collect();
        let tail = &first_words[first_words.len() - OVERLAP_TOKENS..];
        assert_eq!(tail, &second_words[..OVERLAP_TOKENS]);
    }

    #[test]
    fn rechunking_identical_content_yields_identical_ids() {
        let content = words(1800);
        let a = chunk_document("d1", &content, None);
        let b = chunk_document("d1", &content, None);
        let a_ids: Vec<&str> = a.iter().map(|c| c.id.as_str()).collect();
        let b_ids: Vec<&str> = b.iter().map(|c| c.id.as_str()).collect();
        assert_eq!(a_ids, b_ids);
    }

    #[test]
    fn different_document_id_changes_chunk_ids() {
        let content = words(10);
        let a = chunk_document("d1", &content, None);
        let b = chunk_document("d2", &content, None);
        assert_ne!(a[0].id, b[0].id);
    }

    #[test]
    fn empty_document_yields_no_chunks() {
        assert!(chunk_document("d1", "", None).is_empty());
        assert!(chunk_document("d1", "   \n\n  ", None).is_empty());
    }

    #[test]
    fn pretokenised_thai_segments_are_packed_without_resplitting() {
        let segments: Vec<String> = (0..1200).map(|i| format!("seg{i}")).collect();
        let chunks = chunk_document("d1", "", Some(&segments));
        assert!(chunks.len() > 1);
        assert!(chunks[0].content.starts_with("seg0 seg1"));
    }
}
