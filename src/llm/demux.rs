//! Inline `<think>` tag demultiplexer.
//!
//! Splits a streamed content feed into `thinking` and `content` classified
//! text. Tags may be split across chunk boundaries, so the longest trailing
//! strict prefix of the next expected tag is deferred to the following chunk
//! instead of being emitted. No input is rejected and no byte is dropped.

const OPEN_TAG: &str = "<think>";
const CLOSE_TAG: &str = "</think>";

/// Classification of a streamed text piece.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ChunkKind {
    /// Model reasoning, not part of the answer.
    Thinking,
    /// Answer text.
    Content,
}

/// Streaming tag splitter: a two-state machine with a bounded deferred
/// buffer (at most `len(tag) - 1` bytes).
#[derive(Debug, Default)]
pub struct ThinkDemux {
    inside: bool,
    pending: String,
}

impl ThinkDemux {
    /// Fresh demultiplexer, outside any tag.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Classification applied to text emitted right now.
    #[must_use]
    pub const fn current_kind(&self) -> ChunkKind {
        if self.inside {
            ChunkKind::Thinking
        } else {
            ChunkKind::Content
        }
    }

    /// Feed one content chunk, returning the classified pieces it completes.
    pub fn push(&mut self, chunk: &str) -> Vec<(ChunkKind, String)> {
        let mut work = std::mem::take(&mut self.pending);
        work.push_str(chunk);
        let mut out = Vec::new();

        loop {
            let tag = if self.inside { CLOSE_TAG } else { OPEN_TAG };
            match find_ascii_ignore_case(&work, tag) {
                Some(idx) => {
                    if idx > 0 {
                        out.push((self.current_kind(), work[..idx].to_string()));
                    }
                    work = work[idx + tag.len()..].to_string();
                    self.inside = !self.inside;
                }
                None => {
                    let keep = trailing_tag_prefix_len(&work, tag);
                    let split = work.len() - keep;
                    if split > 0 {
                        out.push((self.current_kind(), work[..split].to_string()));
                    }
                    self.pending = work[split..].to_string();
                    break;
                }
            }
        }
        out
    }

    /// End of stream: release any deferred bytes with the current
    /// classification.
    pub fn finish(&mut self) -> Option<(ChunkKind, String)> {
        if self.pending.is_empty() {
            return None;
        }
        Some((self.current_kind(), std::mem::take(&mut self.pending)))
    }
}

/// Byte index of the first case-insensitive occurrence of an ASCII needle.
/// The match starts at an ASCII byte, so the index is a char boundary.
fn find_ascii_ignore_case(haystack: &str, needle: &str) -> Option<usize> {
    let hay = haystack.as_bytes();
    let needle = needle.as_bytes();
    if needle.len() > hay.len() {
        return None;
    }
    (0..=hay.len() - needle.len()).find(|&i| hay[i..i + needle.len()].eq_ignore_ascii_case(needle))
}

/// Length of the longest strict prefix of `tag` that is a case-insensitive
/// suffix of `text`.
fn trailing_tag_prefix_len(text: &str, tag: &str) -> usize {
    let text = text.as_bytes();
    let tag = tag.as_bytes();
    let max = (tag.len() - 1).min(text.len());
    (1..=max)
        .rev()
        .find(|&k| text[text.len() - k..].eq_ignore_ascii_case(&tag[..k]))
        .unwrap_or(0)
}
