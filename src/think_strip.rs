//! Suppresses `<think>...</think>` blocks in an LLM token stream.
//!
//! A naive substring search on each arriving chunk breaks the moment a tag
//! straddles a chunk boundary (`"<th"` then `"ink>"`). This keeps a small
//! carry buffer of text that could still turn out to be a partial tag, and
//! only emits text once it's certain it isn't.

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum StripState {
    Outside,
    Inside,
}

const OPEN_TAG: &str = "<think>";
const CLOSE_TAG: &str = "</think>";

/// Length of the longest suffix of `s` that is also a proper (non-full) prefix of `tag`.
/// Used to decide how many trailing bytes must be held back because they might be the
/// start of a tag split across the chunk boundary.
fn partial_tag_suffix_len(s: &str, tag: &str) -> usize {
    let max_k = tag.len().saturating_sub(1).min(s.len());
    for k in (1..=max_k).rev() {
        if s.ends_with(&tag[..k]) {
            return k;
        }
    }
    0
}

#[derive(Debug, Default)]
pub struct ThinkStripper {
    state: Option<StripState>,
    buf: String,
}

impl ThinkStripper {
    pub fn new() -> Self {
        Self { state: Some(StripState::Outside), buf: String::new() }
    }

    /// Feed one chunk of streamed text; returns the text (possibly empty) safe to emit now.
    pub fn push(&mut self, chunk: &str) -> String {
        self.buf.push_str(chunk);
        let mut out = String::new();

        loop {
            match self.state.unwrap_or(StripState::Outside) {
                StripState::Outside => {
                    if let Some(idx) = self.buf.find(OPEN_TAG) {
                        out.push_str(&self.buf[..idx]);
                        self.buf.drain(..idx + OPEN_TAG.len());
                        self.state = Some(StripState::Inside);
                        continue;
                    }
                    let hold = partial_tag_suffix_len(&self.buf, OPEN_TAG);
                    let emit_len = self.buf.len() - hold;
                    out.push_str(&self.buf[..emit_len]);
                    self.buf.drain(..emit_len);
                    break;
                }
                StripState::Inside => {
                    if let Some(idx) = self.buf.find(CLOSE_TAG) {
                        self.buf.drain(..idx + CLOSE_TAG.len());
                        self.state = Some(StripState::Outside);
                        continue;
                    }
                    let hold = partial_tag_suffix_len(&self.buf, CLOSE_TAG);
                    let drop_len = self.buf.len() - hold;
                    self.buf.drain(..drop_len);
                    break;
                }
            }
        }

        out
    }

    /// Flush whatever is left once the stream has ended — a trailing
    /// partial tag candidate that never completed is ordinary text.
    pub fn finish(&mut self) -> String {
        let state = self.state.unwrap_or(StripState::Outside);
        let rest = std::mem::take(&mut self.buf);
        if state == StripState::Outside {
            rest
        } else {
            String::new()
        }
    }
}
