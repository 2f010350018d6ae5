//! Text splitting for platforms with a per-message length limit.
//!
//! Lengths are counted in `char`s. Split points are chosen in priority order:
//! the last paragraph break (`"\n\n"`), then the last line break, then a hard
//! cut at the limit.

/// Split `text` into ordered chunks of at most `limit` characters.
///
/// Text that already fits is returned as a single, untouched chunk. Longer
/// text is cut at the best available break and every resulting chunk is
/// trimmed; chunks that trim down to nothing are discarded. Empty input yields
/// no chunks. A `limit` of zero is treated as one.
pub fn split(text: &str, limit: usize) -> Vec<String> {
    let limit = limit.max(1);

    if text.is_empty() {
        return Vec::new();
    }
    let Some(mut window) = Window::find(text, limit) else {
        return vec![text.to_string()];
    };

    let mut chunks = Vec::new();
    let mut remaining = text;

    loop {
        let (head, rest) = window.cut(remaining);
        push_trimmed(&mut chunks, head);
        remaining = rest.trim_start();

        match Window::find(remaining, limit) {
            Some(next) => window = next,
            None => break,
        }
    }

    push_trimmed(&mut chunks, remaining);
    chunks
}

/// Byte offsets of the chars at index `limit`, `limit + 1` and `limit + 2`.
///
/// Only the first `limit + 3` chars are walked, so each chunk costs
/// `O(limit)` regardless of how much text follows.
struct Window {
    hard: usize,
    line: usize,
    paragraph: usize,
}

impl Window {
    /// `None` if `text` is at most `limit` chars long.
    fn find(text: &str, limit: usize) -> Option<Self> {
        let mut offsets = text.char_indices().skip(limit).map(|(offset, _)| offset);
        let hard = offsets.next()?;
        let line = offsets.next().unwrap_or(text.len());
        let paragraph = offsets.next().unwrap_or(text.len());
        Some(Self {
            hard,
            line,
            paragraph,
        })
    }

    /// Split `text` into `(chunk, remainder)` at the best break point.
    ///
    /// A separator starting at char index `limit` still counts, since the
    /// chunk before it is exactly `limit` characters long.
    fn cut<'a>(&self, text: &'a str) -> (&'a str, &'a str) {
        if let Some(pos) = text[..self.paragraph].rfind("\n\n") {
            return (&text[..pos], &text[pos + 2..]);
        }
        if let Some(pos) = text[..self.line].rfind('\n') {
            return (&text[..pos], &text[pos + 1..]);
        }
        text.split_at(self.hard)
    }
}

fn push_trimmed(chunks: &mut Vec<String>, piece: &str) {
    let piece = piece.trim();
    if !piece.is_empty() {
        chunks.push(piece.to_string());
    }
}
