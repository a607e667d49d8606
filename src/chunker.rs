//! Splitting narration text into synthesis-sized chunks.
//!
//! Chunks are contiguous slices of the input: joining them in index order
//! gives back the input byte for byte. Limits count characters, not bytes.
//! Cut preference:
//! 1. paragraph break (`\n\n`)
//! 2. sentence end (`.!?` followed by whitespace) or a single line break
//! 3. any whitespace
//! 4. hard cut at the limit
//!
//! The first two tiers only apply when the chunk stays at least half full,
//! so an early paragraph break doesn't produce a run of tiny requests.

/// One ordered slice of normalized text.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TextChunk {
    pub index: usize,
    pub text: String,
    pub char_count: usize,
}

/// Lazily split `text` into chunks of at most `limit` characters.
///
/// A `limit` of zero is treated as one. Empty text yields no chunks.
pub fn chunk(text: &str, limit: usize) -> Chunks<'_> {
    Chunks {
        text,
        pos: 0,
        index: 0,
        limit: limit.max(1),
    }
}

#[derive(Debug, Clone)]
pub struct Chunks<'a> {
    text: &'a str,
    pos: usize,
    index: usize,
    limit: usize,
}

impl Iterator for Chunks<'_> {
    type Item = TextChunk;

    fn next(&mut self) -> Option<TextChunk> {
        let rest = &self.text[self.pos..];
        if rest.is_empty() {
            return None;
        }

        let piece = &rest[..cut_point(rest, self.limit)];
        self.pos += piece.len();

        let chunk = TextChunk {
            index: self.index,
            text: piece.to_string(),
            char_count: piece.chars().count(),
        };
        self.index += 1;
        Some(chunk)
    }
}

impl std::iter::FusedIterator for Chunks<'_> {}

/// Byte length of the next chunk taken from the front of `rest`.
fn cut_point(rest: &str, limit: usize) -> usize {
    let Some(window_end) = byte_offset(rest, limit) else {
        return rest.len();
    };
    let window = &rest[..window_end];
    let min_fill = byte_offset(rest, limit / 2).unwrap_or(0);

    if let Some(cut) = window.rfind("\n\n").map(|i| i + 2).filter(|&c| c >= min_fill) {
        return cut;
    }
    if let Some(cut) = sentence_cut(window).filter(|&c| c >= min_fill) {
        return cut;
    }
    window
        .char_indices()
        .rev()
        .find(|(_, c)| c.is_whitespace())
        .map(|(i, c)| i + c.len_utf8())
        .unwrap_or(window_end)
}

/// Byte offset of the `n`th character, or `None` if `text` is shorter.
fn byte_offset(text: &str, n: usize) -> Option<usize> {
    text.char_indices().nth(n).map(|(i, _)| i)
}

/// End of the last sentence (including its trailing whitespace character)
/// or line break in `window`.
fn sentence_cut(window: &str) -> Option<usize> {
    let mut chars = window.char_indices().peekable();
    let mut best = None;
    while let Some((i, c)) = chars.next() {
        match c {
            '\n' => best = Some(i + 1),
            '.' | '!' | '?' => {
                if let Some(&(j, next)) = chars.peek() {
                    if next.is_whitespace() {
                        best = Some(j + next.len_utf8());
                    }
                }
            }
            _ => {}
        }
    }
    best
}

/// The first `char_count` characters of `text`, pulled back to the last
/// sentence end in the second half of that prefix when there is one.
pub fn preview(text: &str, char_count: usize) -> &str {
    let Some(end) = byte_offset(text, char_count) else {
        return text;
    };
    let head = &text[..end];
    let lookback_start = byte_offset(head, char_count / 2).unwrap_or(0);

    let sentence_end = head
        .char_indices()
        .filter(|&(i, c)| i >= lookback_start && matches!(c, '.' | '!' | '?'))
        .map(|(i, c)| i + c.len_utf8())
        .filter(|&after| text[after..].chars().next().map_or(true, char::is_whitespace))
        .last();

    match sentence_end {
        Some(cut) => &head[..cut],
        None => head,
    }
}
