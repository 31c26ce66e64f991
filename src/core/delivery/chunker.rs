//! Text splitting for the glasses display
//! This module cuts a message into display-sized chunks, preferring to break
//! after whitespace or punctuation and never splitting a word when it can
//! avoid it.

use serde::Serialize;

use crate::core::bluetooth::BREAK_CHARS;

/// One display-sized slice of a message
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Chunk {
    pub text: String,
    /// Position in the plan, starting at 0
    pub index: usize,
    /// Number of chunks in the plan
    pub total: usize,
}

fn is_break_char(c: char) -> bool {
    BREAK_CHARS.contains(&c)
}

/// Splits `text` into chunks of about `chunk_size` characters.
///
/// Lengths are counted in `char`s. When a cut would land inside the text,
/// the positions `end, end-1, ...` (at most `window` of them, never reaching
/// back to the chunk start) are searched for a break character, which then
/// ends the chunk. Without one the cut moves forward to the next space.
/// Concatenating the chunks always yields `text` again; empty text gives no
/// chunks.
pub fn split_text(text: &str, chunk_size: usize, window: usize) -> Vec<Chunk> {
    let chars: Vec<char> = text.chars().collect();
    let len = chars.len();
    let chunk_size = chunk_size.max(1);

    let mut pieces: Vec<String> = Vec::new();
    let mut start = 0;
    while start < len {
        let mut end = (start + chunk_size).min(len);

        if end < len {
            let backward = (0..window)
                .take_while(|&i| end - i > start)
                .map(|i| end - i)
                .find(|&pos| is_break_char(chars[pos]));

            match backward {
                Some(pos) => end = pos + 1,
                None => {
                    while end < len && chars[end] != ' ' {
                        end += 1;
                    }
                }
            }
        }

        pieces.push(chars[start..end].iter().collect());
        start = end;
    }

    let total = pieces.len();
    pieces
        .into_iter()
        .enumerate()
        .map(|(index, text)| Chunk { text, index, total })
        .collect()
}
