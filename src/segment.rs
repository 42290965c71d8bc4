//! Splitting extracted text into the segments that get embedded.
//!
//! A segment is one sentence, as found by the Unicode sentence boundary
//! rules. Sentences longer than the segment limit are further cut into
//! windows at whitespace so no single embedding input grows unbounded.

use unicode_segmentation::UnicodeSegmentation;

/// Default upper bound on a segment's length, in characters.
pub const DEFAULT_MAX_SEGMENT_CHARS: usize = 1024;

/// Split `text` into trimmed, non-empty sentence segments.
///
/// # Examples
///
/// ```
/// use docsift::segment::{segment_text, DEFAULT_MAX_SEGMENT_CHARS};
///
/// let segments = segment_text(
///     "Cats purr. Dogs bark!\n\nBirds sing?",
///     DEFAULT_MAX_SEGMENT_CHARS,
/// );
/// assert_eq!(segments, vec!["Cats purr.", "Dogs bark!", "Birds sing?"]);
/// ```
pub fn segment_text(text: &str, max_chars: usize) -> Vec<String> {
    let max_chars = max_chars.max(1);
    let mut segments = Vec::new();

    for sentence in text.unicode_sentences() {
        let sentence = sentence.trim();
        if sentence.is_empty() {
            continue;
        }
        if sentence.chars().count() <= max_chars {
            segments.push(sentence.to_string());
        } else {
            split_long(sentence, max_chars, &mut segments);
        }
    }

    segments
}

/// Window an overlong sentence at word boundaries.
///
/// Words that alone exceed the limit are cut at character boundaries.
fn split_long(sentence: &str, max_chars: usize, out: &mut Vec<String>) {
    let mut current = String::new();
    let mut current_chars = 0;

    for word in sentence.split_whitespace() {
        let word_chars = word.chars().count();

        if word_chars > max_chars {
            if !current.is_empty() {
                out.push(std::mem::take(&mut current));
                current_chars = 0;
            }
            let chars: Vec<char> = word.chars().collect();
            for piece in chars.chunks(max_chars) {
                out.push(piece.iter().collect());
            }
            continue;
        }

        let needed = if current.is_empty() {
            word_chars
        } else {
            current_chars + 1 + word_chars
        };
        if needed > max_chars {
            out.push(std::mem::take(&mut current));
            current_chars = 0;
        }
        if !current.is_empty() {
            current.push(' ');
            current_chars += 1;
        }
        current.push_str(word);
        current_chars += word_chars;
    }

    if !current.is_empty() {
        out.push(current);
    }
}
