//! Character-based token estimation
//!
//! Fallback estimator used when no native tokenizer is available.
//! Roughly 4 ASCII characters per token; CJK text is closer to one
//! token per character.

/// Characters per token for ASCII text (rough average for English)
const ASCII_CHARS_PER_TOKEN: f32 = 4.0;

/// Characters per token for CJK text
const CJK_CHARS_PER_TOKEN: f32 = 1.5;

/// Characters per token for other Unicode
const OTHER_CHARS_PER_TOKEN: f32 = 2.0;

/// Estimate the token count of a text without a tokenizer.
///
/// Single-pass character analysis, no allocation.
#[inline]
pub fn estimate_tokens(text: &str) -> usize {
    if text.is_empty() {
        return 0;
    }

    let mut ascii_count = 0u32;
    let mut cjk_count = 0u32;
    let mut other_count = 0u32;

    for c in text.chars() {
        if c.is_ascii() {
            ascii_count += 1;
        } else if is_cjk(c) {
            cjk_count += 1;
        } else {
            other_count += 1;
        }
    }

    let tokens = ascii_count as f32 / ASCII_CHARS_PER_TOKEN
        + cjk_count as f32 / CJK_CHARS_PER_TOKEN
        + other_count as f32 / OTHER_CHARS_PER_TOKEN;

    tokens.ceil() as usize
}

/// Check if a character is in a CJK range
fn is_cjk(c: char) -> bool {
    matches!(c,
        '\u{4E00}'..='\u{9FFF}'     // CJK Unified Ideographs
        | '\u{3040}'..='\u{30FF}'   // Hiragana + Katakana
        | '\u{AC00}'..='\u{D7AF}'   // Hangul Syllables
        | '\u{3400}'..='\u{4DBF}'   // CJK Extension A
    )
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_empty_text() {
        assert_eq!(estimate_tokens(""), 0);
    }

    #[test]
    fn test_ascii_estimate() {
        // 16 ASCII chars / 4 = 4 tokens
        assert_eq!(estimate_tokens("abcdefghijklmnop"), 4);
    }

    #[test]
    fn test_cjk_heavier_than_ascii() {
        let ascii = estimate_tokens("hello world!");
        let cjk = estimate_tokens("안녕하세요 세계여!");
        assert!(cjk > ascii);
    }
}
