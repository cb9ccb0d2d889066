//! Token estimation used for the per-chunk limit and the context budget.
//!
//! Each CJK ideograph or CJK/full-width punctuation mark is one token. Every other
//! non-whitespace character is a quarter token, rounded up once over the whole
//! text. Whitespace is free.

pub fn is_cjk(c: char) -> bool {
    matches!(c as u32,
        0x3400..=0x4DBF      // CJK Extension A
        | 0x4E00..=0x9FFF    // CJK Unified Ideographs
        | 0xF900..=0xFAFF    // CJK Compatibility Ideographs
        | 0x20000..=0x2FA1F  // Extensions B..F, compatibility supplement
        | 0x3000..=0x303F    // CJK symbols and punctuation
        | 0xFF00..=0xFFEF    // half/full-width forms
    )
}

pub fn estimate_tokens(text: &str) -> usize {
    let mut cjk = 0usize;
    let mut other = 0usize;
    for c in text.chars() {
        if c.is_whitespace() {
            continue;
        }
        if is_cjk(c) {
            cjk += 1;
        } else {
            other += 1;
        }
    }
    cjk + other.div_ceil(4)
}
