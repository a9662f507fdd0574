//! Text helpers: UTF-16 offset bookkeeping and HTML tag stripping.

use std::sync::OnceLock;

use regex::Regex;

/// Length of `s` in UTF-16 code units.
pub fn utf16_len(s: &str) -> usize {
    s.encode_utf16().count()
}

/// UTF-16 offset of the byte index `byte_idx` (must be a char boundary).
pub fn utf16_offset(s: &str, byte_idx: usize) -> usize {
    utf16_len(&s[..byte_idx])
}

/// Byte index for a UTF-16 offset, or `None` if it splits a surrogate pair
/// or runs past the end.
pub fn byte_index(s: &str, utf16_idx: usize) -> Option<usize> {
    let mut units = 0usize;
    for (byte, ch) in s.char_indices() {
        if units == utf16_idx {
            return Some(byte);
        }
        units += ch.len_utf16();
        if units > utf16_idx {
            return None;
        }
    }
    (units == utf16_idx).then_some(s.len())
}

/// Substring by UTF-16 range. `None` if the range is not on char boundaries.
pub fn slice_utf16(s: &str, start: usize, end: usize) -> Option<&str> {
    if start > end {
        return None;
    }
    let a = byte_index(s, start)?;
    let b = byte_index(s, end)?;
    Some(&s[a..b])
}

fn tag_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"</?[A-Za-z][^<>]*>").expect("valid regex"))
}

/// Remove HTML-like tags and decode the handful of entities chat platforms
/// emit. Text between tags is kept.
pub fn strip_html_tags(text: &str) -> String {
    let stripped = tag_re().replace_all(text, "");
    stripped
        .replace("&lt;", "<")
        .replace("&gt;", ">")
        .replace("&quot;", "\"")
        .replace("&#39;", "'")
        .replace("&nbsp;", " ")
        .replace("&amp;", "&")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn utf16_counts_astral_chars_twice() {
        assert_eq!(utf16_len("a😀b"), 4);
        assert_eq!(byte_index("a😀b", 1), Some(1));
        assert_eq!(byte_index("a😀b", 2), None);
        assert_eq!(byte_index("a😀b", 3), Some(5));
        assert_eq!(byte_index("a😀b", 4), Some(6));
        assert_eq!(slice_utf16("a😀b", 1, 3), Some("😀"));
    }

    #[test]
    fn strips_tags_keeps_text() {
        assert_eq!(
            strip_html_tags(r#"<b>Hot</b> <a href="x">deal</a> 1 &lt; 2"#),
            "Hot deal 1 < 2"
        );
        assert_eq!(strip_html_tags("a < b and c > d"), "a < b and c > d");
    }
}
