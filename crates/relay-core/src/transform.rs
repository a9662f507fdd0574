//! Content transformation: text edits with formatting-span bookkeeping.
//!
//! All offsets are UTF-16 code units. Every step leaves the span list inside
//! the bounds of the text it produced; the last step drops anything that
//! still does not fit.
//!
//! Span re-anchoring after text replacements is best-effort: spans untouched
//! by a replacement are shifted exactly, spans that overlap one are looked up
//! by their original content in the new text and dropped if it is gone.

use regex::{Regex, RegexBuilder};

use crate::{
    entities::{self, FormattingSpan},
    rules::{EditOptions, TextReplacement},
    text::{byte_index, slice_utf16, strip_html_tags, utf16_len, utf16_offset},
};

#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct Transformed {
    pub text: String,
    pub spans: Vec<FormattingSpan>,
}

impl Transformed {
    pub fn is_empty(&self) -> bool {
        self.text.trim().is_empty()
    }
}

/// Run the full edit pipeline over a message body.
pub fn apply_edits(text: &str, spans: &[FormattingSpan], opts: &EditOptions) -> Transformed {
    // 1. Strip formatting: markup goes, and with it every span.
    let (mut text, mut spans) = if opts.strip_formatting {
        (strip_html_tags(text), Vec::new())
    } else {
        let t = text.to_string();
        let len = utf16_len(&t);
        (t, entities::sanitize(spans.to_vec(), len))
    };

    // 2. Custom emoji cannot be re-sent; cut them out.
    (text, spans) = remove_custom_emoji(&text, &spans);

    // 3. Replacements, in rule order.
    for rep in &opts.text_replacements {
        (text, spans) = apply_replacement(&text, &spans, rep);
    }

    // 4. Prepend.
    if let Some(prefix) = opts.prepend_text.as_deref().filter(|p| !p.is_empty()) {
        (text, spans) = prepend(&text, &spans, prefix);
    }

    // 5. Append, then footer.
    if let Some(suffix) = opts.append_text.as_deref().filter(|s| !s.is_empty()) {
        text.push_str(suffix);
    }
    if let Some(footer) = opts.custom_footer.as_deref().filter(|s| !s.is_empty()) {
        if !text.is_empty() && !text.ends_with('\n') {
            text.push('\n');
        }
        text.push_str(footer);
    }

    // 6. Links go last so no remap is needed afterwards.
    if opts.remove_links {
        spans.retain(|s| !s.kind.is_link());
    }

    // 7. Sanitize.
    let len = utf16_len(&text);
    let spans = entities::sanitize(spans, len);
    Transformed { text, spans }
}

/// Prefix `text` and shift every span right by the prefix length.
pub fn prepend(
    text: &str,
    spans: &[FormattingSpan],
    prefix: &str,
) -> (String, Vec<FormattingSpan>) {
    let shift = utf16_len(prefix);
    let out = spans
        .iter()
        .map(|s| s.moved(s.offset + shift, s.length))
        .collect();
    (format!("{prefix}{text}"), out)
}

/// Excise custom-emoji spans from the text and drop them from the span list.
///
/// Surviving spans move left by the amount removed before them; a span that
/// contained an emoji shrinks by the emoji's length.
pub fn remove_custom_emoji(
    text: &str,
    spans: &[FormattingSpan],
) -> (String, Vec<FormattingSpan>) {
    let mut sorted: Vec<&FormattingSpan> = spans.iter().collect();
    sorted.sort_by_key(|s| s.offset);

    // Merge overlapping emoji ranges; skip any that do not sit on char boundaries.
    let mut cuts: Vec<(usize, usize)> = Vec::new();
    for span in sorted.iter().filter(|s| s.kind.is_custom_emoji()) {
        if slice_utf16(text, span.offset, span.end()).is_none() {
            tracing::warn!(
                offset = span.offset,
                length = span.length,
                "custom emoji span not on a char boundary, leaving text in place"
            );
            continue;
        }
        match cuts.last_mut() {
            Some(last) if span.offset <= last.1 => last.1 = last.1.max(span.end()),
            _ => cuts.push((span.offset, span.end())),
        }
    }

    if cuts.is_empty() {
        let kept = spans
            .iter()
            .filter(|s| !s.kind.is_custom_emoji())
            .cloned()
            .collect();
        return (text.to_string(), kept);
    }

    let mut out = String::with_capacity(text.len());
    let mut cursor = 0usize;
    for &(start, end) in &cuts {
        // Boundaries were validated above.
        let a = byte_index(text, start).unwrap_or(cursor);
        let b = byte_index(text, end).unwrap_or(a);
        out.push_str(&text[cursor..a]);
        cursor = b;
    }
    out.push_str(&text[cursor..]);

    let removed_before = |pos: usize| -> usize {
        cuts.iter()
            .filter(|&&(start, _)| start < pos)
            .map(|&(start, end)| end.min(pos) - start)
            .sum()
    };

    let kept = spans
        .iter()
        .filter(|s| !s.kind.is_custom_emoji())
        .map(|s| {
            let start = s.offset - removed_before(s.offset);
            let end = s.end() - removed_before(s.end());
            s.moved(start, end - start)
        })
        .collect();

    (out, kept)
}

/// One textual change, in the coordinates of the text before the change.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
struct Edit {
    start: usize,
    end: usize,
    new_len: usize,
}

impl Edit {
    fn delta(&self) -> isize {
        self.new_len as isize - (self.end - self.start) as isize
    }

    fn touches(&self, start: usize, end: usize) -> bool {
        if self.start == self.end {
            start < self.start && self.start < end
        } else {
            self.start < end && self.end > start
        }
    }

    fn is_before(&self, pos: usize) -> bool {
        self.end <= pos
    }
}

fn compile(rep: &TextReplacement) -> Option<Regex> {
    if rep.find.is_empty() {
        return None;
    }
    let built = if rep.is_regex {
        Regex::new(&rep.find)
    } else {
        RegexBuilder::new(&regex::escape(&rep.find))
            .case_insensitive(true)
            .build()
    };
    match built {
        Ok(re) => Some(re),
        Err(e) => {
            tracing::warn!(pattern = %rep.find, error = %e, "invalid replacement regex, skipping");
            None
        }
    }
}

/// Apply one replacement and re-anchor spans.
pub fn apply_replacement(
    text: &str,
    spans: &[FormattingSpan],
    rep: &TextReplacement,
) -> (String, Vec<FormattingSpan>) {
    let Some(re) = compile(rep) else {
        return (text.to_string(), spans.to_vec());
    };

    let mut out = String::with_capacity(text.len());
    let mut edits = Vec::new();
    let mut last = 0usize;
    for caps in re.captures_iter(text) {
        let Some(m) = caps.get(0) else {
            continue;
        };
        out.push_str(&text[last..m.start()]);
        let mut replacement = String::new();
        if rep.is_regex {
            caps.expand(&rep.replace_with, &mut replacement);
        } else {
            replacement.push_str(&rep.replace_with);
        }
        if m.as_str() != replacement {
            edits.push(Edit {
                start: utf16_offset(text, m.start()),
                end: utf16_offset(text, m.end()),
                new_len: utf16_len(&replacement),
            });
        }
        out.push_str(&replacement);
        last = m.end();
    }
    out.push_str(&text[last..]);

    if edits.is_empty() {
        return (text.to_string(), spans.to_vec());
    }

    let remapped = spans
        .iter()
        .filter_map(|s| remap_span(text, &out, s, &edits))
        .collect();
    (out, remapped)
}

fn remap_span(
    old_text: &str,
    new_text: &str,
    span: &FormattingSpan,
    edits: &[Edit],
) -> Option<FormattingSpan> {
    let shift: isize = edits
        .iter()
        .filter(|e| e.is_before(span.offset))
        .map(Edit::delta)
        .sum();
    let estimate = (span.offset as isize + shift).max(0) as usize;

    if !edits.iter().any(|e| e.touches(span.offset, span.end())) {
        return Some(span.moved(estimate, span.length));
    }

    // The span overlaps a change: look for its original content in the new text.
    let original = slice_utf16(old_text, span.offset, span.end()).filter(|s| !s.is_empty());
    let found = original.and_then(|needle| {
        new_text
            .match_indices(needle)
            .map(|(byte, _)| utf16_offset(new_text, byte))
            .min_by_key(|pos| pos.abs_diff(estimate))
    });

    match found {
        Some(pos) => Some(span.moved(pos, span.length)),
        None => {
            tracing::warn!(
                offset = span.offset,
                length = span.length,
                kind = ?span.kind,
                "formatting span lost its text after replacement, dropping"
            );
            None
        }
    }
}
