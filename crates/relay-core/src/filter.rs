//! Rule filter evaluation. Pure: no I/O, no state.

use regex::Regex;

use crate::{domain::SenderPeer, rules::FilterOptions};

/// Decide whether a message passes a rule's filters.
///
/// Filters are AND-combined; an empty `FilterOptions` accepts everything.
pub fn should_process(text: &str, sender: Option<SenderPeer>, opts: &FilterOptions) -> bool {
    if let Some(needle) = opts.contains_text.as_deref().filter(|s| !s.is_empty()) {
        if !text_matches(text, needle, opts.is_regex) {
            return false;
        }
    }

    let sender_user = sender.and_then(|s| s.user_id()).map(|u| u.0);

    if !opts.allowed_sender_ids.is_empty() {
        match sender_user {
            Some(id) if opts.allowed_sender_ids.contains(&id) => {}
            _ => return false,
        }
    }

    if let Some(id) = sender_user {
        if opts.blocked_sender_ids.contains(&id) {
            return false;
        }
    }

    true
}

fn text_matches(text: &str, needle: &str, is_regex: bool) -> bool {
    if !is_regex {
        return text.to_lowercase().contains(&needle.to_lowercase());
    }
    match Regex::new(needle) {
        Ok(re) => re.is_match(text),
        Err(e) => {
            tracing::warn!(pattern = needle, error = %e, "invalid filter regex, treating as no match");
            false
        }
    }
}
