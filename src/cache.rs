//! Thread-local cache of parsed patterns.
//!
//! Scripts are re-run for every invocation; parsing their element strings
//! once per thread keeps repeated applications cheap.
//! Cache is capped at 256 entries; the whole cache is dropped when full.

use crate::matcher::{MatchError, Pattern};
use std::cell::RefCell;
use std::collections::HashMap;

const MAX_CACHE_ENTRIES: usize = 256;

thread_local! {
    // Key is the element lines joined by '\n', the form Pattern::parse reads.
    static PATTERN_CACHE: RefCell<HashMap<String, Pattern>> =
        RefCell::new(HashMap::new());
}

/// Get a parsed pattern from cache, or parse and cache it.
///
/// Parse failures are not cached.
pub fn get_or_parse_pattern<S: AsRef<str>>(lines: &[S]) -> Result<Pattern, MatchError> {
    let cache_key = lines
        .iter()
        .map(|line| line.as_ref())
        .collect::<Vec<&str>>()
        .join("\n");

    PATTERN_CACHE.with(|cache| {
        let mut cache = cache.borrow_mut();

        if let Some(p) = cache.get(&cache_key) {
            return Ok(p.clone());
        }

        if cache.len() >= MAX_CACHE_ENTRIES {
            cache.clear();
        }

        let parsed = Pattern::from_lines(lines)?;
        cache.insert(cache_key, parsed.clone());
        Ok(parsed)
    })
}

/// Clear the pattern cache (mainly for testing).
pub fn clear_cache() {
    PATTERN_CACHE.with(|cache| {
        cache.borrow_mut().clear();
    });
}

/// Get cache statistics for monitoring.
pub fn cache_size() -> usize {
    PATTERN_CACHE.with(|cache| cache.borrow().len())
}
