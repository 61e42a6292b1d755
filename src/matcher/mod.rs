//! Pattern search and cursor-based editing over instruction streams.

pub mod cursor;
pub mod errors;
pub mod pattern;

pub use cursor::{CodeMatcher, MatchResult};
pub use errors::MatchError;
pub use pattern::{Pattern, PatternElement};
