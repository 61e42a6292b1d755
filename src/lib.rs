//! Fishpond Patcher: sequence patching for compiled method bodies
//!
//! Rewrites CIL-like instruction streams with declarative patch scripts so
//! the fish pond drawing code follows a configured footprint instead of the
//! hard-coded 5x5 tiles.
//!
//! # Architecture
//!
//! All stream mutations compile down to a single primitive: [`Edit`], a
//! verified insert, replace or label binding at one position. Intelligence
//! lives in locating anchors (via [`Pattern`]s searched by a
//! [`CodeMatcher`]), not in the application logic.
//!
//! # Safety
//!
//! - Branch targets are labels on instructions, so inserts never move them
//! - Replacements can verify the instruction they overwrite
//! - Every created label must be bound once and referenced
//! - Patched streams are checked for stack balance
//! - A failing script returns the untouched input
//!
//! # Example
//!
//! ```no_run
//! use fishpond_patcher::{apply_script, il::asm, ConfigRecord, PatchSet, TracingReporter};
//!
//! let scripts = PatchSet::builtin().expect("builtin scripts");
//! let script = scripts
//!     .select("FishPond::draw", Some("1.6.9"))
//!     .expect("valid version")
//!     .expect("script for target");
//!
//! let body = asm::parse(&std::fs::read_to_string("draw.il").unwrap()).unwrap();
//! let outcome = apply_script(script, &body, &ConfigRecord::square(4), &mut TracingReporter);
//! println!("{outcome}");
//! ```

pub mod atomic;
pub mod cache;
pub mod compute;
pub mod edit;
pub mod il;
pub mod matcher;
pub mod script;
pub mod settings;
pub mod validate;

// Re-exports
pub use compute::{Computer, ConfigRecord, InvalidConfigError, Rect, Value, Vec2};
pub use edit::{Edit, EditError, EditResult, EditVerification};
pub use il::{Instruction, InstructionStream, LabelId, OpCode, Operand};
pub use matcher::{CodeMatcher, MatchError, MatchResult, Pattern, PatternElement};
pub use script::{
    apply_script, check_script, load_from_path, load_from_str, try_apply, ConfigError,
    PatchError, PatchOutcome, PatchScript, PatchSet, Reporter, TracingReporter, VersionError,
};
pub use settings::{Settings, SettingsError};
pub use validate::{validate_stream, StreamError};
