pub mod applicator;
pub mod builtin;
pub mod loader;
pub mod schema;
pub mod version;

pub use applicator::{
    apply_script, check_script, try_apply, PatchError, PatchOutcome, Reporter, ScriptCheck,
    StepReport, StepStatus, TracingReporter,
};
pub use builtin::PatchSet;
pub use loader::{load_dir, load_from_path, load_from_str, ConfigError};
pub use schema::{
    Action, Anchor, CaptureKind, Metadata, PatchScript, Step, ValidationError, ValidationIssue,
};
pub use version::{matches_requirement, VersionError, VersionGate};
