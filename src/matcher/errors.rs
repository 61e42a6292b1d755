use crate::edit::EditError;
use thiserror::Error;

#[derive(Error, Debug, Clone, PartialEq)]
pub enum MatchError {
    #[error("pattern not found searching forward from {from}: {pattern}")]
    PatternNotFound { pattern: String, from: usize },

    #[error("cursor position {position} out of range 0..={len}")]
    OutOfRange { position: isize, len: usize },

    #[error("pattern has no elements")]
    EmptyPattern,

    #[error("invalid pattern element '{element}': {message}")]
    InvalidElement { element: String, message: String },

    #[error("register '${name}' is not bound")]
    UnboundRegister { name: String },

    #[error("no instruction at cursor position {position}")]
    NoInstruction { position: usize },

    #[error("every label id in the stream is already in use")]
    LabelsExhausted,

    #[error(transparent)]
    Edit(#[from] EditError),
}
