use thiserror::Error;

#[derive(Error, Debug, Clone, PartialEq)]
pub enum IlError {
    #[error("line {line}: unknown opcode '{mnemonic}'{hint}")]
    UnknownOpcode {
        line: usize,
        mnemonic: String,
        /// Rendered suggestion, empty when there is none
        hint: String,
    },

    #[error("line {line}: invalid operand for {opcode}: {message}")]
    BadOperand {
        line: usize,
        opcode: String,
        message: String,
    },

    #[error("line {line}: label '{name}' defined twice")]
    DuplicateLabel { line: usize, name: String },

    #[error("label '{name}' is referenced but never defined")]
    UndefinedLabel { name: String },

    #[error("label '{name}' is not followed by an instruction")]
    DanglingLabel { name: String },

    #[error("label '{name}' is out of range: numbered labels stop at L4294967294")]
    LabelOutOfRange { name: String },
}
