//! Instruction stream model.
//!
//! A method body is an [`InstructionStream`]: an owned arena of
//! [`Instruction`]s, each carrying the labels that resolve to it. Branches
//! refer to [`LabelId`] handles rather than positions, so edits that shift
//! positions never invalidate a branch destination.

pub mod asm;
pub mod errors;
pub mod instruction;
pub mod opcode;
pub mod stream;

pub use errors::IlError;
pub use instruction::{FieldRef, Instruction, LabelId, MethodRef, Operand};
pub use opcode::{FlowControl, OpCode, OperandKind};
pub use stream::InstructionStream;
