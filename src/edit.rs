use crate::il::{Instruction, InstructionStream, LabelId, OpCode, Operand};
use thiserror::Error;
use xxhash_rust::xxh3::xxh3_64;

/// The fundamental edit primitive: a verified, position-addressed stream mutation.
///
/// Every cursor operation (insert, set, label binding) compiles down to this
/// type. Intelligence lives in locating the position, not in applying it.
#[derive(Debug, Clone, PartialEq)]
#[must_use = "Edit does nothing until apply() is called"]
pub struct Edit {
    /// Index of the instruction the edit targets (`len` is valid for inserts)
    pub position: usize,
    pub kind: EditKind,
    /// What we expect to find at `position` before applying
    pub expected_before: Option<EditVerification>,
}

#[derive(Debug, Clone, PartialEq)]
pub enum EditKind {
    /// Splice instructions in before `position`
    Insert(Vec<Instruction>),
    /// Overwrite opcode and operand, keeping labels
    Replace { opcode: OpCode, operand: Operand },
    /// Attach a label to the instruction at `position`
    BindLabel(LabelId),
}

/// Verification strategy for edit safety.
#[derive(Debug, Clone, PartialEq)]
pub enum EditVerification {
    /// Opcode and operand must match (labels are ignored)
    ExactMatch(Instruction),
    /// xxh3 hash of the instruction's assembly text
    Hash(u64),
}

impl EditVerification {
    /// Check if the instruction matches the verification criteria.
    pub fn matches(&self, instruction: &Instruction) -> bool {
        match self {
            EditVerification::ExactMatch(expected) => expected.same_code(instruction),
            EditVerification::Hash(expected_hash) => hash_instruction(instruction) == *expected_hash,
        }
    }

    pub fn from_instruction(instruction: &Instruction) -> Self {
        EditVerification::ExactMatch(instruction.without_labels())
    }

    /// Get hash value regardless of variant.
    pub fn hash(&self) -> u64 {
        match self {
            EditVerification::Hash(h) => *h,
            EditVerification::ExactMatch(inst) => hash_instruction(inst),
        }
    }
}

fn hash_instruction(instruction: &Instruction) -> u64 {
    xxh3_64(instruction.to_string().as_bytes())
}

#[derive(Error, Debug, Clone, PartialEq)]
pub enum EditError {
    #[error("before-instruction verification failed at {position}: expected {expected}, found {found}")]
    BeforeMismatch {
        position: usize,
        expected: String,
        found: String,
    },

    #[error("invalid position {position} in stream of length {len}")]
    InvalidPosition { position: usize, len: usize },

    #[error("operand '{operand}' does not fit opcode {opcode}")]
    InvalidOperand { opcode: OpCode, operand: String },

    #[error("label {label} is already bound at {position}")]
    LabelAlreadyBound { label: LabelId, position: usize },
}

/// Result of applying an edit.
#[derive(Debug, Clone, PartialEq, Eq)]
#[must_use = "EditResult should be checked for success/already-applied"]
pub enum EditResult {
    /// Edit was applied; `inserted` instructions were added
    Applied { position: usize, inserted: usize },
    /// The stream already had the desired content
    AlreadyApplied { position: usize },
}

impl Edit {
    pub fn insert(position: usize, instructions: Vec<Instruction>) -> Self {
        Self {
            position,
            kind: EditKind::Insert(instructions),
            expected_before: None,
        }
    }

    pub fn replace(position: usize, opcode: OpCode, operand: Operand) -> Self {
        Self {
            position,
            kind: EditKind::Replace { opcode, operand },
            expected_before: None,
        }
    }

    pub fn bind_label(position: usize, label: LabelId) -> Self {
        Self {
            position,
            kind: EditKind::BindLabel(label),
            expected_before: None,
        }
    }

    /// Require the instruction at `position` to verify before applying.
    pub fn with_verification(mut self, verification: EditVerification) -> Self {
        self.expected_before = Some(verification);
        self
    }

    /// Validate the edit against the current stream.
    fn validate(&self, stream: &InstructionStream) -> Result<(), EditError> {
        let len = stream.len();
        let in_range = match self.kind {
            EditKind::Insert(_) => self.position <= len,
            _ => self.position < len,
        };
        if !in_range {
            return Err(EditError::InvalidPosition {
                position: self.position,
                len,
            });
        }

        if let EditKind::Replace { opcode, operand } = &self.kind {
            if !operand.fits(opcode.operand_kind()) {
                return Err(EditError::InvalidOperand {
                    opcode: *opcode,
                    operand: operand.to_string(),
                });
            }
        }

        if let EditKind::BindLabel(label) = &self.kind {
            if let Some(bound) = stream.resolve(*label) {
                if bound != self.position {
                    return Err(EditError::LabelAlreadyBound {
                        label: *label,
                        position: bound,
                    });
                }
            }
        }

        if let Some(verification) = &self.expected_before {
            let found = stream.get(self.position);
            if !found.is_some_and(|inst| verification.matches(inst)) {
                return Err(EditError::BeforeMismatch {
                    position: self.position,
                    expected: match verification {
                        EditVerification::ExactMatch(inst) => inst.to_string(),
                        EditVerification::Hash(h) => format!("xxh3:{h:016x}"),
                    },
                    found: found.map_or_else(|| "<end>".to_string(), |i| i.to_string()),
                });
            }
        }

        Ok(())
    }

    /// Apply this edit to the stream.
    ///
    /// Nothing is modified when validation fails.
    pub fn apply(&self, stream: &mut InstructionStream) -> Result<EditResult, EditError> {
        self.validate(stream)?;
        let position = self.position;

        match &self.kind {
            EditKind::Insert(instructions) => {
                if instructions.is_empty() {
                    return Ok(EditResult::AlreadyApplied { position });
                }
                stream.splice_at(position, instructions.clone());
                Ok(EditResult::Applied {
                    position,
                    inserted: instructions.len(),
                })
            }
            EditKind::Replace { opcode, operand } => {
                let Some(inst) = stream.get_mut(position) else {
                    unreachable!("position validated above");
                };
                if inst.opcode == *opcode && inst.operand == *operand {
                    return Ok(EditResult::AlreadyApplied { position });
                }
                inst.opcode = *opcode;
                inst.operand = operand.clone();
                Ok(EditResult::Applied {
                    position,
                    inserted: 0,
                })
            }
            EditKind::BindLabel(label) => {
                let Some(inst) = stream.get_mut(position) else {
                    unreachable!("position validated above");
                };
                if inst.has_label(*label) {
                    return Ok(EditResult::AlreadyApplied { position });
                }
                inst.add_label(*label);
                Ok(EditResult::Applied {
                    position,
                    inserted: 0,
                })
            }
        }
    }
}
