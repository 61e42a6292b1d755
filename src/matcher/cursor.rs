use crate::edit::{Edit, EditResult, EditVerification};
use crate::il::{Instruction, InstructionStream, LabelId, OpCode, Operand};
use crate::matcher::errors::MatchError;
use crate::matcher::pattern::Pattern;

/// Where a forward search matched.
#[derive(Debug, Clone, PartialEq)]
pub struct MatchResult {
    pub start: usize,
    /// Index of the last matched instruction
    pub end: usize,
    /// Opcode of the instruction the cursor landed on
    pub opcode: OpCode,
    /// Operand of the instruction the cursor landed on
    pub operand: Operand,
}

/// A cursor over a private copy of a method body.
///
/// Searches move the cursor to the match; every mutation is expressed as an
/// [`Edit`] applied at the cursor. Positions range over `0..=len`, where
/// `len` is the append position.
///
/// A search scans from the cursor itself when the cursor was placed by
/// [`start`](Self::start), [`end`](Self::end), [`advance`](Self::advance) or
/// an edit, and from one past it when the cursor still rests on the previous
/// match. Repeating a search therefore walks successive matches.
#[derive(Debug, Clone)]
pub struct CodeMatcher {
    stream: InstructionStream,
    pos: usize,
    on_match: bool,
    created: Vec<LabelId>,
    applied: usize,
}

impl CodeMatcher {
    pub fn new(stream: InstructionStream) -> Self {
        Self {
            stream,
            pos: 0,
            on_match: false,
            created: Vec::new(),
            applied: 0,
        }
    }

    pub fn pos(&self) -> usize {
        self.pos
    }

    pub fn len(&self) -> usize {
        self.stream.len()
    }

    pub fn is_empty(&self) -> bool {
        self.stream.is_empty()
    }

    /// Whether the cursor rests on an instruction (not the append position).
    pub fn is_valid(&self) -> bool {
        self.pos < self.stream.len()
    }

    pub fn stream(&self) -> &InstructionStream {
        &self.stream
    }

    pub fn into_stream(self) -> InstructionStream {
        self.stream
    }

    /// Instruction under the cursor.
    pub fn instruction(&self) -> Result<&Instruction, MatchError> {
        self.stream
            .get(self.pos)
            .ok_or(MatchError::NoInstruction { position: self.pos })
    }

    /// Labels allocated through [`create_label`](Self::create_label).
    pub fn created_labels(&self) -> &[LabelId] {
        &self.created
    }

    /// Number of edits that changed the stream.
    pub fn edits_applied(&self) -> usize {
        self.applied
    }

    pub fn start(&mut self) -> &mut Self {
        self.place(0)
    }

    /// Move to the append position.
    pub fn end(&mut self) -> &mut Self {
        let len = self.stream.len();
        self.place(len)
    }

    pub fn advance(&mut self, offset: isize) -> Result<&mut Self, MatchError> {
        let len = self.stream.len();
        let target = self.pos as isize + offset;
        if target < 0 || target > len as isize {
            return Err(MatchError::OutOfRange {
                position: target,
                len,
            });
        }
        Ok(self.place(target as usize))
    }

    /// Find `pattern` and move the cursor to its first instruction.
    pub fn match_start_forward(&mut self, pattern: &Pattern) -> Result<MatchResult, MatchError> {
        self.search(pattern, false)
    }

    /// Find `pattern` and move the cursor to its last instruction.
    pub fn match_end_forward(&mut self, pattern: &Pattern) -> Result<MatchResult, MatchError> {
        self.search(pattern, true)
    }

    fn search(&mut self, pattern: &Pattern, to_end: bool) -> Result<MatchResult, MatchError> {
        if !pattern.is_bound() {
            // Surface the first unresolved register by name.
            pattern.bind(&|_: &str| None)?;
        }
        let from = if self.on_match { self.pos + 1 } else { self.pos };
        let start = pattern
            .find_from(self.stream.instructions(), from)
            .ok_or_else(|| MatchError::PatternNotFound {
                pattern: pattern.to_string(),
                from,
            })?;
        let end = start + pattern.len() - 1;
        self.pos = if to_end { end } else { start };
        self.on_match = true;

        let landed = self.instruction()?;
        Ok(MatchResult {
            start,
            end,
            opcode: landed.opcode,
            operand: landed.operand.clone(),
        })
    }

    /// Splice `instructions` in at the cursor; the cursor stays on the first
    /// inserted instruction. Labels on the displaced instruction stay with it.
    pub fn insert(&mut self, instructions: Vec<Instruction>) -> Result<&mut Self, MatchError> {
        self.apply(Edit::insert(self.pos, instructions))?;
        Ok(self.place(self.pos))
    }

    /// Like [`insert`](Self::insert), leaving the cursor after the inserted run.
    pub fn insert_and_advance(
        &mut self,
        instructions: Vec<Instruction>,
    ) -> Result<&mut Self, MatchError> {
        let count = instructions.len();
        self.apply(Edit::insert(self.pos, instructions))?;
        Ok(self.place(self.pos + count))
    }

    /// Overwrite the instruction at the cursor, keeping its labels.
    pub fn set(&mut self, opcode: OpCode, operand: Operand) -> Result<&mut Self, MatchError> {
        self.apply(Edit::replace(self.pos, opcode, operand))?;
        Ok(self.place(self.pos))
    }

    pub fn set_and_advance(
        &mut self,
        opcode: OpCode,
        operand: Operand,
    ) -> Result<&mut Self, MatchError> {
        self.set(opcode, operand)?;
        self.advance(1)
    }

    /// [`set`](Self::set), failing unless the current instruction verifies.
    pub fn set_verified(
        &mut self,
        expected: EditVerification,
        opcode: OpCode,
        operand: Operand,
    ) -> Result<&mut Self, MatchError> {
        self.apply(Edit::replace(self.pos, opcode, operand).with_verification(expected))?;
        Ok(self.place(self.pos))
    }

    /// Allocate a fresh label and bind it to the instruction at the cursor.
    pub fn create_label(&mut self) -> Result<LabelId, MatchError> {
        if !self.is_valid() {
            return Err(MatchError::NoInstruction { position: self.pos });
        }
        let label = self.stream.new_label().ok_or(MatchError::LabelsExhausted)?;
        self.apply(Edit::bind_label(self.pos, label))?;
        self.created.push(label);
        Ok(label)
    }

    /// Insert an unconditional branch to `label` and step past it.
    pub fn branch_to(&mut self, label: LabelId) -> Result<&mut Self, MatchError> {
        self.insert_and_advance(vec![Instruction::branch(label)])
    }

    fn apply(&mut self, edit: Edit) -> Result<(), MatchError> {
        if let EditResult::Applied { .. } = edit.apply(&mut self.stream)? {
            self.applied += 1;
        }
        Ok(())
    }

    fn place(&mut self, pos: usize) -> &mut Self {
        self.pos = pos;
        self.on_match = false;
        self
    }
}
