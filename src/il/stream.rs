use crate::il::instruction::{Instruction, LabelId, Operand};
use std::collections::HashMap;
use std::fmt;
use xxhash_rust::xxh3::xxh3_64;

/// An owned method body: the instruction arena plus its label allocator.
///
/// Positions are plain indices into the arena and shift on insertion.
/// Labels never do: they are stored on the instruction they target, so a
/// branch keeps its destination however much code is spliced around it.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct InstructionStream {
    instructions: Vec<Instruction>,
    /// Wider than a label id so reserving `u32::MAX` cannot wrap
    next_label: u64,
}

impl InstructionStream {
    pub fn new() -> Self {
        Self::default()
    }

    /// Wrap existing instructions; fresh labels start above every label
    /// already bound or referenced.
    pub fn from_instructions(instructions: Vec<Instruction>) -> Self {
        let next_label = instructions
            .iter()
            .flat_map(|inst| {
                let mut ids: Vec<u32> = inst.labels.iter().map(|l| l.0).collect();
                match &inst.operand {
                    Operand::Label(label) => ids.push(label.0),
                    Operand::Labels(labels) => ids.extend(labels.iter().map(|l| l.0)),
                    _ => {}
                }
                ids
            })
            .max()
            .map_or(0, |max| u64::from(max) + 1);
        Self {
            instructions,
            next_label,
        }
    }

    pub fn len(&self) -> usize {
        self.instructions.len()
    }

    pub fn is_empty(&self) -> bool {
        self.instructions.is_empty()
    }

    pub fn get(&self, index: usize) -> Option<&Instruction> {
        self.instructions.get(index)
    }

    pub fn instructions(&self) -> &[Instruction] {
        &self.instructions
    }

    pub fn iter(&self) -> std::slice::Iter<'_, Instruction> {
        self.instructions.iter()
    }

    pub fn into_instructions(self) -> Vec<Instruction> {
        self.instructions
    }

    pub fn push(&mut self, instruction: Instruction) {
        self.reserve_labels_of(&instruction);
        self.instructions.push(instruction);
    }

    /// Allocate a label handle that is unique within this stream, or `None`
    /// once every `u32` id is taken.
    pub fn new_label(&mut self) -> Option<LabelId> {
        let id = u32::try_from(self.next_label).ok()?;
        self.next_label += 1;
        Some(LabelId(id))
    }

    pub(crate) fn get_mut(&mut self, index: usize) -> Option<&mut Instruction> {
        self.instructions.get_mut(index)
    }

    /// Splice `instructions` in before `index` (`index == len` appends).
    pub(crate) fn splice_at(&mut self, index: usize, instructions: Vec<Instruction>) {
        for inst in &instructions {
            self.reserve_labels_of(inst);
        }
        self.instructions.splice(index..index, instructions);
    }

    fn reserve_labels_of(&mut self, instruction: &Instruction) {
        let highest = instruction
            .labels
            .iter()
            .chain(instruction.branch_targets().iter())
            .map(|l| l.0)
            .max();
        if let Some(highest) = highest {
            self.next_label = self.next_label.max(u64::from(highest) + 1);
        }
    }

    /// Position of the instruction carrying `label`.
    pub fn resolve(&self, label: LabelId) -> Option<usize> {
        self.instructions.iter().position(|inst| inst.has_label(label))
    }

    /// Every bound label and the positions it is bound at.
    pub fn label_bindings(&self) -> HashMap<LabelId, Vec<usize>> {
        let mut bindings: HashMap<LabelId, Vec<usize>> = HashMap::new();
        for (idx, inst) in self.instructions.iter().enumerate() {
            for label in &inst.labels {
                bindings.entry(*label).or_default().push(idx);
            }
        }
        bindings
    }

    /// How many branch instructions reference each label.
    pub fn label_references(&self) -> HashMap<LabelId, usize> {
        let mut refs: HashMap<LabelId, usize> = HashMap::new();
        for inst in &self.instructions {
            for label in inst.branch_targets() {
                *refs.entry(label).or_default() += 1;
            }
        }
        refs
    }

    /// xxh3 of the assembly rendering; equal streams hash equal.
    pub fn fingerprint(&self) -> u64 {
        xxh3_64(self.to_string().as_bytes())
    }
}

impl FromIterator<Instruction> for InstructionStream {
    fn from_iter<T: IntoIterator<Item = Instruction>>(iter: T) -> Self {
        Self::from_instructions(iter.into_iter().collect())
    }
}

impl<'a> IntoIterator for &'a InstructionStream {
    type Item = &'a Instruction;
    type IntoIter = std::slice::Iter<'a, Instruction>;

    fn into_iter(self) -> Self::IntoIter {
        self.instructions.iter()
    }
}

/// Renders the stream in the assembly format read by [`crate::il::asm::parse`].
impl fmt::Display for InstructionStream {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for inst in &self.instructions {
            for label in &inst.labels {
                writeln!(f, "{label}:")?;
            }
            writeln!(f, "    {inst}")?;
        }
        Ok(())
    }
}
