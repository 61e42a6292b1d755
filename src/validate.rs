//! Validation of patched instruction streams.
//!
//! # Hard Rules (Never Violate)
//!
//! 1. **Label closure**: every branch target resolves to exactly one
//!    instruction. Labels created while patching must also be referenced.
//! 2. **Stack balance**: every instruction is reached with one stack depth,
//!    no instruction pops below zero, and control never runs off the end.
//!
//! A script whose output breaks either rule is rejected as a whole.

use crate::il::{FlowControl, InstructionStream, LabelId, OpCode};
use std::collections::HashMap;
use thiserror::Error;

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum StreamError {
    #[error("label {label} is referenced but never bound")]
    UnboundLabel { label: LabelId },

    #[error("label {label} is bound to {count} instructions")]
    DuplicateLabel { label: LabelId, count: usize },

    #[error("label {label} is never referenced")]
    UnreferencedLabel { label: LabelId },

    #[error("stack underflow at {position}: '{instruction}' needs {needed}, depth is {depth}")]
    StackUnderflow {
        position: usize,
        instruction: String,
        needed: u32,
        depth: u32,
    },

    #[error("inconsistent stack depth at {position}: reached with {first} and {second}")]
    DepthMismatch {
        position: usize,
        first: u32,
        second: u32,
    },

    #[error("'ret' at {position} leaves {depth} values on the stack")]
    UnbalancedReturn { position: usize, depth: u32 },

    #[error("cannot determine the stack effect of '{instruction}' at {position}")]
    UnknownEffect { position: usize, instruction: String },

    #[error("control falls off the end of the method after {position}")]
    FallsOffEnd { position: usize },
}

/// Check that every referenced label is bound exactly once.
pub fn check_labels(stream: &InstructionStream) -> Result<(), StreamError> {
    let bindings = stream.label_bindings();
    let mut bound: Vec<_> = bindings.iter().collect();
    bound.sort_by_key(|(label, _)| **label);
    for (label, positions) in bound {
        if positions.len() > 1 {
            return Err(StreamError::DuplicateLabel {
                label: *label,
                count: positions.len(),
            });
        }
    }

    let mut referenced: Vec<_> = stream.label_references().into_keys().collect();
    referenced.sort();
    for label in referenced {
        if !bindings.contains_key(&label) {
            return Err(StreamError::UnboundLabel { label });
        }
    }
    Ok(())
}

/// Check that each label in `created` is bound exactly once and referenced.
pub fn check_created_labels(
    stream: &InstructionStream,
    created: &[LabelId],
) -> Result<(), StreamError> {
    let bindings = stream.label_bindings();
    let references = stream.label_references();
    for &label in created {
        match bindings.get(&label).map_or(0, Vec::len) {
            0 => return Err(StreamError::UnboundLabel { label }),
            1 => {}
            count => return Err(StreamError::DuplicateLabel { label, count }),
        }
        if !references.contains_key(&label) {
            return Err(StreamError::UnreferencedLabel { label });
        }
    }
    Ok(())
}

/// Control-flow successors of the instruction at `position`.
fn successors(
    stream: &InstructionStream,
    position: usize,
    targets: &HashMap<LabelId, usize>,
) -> Result<Vec<usize>, StreamError> {
    let Some(inst) = stream.get(position) else {
        return Ok(Vec::new());
    };
    let resolve = |label: LabelId| {
        targets
            .get(&label)
            .copied()
            .ok_or(StreamError::UnboundLabel { label })
    };

    let mut next = Vec::new();
    match inst.opcode.flow() {
        FlowControl::Next | FlowControl::CondBranch | FlowControl::Switch => {
            if position + 1 >= stream.len() {
                return Err(StreamError::FallsOffEnd { position });
            }
            next.push(position + 1);
        }
        FlowControl::Branch | FlowControl::Leave | FlowControl::Return | FlowControl::Throw => {}
    }
    for label in inst.branch_targets() {
        next.push(resolve(label)?);
    }
    Ok(next)
}

fn label_targets(stream: &InstructionStream) -> HashMap<LabelId, usize> {
    stream
        .label_bindings()
        .into_iter()
        .filter_map(|(label, positions)| positions.first().map(|&p| (label, p)))
        .collect()
}

/// Which instructions can execute, simulating control flow from entry.
pub fn reachable(stream: &InstructionStream) -> Result<Vec<bool>, StreamError> {
    let targets = label_targets(stream);
    let mut seen = vec![false; stream.len()];
    let mut work = if stream.is_empty() { Vec::new() } else { vec![0] };

    while let Some(position) = work.pop() {
        if std::mem::replace(&mut seen[position], true) {
            continue;
        }
        work.extend(successors(stream, position, &targets)?);
    }
    Ok(seen)
}

/// Stack depth on entry to each instruction; `None` for unreachable code.
pub fn stack_depths(stream: &InstructionStream) -> Result<Vec<Option<u32>>, StreamError> {
    let targets = label_targets(stream);
    let mut depths: Vec<Option<u32>> = vec![None; stream.len()];
    let mut work: Vec<(usize, u32)> = if stream.is_empty() {
        Vec::new()
    } else {
        vec![(0, 0)]
    };

    while let Some((position, depth)) = work.pop() {
        match depths[position] {
            Some(first) if first == depth => continue,
            Some(first) => {
                return Err(StreamError::DepthMismatch {
                    position,
                    first,
                    second: depth,
                })
            }
            None => depths[position] = Some(depth),
        }

        let inst = &stream.instructions()[position];
        if inst.opcode == OpCode::Ret {
            if depth > 1 {
                return Err(StreamError::UnbalancedReturn { position, depth });
            }
            continue;
        }

        let (pops, pushes) = inst.stack_effect().ok_or_else(|| StreamError::UnknownEffect {
            position,
            instruction: inst.to_string(),
        })?;
        if pops > depth {
            return Err(StreamError::StackUnderflow {
                position,
                instruction: inst.to_string(),
                needed: pops,
                depth,
            });
        }
        let after = depth - pops + pushes;
        for next in successors(stream, position, &targets)? {
            work.push((next, after));
        }
    }
    Ok(depths)
}

/// Full structural check: label closure plus stack balance.
pub fn validate_stream(stream: &InstructionStream) -> Result<(), StreamError> {
    check_labels(stream)?;
    stack_depths(stream)?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::il::{asm, Instruction};

    fn parse(src: &str) -> InstructionStream {
        asm::parse(src).unwrap()
    }

    #[test]
    fn loop_is_balanced() {
        let stream = parse(
            "ldc.i4.0\nstloc.0\nbr cond\nbody: ldloc.0\nldc.i4.1\nadd\nstloc.0\ncond: ldloc.0\nldc.i4.s 10\nblt body\nret\n",
        );
        assert!(validate_stream(&stream).is_ok());
        let depths = stack_depths(&stream).unwrap();
        assert_eq!(depths[3], Some(0));
        assert_eq!(depths[9], Some(2));
    }

    #[test]
    fn detects_unbound_reference() {
        let mut stream = parse("nop\nret\n");
        stream.push(Instruction::branch(LabelId(7)));
        assert_eq!(
            check_labels(&stream),
            Err(StreamError::UnboundLabel { label: LabelId(7) })
        );
    }

    #[test]
    fn detects_duplicate_binding() {
        let stream = InstructionStream::from_instructions(vec![
            Instruction::simple(OpCode::Nop).with_label(LabelId(1)),
            Instruction::branch(LabelId(1)).with_label(LabelId(1)),
        ]);
        assert_eq!(
            check_labels(&stream),
            Err(StreamError::DuplicateLabel {
                label: LabelId(1),
                count: 2
            })
        );
    }

    #[test]
    fn created_labels_must_be_referenced() {
        let stream = parse("L0: nop\nL1: ret\nbr L0\n");
        assert!(check_created_labels(&stream, &[LabelId(0)]).is_ok());
        assert_eq!(
            check_created_labels(&stream, &[LabelId(1)]),
            Err(StreamError::UnreferencedLabel { label: LabelId(1) })
        );
        assert_eq!(
            check_created_labels(&stream, &[LabelId(5)]),
            Err(StreamError::UnboundLabel { label: LabelId(5) })
        );
    }

    #[test]
    fn skipped_block_is_unreachable() {
        let stream = parse("ldc.i4.1\nbr after\nldc.i4.s 80\npop\nafter: pop\nret\n");
        let live = reachable(&stream).unwrap();
        assert_eq!(live, vec![true, true, false, false, true, true]);
        let depths = stack_depths(&stream).unwrap();
        assert_eq!(depths[2], None);
        assert_eq!(depths[4], Some(1));
    }

    #[test]
    fn detects_depth_mismatch() {
        let stream = parse("ldc.i4.0\nbrtrue skip\nldc.i4.1\nskip: ret\n");
        assert!(matches!(
            stack_depths(&stream),
            Err(StreamError::DepthMismatch { position: 3, .. })
        ));
    }

    #[test]
    fn detects_underflow() {
        let stream = parse("ldc.i4.0\nadd\nret\n");
        assert!(matches!(
            stack_depths(&stream),
            Err(StreamError::StackUnderflow {
                position: 1,
                needed: 2,
                depth: 1,
                ..
            })
        ));
    }

    #[test]
    fn detects_fall_through_and_unbalanced_return() {
        assert_eq!(
            stack_depths(&parse("nop\n")),
            Err(StreamError::FallsOffEnd { position: 0 })
        );
        assert_eq!(
            stack_depths(&parse("ldc.i4.0\nldc.i4.0\nret\n")),
            Err(StreamError::UnbalancedReturn {
                position: 2,
                depth: 2
            })
        );
    }

    #[test]
    fn calls_use_their_signature() {
        let stream = parse(
            "ldarg.0\ncall instance BuildingData Building::GetData()\nstloc.0\nldloc.0\ncall Rectangle GamePatches::GetPondSourceRect(BuildingData)\npop\nret\n",
        );
        assert!(validate_stream(&stream).is_ok());
    }

    #[test]
    fn switch_targets_are_followed() {
        let stream = parse("ldc.i4.0\nswitch (a, b)\nret\na: ret\nb: ret\n");
        assert_eq!(reachable(&stream).unwrap(), vec![true; 5]);
    }
}
