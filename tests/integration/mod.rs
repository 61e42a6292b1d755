//! End-to-end tests running the shipped patch scripts over recorded method
//! bodies.

mod atomicity;
mod builtin_scripts;

use fishpond_patcher::il::{asm, InstructionStream, OpCode};
use fishpond_patcher::{PatchScript, PatchSet};
use std::path::PathBuf;

pub fn fixture(name: &str) -> InstructionStream {
    let path = PathBuf::from(env!("CARGO_MANIFEST_DIR"))
        .join("tests/fixtures")
        .join(name);
    let text = std::fs::read_to_string(&path).unwrap();
    asm::parse(&text).unwrap()
}

pub fn draw_body() -> InstructionStream {
    fixture("fish_pond_draw.il")
}

pub fn menu_body() -> InstructionStream {
    fixture("fish_pond_draw_in_menu.il")
}

pub fn script(name: &str) -> PatchScript {
    PatchSet::builtin().unwrap().by_name(name).unwrap().clone()
}

/// Number of calls into the runtime helper class.
pub fn host_calls(stream: &InstructionStream) -> usize {
    stream
        .iter()
        .filter(|inst| inst.opcode == OpCode::Call)
        .filter(|inst| {
            inst.member_path()
                .is_some_and(|path| path.starts_with("GamePatches::"))
        })
        .count()
}

pub fn count_opcode(stream: &InstructionStream, opcode: OpCode) -> usize {
    stream.iter().filter(|inst| inst.opcode == opcode).count()
}
