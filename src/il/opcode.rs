//! Opcode table for the CIL-like stack machine the patcher operates on.
//!
//! Only the opcodes that appear in drawing methods are modelled. Each opcode
//! knows its mnemonic, the kind of operand it carries, its fixed stack effect
//! (when it does not depend on the operand) and how it transfers control.

use std::fmt;

/// An instruction opcode.
#[allow(non_camel_case_types)]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum OpCode {
    Nop,
    Ldarg_0,
    Ldarg_1,
    Ldarg_2,
    Ldarg_3,
    Ldarg_S,
    Ldarg,
    Ldarga_S,
    Starg_S,
    Ldloc_0,
    Ldloc_1,
    Ldloc_2,
    Ldloc_3,
    Ldloc_S,
    Ldloc,
    Ldloca_S,
    Stloc_0,
    Stloc_1,
    Stloc_2,
    Stloc_3,
    Stloc_S,
    Stloc,
    Ldnull,
    Ldc_I4_M1,
    Ldc_I4_0,
    Ldc_I4_1,
    Ldc_I4_2,
    Ldc_I4_3,
    Ldc_I4_4,
    Ldc_I4_5,
    Ldc_I4_6,
    Ldc_I4_7,
    Ldc_I4_8,
    Ldc_I4_S,
    Ldc_I4,
    Ldc_R4,
    Ldc_R8,
    Ldstr,
    Dup,
    Pop,
    Call,
    Callvirt,
    Newobj,
    Ret,
    Br,
    Br_S,
    Brtrue,
    Brtrue_S,
    Brfalse,
    Brfalse_S,
    Beq,
    Beq_S,
    Bge,
    Bge_S,
    Bgt,
    Bgt_S,
    Ble,
    Ble_S,
    Blt,
    Blt_S,
    Bne_Un,
    Bne_Un_S,
    Switch,
    Leave,
    Leave_S,
    Add,
    Sub,
    Mul,
    Div,
    Rem,
    Neg,
    And,
    Or,
    Xor,
    Ceq,
    Cgt,
    Clt,
    Conv_I4,
    Conv_R4,
    Conv_R8,
    Ldfld,
    Ldflda,
    Stfld,
    Ldsfld,
    Stsfld,
    Box,
    Unbox_Any,
    Castclass,
    Isinst,
    Ldlen,
    Throw,
}

/// What an opcode expects after its mnemonic.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OperandKind {
    None,
    /// Signed byte immediate (`ldc.i4.s`)
    Int8,
    Int32,
    Float32,
    Float64,
    String,
    Type,
    Method,
    Field,
    /// Local variable index
    Local,
    /// Argument index
    Arg,
    Label,
    Labels,
}

/// How control leaves an instruction.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FlowControl {
    /// Falls through to the next instruction
    Next,
    /// Unconditional jump to the label operand
    Branch,
    /// Jump to the label operand or fall through
    CondBranch,
    /// Jump to any label in the list or fall through
    Switch,
    /// Leaves a protected region, emptying the evaluation stack
    Leave,
    Return,
    Throw,
}

const TABLE: &[(OpCode, &str)] = &[
    (OpCode::Nop, "nop"),
    (OpCode::Ldarg_0, "ldarg.0"),
    (OpCode::Ldarg_1, "ldarg.1"),
    (OpCode::Ldarg_2, "ldarg.2"),
    (OpCode::Ldarg_3, "ldarg.3"),
    (OpCode::Ldarg_S, "ldarg.s"),
    (OpCode::Ldarg, "ldarg"),
    (OpCode::Ldarga_S, "ldarga.s"),
    (OpCode::Starg_S, "starg.s"),
    (OpCode::Ldloc_0, "ldloc.0"),
    (OpCode::Ldloc_1, "ldloc.1"),
    (OpCode::Ldloc_2, "ldloc.2"),
    (OpCode::Ldloc_3, "ldloc.3"),
    (OpCode::Ldloc_S, "ldloc.s"),
    (OpCode::Ldloc, "ldloc"),
    (OpCode::Ldloca_S, "ldloca.s"),
    (OpCode::Stloc_0, "stloc.0"),
    (OpCode::Stloc_1, "stloc.1"),
    (OpCode::Stloc_2, "stloc.2"),
    (OpCode::Stloc_3, "stloc.3"),
    (OpCode::Stloc_S, "stloc.s"),
    (OpCode::Stloc, "stloc"),
    (OpCode::Ldnull, "ldnull"),
    (OpCode::Ldc_I4_M1, "ldc.i4.m1"),
    (OpCode::Ldc_I4_0, "ldc.i4.0"),
    (OpCode::Ldc_I4_1, "ldc.i4.1"),
    (OpCode::Ldc_I4_2, "ldc.i4.2"),
    (OpCode::Ldc_I4_3, "ldc.i4.3"),
    (OpCode::Ldc_I4_4, "ldc.i4.4"),
    (OpCode::Ldc_I4_5, "ldc.i4.5"),
    (OpCode::Ldc_I4_6, "ldc.i4.6"),
    (OpCode::Ldc_I4_7, "ldc.i4.7"),
    (OpCode::Ldc_I4_8, "ldc.i4.8"),
    (OpCode::Ldc_I4_S, "ldc.i4.s"),
    (OpCode::Ldc_I4, "ldc.i4"),
    (OpCode::Ldc_R4, "ldc.r4"),
    (OpCode::Ldc_R8, "ldc.r8"),
    (OpCode::Ldstr, "ldstr"),
    (OpCode::Dup, "dup"),
    (OpCode::Pop, "pop"),
    (OpCode::Call, "call"),
    (OpCode::Callvirt, "callvirt"),
    (OpCode::Newobj, "newobj"),
    (OpCode::Ret, "ret"),
    (OpCode::Br, "br"),
    (OpCode::Br_S, "br.s"),
    (OpCode::Brtrue, "brtrue"),
    (OpCode::Brtrue_S, "brtrue.s"),
    (OpCode::Brfalse, "brfalse"),
    (OpCode::Brfalse_S, "brfalse.s"),
    (OpCode::Beq, "beq"),
    (OpCode::Beq_S, "beq.s"),
    (OpCode::Bge, "bge"),
    (OpCode::Bge_S, "bge.s"),
    (OpCode::Bgt, "bgt"),
    (OpCode::Bgt_S, "bgt.s"),
    (OpCode::Ble, "ble"),
    (OpCode::Ble_S, "ble.s"),
    (OpCode::Blt, "blt"),
    (OpCode::Blt_S, "blt.s"),
    (OpCode::Bne_Un, "bne.un"),
    (OpCode::Bne_Un_S, "bne.un.s"),
    (OpCode::Switch, "switch"),
    (OpCode::Leave, "leave"),
    (OpCode::Leave_S, "leave.s"),
    (OpCode::Add, "add"),
    (OpCode::Sub, "sub"),
    (OpCode::Mul, "mul"),
    (OpCode::Div, "div"),
    (OpCode::Rem, "rem"),
    (OpCode::Neg, "neg"),
    (OpCode::And, "and"),
    (OpCode::Or, "or"),
    (OpCode::Xor, "xor"),
    (OpCode::Ceq, "ceq"),
    (OpCode::Cgt, "cgt"),
    (OpCode::Clt, "clt"),
    (OpCode::Conv_I4, "conv.i4"),
    (OpCode::Conv_R4, "conv.r4"),
    (OpCode::Conv_R8, "conv.r8"),
    (OpCode::Ldfld, "ldfld"),
    (OpCode::Ldflda, "ldflda"),
    (OpCode::Stfld, "stfld"),
    (OpCode::Ldsfld, "ldsfld"),
    (OpCode::Stsfld, "stsfld"),
    (OpCode::Box, "box"),
    (OpCode::Unbox_Any, "unbox.any"),
    (OpCode::Castclass, "castclass"),
    (OpCode::Isinst, "isinst"),
    (OpCode::Ldlen, "ldlen"),
    (OpCode::Throw, "throw"),
];

impl OpCode {
    /// Every modelled opcode, in table order.
    pub fn all() -> impl Iterator<Item = OpCode> {
        TABLE.iter().map(|(op, _)| *op)
    }

    /// The assembler mnemonic, e.g. `ldc.i4.s`.
    pub fn mnemonic(self) -> &'static str {
        TABLE
            .iter()
            .find(|(op, _)| *op == self)
            .map(|(_, name)| *name)
            .unwrap_or("?")
    }

    /// Look up an opcode by mnemonic (case-insensitive).
    pub fn from_mnemonic(name: &str) -> Option<OpCode> {
        let name = name.to_ascii_lowercase();
        TABLE
            .iter()
            .find(|(_, mnemonic)| *mnemonic == name)
            .map(|(op, _)| *op)
    }

    /// Closest known mnemonic to `name`, for error messages.
    pub fn suggest(name: &str) -> Option<&'static str> {
        let name = name.to_ascii_lowercase();
        TABLE
            .iter()
            .map(|(_, mnemonic)| (*mnemonic, strsim::jaro_winkler(&name, mnemonic)))
            .filter(|(_, score)| *score > 0.85)
            .max_by(|a, b| a.1.total_cmp(&b.1))
            .map(|(mnemonic, _)| mnemonic)
    }

    pub fn operand_kind(self) -> OperandKind {
        use OpCode::*;
        match self {
            Ldarg_S | Ldarg | Ldarga_S | Starg_S => OperandKind::Arg,
            Ldloc_S | Ldloc | Ldloca_S | Stloc_S | Stloc => OperandKind::Local,
            Ldc_I4_S => OperandKind::Int8,
            Ldc_I4 => OperandKind::Int32,
            Ldc_R4 => OperandKind::Float32,
            Ldc_R8 => OperandKind::Float64,
            Ldstr => OperandKind::String,
            Call | Callvirt | Newobj => OperandKind::Method,
            Ldfld | Ldflda | Stfld | Ldsfld | Stsfld => OperandKind::Field,
            Box | Unbox_Any | Castclass | Isinst => OperandKind::Type,
            Br | Br_S | Brtrue | Brtrue_S | Brfalse | Brfalse_S | Beq | Beq_S | Bge | Bge_S
            | Bgt | Bgt_S | Ble | Ble_S | Blt | Blt_S | Bne_Un | Bne_Un_S | Leave | Leave_S => {
                OperandKind::Label
            }
            Switch => OperandKind::Labels,
            _ => OperandKind::None,
        }
    }

    pub fn flow(self) -> FlowControl {
        use OpCode::*;
        match self {
            Br | Br_S => FlowControl::Branch,
            Brtrue | Brtrue_S | Brfalse | Brfalse_S | Beq | Beq_S | Bge | Bge_S | Bgt | Bgt_S
            | Ble | Ble_S | Blt | Blt_S | Bne_Un | Bne_Un_S => FlowControl::CondBranch,
            Switch => FlowControl::Switch,
            Leave | Leave_S => FlowControl::Leave,
            Ret => FlowControl::Return,
            Throw => FlowControl::Throw,
            _ => FlowControl::Next,
        }
    }

    /// `(pops, pushes)` when the effect does not depend on the operand.
    ///
    /// Returns `None` for calls and `newobj` (the signature decides) and for
    /// `ret` (depends on the method's return type).
    pub fn fixed_stack_effect(self) -> Option<(u32, u32)> {
        use OpCode::*;
        let effect = match self {
            Nop | Br | Br_S | Leave | Leave_S => (0, 0),
            Ldarg_0 | Ldarg_1 | Ldarg_2 | Ldarg_3 | Ldarg_S | Ldarg | Ldarga_S => (0, 1),
            Ldloc_0 | Ldloc_1 | Ldloc_2 | Ldloc_3 | Ldloc_S | Ldloc | Ldloca_S => (0, 1),
            Ldnull | Ldc_I4_M1 | Ldc_I4_0 | Ldc_I4_1 | Ldc_I4_2 | Ldc_I4_3 | Ldc_I4_4
            | Ldc_I4_5 | Ldc_I4_6 | Ldc_I4_7 | Ldc_I4_8 | Ldc_I4_S | Ldc_I4 | Ldc_R4 | Ldc_R8
            | Ldstr | Ldsfld => (0, 1),
            Starg_S | Stloc_0 | Stloc_1 | Stloc_2 | Stloc_3 | Stloc_S | Stloc | Pop | Stsfld => {
                (1, 0)
            }
            Brtrue | Brtrue_S | Brfalse | Brfalse_S | Switch | Throw => (1, 0),
            Beq | Beq_S | Bge | Bge_S | Bgt | Bgt_S | Ble | Ble_S | Blt | Blt_S | Bne_Un
            | Bne_Un_S => (2, 0),
            Dup => (1, 2),
            Add | Sub | Mul | Div | Rem | And | Or | Xor | Ceq | Cgt | Clt => (2, 1),
            Neg | Conv_I4 | Conv_R4 | Conv_R8 | Ldfld | Ldflda | Box | Unbox_Any | Castclass
            | Isinst | Ldlen => (1, 1),
            Stfld => (2, 0),
            Call | Callvirt | Newobj | Ret => return None,
        };
        Some(effect)
    }

    /// Any local-variable load (`ldloc.N`, `ldloc.s`, `ldloc`, `ldloca.s`).
    pub fn is_ldloc(self) -> bool {
        use OpCode::*;
        matches!(
            self,
            Ldloc_0 | Ldloc_1 | Ldloc_2 | Ldloc_3 | Ldloc_S | Ldloc | Ldloca_S
        )
    }

    /// Any local-variable store.
    pub fn is_stloc(self) -> bool {
        use OpCode::*;
        matches!(
            self,
            Stloc_0 | Stloc_1 | Stloc_2 | Stloc_3 | Stloc_S | Stloc
        )
    }

    /// Any argument load.
    pub fn is_ldarg(self) -> bool {
        use OpCode::*;
        matches!(
            self,
            Ldarg_0 | Ldarg_1 | Ldarg_2 | Ldarg_3 | Ldarg_S | Ldarg | Ldarga_S
        )
    }

    /// Any instruction that can transfer control to a label.
    pub fn is_branch(self) -> bool {
        matches!(
            self.flow(),
            FlowControl::Branch | FlowControl::CondBranch | FlowControl::Switch | FlowControl::Leave
        )
    }

    /// The integer an operand-less constant load pushes (`ldc.i4.5` -> 5).
    pub fn implicit_int(self) -> Option<i32> {
        use OpCode::*;
        match self {
            Ldc_I4_M1 => Some(-1),
            Ldc_I4_0 => Some(0),
            Ldc_I4_1 => Some(1),
            Ldc_I4_2 => Some(2),
            Ldc_I4_3 => Some(3),
            Ldc_I4_4 => Some(4),
            Ldc_I4_5 => Some(5),
            Ldc_I4_6 => Some(6),
            Ldc_I4_7 => Some(7),
            Ldc_I4_8 => Some(8),
            _ => None,
        }
    }

    /// The local slot encoded in the opcode itself (`ldloc.2` -> 2).
    pub fn implicit_local(self) -> Option<u16> {
        use OpCode::*;
        match self {
            Ldloc_0 | Stloc_0 => Some(0),
            Ldloc_1 | Stloc_1 => Some(1),
            Ldloc_2 | Stloc_2 => Some(2),
            Ldloc_3 | Stloc_3 => Some(3),
            _ => None,
        }
    }
}

impl fmt::Display for OpCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.mnemonic())
    }
}
