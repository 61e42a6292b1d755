use crate::il::opcode::{OpCode, OperandKind};
use std::fmt;

/// Opaque branch-target handle.
///
/// Labels are attached to instructions, not positions, so inserting code
/// never changes which instruction a label resolves to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct LabelId(pub u32);

impl fmt::Display for LabelId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "L{}", self.0)
    }
}

/// A method reference: `[instance] Ret Owner::name(Param, ...)`.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct MethodRef {
    pub instance: bool,
    /// `None` for `void`
    pub ret: Option<String>,
    pub owner: String,
    pub name: String,
    pub params: Vec<String>,
}

impl MethodRef {
    /// A static method reference.
    pub fn new(
        ret: Option<&str>,
        owner: impl Into<String>,
        name: impl Into<String>,
        params: &[&str],
    ) -> Self {
        Self {
            instance: false,
            ret: ret.map(str::to_string),
            owner: owner.into(),
            name: name.into(),
            params: params.iter().map(|p| p.to_string()).collect(),
        }
    }

    /// `Owner::name`, the form patterns match against.
    pub fn path(&self) -> String {
        format!("{}::{}", self.owner, self.name)
    }

    pub fn is_constructor(&self) -> bool {
        self.name == ".ctor"
    }
}

impl fmt::Display for MethodRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.instance {
            f.write_str("instance ")?;
        }
        write!(
            f,
            "{} {}::{}({})",
            self.ret.as_deref().unwrap_or("void"),
            self.owner,
            self.name,
            self.params.join(", ")
        )
    }
}

/// A field reference: `Type Owner::name`.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct FieldRef {
    pub ty: String,
    pub owner: String,
    pub name: String,
}

impl FieldRef {
    pub fn new(ty: impl Into<String>, owner: impl Into<String>, name: impl Into<String>) -> Self {
        Self {
            ty: ty.into(),
            owner: owner.into(),
            name: name.into(),
        }
    }

    pub fn path(&self) -> String {
        format!("{}::{}", self.owner, self.name)
    }
}

impl fmt::Display for FieldRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} {}::{}", self.ty, self.owner, self.name)
    }
}

/// Instruction operand.
#[derive(Debug, Clone, PartialEq, Default)]
pub enum Operand {
    #[default]
    None,
    /// Integer immediates, local and argument indices
    Int(i32),
    Float(f64),
    String(String),
    Type(String),
    Method(MethodRef),
    Field(FieldRef),
    Label(LabelId),
    /// Jump table of a `switch`
    Labels(Vec<LabelId>),
}

impl Operand {
    pub fn is_none(&self) -> bool {
        matches!(self, Operand::None)
    }

    /// Whether this operand has the shape `kind` requires.
    pub fn fits(&self, kind: OperandKind) -> bool {
        match (kind, self) {
            (OperandKind::None, Operand::None) => true,
            (OperandKind::Int8, Operand::Int(v)) => i8::try_from(*v).is_ok(),
            (OperandKind::Local | OperandKind::Arg, Operand::Int(v)) => {
                u16::try_from(*v).is_ok()
            }
            (OperandKind::Int32, Operand::Int(_)) => true,
            (OperandKind::Float32 | OperandKind::Float64, Operand::Float(_)) => true,
            (OperandKind::String, Operand::String(_)) => true,
            (OperandKind::Type, Operand::Type(_)) => true,
            (OperandKind::Method, Operand::Method(_)) => true,
            (OperandKind::Field, Operand::Field(_)) => true,
            (OperandKind::Label, Operand::Label(_)) => true,
            (OperandKind::Labels, Operand::Labels(_)) => true,
            _ => false,
        }
    }
}

impl fmt::Display for Operand {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Operand::None => Ok(()),
            Operand::Int(v) => write!(f, "{v}"),
            Operand::Float(v) => write!(f, "{v}"),
            Operand::String(s) => write!(f, "{s:?}"),
            Operand::Type(t) => f.write_str(t),
            Operand::Method(m) => write!(f, "{m}"),
            Operand::Field(field) => write!(f, "{field}"),
            Operand::Label(label) => write!(f, "{label}"),
            Operand::Labels(labels) => {
                f.write_str("(")?;
                for (idx, label) in labels.iter().enumerate() {
                    if idx > 0 {
                        f.write_str(", ")?;
                    }
                    write!(f, "{label}")?;
                }
                f.write_str(")")
            }
        }
    }
}

/// One instruction of a method body.
#[derive(Debug, Clone, PartialEq)]
pub struct Instruction {
    pub opcode: OpCode,
    pub operand: Operand,
    /// Labels that resolve to this instruction
    pub labels: Vec<LabelId>,
}

impl Instruction {
    pub fn new(opcode: OpCode, operand: Operand) -> Self {
        Self {
            opcode,
            operand,
            labels: Vec::new(),
        }
    }

    /// An instruction without operand.
    pub fn simple(opcode: OpCode) -> Self {
        Self::new(opcode, Operand::None)
    }

    /// Unconditional branch to `label`.
    pub fn branch(label: LabelId) -> Self {
        Self::new(OpCode::Br, Operand::Label(label))
    }

    pub fn call(method: MethodRef) -> Self {
        Self::new(OpCode::Call, Operand::Method(method))
    }

    /// The smallest instruction that pushes `value`.
    pub fn load_int(value: i32) -> Self {
        let short = OpCode::all().find(|op| op.implicit_int() == Some(value));
        match short {
            Some(op) => Self::simple(op),
            None if i8::try_from(value).is_ok() => Self::new(OpCode::Ldc_I4_S, Operand::Int(value)),
            None => Self::new(OpCode::Ldc_I4, Operand::Int(value)),
        }
    }

    pub fn with_label(mut self, label: LabelId) -> Self {
        self.add_label(label);
        self
    }

    /// Attach `label`; attaching the same label twice is a no-op.
    pub fn add_label(&mut self, label: LabelId) {
        if !self.labels.contains(&label) {
            self.labels.push(label);
        }
    }

    pub fn has_label(&self, label: LabelId) -> bool {
        self.labels.contains(&label)
    }

    /// The same opcode and operand with no labels attached.
    pub fn without_labels(&self) -> Self {
        Self::new(self.opcode, self.operand.clone())
    }

    /// Opcode and operand equality, ignoring labels.
    pub fn same_code(&self, other: &Instruction) -> bool {
        self.opcode == other.opcode && self.operand == other.operand
    }

    /// Single label operand of a branch.
    pub fn label_operand(&self) -> Option<LabelId> {
        match &self.operand {
            Operand::Label(label) => Some(*label),
            _ => None,
        }
    }

    /// Every label this instruction can jump to.
    pub fn branch_targets(&self) -> Vec<LabelId> {
        match &self.operand {
            Operand::Label(label) if self.opcode.is_branch() => vec![*label],
            Operand::Labels(labels) => labels.clone(),
            _ => Vec::new(),
        }
    }

    /// The integer a constant load pushes, short forms included.
    pub fn int_value(&self) -> Option<i32> {
        if let Some(v) = self.opcode.implicit_int() {
            return Some(v);
        }
        match (self.opcode, &self.operand) {
            (OpCode::Ldc_I4 | OpCode::Ldc_I4_S, Operand::Int(v)) => Some(*v),
            _ => None,
        }
    }

    /// The float a `ldc.r4`/`ldc.r8` pushes.
    pub fn float_value(&self) -> Option<f64> {
        match (self.opcode, &self.operand) {
            (OpCode::Ldc_R4 | OpCode::Ldc_R8, Operand::Float(v)) => Some(*v),
            _ => None,
        }
    }

    /// `Owner::name` of a method or field operand.
    pub fn member_path(&self) -> Option<String> {
        match &self.operand {
            Operand::Method(m) => Some(m.path()),
            Operand::Field(field) => Some(field.path()),
            _ => None,
        }
    }

    /// `(pops, pushes)`, or `None` for `ret` and malformed call operands.
    pub fn stack_effect(&self) -> Option<(u32, u32)> {
        if let Some(effect) = self.opcode.fixed_stack_effect() {
            return Some(effect);
        }
        let Operand::Method(method) = &self.operand else {
            return None;
        };
        let params = method.params.len() as u32;
        match self.opcode {
            OpCode::Newobj => Some((params, 1)),
            OpCode::Call | OpCode::Callvirt => {
                let this = u32::from(method.instance);
                Some((params + this, u32::from(method.ret.is_some())))
            }
            _ => None,
        }
    }
}

impl fmt::Display for Instruction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.operand.is_none() {
            write!(f, "{}", self.opcode)
        } else {
            write!(f, "{} {}", self.opcode, self.operand)
        }
    }
}
