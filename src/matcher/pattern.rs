use crate::il::{asm, Instruction, LabelId, OpCode, OperandKind};
use crate::matcher::errors::MatchError;
use std::fmt;
use std::str::FromStr;
use std::sync::Arc;

/// Matches exactly one instruction.
///
/// # Text forms
///
/// ```text
/// ldc.i4.s 80                        exact opcode and operand
/// newobj                             opcode, any operand
/// call Building::ShouldDrawShadow    member by Owner::name
/// @ldloc  @stloc  @ldarg  @branch    instruction families
/// @int 5                             any integer constant load of 5
/// @float 80                          ldc.r4/ldc.r8 of 80
/// @label $loop                       carries the label held in register `loop`
/// *                                  anything
/// ```
#[derive(Clone)]
pub enum PatternElement {
    Any,
    OpCode(OpCode),
    /// Opcode and operand equality; labels are ignored
    Exact(Instruction),
    Member {
        opcode: OpCode,
        path: String,
    },
    LoadLocal,
    StoreLocal,
    LoadArg,
    Branch,
    IntConst(i32),
    FloatConst(f64),
    /// Unresolved `@label $name`; must be bound before matching
    LabelRegister(String),
    HasLabel(LabelId),
    Predicate(Arc<dyn Fn(&Instruction) -> bool + Send + Sync>),
}

impl PatternElement {
    pub fn predicate(f: impl Fn(&Instruction) -> bool + Send + Sync + 'static) -> Self {
        PatternElement::Predicate(Arc::new(f))
    }

    pub fn matches(&self, inst: &Instruction) -> bool {
        match self {
            PatternElement::Any => true,
            PatternElement::OpCode(op) => inst.opcode == *op,
            PatternElement::Exact(expected) => expected.same_code(inst),
            PatternElement::Member { opcode, path } => {
                inst.opcode == *opcode && inst.member_path().as_deref() == Some(path.as_str())
            }
            PatternElement::LoadLocal => inst.opcode.is_ldloc(),
            PatternElement::StoreLocal => inst.opcode.is_stloc(),
            PatternElement::LoadArg => inst.opcode.is_ldarg(),
            PatternElement::Branch => inst.opcode.is_branch(),
            PatternElement::IntConst(value) => inst.int_value() == Some(*value),
            PatternElement::FloatConst(value) => inst
                .float_value()
                .is_some_and(|v| (v - value).abs() < 1e-6),
            PatternElement::LabelRegister(_) => false,
            PatternElement::HasLabel(label) => inst.has_label(*label),
            PatternElement::Predicate(f) => f(inst),
        }
    }

    fn parse(text: &str) -> Result<Self, MatchError> {
        let text = text.trim();
        let invalid = |message: String| MatchError::InvalidElement {
            element: text.to_string(),
            message,
        };

        if text.is_empty() {
            return Err(invalid("empty element".to_string()));
        }
        if text == "*" {
            return Ok(PatternElement::Any);
        }

        let (head, rest) = match text.split_once(char::is_whitespace) {
            Some((head, rest)) => (head, rest.trim()),
            None => (text, ""),
        };

        if let Some(keyword) = head.strip_prefix('@') {
            let no_arg = |element: PatternElement| {
                if rest.is_empty() {
                    Ok(element)
                } else {
                    Err(invalid(format!("@{keyword} takes no argument")))
                }
            };
            return match keyword {
                "ldloc" => no_arg(PatternElement::LoadLocal),
                "stloc" => no_arg(PatternElement::StoreLocal),
                "ldarg" => no_arg(PatternElement::LoadArg),
                "branch" => no_arg(PatternElement::Branch),
                "int" => rest
                    .parse()
                    .map(PatternElement::IntConst)
                    .map_err(|_| invalid(format!("'{rest}' is not an integer"))),
                "float" => rest
                    .trim_end_matches('f')
                    .parse()
                    .map(PatternElement::FloatConst)
                    .map_err(|_| invalid(format!("'{rest}' is not a number"))),
                "label" => match rest.strip_prefix('$') {
                    Some(name) if !name.is_empty() => {
                        Ok(PatternElement::LabelRegister(name.to_string()))
                    }
                    _ => Err(invalid("expected '@label $register'".to_string())),
                },
                _ => Err(invalid(format!("unknown predicate '@{keyword}'"))),
            };
        }

        let opcode = OpCode::from_mnemonic(head).ok_or_else(|| {
            invalid(match OpCode::suggest(head) {
                Some(s) => format!("unknown opcode (did you mean '{s}'?)"),
                None => "unknown opcode".to_string(),
            })
        })?;

        if rest.is_empty() {
            return Ok(PatternElement::OpCode(opcode));
        }

        let is_member_kind = matches!(
            opcode.operand_kind(),
            OperandKind::Method | OperandKind::Field
        );
        if is_member_kind && rest.contains("::") && !rest.contains(['(', ' ']) {
            return Ok(PatternElement::Member {
                opcode,
                path: rest.to_string(),
            });
        }

        asm::parse_instruction(text)
            .map(PatternElement::Exact)
            .map_err(|e| invalid(e.to_string()))
    }
}

impl fmt::Debug for PatternElement {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "PatternElement({self})")
    }
}

impl fmt::Display for PatternElement {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            PatternElement::Any => f.write_str("*"),
            PatternElement::OpCode(op) => write!(f, "{op}"),
            PatternElement::Exact(inst) => write!(f, "{inst}"),
            PatternElement::Member { opcode, path } => write!(f, "{opcode} {path}"),
            PatternElement::LoadLocal => f.write_str("@ldloc"),
            PatternElement::StoreLocal => f.write_str("@stloc"),
            PatternElement::LoadArg => f.write_str("@ldarg"),
            PatternElement::Branch => f.write_str("@branch"),
            PatternElement::IntConst(v) => write!(f, "@int {v}"),
            PatternElement::FloatConst(v) => write!(f, "@float {v}"),
            PatternElement::LabelRegister(name) => write!(f, "@label ${name}"),
            PatternElement::HasLabel(label) => write!(f, "@label {label}"),
            PatternElement::Predicate(_) => f.write_str("<predicate>"),
        }
    }
}

/// An ordered sequence of elements matched against consecutive instructions.
#[derive(Debug, Clone)]
pub struct Pattern {
    elements: Vec<PatternElement>,
}

impl Pattern {
    pub fn new(elements: Vec<PatternElement>) -> Result<Self, MatchError> {
        if elements.is_empty() {
            return Err(MatchError::EmptyPattern);
        }
        Ok(Self { elements })
    }

    /// Parse one element per line; blank lines are skipped.
    pub fn parse(text: &str) -> Result<Self, MatchError> {
        Self::from_lines(text.lines().filter(|l| !l.trim().is_empty()))
    }

    pub fn from_lines<I, S>(lines: I) -> Result<Self, MatchError>
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        let elements = lines
            .into_iter()
            .map(|line| PatternElement::parse(line.as_ref()))
            .collect::<Result<Vec<_>, _>>()?;
        Self::new(elements)
    }

    pub fn len(&self) -> usize {
        self.elements.len()
    }

    pub fn is_empty(&self) -> bool {
        self.elements.is_empty()
    }

    pub fn elements(&self) -> &[PatternElement] {
        &self.elements
    }

    /// Whether every `@label $register` has been resolved.
    pub fn is_bound(&self) -> bool {
        !self
            .elements
            .iter()
            .any(|e| matches!(e, PatternElement::LabelRegister(_)))
    }

    /// Resolve `@label $register` elements through `lookup`.
    pub fn bind(&self, lookup: &dyn Fn(&str) -> Option<LabelId>) -> Result<Pattern, MatchError> {
        let elements = self
            .elements
            .iter()
            .map(|element| match element {
                PatternElement::LabelRegister(name) => lookup(name)
                    .map(PatternElement::HasLabel)
                    .ok_or_else(|| MatchError::UnboundRegister { name: name.clone() }),
                other => Ok(other.clone()),
            })
            .collect::<Result<Vec<_>, _>>()?;
        Ok(Pattern { elements })
    }

    /// Whether the pattern matches the instructions starting at `start`.
    pub fn matches_at(&self, instructions: &[Instruction], start: usize) -> bool {
        instructions
            .get(start..start + self.elements.len())
            .is_some_and(|window| {
                window
                    .iter()
                    .zip(&self.elements)
                    .all(|(inst, element)| element.matches(inst))
            })
    }

    /// Leftmost match starting at or after `from`.
    pub fn find_from(&self, instructions: &[Instruction], from: usize) -> Option<usize> {
        let last_start = instructions.len().checked_sub(self.elements.len())?;
        (from..=last_start).find(|&start| self.matches_at(instructions, start))
    }
}

impl FromStr for Pattern {
    type Err = MatchError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::parse(s)
    }
}

impl fmt::Display for Pattern {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for (idx, element) in self.elements.iter().enumerate() {
            if idx > 0 {
                f.write_str(" ; ")?;
            }
            write!(f, "{element}")?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::il::{asm, Operand};

    fn body() -> Vec<Instruction> {
        asm::parse(
            "ldarg.0\n\
             ldfld NetInt Building::tileY\n\
             callvirt instance i4 NetInt::get_Value()\n\
             ldc.i4.4\n\
             add\n\
             ldc.i4.s 80\n\
             ldc.i4 80\n\
             ldc.r4 65\n\
             stloc.s 5\n\
             ret\n",
        )
        .unwrap()
        .into_instructions()
    }

    #[test]
    fn parses_every_form() {
        let pattern = Pattern::parse(
            "*\nnewobj\ncall Building::ShouldDrawShadow\nldc.i4.s 80\n@ldloc\n@stloc\n@ldarg\n@branch\n@int 4\n@float 65\n@label $top\n",
        )
        .unwrap();
        assert_eq!(pattern.len(), 11);
        assert!(matches!(pattern.elements()[1], PatternElement::OpCode(OpCode::Newobj)));
        assert!(matches!(
            &pattern.elements()[2],
            PatternElement::Member { opcode: OpCode::Call, path } if path == "Building::ShouldDrawShadow"
        ));
        assert!(matches!(pattern.elements()[3], PatternElement::Exact(_)));
        assert!(!pattern.is_bound());
    }

    #[test]
    fn int_constants_match_short_forms() {
        let insts = body();
        let four = PatternElement::IntConst(4);
        assert!(four.matches(&insts[3]));
        let eighty = PatternElement::IntConst(80);
        assert!(eighty.matches(&insts[5]));
        assert!(eighty.matches(&insts[6]));
        assert!(!eighty.matches(&insts[7]));
    }

    #[test]
    fn exact_literals_distinguish_encodings() {
        let insts = body();
        let short: Pattern = "ldc.i4.s 80".parse().unwrap();
        assert_eq!(short.find_from(&insts, 0), Some(5));
        let long: Pattern = "ldc.i4 80".parse().unwrap();
        assert_eq!(long.find_from(&insts, 0), Some(6));
    }

    #[test]
    fn member_matches_field_and_method() {
        let insts = body();
        let pattern = Pattern::parse(
            "ldfld Building::tileY\ncallvirt NetInt::get_Value\n@int 4\nadd",
        )
        .unwrap();
        assert_eq!(pattern.find_from(&insts, 0), Some(1));
        assert_eq!(pattern.find_from(&insts, 2), None);
    }

    #[test]
    fn families_and_floats() {
        let insts = body();
        assert!(PatternElement::LoadArg.matches(&insts[0]));
        assert!(PatternElement::StoreLocal.matches(&insts[8]));
        assert!(PatternElement::FloatConst(65.0).matches(&insts[7]));
        assert!(!PatternElement::Branch.matches(&insts[9]));
    }

    #[test]
    fn leftmost_match_wins() {
        let insts = asm::parse("nop\nnop\nnop\nret\n").unwrap().into_instructions();
        let pattern = Pattern::parse("nop\nnop").unwrap();
        assert_eq!(pattern.find_from(&insts, 0), Some(0));
        assert_eq!(pattern.find_from(&insts, 1), Some(1));
        assert_eq!(pattern.find_from(&insts, 2), None);
    }

    #[test]
    fn pattern_longer_than_stream_never_matches() {
        let insts = asm::parse("ret\n").unwrap().into_instructions();
        let pattern = Pattern::parse("*\n*").unwrap();
        assert_eq!(pattern.find_from(&insts, 0), None);
    }

    #[test]
    fn label_registers_bind() {
        let insts = asm::parse("br L3\nL3: ret\n").unwrap().into_instructions();
        let pattern = Pattern::parse("@label $exit").unwrap();
        assert_eq!(pattern.find_from(&insts, 0), None);

        let bound = pattern
            .bind(&|name: &str| (name == "exit").then_some(LabelId(3)))
            .unwrap();
        assert!(bound.is_bound());
        assert_eq!(bound.find_from(&insts, 0), Some(1));

        let err = pattern.bind(&|_: &str| None).unwrap_err();
        assert_eq!(err, MatchError::UnboundRegister { name: "exit".into() });
    }

    #[test]
    fn predicates() {
        let insts = body();
        let pattern = Pattern::new(vec![PatternElement::predicate(|inst| {
            matches!(inst.operand, Operand::Int(v) if v > 50)
        })])
        .unwrap();
        assert_eq!(pattern.find_from(&insts, 0), Some(5));
        assert_eq!(pattern.to_string(), "<predicate>");
    }

    #[test]
    fn rejects_bad_elements() {
        assert_eq!(Pattern::parse("\n\n").unwrap_err(), MatchError::EmptyPattern);
        let err = Pattern::parse("callvrt").unwrap_err();
        assert!(err.to_string().contains("did you mean 'callvirt'"));
        assert!(Pattern::parse("@int eighty").is_err());
        assert!(Pattern::parse("@ldloc 3").is_err());
        assert!(Pattern::parse("@label exit").is_err());
        assert!(Pattern::parse("@frobnicate").is_err());
    }

    #[test]
    fn display_joins_elements() {
        let text = "ldc.i4.s 80\n@int 4\ncall Building::ShouldDrawShadow\n*";
        let pattern = Pattern::parse(text).unwrap();
        assert_eq!(
            pattern.to_string(),
            "ldc.i4.s 80 ; @int 4 ; call Building::ShouldDrawShadow ; *"
        );
    }
}
