//! Line-oriented assembly text for instruction streams.
//!
//! ```text
//! IL_0000: ldarg.0              // ILDasm offsets are ignored
//!          call instance BuildingData Building::GetData()
//! loop:                         // binds to the next instruction
//!          ldc.i4.s 80
//!          blt loop
//!          switch (a, b, c)
//!          ldfld NetInt Building::tileY
//! ```
//!
//! Labels named `L<n>` keep the number `n`; any other name is given a
//! fresh number, so rendering a parsed stream and parsing it again yields
//! the same stream.

use crate::il::errors::IlError;
use crate::il::instruction::{FieldRef, Instruction, LabelId, MethodRef, Operand};
use crate::il::opcode::{OpCode, OperandKind};
use crate::il::stream::InstructionStream;
use std::collections::HashMap;

/// Parse a whole method body.
pub fn parse(source: &str) -> Result<InstructionStream, IlError> {
    let lines: Vec<(usize, Line<'_>)> = source
        .lines()
        .enumerate()
        .map(|(idx, raw)| (idx + 1, split_line(raw)))
        .collect();

    let mut names = LabelNames::default();
    for (_, line) in &lines {
        for name in &line.labels {
            names.note(name);
        }
        if let Some(body) = line.body {
            for name in operand_label_names(body) {
                names.note(name);
            }
        }
    }
    names.assign()?;

    let mut stream = InstructionStream::new();
    let mut pending: Vec<(String, LabelId)> = Vec::new();
    let mut defined: HashMap<String, usize> = HashMap::new();

    for (line_no, line) in lines {
        for name in line.labels {
            if defined.insert(name.to_string(), line_no).is_some() {
                return Err(IlError::DuplicateLabel {
                    line: line_no,
                    name: name.to_string(),
                });
            }
            pending.push((name.to_string(), names.id(name)));
        }
        let Some(body) = line.body else {
            continue;
        };
        let mut inst = parse_instruction_with(line_no, body, &mut |name| Ok(names.id(name)))?;
        for (_, label) in pending.drain(..) {
            inst.add_label(label);
        }
        stream.push(inst);
    }

    if let Some((name, _)) = pending.into_iter().next() {
        return Err(IlError::DanglingLabel { name });
    }
    for name in names.order.iter() {
        if !defined.contains_key(name) {
            return Err(IlError::UndefinedLabel { name: name.clone() });
        }
    }

    Ok(stream)
}

/// Parse a single instruction. Label operands must be written `L<n>`.
pub fn parse_instruction(text: &str) -> Result<Instruction, IlError> {
    parse_instruction_with(1, text.trim(), &mut |name| {
        numbered_label(name).ok_or_else(|| IlError::UndefinedLabel {
            name: name.to_string(),
        })
    })
}

struct Line<'a> {
    labels: Vec<&'a str>,
    body: Option<&'a str>,
}

fn split_line(raw: &str) -> Line<'_> {
    let mut rest = strip_comment(raw).trim();
    let mut labels = Vec::new();

    // Leading `name:` prefixes; `IL_xxxx:` offsets are dropped.
    while let Some(colon) = rest.find(':') {
        let head = &rest[..colon];
        let is_prefix = !head.is_empty()
            && head
                .chars()
                .all(|c| c.is_ascii_alphanumeric() || c == '_' || c == '.')
            && !rest[colon..].starts_with("::");
        if !is_prefix || OpCode::from_mnemonic(head).is_some() {
            break;
        }
        if !head.starts_with("IL_") {
            labels.push(head);
        }
        rest = rest[colon + 1..].trim_start();
    }

    Line {
        labels,
        body: (!rest.is_empty()).then_some(rest),
    }
}

fn strip_comment(raw: &str) -> &str {
    let mut in_string = false;
    let mut escaped = false;
    let bytes = raw.as_bytes();
    for idx in 0..bytes.len() {
        let c = bytes[idx];
        if in_string {
            match c {
                _ if escaped => escaped = false,
                b'\\' => escaped = true,
                b'"' => in_string = false,
                _ => {}
            }
        } else if c == b'"' {
            in_string = true;
        } else if c == b'/' && bytes.get(idx + 1) == Some(&b'/') {
            return &raw[..idx];
        }
    }
    raw
}

/// Label names referenced by a branch or switch body, without resolving them.
fn operand_label_names(body: &str) -> Vec<&str> {
    let (mnemonic, rest) = split_mnemonic(body);
    match OpCode::from_mnemonic(mnemonic).map(OpCode::operand_kind) {
        Some(OperandKind::Label) if !rest.is_empty() => vec![rest],
        Some(OperandKind::Labels) => rest
            .trim_start_matches('(')
            .trim_end_matches(')')
            .split(',')
            .map(str::trim)
            .filter(|name| !name.is_empty())
            .collect(),
        _ => Vec::new(),
    }
}

fn split_mnemonic(body: &str) -> (&str, &str) {
    match body.split_once(char::is_whitespace) {
        Some((mnemonic, rest)) => (mnemonic, rest.trim()),
        None => (body, ""),
    }
}

fn numbered_label(name: &str) -> Option<LabelId> {
    name.strip_prefix('L')?.parse().ok().map(LabelId)
}

#[derive(Default)]
struct LabelNames {
    order: Vec<String>,
    ids: HashMap<String, LabelId>,
}

impl LabelNames {
    fn note(&mut self, name: &str) {
        if !self.order.iter().any(|n| n == name) {
            self.order.push(name.to_string());
        }
    }

    /// Numbered names keep their id; the rest are numbered after the highest.
    ///
    /// `u32::MAX` is refused so the stream can always allocate a fresh label.
    fn assign(&mut self) -> Result<(), IlError> {
        let out_of_range = |name: &str| IlError::LabelOutOfRange {
            name: name.to_string(),
        };
        let mut next: u32 = 0;
        for name in &self.order {
            if let Some(id) = numbered_label(name) {
                next = next.max(id.0.checked_add(1).ok_or_else(|| out_of_range(name))?);
                self.ids.insert(name.clone(), id);
            }
        }
        for name in &self.order {
            if !self.ids.contains_key(name) {
                self.ids.insert(name.clone(), LabelId(next));
                next = next.checked_add(1).ok_or_else(|| out_of_range(name))?;
            }
        }
        Ok(())
    }

    fn id(&self, name: &str) -> LabelId {
        self.ids[name]
    }
}

pub(crate) fn parse_instruction_with(
    line: usize,
    body: &str,
    label: &mut dyn FnMut(&str) -> Result<LabelId, IlError>,
) -> Result<Instruction, IlError> {
    let (mnemonic, rest) = split_mnemonic(body);
    let opcode = OpCode::from_mnemonic(mnemonic).ok_or_else(|| IlError::UnknownOpcode {
        line,
        mnemonic: mnemonic.to_string(),
        hint: OpCode::suggest(mnemonic)
            .map(|s| format!(" (did you mean '{s}'?)"))
            .unwrap_or_default(),
    })?;

    let bad = |message: String| IlError::BadOperand {
        line,
        opcode: opcode.mnemonic().to_string(),
        message,
    };

    let kind = opcode.operand_kind();
    if kind == OperandKind::None {
        if !rest.is_empty() {
            return Err(bad(format!("unexpected operand '{rest}'")));
        }
        return Ok(Instruction::simple(opcode));
    }
    if rest.is_empty() {
        return Err(bad("missing operand".to_string()));
    }

    let operand = match kind {
        OperandKind::None => Operand::None,
        OperandKind::Int8 | OperandKind::Int32 | OperandKind::Local | OperandKind::Arg => {
            Operand::Int(parse_int(rest).ok_or_else(|| bad(format!("'{rest}' is not an integer")))?)
        }
        OperandKind::Float32 | OperandKind::Float64 => Operand::Float(
            rest.trim_end_matches('f')
                .parse()
                .map_err(|_| bad(format!("'{rest}' is not a number")))?,
        ),
        OperandKind::String => Operand::String(parse_string(rest).ok_or_else(|| {
            bad(format!("'{rest}' is not a quoted string"))
        })?),
        OperandKind::Type => Operand::Type(rest.to_string()),
        OperandKind::Field => Operand::Field(parse_field(rest).ok_or_else(|| {
            bad("expected 'Type Owner::name'".to_string())
        })?),
        OperandKind::Method => Operand::Method(parse_method(rest).ok_or_else(|| {
            bad("expected '[instance] Ret Owner::name(Params)'".to_string())
        })?),
        OperandKind::Label => Operand::Label(label(rest)?),
        OperandKind::Labels => {
            let inner = rest
                .strip_prefix('(')
                .and_then(|r| r.strip_suffix(')'))
                .ok_or_else(|| bad("expected '(label, ...)'".to_string()))?;
            let mut labels = Vec::new();
            for name in inner.split(',').map(str::trim).filter(|n| !n.is_empty()) {
                labels.push(label(name)?);
            }
            Operand::Labels(labels)
        }
    };

    if !operand.fits(kind) {
        return Err(bad(format!("'{rest}' is out of range")));
    }
    Ok(Instruction::new(opcode, operand))
}

fn parse_int(text: &str) -> Option<i32> {
    match text.strip_prefix("0x") {
        Some(hex) => i32::from_str_radix(hex, 16).ok(),
        None => text.parse().ok(),
    }
}

fn parse_string(text: &str) -> Option<String> {
    let inner = text.strip_prefix('"')?.strip_suffix('"')?;
    let mut out = String::with_capacity(inner.len());
    let mut chars = inner.chars();
    while let Some(c) = chars.next() {
        if c != '\\' {
            out.push(c);
            continue;
        }
        match chars.next()? {
            'n' => out.push('\n'),
            't' => out.push('\t'),
            'r' => out.push('\r'),
            '0' => out.push('\0'),
            other => out.push(other),
        }
    }
    Some(out)
}

fn split_path(path: &str) -> Option<(String, String)> {
    let (owner, name) = path.rsplit_once("::")?;
    if owner.is_empty() || name.is_empty() {
        return None;
    }
    Some((owner.to_string(), name.to_string()))
}

fn parse_field(text: &str) -> Option<FieldRef> {
    let (ty, path) = text.rsplit_once(char::is_whitespace)?;
    let (owner, name) = split_path(path.trim())?;
    Some(FieldRef::new(ty.trim(), owner, name))
}

fn parse_method(text: &str) -> Option<MethodRef> {
    let (instance, text) = match text.strip_prefix("instance ") {
        Some(rest) => (true, rest.trim_start()),
        None => (false, text),
    };
    let open = text.find('(')?;
    let params = text[open..].strip_prefix('(')?.strip_suffix(')')?;
    let (ret, path) = text[..open].trim().rsplit_once(char::is_whitespace)?;
    let (owner, name) = split_path(path.trim())?;
    let ret = ret.trim();
    Some(MethodRef {
        instance,
        ret: (ret != "void").then(|| ret.to_string()),
        owner,
        name,
        params: params
            .split(',')
            .map(str::trim)
            .filter(|p| !p.is_empty())
            .map(str::to_string)
            .collect(),
    })
}
