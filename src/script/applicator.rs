//! Patch script driver.
//!
//! One loop interprets every step against a private [`CodeMatcher`]:
//! - Validates the config record and the input fingerprint up front
//! - Searches each step's pattern, then performs its action
//! - Checks label closure and stack balance on the result
//! - Falls back to the untouched input on any failure

use crate::cache;
use crate::compute::{ComputeError, Computer, ConfigRecord, InvalidConfigError};
use crate::edit::{EditError, EditVerification};
use crate::il::{asm, IlError, Instruction, InstructionStream, LabelId};
use crate::matcher::{CodeMatcher, MatchError, MatchResult, Pattern, PatternElement};
use crate::script::schema::{format_fingerprint, Action, Anchor, CaptureKind, PatchScript, Step};
use crate::validate::{self, StreamError};
use std::collections::HashMap;
use std::fmt;
use thiserror::Error;
use tracing::{debug, error, info, warn};

#[derive(Error, Debug, Clone, PartialEq)]
pub enum PatchError {
    #[error("step '{step}': pattern not found searching forward from {from}: {pattern}")]
    PatternNotFound {
        step: String,
        pattern: String,
        from: usize,
    },

    #[error("label {label} is referenced but never bound")]
    UnboundLabel { label: LabelId },

    #[error("label {label} was created but no branch targets it")]
    UnreferencedLabel { label: LabelId },

    #[error(transparent)]
    InvalidConfig(#[from] InvalidConfigError),

    #[error("input fingerprint {found} does not match expected {expected}")]
    ShapeMismatch { expected: String, found: String },

    #[error("step '{step}': register '${name}' is not captured")]
    UnknownRegister { step: String, name: String },

    #[error("step '{step}': register '${name}' does not hold {expected}")]
    RegisterKind {
        step: String,
        name: String,
        expected: CaptureKind,
    },

    #[error("step '{step}': block at {position} is a branch target and cannot be skipped")]
    BlockIsTarget { step: String, position: usize },

    #[error("step '{step}': {source}")]
    Edit { step: String, source: EditError },

    #[error("step '{step}': {source}")]
    Cursor { step: String, source: MatchError },

    #[error("step '{step}': bad instruction '{text}': {source}")]
    Instruction {
        step: String,
        text: String,
        source: IlError,
    },

    #[error("step '{step}': {source}")]
    Compute { step: String, source: ComputeError },

    #[error("patched stream is invalid: {0}")]
    Stream(StreamError),
}

impl PatchError {
    /// Id of the step that failed, if the failure belongs to one.
    pub fn step(&self) -> Option<&str> {
        match self {
            PatchError::PatternNotFound { step, .. }
            | PatchError::UnknownRegister { step, .. }
            | PatchError::RegisterKind { step, .. }
            | PatchError::BlockIsTarget { step, .. }
            | PatchError::Edit { step, .. }
            | PatchError::Cursor { step, .. }
            | PatchError::Instruction { step, .. }
            | PatchError::Compute { step, .. } => Some(step),
            _ => None,
        }
    }

    fn from_match(step: &str, err: MatchError) -> Self {
        let step = step.to_string();
        match err {
            MatchError::PatternNotFound { pattern, from } => PatchError::PatternNotFound {
                step,
                pattern,
                from,
            },
            MatchError::UnboundRegister { name } => PatchError::UnknownRegister { step, name },
            MatchError::Edit(source) => PatchError::Edit { step, source },
            source => PatchError::Cursor { step, source },
        }
    }
}

impl From<StreamError> for PatchError {
    fn from(err: StreamError) -> Self {
        match err {
            StreamError::UnboundLabel { label } => PatchError::UnboundLabel { label },
            StreamError::UnreferencedLabel { label } => PatchError::UnreferencedLabel { label },
            other => PatchError::Stream(other),
        }
    }
}

/// What one step did.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StepReport {
    pub start: usize,
    pub end: usize,
    /// Edits that changed the stream
    pub edits: usize,
}

/// Result of applying a script
#[derive(Debug, Clone, PartialEq)]
#[must_use = "PatchOutcome carries the stream to install"]
pub enum PatchOutcome {
    /// Every step applied and the result validated
    Applied {
        stream: InstructionStream,
        edits: usize,
    },
    /// The script failed; `stream` is the untouched input
    Fallback {
        stream: InstructionStream,
        error: PatchError,
    },
}

impl PatchOutcome {
    pub fn stream(&self) -> &InstructionStream {
        match self {
            PatchOutcome::Applied { stream, .. } | PatchOutcome::Fallback { stream, .. } => stream,
        }
    }

    pub fn into_stream(self) -> InstructionStream {
        match self {
            PatchOutcome::Applied { stream, .. } | PatchOutcome::Fallback { stream, .. } => stream,
        }
    }

    pub fn is_applied(&self) -> bool {
        matches!(self, PatchOutcome::Applied { .. })
    }

    pub fn error(&self) -> Option<&PatchError> {
        match self {
            PatchOutcome::Applied { .. } => None,
            PatchOutcome::Fallback { error, .. } => Some(error),
        }
    }
}

impl fmt::Display for PatchOutcome {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            PatchOutcome::Applied { edits, .. } => write!(f, "Applied ({edits} edits)"),
            PatchOutcome::Fallback { error, .. } => write!(f, "Fell back to original: {error}"),
        }
    }
}

/// Receives progress and failures from the driver.
pub trait Reporter {
    fn step_applied(&mut self, _script: &str, _step: &str, _report: &StepReport) {}

    fn script_applied(&mut self, _script: &str, _edits: usize) {}

    fn script_failed(&mut self, script: &str, error: &PatchError);
}

/// Reports through `tracing`.
#[derive(Debug, Default, Clone, Copy)]
pub struct TracingReporter;

impl Reporter for TracingReporter {
    fn step_applied(&mut self, script: &str, step: &str, report: &StepReport) {
        debug!(
            script,
            step,
            start = report.start,
            end = report.end,
            edits = report.edits,
            "step applied"
        );
    }

    fn script_applied(&mut self, script: &str, edits: usize) {
        info!(script, edits, "patch applied");
    }

    fn script_failed(&mut self, script: &str, error: &PatchError) {
        error!(
            script,
            step = error.step().unwrap_or("-"),
            %error,
            "patch failed; keeping original method"
        );
    }
}

struct Silent;

impl Reporter for Silent {
    fn script_failed(&mut self, _script: &str, _error: &PatchError) {}
}

/// Apply `script`, falling back to `input` on any failure.
///
/// The failure is handed to `reporter`; the caller always gets a stream it
/// can install.
pub fn apply_script(
    script: &PatchScript,
    input: &InstructionStream,
    config: &ConfigRecord,
    reporter: &mut dyn Reporter,
) -> PatchOutcome {
    let name = script.meta.name.as_str();
    match run(script, input, config, reporter) {
        Ok((stream, edits)) => {
            reporter.script_applied(name, edits);
            PatchOutcome::Applied { stream, edits }
        }
        Err(error) => {
            warn!(script = name, %error, "falling back to unpatched stream");
            reporter.script_failed(name, &error);
            PatchOutcome::Fallback {
                stream: input.clone(),
                error,
            }
        }
    }
}

/// Apply `script`, returning the patched stream or the first error.
pub fn try_apply(
    script: &PatchScript,
    input: &InstructionStream,
    config: &ConfigRecord,
) -> Result<InstructionStream, PatchError> {
    run(script, input, config, &mut Silent).map(|(stream, _)| stream)
}

fn run(
    script: &PatchScript,
    input: &InstructionStream,
    config: &ConfigRecord,
    reporter: &mut dyn Reporter,
) -> Result<(InstructionStream, usize), PatchError> {
    let mut driver = Driver::new(script, input, config)?;
    for step in &script.steps {
        let report = driver.step(step)?;
        debug!(
            script = script.meta.name.as_str(),
            step = step.id.as_str(),
            action = step.action.kind(),
            start = report.start,
            "step matched"
        );
        reporter.step_applied(&script.meta.name, &step.id, &report);
    }
    driver.finish()
}

/// Outcome of one step in a dry run
#[derive(Debug, Clone, PartialEq)]
pub enum StepStatus {
    Ok(StepReport),
    Failed(PatchError),
    /// An earlier step failed
    NotRun,
}

impl fmt::Display for StepStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            StepStatus::Ok(report) => write!(
                f,
                "matched {}..={} ({} edits)",
                report.start, report.end, report.edits
            ),
            StepStatus::Failed(error) => write!(f, "failed: {error}"),
            StepStatus::NotRun => write!(f, "not run"),
        }
    }
}

/// Dry-run report: per-step status plus the overall result.
#[derive(Debug, Clone, PartialEq)]
pub struct ScriptCheck {
    pub steps: Vec<(String, StepStatus)>,
    /// Fingerprint of the stream the script would produce
    pub result: Result<u64, PatchError>,
}

impl ScriptCheck {
    pub fn is_ok(&self) -> bool {
        self.result.is_ok()
    }
}

/// Run every step without producing output, recording each step's status.
pub fn check_script(
    script: &PatchScript,
    input: &InstructionStream,
    config: &ConfigRecord,
) -> ScriptCheck {
    let mut steps: Vec<(String, StepStatus)> = script
        .steps
        .iter()
        .map(|s| (s.id.clone(), StepStatus::NotRun))
        .collect();

    let mut driver = match Driver::new(script, input, config) {
        Ok(driver) => driver,
        Err(error) => {
            return ScriptCheck {
                steps,
                result: Err(error),
            }
        }
    };

    for (idx, step) in script.steps.iter().enumerate() {
        match driver.step(step) {
            Ok(report) => steps[idx].1 = StepStatus::Ok(report),
            Err(error) => {
                steps[idx].1 = StepStatus::Failed(error.clone());
                return ScriptCheck {
                    steps,
                    result: Err(error),
                };
            }
        }
    }

    let result = driver.finish().map(|(stream, _)| stream.fingerprint());
    ScriptCheck { steps, result }
}

#[derive(Clone)]
enum Register {
    Instruction(Instruction),
    Label(LabelId),
}

struct Driver<'a> {
    config: &'a ConfigRecord,
    matcher: CodeMatcher,
    registers: HashMap<String, Register>,
    /// Only balanced inputs are required to stay balanced
    check_stack: bool,
}

impl<'a> Driver<'a> {
    fn new(
        script: &PatchScript,
        input: &InstructionStream,
        config: &'a ConfigRecord,
    ) -> Result<Self, PatchError> {
        config.validate()?;

        if let Some(expected) = script.expected_fingerprint() {
            let found = input.fingerprint();
            if found != expected {
                return Err(PatchError::ShapeMismatch {
                    expected: format_fingerprint(expected),
                    found: format_fingerprint(found),
                });
            }
        }

        Ok(Self {
            config,
            matcher: CodeMatcher::new(input.clone()),
            registers: HashMap::new(),
            check_stack: validate::stack_depths(input).is_ok(),
        })
    }

    fn step(&mut self, step: &Step) -> Result<StepReport, PatchError> {
        let id = step.id.as_str();
        let cursor = |e| PatchError::from_match(id, e);

        let pattern = cache::get_or_parse_pattern(&step.pattern).map_err(cursor)?;
        let pattern = self.bind_labels(id, &pattern)?;

        if step.from_start {
            self.matcher.start();
        }
        let edits_before = self.matcher.edits_applied();
        let found = match step.anchor {
            Anchor::Start => self.matcher.match_start_forward(&pattern),
            Anchor::End => self.matcher.match_end_forward(&pattern),
        }
        .map_err(cursor)?;

        match &step.action {
            Action::Capture {
                register,
                kind,
                offset,
            } => self.capture(id, &found, register, *kind, *offset)?,
            Action::Insert {
                offset,
                instructions,
                advance,
            } => {
                let instructions = self.expand_all(id, instructions)?;
                self.matcher.advance(*offset).map_err(cursor)?;
                if *advance {
                    self.matcher.insert_and_advance(instructions).map_err(cursor)?;
                } else {
                    self.matcher.insert(instructions).map_err(cursor)?;
                }
            }
            Action::Replace {
                offset,
                expect,
                with,
                then,
            } => {
                let replacement = self.expand(id, with)?;
                let then = self.expand_all(id, then)?;
                self.matcher.advance(*offset).map_err(cursor)?;
                match expect {
                    Some(text) => {
                        let expected = self.expand(id, text)?;
                        self.matcher.set_verified(
                            EditVerification::from_instruction(&expected),
                            replacement.opcode,
                            replacement.operand,
                        )
                    }
                    None => self.matcher.set(replacement.opcode, replacement.operand),
                }
                .map_err(cursor)?;
                self.matcher.advance(1).map_err(cursor)?;
                if !then.is_empty() {
                    self.matcher.insert_and_advance(then).map_err(cursor)?;
                }
            }
            Action::BranchAround {
                block,
                load,
                computer,
            } => {
                let block = block.unwrap_or(pattern.len());
                self.branch_around(id, &found, block, load, computer)?;
            }
        }

        Ok(StepReport {
            start: found.start,
            end: found.end,
            edits: self.matcher.edits_applied() - edits_before,
        })
    }

    fn capture(
        &mut self,
        step: &str,
        found: &MatchResult,
        register: &str,
        kind: CaptureKind,
        offset: isize,
    ) -> Result<(), PatchError> {
        let captured = if offset == 0 {
            Instruction::new(found.opcode, found.operand.clone())
        } else {
            self.matcher
                .advance(offset)
                .map_err(|e| PatchError::from_match(step, e))?;
            self.matcher
                .instruction()
                .map_err(|e| PatchError::from_match(step, e))?
                .without_labels()
        };

        let value = match kind {
            CaptureKind::Instruction => Register::Instruction(captured),
            CaptureKind::Label => {
                Register::Label(captured.label_operand().ok_or_else(|| PatchError::RegisterKind {
                    step: step.to_string(),
                    name: register.to_string(),
                    expected: CaptureKind::Label,
                })?)
            }
        };
        debug!(step, register, ?value, "captured");
        self.registers.insert(register.to_string(), value);
        Ok(())
    }

    /// Insert `loads; call computer; br L` before the block and bind `L`
    /// to the instruction after it, leaving the block as dead code.
    fn branch_around(
        &mut self,
        step: &str,
        found: &MatchResult,
        block: usize,
        load: &[String],
        computer: &str,
    ) -> Result<(), PatchError> {
        let cursor = |e| PatchError::from_match(step, e);
        let computer = Computer::from_name(computer).map_err(|source| PatchError::Compute {
            step: step.to_string(),
            source,
        })?;
        let start = found.start;
        let after = start + block;

        for position in start..after {
            let labelled = self
                .matcher
                .stream()
                .get(position)
                .is_some_and(|inst| !inst.labels.is_empty());
            if labelled {
                return Err(PatchError::BlockIsTarget {
                    step: step.to_string(),
                    position,
                });
            }
        }

        let mut prologue = self.expand_all(step, load)?;
        prologue.push(Instruction::call(computer.host_method()));

        let here = self.matcher.pos() as isize;
        self.matcher.advance(after as isize - here).map_err(cursor)?;
        let resume = self.matcher.create_label().map_err(cursor)?;
        prologue.push(Instruction::branch(resume));

        self.matcher
            .advance(start as isize - after as isize)
            .map_err(cursor)?;
        self.matcher.insert_and_advance(prologue).map_err(cursor)?;
        self.matcher.advance(block as isize).map_err(cursor)?;
        Ok(())
    }

    fn bind_labels(&self, step: &str, pattern: &Pattern) -> Result<Pattern, PatchError> {
        if pattern.is_bound() {
            return Ok(pattern.clone());
        }
        for element in pattern.elements() {
            if let PatternElement::LabelRegister(name) = element {
                self.label_register(step, name)?;
            }
        }
        pattern
            .bind(&|name: &str| match self.registers.get(name) {
                Some(Register::Label(label)) => Some(*label),
                _ => None,
            })
            .map_err(|e| PatchError::from_match(step, e))
    }

    fn register(&self, step: &str, name: &str) -> Result<&Register, PatchError> {
        self.registers
            .get(name)
            .ok_or_else(|| PatchError::UnknownRegister {
                step: step.to_string(),
                name: name.to_string(),
            })
    }

    fn label_register(&self, step: &str, name: &str) -> Result<LabelId, PatchError> {
        match self.register(step, name)? {
            Register::Label(label) => Ok(*label),
            Register::Instruction(_) => Err(PatchError::RegisterKind {
                step: step.to_string(),
                name: name.to_string(),
                expected: CaptureKind::Label,
            }),
        }
    }

    fn instruction_register(&self, step: &str, name: &str) -> Result<&Instruction, PatchError> {
        match self.register(step, name)? {
            Register::Instruction(inst) => Ok(inst),
            Register::Label(_) => Err(PatchError::RegisterKind {
                step: step.to_string(),
                name: name.to_string(),
                expected: CaptureKind::Instruction,
            }),
        }
    }

    fn expand_all(&self, step: &str, texts: &[String]) -> Result<Vec<Instruction>, PatchError> {
        texts.iter().map(|text| self.expand(step, text)).collect()
    }

    /// Turn one instruction text into an instruction.
    ///
    /// `$name` replays a captured instruction, `@call name` calls a
    /// computer's host helper, and anything else is assembly text in which
    /// `{computer [arg]}` folds a scalar and `$label` names a captured label.
    fn expand(&self, step: &str, text: &str) -> Result<Instruction, PatchError> {
        let text = text.trim();
        if let Some(name) = text.strip_prefix('$') {
            return Ok(self.instruction_register(step, name)?.clone());
        }
        if let Some(name) = text.strip_prefix("@call ") {
            let computer =
                Computer::from_name(name.trim()).map_err(|source| PatchError::Compute {
                    step: step.to_string(),
                    source,
                })?;
            return Ok(Instruction::call(computer.host_method()));
        }

        let folded = self.fold_placeholders(step, text)?;
        let resolved = self.resolve_label_registers(step, &folded)?;
        asm::parse_instruction(&resolved).map_err(|source| PatchError::Instruction {
            step: step.to_string(),
            text: text.to_string(),
            source,
        })
    }

    fn fold_placeholders(&self, step: &str, text: &str) -> Result<String, PatchError> {
        let mut out = String::with_capacity(text.len());
        let mut rest = text;
        while let Some(open) = rest.find('{') {
            let Some(close) = rest[open..].find('}') else {
                break;
            };
            out.push_str(&rest[..open]);
            let inner = rest[open + 1..open + close].trim();
            let mut parts = inner.split_whitespace();
            let name = parts.next().unwrap_or_default();
            let arg = match parts.next() {
                None => None,
                Some(arg) => Some(self.placeholder_arg(step, arg)?),
            };
            let value = Computer::from_name(name)
                .and_then(|c| c.evaluate_literal(self.config, arg))
                .map_err(|source| PatchError::Compute {
                    step: step.to_string(),
                    source,
                })?;
            out.push_str(&value);
            rest = &rest[open + close + 1..];
        }
        out.push_str(rest);
        Ok(out)
    }

    fn placeholder_arg(&self, step: &str, arg: &str) -> Result<i32, PatchError> {
        if let Some(name) = arg.strip_prefix('$') {
            let captured = self.instruction_register(step, name)?;
            return captured.int_value().ok_or_else(|| PatchError::Instruction {
                step: step.to_string(),
                text: arg.to_string(),
                source: IlError::BadOperand {
                    line: 1,
                    opcode: captured.opcode.to_string(),
                    message: format!(
                        "register '${name}' holds '{captured}', not an integer constant"
                    ),
                },
            });
        }
        arg.parse().map_err(|_| PatchError::Instruction {
            step: step.to_string(),
            text: arg.to_string(),
            source: IlError::BadOperand {
                line: 1,
                opcode: "{...}".to_string(),
                message: format!("'{arg}' is not an integer argument"),
            },
        })
    }

    fn resolve_label_registers(&self, step: &str, text: &str) -> Result<String, PatchError> {
        let Some((mnemonic, operands)) = text.split_once(char::is_whitespace) else {
            return Ok(text.to_string());
        };
        if !operands.contains('$') || operands.trim_start().starts_with('"') {
            return Ok(text.to_string());
        }
        let mut out = format!("{mnemonic} ");
        let mut rest = operands.trim_start();
        while let Some(dollar) = rest.find('$') {
            out.push_str(&rest[..dollar]);
            let tail = &rest[dollar + 1..];
            let len = tail
                .find(|c: char| !(c.is_ascii_alphanumeric() || c == '_' || c == '-'))
                .unwrap_or(tail.len());
            let label = self.label_register(step, &tail[..len])?;
            out.push_str(&label.to_string());
            rest = &tail[len..];
        }
        out.push_str(rest);
        Ok(out)
    }

    fn finish(self) -> Result<(InstructionStream, usize), PatchError> {
        let created = self.matcher.created_labels().to_vec();
        let edits = self.matcher.edits_applied();
        let check_stack = self.check_stack;
        let stream = self.matcher.into_stream();

        validate::check_labels(&stream)?;
        validate::check_created_labels(&stream, &created)?;
        if check_stack {
            validate::stack_depths(&stream)?;
        }
        Ok((stream, edits))
    }
}

impl fmt::Debug for Register {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Register::Instruction(inst) => write!(f, "{inst}"),
            Register::Label(label) => write!(f, "{label}"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::script::loader::load_from_str;

    const BODY: &str = "\
        ldarg.0\n\
        call instance BuildingData Building::GetData()\n\
        stloc.0\n\
        ldloc.0\n\
        call bool Building::ShouldDrawShadow(BuildingData)\n\
        pop\n\
        ldc.i4.0\n\
        ldc.i4.0\n\
        ldc.i4.s 80\n\
        ldc.i4.s 80\n\
        newobj instance void Rectangle::.ctor(i4, i4, i4, i4)\n\
        pop\n\
        ldc.i4.0\n\
        stloc.1\n\
        br cond\n\
        body: ldloc.1\n\
        ldc.i4.1\n\
        add\n\
        stloc.1\n\
        cond: ldloc.1\n\
        ldc.i4.4\n\
        blt body\n\
        ret\n";

    fn body() -> InstructionStream {
        asm::parse(BODY).unwrap()
    }

    fn script(steps: &str) -> PatchScript {
        let header = r#"
[meta]
name = "test"
target = "FishPond::draw"

[[steps]]
id = "data"
pattern = ["@ldloc", "call Building::ShouldDrawShadow"]
anchor = "start"
from_start = true
action = { type = "capture", register = "data" }
"#;
        load_from_str(&format!("{header}\n{steps}")).unwrap()
    }

    const RECT: &str = r#"
[[steps]]
id = "rect"
pattern = ["ldc.i4.0", "ldc.i4.0", "ldc.i4.s 80", "ldc.i4.s 80", "newobj"]
action = { type = "branch-around", load = ["$data"], computer = "pond-source-rect" }
"#;

    const LOOP: &str = r#"
[[steps]]
id = "loop-label"
pattern = ["@stloc", "br"]
action = { type = "capture", register = "loop", kind = "label" }

[[steps]]
id = "loop-bound"
pattern = ["@label $loop", "ldc.i4.4"]
action = { type = "replace", expect = "ldc.i4.4", with = "$data", then = ["@call size-x"] }
"#;

    struct Recording {
        steps: Vec<String>,
        failures: Vec<PatchError>,
    }

    impl Reporter for Recording {
        fn step_applied(&mut self, _script: &str, step: &str, _report: &StepReport) {
            self.steps.push(step.to_string());
        }

        fn script_failed(&mut self, _script: &str, error: &PatchError) {
            self.failures.push(error.clone());
        }
    }

    #[test]
    fn branch_around_skips_literal_block() {
        let out = try_apply(&script(RECT), &body(), &ConfigRecord::square(4)).unwrap();
        let text = out.to_string();
        assert!(text.contains(
            "    ldloc.0\n    call Rectangle GamePatches::GetPondSourceRect(BuildingData)\n    br L2\n    ldc.i4.0\n"
        ));

        let live = validate::reachable(&out).unwrap();
        let block_start = out
            .iter()
            .position(|i| i.to_string() == "ldc.i4.s 80")
            .unwrap();
        assert!(!live[block_start]);
        assert!(validate::stack_depths(&out).is_ok());
    }

    #[test]
    fn replace_uses_captured_local_and_label() {
        let out = try_apply(&script(LOOP), &body(), &ConfigRecord::square(4)).unwrap();
        // The loop head keeps its label; only the bound changes.
        let cond = out.resolve(LabelId(0)).unwrap();
        let tail: Vec<String> = out.instructions()[cond..cond + 4]
            .iter()
            .map(ToString::to_string)
            .collect();
        assert_eq!(
            tail,
            vec![
                "ldloc.1",
                "ldloc.0",
                "call i4 GamePatches::GetSizeX(BuildingData)",
                "blt L1"
            ]
        );
    }

    #[test]
    fn failure_falls_back_to_input() {
        let input = body();
        let broken = script(&RECT.replace("ldc.i4.s 80", "ldc.i4.s 81"));
        let mut reporter = Recording {
            steps: Vec::new(),
            failures: Vec::new(),
        };
        let outcome = apply_script(&broken, &input, &ConfigRecord::square(4), &mut reporter);
        assert!(!outcome.is_applied());
        assert_eq!(outcome.stream(), &input);
        assert_eq!(outcome.stream().fingerprint(), input.fingerprint());
        assert!(matches!(
            outcome.error(),
            Some(PatchError::PatternNotFound { step, .. }) if step == "rect"
        ));
        assert_eq!(reporter.steps, vec!["data"]);
        assert_eq!(reporter.failures.len(), 1);
    }

    #[test]
    fn invalid_config_is_rejected_before_matching() {
        let err = try_apply(&script(RECT), &body(), &ConfigRecord::new(0, 4)).unwrap_err();
        assert_eq!(
            err,
            PatchError::InvalidConfig(InvalidConfigError {
                width: 0,
                height: 4
            })
        );
    }

    #[test]
    fn fingerprint_gate() {
        let input = body();
        let mut gated = script(RECT);
        gated.meta.verify = Some(format_fingerprint(input.fingerprint()));
        assert!(try_apply(&gated, &input, &ConfigRecord::square(4)).is_ok());

        gated.meta.verify = Some(format_fingerprint(input.fingerprint() ^ 1));
        assert!(matches!(
            try_apply(&gated, &input, &ConfigRecord::square(4)),
            Err(PatchError::ShapeMismatch { .. })
        ));
    }

    #[test]
    fn placeholders_fold_scalars() {
        let s = script(
            r#"
[[steps]]
id = "width"
pattern = ["ldc.i4.s 80"]
action = { type = "replace", with = "ldc.i4 {pixel-width}" }

[[steps]]
id = "offset"
pattern = ["ldc.i4.s 80"]
action = { type = "capture", register = "eighty" }

[[steps]]
id = "scaled"
pattern = ["ldc.i4.4"]
action = { type = "replace", with = "ldc.i4 {scaled-offset $eighty}" }
"#,
        );
        let out = try_apply(&s, &body(), &ConfigRecord::square(3)).unwrap();
        let text = out.to_string();
        assert!(text.contains("ldc.i4 48\n    ldc.i4.s 80\n"));
        assert!(text.contains("ldloc.1\n    ldc.i4 48\n    blt"));
    }

    #[test]
    fn registers_debug_as_assembly() {
        let inst = Register::Instruction(Instruction::load_int(80));
        assert_eq!(format!("{inst:?}"), "ldc.i4.s 80");
        assert_eq!(format!("{:?}", Register::Label(LabelId(3))), "L3");
    }

    #[test]
    fn placeholder_argument_must_be_integer_constant() {
        let s = script(
            r#"
[[steps]]
id = "data"
pattern = ["@ldloc", "call Building::ShouldDrawShadow"]
anchor = "start"
action = { type = "capture", register = "data" }

[[steps]]
id = "scaled"
pattern = ["ldc.i4.4"]
action = { type = "replace", with = "ldc.i4 {scaled-offset $data}" }
"#,
        );
        let err = try_apply(&s, &body(), &ConfigRecord::square(3)).unwrap_err();
        match &err {
            PatchError::Instruction { step, source, .. } => {
                assert_eq!(step, "scaled");
                assert!(matches!(source, IlError::BadOperand { .. }));
            }
            other => panic!("unexpected error: {other:?}"),
        }
        let message = err.to_string();
        assert!(message.contains("ldloc.0"));
        assert!(message.contains("not an integer constant"));
    }

    #[test]
    fn label_registers_in_instruction_text() {
        let s = script(
            r#"
[[steps]]
id = "loop-label"
pattern = ["@stloc", "br"]
action = { type = "capture", register = "loop", kind = "label" }

[[steps]]
id = "early-exit"
pattern = ["ret"]
from_start = true
action = { type = "insert", instructions = ["br $loop"] }
"#,
        );
        let out = try_apply(&s, &body(), &ConfigRecord::square(4)).unwrap();
        assert_eq!(out.get(out.len() - 2).unwrap().to_string(), "br L0");
    }

    #[test]
    fn capture_label_from_non_branch_fails() {
        let s = script(
            r#"
[[steps]]
id = "bad"
pattern = ["pop"]
action = { type = "capture", register = "x", kind = "label" }
"#,
        );
        assert!(matches!(
            try_apply(&s, &body(), &ConfigRecord::square(4)),
            Err(PatchError::RegisterKind { .. })
        ));
    }

    #[test]
    fn labelled_block_cannot_be_skipped() {
        let s = script(
            r#"
[[steps]]
id = "loop-tail"
pattern = ["ldloc.1", "ldc.i4.4"]
action = { type = "branch-around", load = ["$data"], computer = "size-x" }
"#,
        );
        assert!(matches!(
            try_apply(&s, &body(), &ConfigRecord::square(4)),
            Err(PatchError::BlockIsTarget { .. })
        ));
    }

    #[test]
    fn unbalanced_output_is_rejected() {
        let s = script(
            r#"
[[steps]]
id = "extra-push"
pattern = ["ret"]
from_start = true
action = { type = "insert", instructions = ["ldc.i4.1", "ldc.i4.1"] }
"#,
        );
        assert!(matches!(
            try_apply(&s, &body(), &ConfigRecord::square(4)),
            Err(PatchError::Stream(StreamError::UnbalancedReturn { .. }))
        ));
    }

    #[test]
    fn check_reports_each_step() {
        let broken = script(&format!("{RECT}{}", LOOP.replace("ldc.i4.4", "ldc.i4.7")));
        let check = check_script(&broken, &body(), &ConfigRecord::square(4));
        assert!(!check.is_ok());
        let statuses: Vec<&str> = check
            .steps
            .iter()
            .map(|(_, s)| match s {
                StepStatus::Ok(_) => "ok",
                StepStatus::Failed(_) => "failed",
                StepStatus::NotRun => "not-run",
            })
            .collect();
        assert_eq!(statuses, vec!["ok", "ok", "ok", "failed"]);

        let fine = check_script(&script(RECT), &body(), &ConfigRecord::square(4));
        let expected = try_apply(&script(RECT), &body(), &ConfigRecord::square(4))
            .unwrap()
            .fingerprint();
        assert_eq!(fine.result, Ok(expected));
    }
}
