use crate::cache;
use crate::compute::Computer;
use crate::matcher::PatternElement;
use crate::script::version::VersionGate;
use serde::Deserialize;
use std::collections::{HashMap, HashSet};
use std::fmt;

/// A declarative patch for one method shape.
#[derive(Debug, Deserialize, Default, Clone)]
pub struct PatchScript {
    #[serde(default)]
    pub meta: Metadata,
    #[serde(default)]
    pub steps: Vec<Step>,
}

impl PatchScript {
    pub fn validate(&self) -> Result<(), ValidationError> {
        let mut issues = Vec::new();

        if self.meta.name.trim().is_empty() {
            issues.push(ValidationIssue::MissingField {
                step_id: None,
                field: "meta.name",
            });
        }
        if self.meta.target.trim().is_empty() {
            issues.push(ValidationIssue::MissingField {
                step_id: None,
                field: "meta.target",
            });
        }
        if let Some(verify) = &self.meta.verify {
            if parse_fingerprint(verify).is_none() {
                issues.push(ValidationIssue::InvalidCombo {
                    step_id: None,
                    message: format!("meta.verify '{verify}' is not 'xxh3:<16 hex digits>'"),
                });
            }
        }

        if let Err(e) = VersionGate::parse(self.meta.version_range.as_deref()) {
            issues.push(ValidationIssue::InvalidCombo {
                step_id: None,
                message: e.to_string(),
            });
        }

        if self.steps.is_empty() {
            issues.push(ValidationIssue::EmptyStepList);
        }

        let mut seen_ids: HashSet<&str> = HashSet::new();
        let mut registers: HashMap<&str, CaptureKind> = HashMap::new();

        for step in &self.steps {
            let id = Some(step.id.clone());
            if step.id.trim().is_empty() {
                issues.push(ValidationIssue::MissingField {
                    step_id: None,
                    field: "id",
                });
            } else if !seen_ids.insert(&step.id) {
                issues.push(ValidationIssue::InvalidCombo {
                    step_id: id.clone(),
                    message: "duplicate step id".to_string(),
                });
            }

            if step.pattern.is_empty() {
                issues.push(ValidationIssue::MissingField {
                    step_id: id.clone(),
                    field: "pattern",
                });
            } else {
                match cache::get_or_parse_pattern(&step.pattern) {
                    Ok(pattern) => {
                        for element in pattern.elements() {
                            if let PatternElement::LabelRegister(name) = element {
                                check_register(
                                    &registers,
                                    &step.id,
                                    name,
                                    CaptureKind::Label,
                                    &mut issues,
                                );
                            }
                        }
                    }
                    Err(e) => issues.push(ValidationIssue::InvalidPattern {
                        step_id: step.id.clone(),
                        message: e.to_string(),
                    }),
                }
            }

            for text in step.action.instruction_texts() {
                for (name, kind) in register_uses(text) {
                    check_register(&registers, &step.id, name, kind, &mut issues);
                }
                for name in placeholder_computers(text) {
                    check_computer(&step.id, name, true, &mut issues);
                }
                if let Some(name) = text.trim().strip_prefix("@call ") {
                    check_computer(&step.id, name.trim(), false, &mut issues);
                }
            }

            match &step.action {
                Action::Capture { register, kind, .. } => {
                    if register.trim().is_empty() {
                        issues.push(ValidationIssue::MissingField {
                            step_id: id.clone(),
                            field: "action.register",
                        });
                    } else {
                        registers.insert(register, *kind);
                    }
                }
                Action::Insert { instructions, .. } => {
                    if instructions.is_empty() {
                        issues.push(ValidationIssue::MissingField {
                            step_id: id.clone(),
                            field: "action.instructions",
                        });
                    }
                }
                Action::Replace { with, .. } => {
                    if with.trim().is_empty() {
                        issues.push(ValidationIssue::MissingField {
                            step_id: id.clone(),
                            field: "action.with",
                        });
                    }
                }
                Action::BranchAround {
                    block, computer, ..
                } => {
                    if computer.trim().is_empty() {
                        issues.push(ValidationIssue::MissingField {
                            step_id: id.clone(),
                            field: "action.computer",
                        });
                    } else {
                        check_computer(&step.id, computer, false, &mut issues);
                    }
                    if let Some(block) = block {
                        if *block == 0 || *block > step.pattern.len() {
                            issues.push(ValidationIssue::InvalidCombo {
                                step_id: id.clone(),
                                message: format!(
                                    "block of {block} instructions does not fit a {}-element pattern",
                                    step.pattern.len()
                                ),
                            });
                        }
                    }
                }
            }
        }

        if issues.is_empty() {
            Ok(())
        } else {
            Err(ValidationError { issues })
        }
    }

    /// Parsed `meta.verify` fingerprint, if present and well-formed.
    pub fn expected_fingerprint(&self) -> Option<u64> {
        self.meta.verify.as_deref().and_then(parse_fingerprint)
    }
}

fn check_register(
    registers: &HashMap<&str, CaptureKind>,
    step_id: &str,
    name: &str,
    expected: CaptureKind,
    issues: &mut Vec<ValidationIssue>,
) {
    match registers.get(name) {
        None => issues.push(ValidationIssue::UnknownRegister {
            step_id: step_id.to_string(),
            name: name.to_string(),
        }),
        Some(kind) if *kind != expected => issues.push(ValidationIssue::InvalidCombo {
            step_id: Some(step_id.to_string()),
            message: format!("register '${name}' holds {kind}, expected {expected}"),
        }),
        Some(_) => {}
    }
}

fn check_computer(step_id: &str, name: &str, scalar: bool, issues: &mut Vec<ValidationIssue>) {
    match Computer::from_name(name) {
        Ok(computer) if scalar && !computer.is_scalar() => {
            issues.push(ValidationIssue::InvalidCombo {
                step_id: Some(step_id.to_string()),
                message: format!("'{name}' is not a scalar and cannot be folded into an operand"),
            })
        }
        Ok(_) => {}
        Err(e) => issues.push(ValidationIssue::InvalidCombo {
            step_id: Some(step_id.to_string()),
            message: e.to_string(),
        }),
    }
}

/// `xxh3:<hex>` to its value.
pub fn parse_fingerprint(text: &str) -> Option<u64> {
    let hex = text.trim().strip_prefix("xxh3:")?;
    if hex.len() != 16 {
        return None;
    }
    u64::from_str_radix(hex, 16).ok()
}

pub fn format_fingerprint(value: u64) -> String {
    format!("xxh3:{value:016x}")
}

/// Registers referenced by an instruction text, with the kind each use needs.
///
/// A text that is exactly `$name` replays an instruction; `$name` inside
/// braces supplies a computer argument; anywhere else it names a label.
pub(crate) fn register_uses(text: &str) -> Vec<(&str, CaptureKind)> {
    let text = text.trim();
    if let Some(name) = text.strip_prefix('$') {
        if is_identifier(name) {
            return vec![(name, CaptureKind::Instruction)];
        }
    }

    let mut uses = Vec::new();
    let mut depth = 0usize;
    let mut in_string = false;
    let bytes = text.as_bytes();
    let mut idx = 0;
    while idx < bytes.len() {
        match bytes[idx] {
            b'\\' if in_string => idx += 1,
            b'"' => in_string = !in_string,
            _ if in_string => {}
            b'{' => depth += 1,
            b'}' => depth = depth.saturating_sub(1),
            b'$' => {
                let rest = &text[idx + 1..];
                let len = rest
                    .find(|c: char| !(c.is_ascii_alphanumeric() || c == '_' || c == '-'))
                    .unwrap_or(rest.len());
                if len > 0 {
                    let kind = if depth > 0 {
                        CaptureKind::Instruction
                    } else {
                        CaptureKind::Label
                    };
                    uses.push((&rest[..len], kind));
                }
                idx += len;
            }
            _ => {}
        }
        idx += 1;
    }
    uses
}

/// Computer names inside `{...}` placeholders.
pub(crate) fn placeholder_computers(text: &str) -> Vec<&str> {
    let mut names = Vec::new();
    let mut rest = text;
    while let Some(open) = rest.find('{') {
        let Some(close) = rest[open..].find('}') else {
            break;
        };
        let inner = rest[open + 1..open + close].trim();
        if let Some(name) = inner.split_whitespace().next() {
            names.push(name);
        }
        rest = &rest[open + close + 1..];
    }
    names
}

fn is_identifier(name: &str) -> bool {
    !name.is_empty()
        && name
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || c == '_' || c == '-')
}

#[derive(Debug, Deserialize, Default, Clone)]
pub struct Metadata {
    #[serde(default)]
    pub name: String,
    #[serde(default)]
    pub description: Option<String>,
    /// Method the script was written for, e.g. `FishPond::draw`
    #[serde(default)]
    pub target: String,
    #[serde(default)]
    pub version_range: Option<String>,
    /// Expected fingerprint of the unpatched body, `xxh3:<hex>`
    #[serde(default)]
    pub verify: Option<String>,
}

#[derive(Debug, Deserialize, Clone)]
pub struct Step {
    pub id: String,
    #[serde(default)]
    pub pattern: Vec<String>,
    #[serde(default)]
    pub anchor: Anchor,
    /// Reset the cursor to the first instruction before searching
    #[serde(default)]
    pub from_start: bool,
    pub action: Action,
}

/// Which end of the match the cursor lands on.
#[derive(Debug, Deserialize, Clone, Copy, Default, PartialEq, Eq)]
#[serde(rename_all = "kebab-case")]
pub enum Anchor {
    Start,
    #[default]
    End,
}

#[derive(Debug, Deserialize, Clone, Copy, Default, PartialEq, Eq)]
#[serde(rename_all = "kebab-case")]
pub enum CaptureKind {
    /// The instruction itself, replayed later as `$name`
    #[default]
    Instruction,
    /// The label operand of a branch, matched later as `@label $name`
    Label,
}

impl fmt::Display for CaptureKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            CaptureKind::Instruction => write!(f, "an instruction"),
            CaptureKind::Label => write!(f, "a label"),
        }
    }
}

#[derive(Debug, Deserialize, Clone)]
#[serde(tag = "type", rename_all = "kebab-case")]
pub enum Action {
    Capture {
        register: String,
        #[serde(default)]
        kind: CaptureKind,
        #[serde(default)]
        offset: isize,
    },
    Insert {
        #[serde(default)]
        offset: isize,
        instructions: Vec<String>,
        /// Leave the cursor after the inserted run
        #[serde(default)]
        advance: bool,
    },
    Replace {
        #[serde(default)]
        offset: isize,
        #[serde(default)]
        expect: Option<String>,
        with: String,
        /// Inserted right after the replaced instruction
        #[serde(default)]
        then: Vec<String>,
    },
    BranchAround {
        /// Leading matched instructions that form the skipped block
        #[serde(default)]
        block: Option<usize>,
        /// Arguments pushed before the computer call
        #[serde(default)]
        load: Vec<String>,
        computer: String,
    },
}

impl Action {
    /// Every instruction text the action expands.
    pub fn instruction_texts(&self) -> Vec<&str> {
        match self {
            Action::Capture { .. } => Vec::new(),
            Action::Insert { instructions, .. } => {
                instructions.iter().map(String::as_str).collect()
            }
            Action::Replace {
                expect, with, then, ..
            } => expect
                .iter()
                .chain(std::iter::once(with))
                .chain(then)
                .map(String::as_str)
                .collect(),
            Action::BranchAround { load, .. } => load.iter().map(String::as_str).collect(),
        }
    }

    pub fn kind(&self) -> &'static str {
        match self {
            Action::Capture { .. } => "capture",
            Action::Insert { .. } => "insert",
            Action::Replace { .. } => "replace",
            Action::BranchAround { .. } => "branch-around",
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct ValidationError {
    pub issues: Vec<ValidationIssue>,
}

impl fmt::Display for ValidationError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for (idx, issue) in self.issues.iter().enumerate() {
            if idx > 0 {
                writeln!(f)?;
            }
            write!(f, "{issue}")?;
        }
        Ok(())
    }
}

impl std::error::Error for ValidationError {}

#[derive(Debug, Clone, PartialEq)]
pub enum ValidationIssue {
    EmptyStepList,
    MissingField {
        step_id: Option<String>,
        field: &'static str,
    },
    InvalidPattern {
        step_id: String,
        message: String,
    },
    UnknownRegister {
        step_id: String,
        name: String,
    },
    InvalidCombo {
        step_id: Option<String>,
        message: String,
    },
}

impl fmt::Display for ValidationIssue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ValidationIssue::EmptyStepList => write!(f, "patch script contains no steps"),
            ValidationIssue::MissingField { step_id, field } => match step_id {
                Some(id) => write!(f, "step '{id}' missing required field '{field}'"),
                None => write!(f, "script missing required field '{field}'"),
            },
            ValidationIssue::InvalidPattern { step_id, message } => {
                write!(f, "step '{step_id}' has an invalid pattern: {message}")
            }
            ValidationIssue::UnknownRegister { step_id, name } => {
                write!(f, "step '{step_id}' uses register '${name}' before it is captured")
            }
            ValidationIssue::InvalidCombo { step_id, message } => match step_id {
                Some(id) => write!(f, "step '{id}' has invalid configuration: {message}"),
                None => write!(f, "invalid patch script: {message}"),
            },
        }
    }
}
