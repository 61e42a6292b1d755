use crate::script::schema::{PatchScript, ValidationError};
use std::fs;
use std::path::{Path, PathBuf};
use thiserror::Error;
use walkdir::WalkDir;

#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("failed to read patch script from {}: {source}", .path.display())]
    Io {
        path: PathBuf,
        source: std::io::Error,
    },

    #[error("failed to parse patch script TOML{}: {source}", origin(.path))]
    Toml {
        path: Option<PathBuf>,
        source: toml_edit::de::Error,
    },

    #[error("invalid patch script{}: {source}", origin(.path))]
    Validation {
        path: Option<PathBuf>,
        source: ValidationError,
    },

    #[error("failed to scan {} for scripts: {source}", .path.display())]
    Walk {
        path: PathBuf,
        source: walkdir::Error,
    },
}

fn origin(path: &Option<PathBuf>) -> String {
    path.as_ref()
        .map(|p| format!(" ({})", p.display()))
        .unwrap_or_default()
}

impl ConfigError {
    /// Attach the file a string-parsed script came from.
    fn at(self, file: &Path) -> Self {
        match self {
            ConfigError::Toml { path: None, source } => ConfigError::Toml {
                path: Some(file.to_path_buf()),
                source,
            },
            ConfigError::Validation { path: None, source } => ConfigError::Validation {
                path: Some(file.to_path_buf()),
                source,
            },
            other => other,
        }
    }
}

pub fn load_from_str(input: &str) -> Result<PatchScript, ConfigError> {
    let script: PatchScript = toml_edit::de::from_str(input)
        .map_err(|source| ConfigError::Toml { path: None, source })?;
    script
        .validate()
        .map_err(|source| ConfigError::Validation { path: None, source })?;
    Ok(script)
}

pub fn load_from_path(path: impl AsRef<Path>) -> Result<PatchScript, ConfigError> {
    let path = path.as_ref();
    let contents = fs::read_to_string(path).map_err(|source| ConfigError::Io {
        path: path.to_path_buf(),
        source,
    })?;
    load_from_str(&contents).map_err(|error| error.at(path))
}

/// Load every `*.toml` script under `dir`, sorted by path.
pub fn load_dir(dir: impl AsRef<Path>) -> Result<Vec<(PathBuf, PatchScript)>, ConfigError> {
    let dir = dir.as_ref();
    let mut scripts = Vec::new();
    for entry in WalkDir::new(dir).sort_by_file_name() {
        let entry = entry.map_err(|source| ConfigError::Walk {
            path: dir.to_path_buf(),
            source,
        })?;
        let path = entry.path();
        if entry.file_type().is_file() && path.extension().is_some_and(|ext| ext == "toml") {
            scripts.push((path.to_path_buf(), load_from_path(path)?));
        }
    }
    Ok(scripts)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::script::schema::{Action, Anchor, CaptureKind, ValidationIssue};

    const MINIMAL: &str = r#"
[meta]
name = "demo"
target = "FishPond::draw"

[[steps]]
id = "data"
pattern = ["@ldloc", "call Building::ShouldDrawShadow"]
anchor = "start"
from_start = true
action = { type = "capture", register = "data" }

[[steps]]
id = "rect"
pattern = ["ldc.i4.0", "ldc.i4.0", "ldc.i4.s 80", "ldc.i4.s 80", "newobj"]
action = { type = "branch-around", load = ["$data"], computer = "pond-source-rect" }
"#;

    fn issues(input: &str) -> Vec<ValidationIssue> {
        match load_from_str(input) {
            Err(ConfigError::Validation { source, .. }) => source.issues,
            other => panic!("expected validation error, got {other:?}"),
        }
    }

    #[test]
    fn loads_minimal_script() {
        let script = load_from_str(MINIMAL).unwrap();
        assert_eq!(script.meta.target, "FishPond::draw");
        assert_eq!(script.steps.len(), 2);
        assert_eq!(script.steps[0].anchor, Anchor::Start);
        assert!(script.steps[0].from_start);
        assert!(matches!(
            &script.steps[0].action,
            Action::Capture { register, kind: CaptureKind::Instruction, offset: 0 } if register == "data"
        ));
        assert_eq!(script.steps[1].anchor, Anchor::End);
        assert!(matches!(
            &script.steps[1].action,
            Action::BranchAround { block: None, computer, .. } if computer == "pond-source-rect"
        ));
    }

    #[test]
    fn rejects_malformed_toml() {
        assert!(matches!(
            load_from_str("[meta\nname = 1"),
            Err(ConfigError::Toml { path: None, .. })
        ));
    }

    #[test]
    fn rejects_unknown_action() {
        let input = MINIMAL.replace("branch-around", "teleport");
        assert!(matches!(load_from_str(&input), Err(ConfigError::Toml { .. })));
    }

    #[test]
    fn reports_every_issue() {
        let input = r#"
[meta]
name = ""
target = "FishPond::draw"
verify = "crc32:1234"

[[steps]]
id = "a"
pattern = ["callvrt"]
action = { type = "insert", instructions = [] }

[[steps]]
id = "a"
pattern = ["nop"]
action = { type = "branch-around", block = 3, load = ["$missing"], computer = "pond-rct" }
"#;
        let found = issues(input);
        assert!(found.contains(&ValidationIssue::MissingField {
            step_id: None,
            field: "meta.name"
        }));
        assert!(found
            .iter()
            .any(|i| matches!(i, ValidationIssue::InvalidPattern { step_id, .. } if step_id == "a")));
        assert!(found.contains(&ValidationIssue::MissingField {
            step_id: Some("a".into()),
            field: "action.instructions"
        }));
        assert!(found.contains(&ValidationIssue::UnknownRegister {
            step_id: "a".into(),
            name: "missing".into()
        }));
        let messages: Vec<String> = found.iter().map(ToString::to_string).collect();
        assert!(messages.iter().any(|m| m.contains("duplicate step id")));
        assert!(messages.iter().any(|m| m.contains("meta.verify")));
        assert!(messages.iter().any(|m| m.contains("block of 3 instructions")));
        assert!(messages.iter().any(|m| m.contains("unknown value computer 'pond-rct'")));
    }

    #[test]
    fn register_kinds_are_checked() {
        let input = r#"
[meta]
name = "kinds"
target = "FishPond::draw"

[[steps]]
id = "loop"
pattern = ["@stloc", "br"]
action = { type = "capture", register = "loop", kind = "label" }

[[steps]]
id = "use"
pattern = ["ldc.i4.4"]
action = { type = "replace", with = "$loop" }
"#;
        let found = issues(input);
        assert_eq!(found.len(), 1);
        assert!(found[0].to_string().contains("holds a label, expected an instruction"));
    }

    #[test]
    fn non_scalar_placeholder_is_rejected() {
        let input = MINIMAL.replace(
            r#"load = ["$data"]"#,
            r#"load = ["ldc.i4 {pond-origin}"]"#,
        );
        let found = issues(&input);
        assert!(found[0].to_string().contains("not a scalar"));
    }

    #[test]
    fn load_from_path_attaches_path() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("broken.toml");
        fs::write(&path, "[meta]\nname = \"x\"\n").unwrap();
        let err = load_from_path(&path).unwrap_err();
        assert!(matches!(&err, ConfigError::Validation { path: Some(p), .. } if p == &path));
        assert!(err.to_string().contains("broken.toml"));
    }

    #[test]
    fn load_dir_finds_nested_scripts() {
        let dir = tempfile::tempdir().unwrap();
        fs::create_dir(dir.path().join("nested")).unwrap();
        fs::write(dir.path().join("b.toml"), MINIMAL).unwrap();
        fs::write(dir.path().join("nested/a.toml"), MINIMAL).unwrap();
        fs::write(dir.path().join("notes.txt"), "ignored").unwrap();

        let scripts = load_dir(dir.path()).unwrap();
        let names: Vec<_> = scripts
            .iter()
            .map(|(p, _)| p.file_name().unwrap().to_string_lossy().into_owned())
            .collect();
        assert_eq!(names, vec!["b.toml", "a.toml"]);
    }
}
