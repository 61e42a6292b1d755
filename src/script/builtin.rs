//! Scripts shipped with the crate plus on-disk script directories.

use crate::script::loader::{load_dir, load_from_str, ConfigError};
use crate::script::schema::PatchScript;
use crate::script::version::{parse_game_version, VersionError, VersionGate};
use std::path::Path;

const BUILTIN: &[(&str, &str)] = &[
    (
        "fish-pond-draw.toml",
        include_str!("../../patches/fish-pond-draw.toml"),
    ),
    (
        "fish-pond-draw-in-menu.toml",
        include_str!("../../patches/fish-pond-draw-in-menu.toml"),
    ),
];

/// An ordered collection of patch scripts, selectable by target method.
#[derive(Debug, Clone, Default)]
pub struct PatchSet {
    scripts: Vec<PatchScript>,
}

impl PatchSet {
    pub fn new(scripts: Vec<PatchScript>) -> Self {
        Self { scripts }
    }

    /// The fish pond scripts compiled into the crate.
    pub fn builtin() -> Result<Self, ConfigError> {
        let scripts = BUILTIN
            .iter()
            .map(|(_, source)| load_from_str(source))
            .collect::<Result<Vec<_>, _>>()?;
        Ok(Self { scripts })
    }

    /// Every `*.toml` script under `dir`.
    pub fn from_dir(dir: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let scripts = load_dir(dir)?
            .into_iter()
            .map(|(_, script)| script)
            .collect();
        Ok(Self { scripts })
    }

    /// Add `other`'s scripts after this set's; earlier scripts win in
    /// [`select`](Self::select).
    pub fn extend(&mut self, other: PatchSet) {
        self.scripts.extend(other.scripts);
    }

    pub fn scripts(&self) -> &[PatchScript] {
        &self.scripts
    }

    pub fn len(&self) -> usize {
        self.scripts.len()
    }

    pub fn is_empty(&self) -> bool {
        self.scripts.is_empty()
    }

    /// First script written for `target` whose `version_range` admits
    /// `game_version`. Without a game version the range is not checked.
    pub fn select(
        &self,
        target: &str,
        game_version: Option<&str>,
    ) -> Result<Option<&PatchScript>, VersionError> {
        let version = game_version.map(parse_game_version).transpose()?;
        for script in self.scripts.iter().filter(|s| s.meta.target == target) {
            let Some(version) = &version else {
                return Ok(Some(script));
            };
            if VersionGate::parse(script.meta.version_range.as_deref())?.admits(version) {
                return Ok(Some(script));
            }
        }
        Ok(None)
    }

    pub fn by_name(&self, name: &str) -> Option<&PatchScript> {
        self.scripts.iter().find(|s| s.meta.name == name)
    }
}
