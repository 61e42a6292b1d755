//! Game-version gating for patch scripts.
//!
//! A script may declare `version_range = ">=1.6.0, <1.7.0"`; it is only
//! selected for game builds inside that range. Game versions must be full
//! semver (`1.6.9`, `1.6.9-beta.2`); a bare `1.6` is rejected rather than
//! guessed at.

use semver::{Version, VersionReq};
use thiserror::Error;

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum VersionError {
    #[error("invalid game version '{value}': {message}")]
    InvalidVersion { value: String, message: String },

    #[error("invalid version_range '{value}': {message}")]
    InvalidRequirement { value: String, message: String },
}

/// A parsed `version_range`. An absent or blank range admits every version.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct VersionGate {
    req: Option<VersionReq>,
}

impl VersionGate {
    pub fn parse(range: Option<&str>) -> Result<Self, VersionError> {
        let req = match range.map(str::trim) {
            None | Some("") => None,
            Some(text) => Some(VersionReq::parse(text).map_err(|e| {
                VersionError::InvalidRequirement {
                    value: text.to_string(),
                    message: e.to_string(),
                }
            })?),
        };
        Ok(Self { req })
    }

    pub fn admits(&self, version: &Version) -> bool {
        self.req.as_ref().map_or(true, |req| req.matches(version))
    }
}

pub fn parse_game_version(text: &str) -> Result<Version, VersionError> {
    Version::parse(text.trim()).map_err(|e| VersionError::InvalidVersion {
        value: text.to_string(),
        message: e.to_string(),
    })
}

/// Whether `version` falls inside `range`.
///
/// ```
/// use fishpond_patcher::script::version::matches_requirement;
///
/// assert!(matches_requirement("1.6.15", Some(">=1.6.0, <1.7.0")).unwrap());
/// assert!(!matches_requirement("1.5.6", Some(">=1.6.0")).unwrap());
/// assert!(matches_requirement("1.5.6", None).unwrap());
/// ```
pub fn matches_requirement(version: &str, range: Option<&str>) -> Result<bool, VersionError> {
    let gate = VersionGate::parse(range)?;
    if gate.req.is_none() {
        return Ok(true);
    }
    Ok(gate.admits(&parse_game_version(version)?))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn blank_range_admits_everything() {
        assert!(matches_requirement("1.6.8", None).unwrap());
        assert!(matches_requirement("1.5.6", Some("")).unwrap());
        assert!(matches_requirement("not-a-version", Some("   ")).unwrap());
    }

    #[test]
    fn building_data_range() {
        // Building sizes come from data assets starting with 1.6.
        let gate = VersionGate::parse(Some(">=1.6.0, <1.7.0")).unwrap();
        let admits = |v: &str| gate.admits(&parse_game_version(v).unwrap());
        assert!(admits("1.6.0"));
        assert!(admits("1.6.15"));
        assert!(!admits("1.5.6"));
        assert!(!admits("1.7.0"));
    }

    #[test]
    fn caret_and_tilde() {
        assert!(matches_requirement("1.9.0", Some("^1.6")).unwrap());
        assert!(!matches_requirement("1.7.0", Some("~1.6.0")).unwrap());
    }

    #[test]
    fn prerelease_builds() {
        let req = Some(">=1.6.9-beta.2");
        assert!(matches_requirement("1.6.9-beta.2", req).unwrap());
        assert!(matches_requirement("1.6.9", req).unwrap());
        assert!(!matches_requirement("1.6.9-beta.1", req).unwrap());
    }

    #[test]
    fn rejects_malformed_input() {
        assert!(matches!(
            matches_requirement("1.6", Some(">=1.6.0")),
            Err(VersionError::InvalidVersion { .. })
        ));
        assert!(matches!(
            VersionGate::parse(Some(">=sdv")),
            Err(VersionError::InvalidRequirement { .. })
        ));
    }
}
