//! Module versions and requirement constraints
//!
//! Module versions are `major.minor[.patch]`. Components may also be
//! separated with `-`, the form used in module directory names
//! (`io-0-3` and `io` version `0.3` describe the same thing).

use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use thiserror::Error;

/// Errors that can occur while parsing versions and constraints
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum VersionError {
    #[error("Malformed version '{value}': {reason}")]
    Malformed { value: String, reason: String },

    #[error("Malformed version constraint '{value}': {reason}")]
    Constraint { value: String, reason: String },
}

/// A module version
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct Version {
    pub major: u32,
    pub minor: u32,
    pub patch: Option<u32>,
}

impl Version {
    pub fn new(major: u32, minor: u32, patch: Option<u32>) -> Self {
        Self {
            major,
            minor,
            patch,
        }
    }

    /// Equivalent semver version, with a missing patch read as 0
    pub fn to_semver(&self) -> semver::Version {
        semver::Version::new(
            self.major as u64,
            self.minor as u64,
            self.patch.unwrap_or(0) as u64,
        )
    }
}

impl FromStr for Version {
    type Err = VersionError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let malformed = |reason: &str| VersionError::Malformed {
            value: s.to_string(),
            reason: reason.to_string(),
        };

        let trimmed = s.trim();
        if trimmed.is_empty() {
            return Err(malformed("empty version"));
        }

        let parts: Vec<&str> = trimmed.split(['.', '-']).collect();
        if parts.len() < 2 {
            return Err(malformed("major and minor components are mandatory"));
        }
        if parts.len() > 3 {
            return Err(malformed("at most three components are allowed"));
        }

        let mut numbers = Vec::with_capacity(parts.len());
        for part in &parts {
            if part.is_empty() || !part.chars().all(|c| c.is_ascii_digit()) {
                return Err(malformed("components must be unsigned integers"));
            }
            let value = part
                .parse::<u32>()
                .map_err(|_| malformed("component out of range"))?;
            numbers.push(value);
        }

        Ok(Self {
            major: numbers[0],
            minor: numbers[1],
            patch: numbers.get(2).copied(),
        })
    }
}

impl fmt::Display for Version {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.patch {
            Some(patch) => write!(f, "{}.{}.{}", self.major, self.minor, patch),
            None => write!(f, "{}.{}", self.major, self.minor),
        }
    }
}

/// Version constraint attached to a requirement
///
/// Uses semver requirement syntax: `^1.2`, `>=0.3, <1`, `=2.0.1`.
/// A bare `1.2` means `^1.2`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct VersionConstraint {
    raw: String,
    req: semver::VersionReq,
}

impl VersionConstraint {
    /// Whether a module version satisfies this constraint
    ///
    /// A module that declares no version never satisfies a constraint.
    pub fn matches(&self, version: Option<&Version>) -> bool {
        version
            .map(|v| self.req.matches(&v.to_semver()))
            .unwrap_or(false)
    }

    /// The constraint as written in the descriptor
    pub fn as_str(&self) -> &str {
        &self.raw
    }
}

impl FromStr for VersionConstraint {
    type Err = VersionError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let raw = s.trim().to_string();
        let req = semver::VersionReq::parse(&raw).map_err(|e| VersionError::Constraint {
            value: raw.clone(),
            reason: e.to_string(),
        })?;
        Ok(Self { raw, req })
    }
}

impl fmt::Display for VersionConstraint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.raw)
    }
}
