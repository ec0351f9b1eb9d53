//! ---
//! corral_section: "01-core-functionality"
//! corral_subsection: "module"
//! corral_type: "source"
//! corral_scope: "code"
//! corral_description: "Shared primitives and utilities for the fleet runtime."
//! corral_version: "v0.1.0-alpha"
//! corral_owner: "tbd"
//! ---
//! Immutable identity value types used as registry keys everywhere.
//!
//! Identities are validated once at construction and compared solely by
//! their canonical string form. Serde round-trips through that string so
//! identities embedded in snapshots re-validate on deserialisation.

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Separator between a profile name and its optional revision suffix.
const REVISION_SEPARATOR: char = '#';

/// Errors raised when constructing identity values.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum IdentityError {
    /// The symbolic name was empty.
    #[error("symbolic name must not be empty")]
    Empty,
    /// The symbolic name contained characters outside the allowed set.
    #[error("invalid symbolic name '{0}': only ASCII alphanumerics, '.' and '-' are allowed")]
    InvalidName(String),
}

fn validate_symbolic(name: &str) -> Result<(), IdentityError> {
    if name.is_empty() {
        return Err(IdentityError::Empty);
    }
    if !name
        .chars()
        .all(|c| c.is_ascii_alphanumeric() || c == '.' || c == '-')
    {
        return Err(IdentityError::InvalidName(name.to_owned()));
    }
    Ok(())
}

/// Identity of a managed container.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct ContainerId {
    name: String,
}

impl ContainerId {
    /// Construct a container identity, validating the symbolic name.
    pub fn new(name: impl Into<String>) -> Result<Self, IdentityError> {
        let name = name.into();
        validate_symbolic(&name)?;
        Ok(Self { name })
    }

    /// Canonical string form of the identity.
    pub fn as_str(&self) -> &str {
        &self.name
    }
}

impl fmt::Display for ContainerId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.name)
    }
}

impl FromStr for ContainerId {
    type Err = IdentityError;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        Self::new(value)
    }
}

impl TryFrom<String> for ContainerId {
    type Error = IdentityError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        Self::new(value)
    }
}

impl From<ContainerId> for String {
    fn from(value: ContainerId) -> Self {
        value.name
    }
}

/// Identity of a profile version (e.g. `1.0`).
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct VersionId {
    name: String,
}

impl VersionId {
    /// Construct a version identity, validating the symbolic name.
    pub fn new(name: impl Into<String>) -> Result<Self, IdentityError> {
        let name = name.into();
        validate_symbolic(&name)?;
        Ok(Self { name })
    }

    /// Canonical string form of the identity.
    pub fn as_str(&self) -> &str {
        &self.name
    }
}

impl fmt::Display for VersionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.name)
    }
}

impl FromStr for VersionId {
    type Err = IdentityError;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        Self::new(value)
    }
}

impl TryFrom<String> for VersionId {
    type Error = IdentityError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        Self::new(value)
    }
}

impl From<VersionId> for String {
    fn from(value: VersionId) -> Self {
        value.name
    }
}

/// Identity of a profile, optionally carrying a revision suffix.
///
/// The canonical form is `name` or `name#revision`.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct ProfileId {
    name: String,
    revision: Option<String>,
}

impl ProfileId {
    /// Construct a profile identity without a revision.
    pub fn new(name: impl Into<String>) -> Result<Self, IdentityError> {
        let name = name.into();
        validate_symbolic(&name)?;
        Ok(Self {
            name,
            revision: None,
        })
    }

    /// Construct a profile identity carrying a revision suffix.
    pub fn with_revision(
        name: impl Into<String>,
        revision: impl Into<String>,
    ) -> Result<Self, IdentityError> {
        let name = name.into();
        let revision = revision.into();
        validate_symbolic(&name)?;
        validate_symbolic(&revision)?;
        Ok(Self {
            name,
            revision: Some(revision),
        })
    }

    /// Profile name without the revision suffix.
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Revision suffix, if any.
    pub fn revision(&self) -> Option<&str> {
        self.revision.as_deref()
    }

    /// Canonical string form (`name` or `name#revision`).
    pub fn canonical(&self) -> String {
        match &self.revision {
            Some(revision) => format!("{}{}{}", self.name, REVISION_SEPARATOR, revision),
            None => self.name.clone(),
        }
    }
}

impl fmt::Display for ProfileId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.revision {
            Some(revision) => write!(f, "{}{}{}", self.name, REVISION_SEPARATOR, revision),
            None => f.write_str(&self.name),
        }
    }
}

impl FromStr for ProfileId {
    type Err = IdentityError;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        match value.split_once(REVISION_SEPARATOR) {
            Some((name, revision)) => Self::with_revision(name, revision),
            None => Self::new(value),
        }
    }
}

impl TryFrom<String> for ProfileId {
    type Error = IdentityError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        value.parse()
    }
}

impl From<ProfileId> for String {
    fn from(value: ProfileId) -> Self {
        value.canonical()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn accepts_alphanumeric_dot_dash() {
        assert!(ContainerId::new("cnt-a.1").is_ok());
        assert!(VersionId::new("1.0").is_ok());
        assert!(ProfileId::new("default").is_ok());
    }

    #[test]
    fn rejects_empty_and_illegal_characters() {
        assert_eq!(ContainerId::new("").unwrap_err(), IdentityError::Empty);
        assert!(matches!(
            ContainerId::new("cnt a"),
            Err(IdentityError::InvalidName(_))
        ));
        assert!(matches!(
            ProfileId::new("web/app"),
            Err(IdentityError::InvalidName(_))
        ));
        assert!(matches!(
            ProfileId::with_revision("web", "r 1"),
            Err(IdentityError::InvalidName(_))
        ));
    }

    #[test]
    fn profile_canonical_form_carries_revision() {
        let plain = ProfileId::new("web").unwrap();
        assert_eq!(plain.canonical(), "web");

        let revised = ProfileId::with_revision("web", "r2").unwrap();
        assert_eq!(revised.canonical(), "web#r2");
        assert_eq!(revised.name(), "web");
        assert_eq!(revised.revision(), Some("r2"));
        assert_ne!(plain, revised);
    }

    #[test]
    fn profile_parses_from_canonical_string() {
        let parsed: ProfileId = "web#r2".parse().unwrap();
        assert_eq!(parsed, ProfileId::with_revision("web", "r2").unwrap());

        let plain: ProfileId = "web".parse().unwrap();
        assert_eq!(plain, ProfileId::new("web").unwrap());
    }

    #[test]
    fn serde_round_trips_through_canonical_string() {
        let id = ProfileId::with_revision("web", "r2").unwrap();
        let json = serde_json::to_string(&id).unwrap();
        assert_eq!(json, "\"web#r2\"");
        let back: ProfileId = serde_json::from_str(&json).unwrap();
        assert_eq!(back, id);

        let bad: Result<ContainerId, _> = serde_json::from_str("\"has space\"");
        assert!(bad.is_err());
    }
}
