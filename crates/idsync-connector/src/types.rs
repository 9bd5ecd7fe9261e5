//! Connector enums

use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// Object class on an external resource.
///
/// Uses the ConnId naming convention for the two classes the engine
/// reconciles.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub enum ObjectClass {
    /// User accounts.
    #[serde(rename = "__ACCOUNT__")]
    Account,
    /// Groups.
    #[serde(rename = "__GROUP__")]
    Group,
}

impl ObjectClass {
    /// Get all object classes, in processing order.
    #[must_use]
    pub fn all() -> &'static [ObjectClass] {
        &[ObjectClass::Account, ObjectClass::Group]
    }

    /// Get the string representation used on the wire and in storage.
    #[must_use]
    pub fn as_str(&self) -> &'static str {
        match self {
            ObjectClass::Account => "__ACCOUNT__",
            ObjectClass::Group => "__GROUP__",
        }
    }
}

impl fmt::Display for ObjectClass {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

impl FromStr for ObjectClass {
    type Err = ParseObjectClassError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_uppercase().as_str() {
            "__ACCOUNT__" | "ACCOUNT" => Ok(ObjectClass::Account),
            "__GROUP__" | "GROUP" => Ok(ObjectClass::Group),
            _ => Err(ParseObjectClassError(s.to_string())),
        }
    }
}

/// Error parsing object class from string.
#[derive(Debug, Clone)]
pub struct ParseObjectClassError(String);

impl fmt::Display for ParseObjectClassError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "invalid object class '{}', expected one of: __ACCOUNT__, __GROUP__",
            self.0
        )
    }
}

impl std::error::Error for ParseObjectClassError {}
