use serde::{Deserialize, Serialize};
use std::fmt;

/// Opaque identity of a funded party: a player name or an offline account
/// holder. The engine never interprets it beyond equality.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct PrincipalId(String);

impl PrincipalId {
    pub fn new(name: impl Into<String>) -> Self {
        Self(name.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for PrincipalId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for PrincipalId {
    fn from(name: &str) -> Self {
        Self(name.to_owned())
    }
}

impl From<String> for PrincipalId {
    fn from(name: String) -> Self {
        Self(name)
    }
}
