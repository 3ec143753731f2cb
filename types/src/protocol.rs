use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// How a protocol's phases are meant to be orchestrated.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ProtocolType {
    #[default]
    Sequential,
    Parallel,
    Dag,
    Hybrid,
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("invalid protocol type '{0}'. Must be one of sequential, parallel, dag, hybrid")]
pub struct UnknownProtocolType(pub String);

impl ProtocolType {
    pub const ALL: [Self; 4] = [Self::Sequential, Self::Parallel, Self::Dag, Self::Hybrid];

    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Sequential => "sequential",
            Self::Parallel => "parallel",
            Self::Dag => "dag",
            Self::Hybrid => "hybrid",
        }
    }
}

impl FromStr for ProtocolType {
    type Err = UnknownProtocolType;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::ALL
            .into_iter()
            .find(|kind| kind.as_str() == s)
            .ok_or_else(|| UnknownProtocolType(s.to_owned()))
    }
}

impl fmt::Display for ProtocolType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}
