use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

/// Scene tag selecting which personality record and tone a post uses.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ContextKey {
    Base,
    Gaming,
    Night,
    Social,
}

impl ContextKey {
    pub const ALL: [ContextKey; 4] = [Self::Base, Self::Gaming, Self::Night, Self::Social];

    /// Scenes picked outside the night window.
    pub const DAYTIME: [ContextKey; 3] = [Self::Base, Self::Social, Self::Gaming];

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Base => "base",
            Self::Gaming => "gaming",
            Self::Night => "night",
            Self::Social => "social",
        }
    }
}

impl fmt::Display for ContextKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, thiserror::Error)]
#[error("unknown context key: {0}")]
pub struct UnknownContextKey(pub String);

impl FromStr for ContextKey {
    type Err = UnknownContextKey;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "base" => Ok(Self::Base),
            "gaming" => Ok(Self::Gaming),
            "night" => Ok(Self::Night),
            "social" => Ok(Self::Social),
            other => Err(UnknownContextKey(other.to_string())),
        }
    }
}
