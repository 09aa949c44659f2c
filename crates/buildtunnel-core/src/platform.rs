//! Build machine platforms.

use std::convert::Infallible;
use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

/// The CPU architecture of a build machine.
///
/// Only `amd64` and `arm64` machines are provisioned today; any other value is
/// carried through verbatim so the control plane can reject or accept it.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(from = "String", into = "String")]
pub enum Platform {
    /// 64-bit x86.
    Amd64,
    /// 64-bit ARM.
    Arm64,
    /// Any other platform string.
    Other(String),
}

impl Platform {
    /// The wire name of this platform.
    #[must_use]
    pub fn as_str(&self) -> &str {
        match self {
            Self::Amd64 => "amd64",
            Self::Arm64 => "arm64",
            Self::Other(other) => other,
        }
    }

    /// Whether this is one of the platforms machines are provisioned for.
    #[must_use]
    pub const fn is_known(&self) -> bool {
        matches!(self, Self::Amd64 | Self::Arm64)
    }
}

impl From<String> for Platform {
    fn from(value: String) -> Self {
        match value.as_str() {
            "amd64" => Self::Amd64,
            "arm64" => Self::Arm64,
            _ => Self::Other(value),
        }
    }
}

impl From<&str> for Platform {
    fn from(value: &str) -> Self {
        Self::from(value.to_string())
    }
}

impl From<Platform> for String {
    fn from(value: Platform) -> Self {
        match value {
            Platform::Other(other) => other,
            known => known.as_str().to_string(),
        }
    }
}

impl FromStr for Platform {
    type Err = Infallible;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Ok(Self::from(s))
    }
}

impl fmt::Display for Platform {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_known_platforms() {
        assert_eq!(Platform::from("amd64"), Platform::Amd64);
        assert_eq!(Platform::from("arm64"), Platform::Arm64);
        assert!(Platform::Amd64.is_known());
    }

    #[test]
    fn test_unknown_platform_is_preserved() {
        let platform: Platform = "riscv64".parse().unwrap();
        assert_eq!(platform, Platform::Other("riscv64".to_string()));
        assert_eq!(platform.to_string(), "riscv64");
        assert!(!platform.is_known());
    }

    #[test]
    fn test_serde_as_plain_string() {
        assert_eq!(serde_json::to_string(&Platform::Arm64).unwrap(), "\"arm64\"");
        let parsed: Platform = serde_json::from_str("\"s390x\"").unwrap();
        assert_eq!(parsed, Platform::Other("s390x".to_string()));
    }
}
