//! Go language versions as they appear in `go.mod`, `-lang` flags and archive headers.

use serde::{Deserialize, Deserializer, Serialize, Serializer};
use std::fmt;
use std::str::FromStr;

/// Newest language version whose compiled metadata the resolver understands.
pub const SUPPORTED_GO_VERSION: GoVersion = GoVersion::new(1, 24);

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct GoVersion {
    pub major: u32,
    pub minor: u32,
}

impl GoVersion {
    pub const fn new(major: u32, minor: u32) -> Self {
        Self { major, minor }
    }

    /// Raise `acc` to `candidate` when the candidate is newer.
    pub fn raise(acc: &mut Option<GoVersion>, candidate: GoVersion) {
        match acc {
            Some(current) if *current >= candidate => {}
            _ => *acc = Some(candidate),
        }
    }
}

impl fmt::Display for GoVersion {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "go{}.{}", self.major, self.minor)
    }
}

impl FromStr for GoVersion {
    type Err = String;

    /// Accepts `go1.22`, `1.22`, `go1.22.3`, `go1.23rc1` and `devel go1.23-abcdef`.
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let trimmed = s.trim();
        let trimmed = trimmed.strip_prefix("devel ").unwrap_or(trimmed);
        let digits = trimmed.strip_prefix("go").unwrap_or(trimmed);

        let mut parts = digits.splitn(3, '.');
        let major = parts
            .next()
            .and_then(|p| p.parse::<u32>().ok())
            .ok_or_else(|| format!("invalid Go version: {s:?}"))?;
        let minor_part = parts.next().unwrap_or("0");
        let minor_digits: String = minor_part
            .chars()
            .take_while(|c| c.is_ascii_digit())
            .collect();
        let minor = minor_digits
            .parse::<u32>()
            .map_err(|_| format!("invalid Go version: {s:?}"))?;

        Ok(GoVersion::new(major, minor))
    }
}

impl Serialize for GoVersion {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.collect_str(self)
    }
}

impl<'de> Deserialize<'de> for GoVersion {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let raw = String::deserialize(deserializer)?;
        raw.parse().map_err(serde::de::Error::custom)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_accepts_toolchain_spellings() {
        assert_eq!("go1.22".parse::<GoVersion>().unwrap(), GoVersion::new(1, 22));
        assert_eq!("1.21.5".parse::<GoVersion>().unwrap(), GoVersion::new(1, 21));
        assert_eq!("go1.23rc1".parse::<GoVersion>().unwrap(), GoVersion::new(1, 23));
        assert_eq!(
            "devel go1.25-5f1a2b3c".parse::<GoVersion>().unwrap(),
            GoVersion::new(1, 25)
        );
        assert!("gox".parse::<GoVersion>().is_err());
    }

    #[test]
    fn test_raise_keeps_maximum() {
        let mut acc = None;
        GoVersion::raise(&mut acc, GoVersion::new(1, 18));
        GoVersion::raise(&mut acc, GoVersion::new(1, 16));
        assert_eq!(acc, Some(GoVersion::new(1, 18)));
        GoVersion::raise(&mut acc, GoVersion::new(1, 21));
        assert_eq!(acc.unwrap().to_string(), "go1.21");
    }
}
