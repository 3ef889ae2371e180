use crate::SegError;
use std::fmt;
use std::str::FromStr;

/// Current segment file format version.
pub const SEGMENT_VERSION: u32 = 1;

/// Parsed segment file name: `v<version>-<domain>.<from>-<to>.<ext>`,
/// the step range being `[from, to)`.
#[derive(Clone, Debug, PartialEq, Eq, Hash)]
pub struct SegmentFileName {
    /// Format version.
    pub version: u32,
    /// Domain name, e.g. `accounts`.
    pub domain: String,
    /// First step covered.
    pub step_from: u64,
    /// One past the last step covered.
    pub step_to: u64,
    /// File suffix without the dot: `kv`, `v`, `ef`, `bt`, `kvi`, `kvei`,
    /// `vi`, `efi`.
    pub ext: String,
}

impl SegmentFileName {
    /// A version-1 name.
    pub fn new(domain: &str, step_from: u64, step_to: u64, ext: &str) -> Self {
        Self {
            version: SEGMENT_VERSION,
            domain: domain.to_string(),
            step_from,
            step_to,
            ext: ext.to_string(),
        }
    }

    /// Same range and domain, different suffix.
    pub fn with_ext(&self, ext: &str) -> Self {
        Self {
            ext: ext.to_string(),
            ..self.clone()
        }
    }
}

impl fmt::Display for SegmentFileName {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "v{}-{}.{}-{}.{}",
            self.version, self.domain, self.step_from, self.step_to, self.ext
        )
    }
}

impl FromStr for SegmentFileName {
    type Err = SegError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let bad = || SegError::BadFileName(s.to_string());
        let rest = s.strip_prefix('v').ok_or_else(bad)?;
        let (version, rest) = rest.split_once('-').ok_or_else(bad)?;
        let version = version.parse().map_err(|_| bad())?;
        let (domain, rest) = rest.split_once('.').ok_or_else(bad)?;
        let (range, ext) = rest.split_once('.').ok_or_else(bad)?;
        let (from, to) = range.split_once('-').ok_or_else(bad)?;
        let step_from = from.parse().map_err(|_| bad())?;
        let step_to = to.parse().map_err(|_| bad())?;
        if domain.is_empty() || ext.is_empty() || step_from >= step_to {
            return Err(bad());
        }
        Ok(Self {
            version,
            domain: domain.to_string(),
            step_from,
            step_to,
            ext: ext.to_string(),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rstest::rstest;

    #[test]
    fn display_and_parse() {
        let name = SegmentFileName::new("accounts", 0, 32, "kv");
        assert_eq!(name.to_string(), "v1-accounts.0-32.kv");
        assert_eq!("v1-accounts.0-32.kv".parse::<SegmentFileName>().unwrap(), name);
        assert_eq!(name.with_ext("kvi").ext, "kvi");
    }

    #[rstest]
    #[case("accounts.0-32.kv")]
    #[case("v1-accounts.32-0.kv")]
    #[case("v1-accounts.0-32")]
    #[case("vx-accounts.0-32.kv")]
    #[case("v1-.0-32.kv")]
    fn malformed_names_rejected(#[case] name: &str) {
        assert!(name.parse::<SegmentFileName>().is_err(), "{name}");
    }
}
