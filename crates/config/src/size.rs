//! Human-readable byte sizes (`512M`, `2G`, `1048576`).

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Deserializer, Serialize, Serializer};

use crate::error::{Error, ErrorKind};

/// A byte count that accepts `k`, `m`, `g` and `t` suffixes (powers of
/// 1024, case-insensitive) when parsed from text.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct ByteSize(pub u64);

impl ByteSize {
    pub const KIB: u64 = 1024;
    pub const MIB: u64 = 1024 * Self::KIB;
    pub const GIB: u64 = 1024 * Self::MIB;
    pub const TIB: u64 = 1024 * Self::GIB;

    pub fn bytes(self) -> u64 {
        self.0
    }
}

impl FromStr for ByteSize {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let trimmed = s.trim();
        let invalid = || exn::Exn::from(ErrorKind::InvalidByteSize(s.to_string()));
        let Some(last) = trimmed.chars().last() else {
            return Err(invalid());
        };
        let (digits, multiplier) = match last.to_ascii_lowercase() {
            'k' => (&trimmed[..trimmed.len() - 1], Self::KIB),
            'm' => (&trimmed[..trimmed.len() - 1], Self::MIB),
            'g' => (&trimmed[..trimmed.len() - 1], Self::GIB),
            't' => (&trimmed[..trimmed.len() - 1], Self::TIB),
            _ => (trimmed, 1),
        };
        let value: u64 = digits.trim().parse().map_err(|_| invalid())?;
        value.checked_mul(multiplier).map(ByteSize).ok_or_else(invalid)
    }
}

impl fmt::Display for ByteSize {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for (unit, suffix) in [(Self::TIB, "T"), (Self::GIB, "G"), (Self::MIB, "M"), (Self::KIB, "K")] {
            if self.0 >= unit && self.0 % unit == 0 {
                return write!(f, "{}{suffix}", self.0 / unit);
            }
        }
        write!(f, "{}", self.0)
    }
}

impl Serialize for ByteSize {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_u64(self.0)
    }
}

impl<'de> Deserialize<'de> for ByteSize {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        #[derive(Deserialize)]
        #[serde(untagged)]
        enum Raw {
            Number(u64),
            Text(String),
        }
        match Raw::deserialize(deserializer)? {
            Raw::Number(n) => Ok(ByteSize(n)),
            Raw::Text(text) => text.parse().map_err(|_| serde::de::Error::custom(format!("invalid byte size {text:?}"))),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rstest::rstest;

    #[rstest]
    #[case("1024", 1024)]
    #[case("512k", 512 * 1024)]
    #[case("128M", 128 * 1024 * 1024)]
    #[case(" 2g ", 2 * 1024 * 1024 * 1024)]
    #[case("1T", 1024 * 1024 * 1024 * 1024)]
    fn test_parse(#[case] input: &str, #[case] expected: u64) {
        assert_eq!(input.parse::<ByteSize>().unwrap(), ByteSize(expected));
    }

    #[rstest]
    #[case("")]
    #[case("M")]
    #[case("-1")]
    #[case("1.5G")]
    #[case("99999999999T")]
    fn test_parse_invalid(#[case] input: &str) {
        assert!(input.parse::<ByteSize>().is_err());
    }

    #[test]
    fn test_display() {
        assert_eq!(ByteSize(2 * ByteSize::GIB).to_string(), "2G");
        assert_eq!(ByteSize(1536).to_string(), "1536");
        assert_eq!(ByteSize(256 * ByteSize::KIB).to_string(), "256K");
    }
}
