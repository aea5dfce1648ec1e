//! JSON codec for unix file permission bits (§6, I8, S6).
//!
//! Encoded as a three-digit, zero-padded octal string (e.g. `"066"`),
//! reproducing the exact byte-level behavior of the original's
//! `MarshalJSON`/`UnmarshalJSON` pair: any value above `0o777` fails to
//! marshal, and any string that isn't exactly three octal digits fails to
//! unmarshal.

use serde::{de::Error as DeError, ser::Error as SerError, Deserialize, Deserializer, Serialize, Serializer};
use thiserror::Error;

/// A unix permission mode, guaranteed to be in `[0, 0o777]`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct FileMode(u32);

/// Errors from constructing or decoding a [`FileMode`].
#[derive(Debug, Error, Clone, Copy, PartialEq, Eq)]
pub enum FileModeError {
    /// The value, or the string's decoded value, exceeds `0o777`.
    #[error("invalid file permissions: value out of range")]
    InvalidPermissions,
}

impl FileMode {
    /// Builds a `FileMode`, rejecting anything above `0o777`.
    pub fn new(value: u32) -> Result<Self, FileModeError> {
        if value > 0o777 {
            Err(FileModeError::InvalidPermissions)
        } else {
            Ok(Self(value))
        }
    }

    /// The raw numeric value.
    pub fn value(self) -> u32 {
        self.0
    }
}

impl Serialize for FileMode {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        if self.0 > 0o777 {
            return Err(SerError::custom(FileModeError::InvalidPermissions));
        }
        // Three-digit, zero-padded octal, matching the original's manual
        // byte-by-byte construction of `"000"`.
        serializer.serialize_str(&format!("{:03o}", self.0))
    }
}

impl<'de> Deserialize<'de> for FileMode {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let raw = String::deserialize(deserializer)?;
        if raw.len() != 3 {
            return Err(DeError::custom(FileModeError::InvalidPermissions));
        }
        let value = u32::from_str_radix(&raw, 8)
            .map_err(|_| DeError::custom(FileModeError::InvalidPermissions))?;
        FileMode::new(value).map_err(DeError::custom)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn marshal_valid_values_s6() {
        assert_eq!(serde_json::to_string(&FileMode::new(0o066).unwrap()).unwrap(), "\"066\"");
    }

    #[test]
    fn unmarshal_valid_value_s6() {
        let mode: FileMode = serde_json::from_str("\"066\"").unwrap();
        assert_eq!(mode.value(), 54);
    }

    #[test]
    fn unmarshal_wrong_length_errors_s6() {
        assert!(serde_json::from_str::<FileMode>("\"0000\"").is_err());
    }

    #[test]
    fn unmarshal_invalid_octal_digit_errors_s6() {
        assert!(serde_json::from_str::<FileMode>("\"800\"").is_err());
    }

    #[test]
    fn marshal_out_of_range_fails() {
        assert!(FileMode::new(0o1000).is_err());
    }

    proptest::proptest! {
        #[test]
        fn roundtrip_every_valid_mode_r1_i8(raw in 0u32..=0o777) {
            let mode = FileMode::new(raw).unwrap();
            let json = serde_json::to_string(&mode).unwrap();
            let back: FileMode = serde_json::from_str(&json).unwrap();
            prop_assert_eq!(back.value(), raw);
        }
    }
}
