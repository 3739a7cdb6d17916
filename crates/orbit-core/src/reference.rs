//! Module references: a protocol tag plus an opaque value.
//!
//! The serialized form is `/` + tag + `/` + value. A file reference to
//! `/srv/app.wasm` is therefore `/file//srv/app.wasm`; parsing strips the
//! separator and hands back the absolute path as the value.

use crate::error::LocateError;
use std::fmt;
use std::str::FromStr;

/// Protocol tag of references served from the local filesystem.
pub const FILE_PROTOCOL: &str = "file";

/// Location of a guest module. Immutable.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct ModuleReference {
    tag: String,
    value: String,
}

impl ModuleReference {
    /// Create a reference from its parts.
    pub fn new(tag: impl Into<String>, value: impl Into<String>) -> Self {
        Self {
            tag: tag.into(),
            value: value.into(),
        }
    }

    /// Reference to a file on the local filesystem.
    pub fn file(path: impl Into<String>) -> Self {
        Self::new(FILE_PROTOCOL, path)
    }

    /// Protocol tag.
    pub fn tag(&self) -> &str {
        &self.tag
    }

    /// Protocol-specific value.
    pub fn value(&self) -> &str {
        &self.value
    }
}

impl fmt::Display for ModuleReference {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "/{}/{}", self.tag, self.value)
    }
}

impl FromStr for ModuleReference {
    type Err = LocateError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let rest = s
            .strip_prefix('/')
            .ok_or_else(|| LocateError::InvalidReference(s.to_string()))?;
        let (tag, value) = rest
            .split_once('/')
            .ok_or_else(|| LocateError::InvalidReference(s.to_string()))?;
        if tag.is_empty() || value.is_empty() {
            return Err(LocateError::InvalidReference(s.to_string()));
        }
        Ok(Self::new(tag, value))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_file_reference_round_trip() {
        let reference = ModuleReference::file("/srv/functions/ping.wasm");
        let text = reference.to_string();
        assert_eq!(text, "/file//srv/functions/ping.wasm");

        let parsed: ModuleReference = text.parse().expect("parse");
        assert_eq!(parsed.tag(), "file");
        assert_eq!(parsed.value(), "/srv/functions/ping.wasm");
        assert_eq!(parsed, reference);
    }

    #[test]
    fn test_invalid_references() {
        for bad in ["", "file/x", "/file", "//x", "/file/"] {
            assert!(
                matches!(bad.parse::<ModuleReference>(), Err(LocateError::InvalidReference(_))),
                "{bad:?} should not parse"
            );
        }
    }
}
