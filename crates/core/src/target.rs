//! Target files for offset writes.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::path::{Component, Path};

/// Maximum length of a target file name, in bytes.
pub const MAX_TARGET_NAME_LEN: usize = 1024;

/// Name of a byte-addressable target file, relative to the target root.
///
/// Only normal path components are allowed, so a name can never address a
/// file outside the root.
#[derive(Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct TargetName(String);

impl TargetName {
    /// Validate a caller-supplied file name.
    pub fn parse(s: &str) -> crate::Result<Self> {
        if s.is_empty() {
            return Err(crate::Error::InvalidTargetName("empty".to_string()));
        }
        if s.len() > MAX_TARGET_NAME_LEN {
            return Err(crate::Error::InvalidTargetName(format!(
                "length {} exceeds {MAX_TARGET_NAME_LEN}",
                s.len()
            )));
        }
        if s.contains('\0') || s.contains('\\') {
            return Err(crate::Error::InvalidTargetName(format!(
                "unsupported character in {s:?}"
            )));
        }
        if s.starts_with('/') || s.ends_with('/') {
            return Err(crate::Error::InvalidTargetName(format!(
                "must be a relative file path: {s:?}"
            )));
        }
        // One spelling per file: empty and `.` segments would alias another
        // name, and the name is the key of the file's write lock.
        for segment in s.split('/') {
            if segment.is_empty() || segment == "." || segment == ".." {
                return Err(crate::Error::InvalidTargetName(format!(
                    "unsafe path segment {segment:?} in {s:?}"
                )));
            }
        }
        for component in Path::new(s).components() {
            if !matches!(component, Component::Normal(_)) {
                return Err(crate::Error::InvalidTargetName(format!(
                    "unsafe path component in {s:?}"
                )));
            }
        }
        Ok(Self(s.to_string()))
    }

    /// Borrow the name.
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl TryFrom<String> for TargetName {
    type Error = crate::Error;

    fn try_from(value: String) -> crate::Result<Self> {
        Self::parse(&value)
    }
}

impl From<TargetName> for String {
    fn from(name: TargetName) -> Self {
        name.0
    }
}

impl AsRef<str> for TargetName {
    fn as_ref(&self) -> &str {
        &self.0
    }
}

impl fmt::Debug for TargetName {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "TargetName({:?})", self.0)
    }
}

impl fmt::Display for TargetName {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Starting byte offset of an offset write.
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct ByteOffset(u64);

impl ByteOffset {
    /// Parse a decimal offset as sent on the wire.
    ///
    /// The value must fit a signed 64-bit integer and be non-negative.
    pub fn parse(s: &str) -> crate::Result<Self> {
        let value: i64 = s
            .trim()
            .parse()
            .map_err(|_| crate::Error::InvalidOffset(format!("not an integer: {s:?}")))?;
        if value < 0 {
            return Err(crate::Error::InvalidOffset(format!(
                "must be non-negative, got {value}"
            )));
        }
        Ok(Self(value as u64))
    }

    pub fn get(self) -> u64 {
        self.0
    }
}

impl fmt::Display for ByteOffset {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}
