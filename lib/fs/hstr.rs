//! Hashed path components.

use std::fmt;
use std::hash::{Hash, Hasher};

use rustc_hash::FxHasher;

use super::error::{VfsError, VfsResult};

/// The component naming the directory itself.
pub const DOT: &str = ".";
/// The component naming the parent directory.
pub const DOTDOT: &str = "..";

/// One path component with its hash computed up front.
///
/// Equality compares the hash first and only then the bytes, so mismatches on a bucket chain are
/// rejected without touching the string.
#[derive(Clone)]
pub struct HStr {
    hash: u32,
    value: Box<str>,
}

impl HStr {
    /// Hashes `value` without validating it.
    #[must_use]
    pub fn new(value: &str) -> Self {
        Self {
            hash: name_hash(value),
            value: value.into(),
        }
    }

    /// Validates `value` as a path component of at most `name_max - 1` bytes and hashes it.
    ///
    /// Control characters (including NUL) are rejected with [`VfsError::InvalidArgument`], and
    /// the separator never appears inside a component.
    pub fn component(value: &str, name_max: usize) -> VfsResult<Self> {
        if value.len() >= name_max {
            return Err(VfsError::NameTooLong);
        }
        if value.bytes().any(|b| !is_valid_byte(b)) {
            return Err(VfsError::InvalidArgument);
        }
        Ok(Self::new(value))
    }

    /// The precomputed hash.
    #[must_use]
    pub fn hash_value(&self) -> u32 {
        self.hash
    }

    /// The component text.
    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.value
    }

    /// Length in bytes.
    #[must_use]
    pub fn len(&self) -> usize {
        self.value.len()
    }

    /// Whether this is the empty component.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.value.is_empty()
    }

    /// Whether this is `.`.
    #[must_use]
    pub fn is_dot(&self) -> bool {
        &*self.value == DOT
    }

    /// Whether this is `..`.
    #[must_use]
    pub fn is_dotdot(&self) -> bool {
        &*self.value == DOTDOT
    }
}

fn is_valid_byte(b: u8) -> bool {
    b != b'/' && b >= 0x20 && b != 0x7f
}

fn name_hash(value: &str) -> u32 {
    let mut hasher = FxHasher::default();
    hasher.write(value.as_bytes());
    let h = hasher.finish();
    // Fold the high half in so short names still spread across buckets.
    #[expect(clippy::cast_possible_truncation, reason = "deliberate fold to 32 bits")]
    let folded = (h ^ (h >> 32)) as u32;
    folded
}

impl PartialEq for HStr {
    fn eq(&self, other: &Self) -> bool {
        self.hash == other.hash && self.value == other.value
    }
}

impl Eq for HStr {}

impl Hash for HStr {
    fn hash<H: Hasher>(&self, state: &mut H) {
        state.write_u32(self.hash);
    }
}

impl fmt::Debug for HStr {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fmt::Debug::fmt(&*self.value, f)
    }
}

impl fmt::Display for HStr {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.value)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn component_rejects_separator_and_control_bytes() {
        assert_eq!(
            HStr::component("a/b", 128).unwrap_err(),
            VfsError::InvalidArgument
        );
        assert_eq!(
            HStr::component("a\0b", 128).unwrap_err(),
            VfsError::InvalidArgument
        );
        assert_eq!(
            HStr::component("tab\there", 128).unwrap_err(),
            VfsError::InvalidArgument
        );
    }

    #[test]
    fn component_length_is_exclusive_of_name_max() {
        assert!(HStr::component("abc", 4).is_ok());
        assert_eq!(
            HStr::component("abcd", 4).unwrap_err(),
            VfsError::NameTooLong
        );
    }

    #[test]
    fn equal_text_means_equal_hash() {
        let a = HStr::new("kernel");
        let b = HStr::new("kernel");
        assert_eq!(a, b);
        assert_eq!(a.hash_value(), b.hash_value());
        assert_ne!(a, HStr::new("kernal"));
    }

    #[test]
    fn dot_names_are_recognised() {
        assert!(HStr::new(".").is_dot());
        assert!(HStr::new("..").is_dotdot());
        assert!(!HStr::new("...").is_dotdot());
        assert!(HStr::new("").is_empty());
    }
}
