//! Path validation.
//!
//! Every path handed to a [`StorageBackend`](crate::StorageBackend) is relative
//! to the storage root. Validation normalizes it and makes sure it can never
//! point outside that root.

use std::path::{Component, Path, PathBuf};

use crate::error::{ErrorKind, Result};

/// Validates and normalizes a storage path.
///
/// `.` components and repeated separators are dropped, `..` pops the previous
/// component, and a leading `/` is ignored. Paths that would climb above the
/// root, that contain null bytes, carry a Windows prefix, or normalize to
/// nothing are rejected with [`InvalidPath`](crate::error::ErrorKind::InvalidPath).
///
/// # Examples
///
/// ```
/// use std::path::Path;
/// use cachemeter_storage::validate_path;
/// assert!(validate_path("default/https+++example.com/cache").is_ok());
/// assert!(validate_path("../cache").is_err());
/// assert!(validate_path("cache/morgue/\0").is_err());
/// assert_eq!(
///     validate_path("default/./origin//cache/morgue/../.padding").unwrap(),
///     Path::new("default/origin/cache/.padding")
/// );
/// ```
pub fn validate(path: impl AsRef<Path>) -> Result<PathBuf> {
    let original = path.as_ref();
    let invalid = || ErrorKind::InvalidPath(original.to_path_buf());
    let mut components = Vec::new();
    for component in original.components() {
        match component {
            Component::Normal(s) => {
                // Null bytes survive Path::components() on Unix but truncate
                // the path inside syscalls.
                if s.as_encoded_bytes().contains(&0) {
                    exn::bail!(invalid());
                }
                components.push(s)
            },
            Component::CurDir | Component::RootDir => {},
            Component::Prefix(_) => exn::bail!(invalid()),
            Component::ParentDir => {
                if components.pop().is_none() {
                    exn::bail!(invalid());
                }
            },
        }
    }
    if components.is_empty() {
        exn::bail!(invalid());
    }
    Ok(components.into_iter().collect())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_origin_paths() {
        assert_eq!(
            validate("default/https+++example.com/cache").unwrap(),
            Path::new("default/https+++example.com/cache")
        );
        assert_eq!(validate("cache/morgue/42/body.final").unwrap(), Path::new("cache/morgue/42/body.final"));
    }

    #[test]
    fn test_normalization() {
        assert_eq!(validate("cache//morgue///42").unwrap(), Path::new("cache/morgue/42"));
        assert_eq!(validate("./cache/./morgue").unwrap(), Path::new("cache/morgue"));
        assert_eq!(validate("cache/morgue/").unwrap(), Path::new("cache/morgue"));
        assert_eq!(validate("/cache").unwrap(), Path::new("cache"));
        assert_eq!(validate("cache/morgue/..").unwrap(), Path::new("cache"));
    }

    #[test]
    fn test_escaping_root() {
        assert!(validate("..").is_err());
        assert!(validate("../other-origin").is_err());
        assert!(validate("cache/../../other-origin").is_err());
    }

    #[test]
    fn test_rejected_paths() {
        assert!(validate("").is_err());
        assert!(validate(".").is_err());
        assert!(validate("//").is_err());
        assert!(validate("cache\0morgue").is_err());
    }
}
