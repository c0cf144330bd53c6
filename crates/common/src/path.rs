//! Archive entry pathname validation.
//!
//! Entry pathnames come straight out of untrusted archive files, so every
//! name is validated before it can become part of the virtual tree. A
//! pathname is acceptable when, split on `/`, no fragment is empty, `.`
//! or `..`, apart from a single tolerated leading `/` or `./`.

use std::path::Path;

/// Check whether an archive entry pathname is acceptable.
///
/// # Arguments
/// * `pathname` - Raw pathname from the archive entry
/// * `allow_slashes` - Whether `/` separators are permitted at all
///
/// # Returns
/// `true` when every fragment is non-empty and neither `.` nor `..`.
/// A single leading `/` or `./` is tolerated (and only when slashes are
/// allowed); a trailing slash produces an empty final fragment and fails.
pub fn valid_pathname(pathname: &str, allow_slashes: bool) -> bool {
    if pathname.is_empty() {
        return false;
    }

    let mut rest: &str = pathname;
    if let Some(stripped) = rest.strip_prefix("./") {
        if !allow_slashes {
            return false;
        }
        rest = stripped;
    } else if let Some(stripped) = rest.strip_prefix('/') {
        if !allow_slashes {
            return false;
        }
        rest = stripped;
    }

    if rest.is_empty() {
        return false;
    }

    if !allow_slashes && rest.contains('/') {
        return false;
    }

    rest.split('/')
        .all(|fragment: &str| !fragment.is_empty() && fragment != "." && fragment != "..")
}

/// Validate a pathname and convert it to an absolute virtual path.
///
/// # Arguments
/// * `pathname` - Raw pathname from the archive entry
///
/// # Returns
/// The pathname with exactly one leading `/` (a leading `./` is dropped),
/// or `None` when validation fails.
pub fn normalize_pathname(pathname: &str) -> Option<String> {
    if !valid_pathname(pathname, true) {
        return None;
    }

    if let Some(stripped) = pathname.strip_prefix("./") {
        Some(format!("/{stripped}"))
    } else if pathname.starts_with('/') {
        Some(pathname.to_string())
    } else {
        Some(format!("/{pathname}"))
    }
}

/// Derive the "inner name" of an archive file: the base name minus the
/// final extension. `/foo/bar.ext0.ext1` becomes `bar.ext0`.
///
/// Used both as the served name of the sole entry in a raw archive and as
/// the default mount point name.
///
/// # Arguments
/// * `archive_path` - Path of the archive file on the host filesystem
pub fn innername(archive_path: &Path) -> String {
    archive_path
        .file_stem()
        .map(|stem| stem.to_string_lossy().into_owned())
        .unwrap_or_default()
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::path::PathBuf;

    #[test]
    fn test_valid_pathname_plain() {
        assert!(valid_pathname("a/b/c.txt", true));
        assert!(valid_pathname("hello.txt", true));
        assert!(valid_pathname("hello.txt", false));
    }

    #[test]
    fn test_valid_pathname_leading_prefixes() {
        assert!(valid_pathname("/a/b", true));
        assert!(valid_pathname("./a/b", true));
        assert!(!valid_pathname("/a/b", false));
        assert!(!valid_pathname("./a", false));
    }

    #[test]
    fn test_valid_pathname_rejects_traversal() {
        assert!(!valid_pathname("../evil", true));
        assert!(!valid_pathname("a/../b", true));
        assert!(!valid_pathname("a/..", true));
        assert!(!valid_pathname("..", true));
    }

    #[test]
    fn test_valid_pathname_rejects_degenerate() {
        assert!(!valid_pathname("", true));
        assert!(!valid_pathname("/", true));
        assert!(!valid_pathname("./", true));
        assert!(!valid_pathname(".", true));
        assert!(!valid_pathname("a//b", true));
        assert!(!valid_pathname("a/./b", true));
        assert!(!valid_pathname("a/b/", true));
    }

    #[test]
    fn test_valid_pathname_no_slashes() {
        assert!(!valid_pathname("a/b", false));
    }

    #[test]
    fn test_normalize_pathname_prepends_slash() {
        assert_eq!(normalize_pathname("a/b"), Some("/a/b".to_string()));
        assert_eq!(normalize_pathname("/a/b"), Some("/a/b".to_string()));
        assert_eq!(normalize_pathname("./a/b"), Some("/a/b".to_string()));
    }

    #[test]
    fn test_normalize_pathname_rejects_invalid() {
        assert_eq!(normalize_pathname("../evil"), None);
        assert_eq!(normalize_pathname(""), None);
        assert_eq!(normalize_pathname("a//b"), None);
    }

    #[test]
    fn test_innername_strips_final_extension() {
        assert_eq!(innername(&PathBuf::from("/foo/bar.ext0.ext1")), "bar.ext0");
        assert_eq!(innername(&PathBuf::from("hello.txt.gz")), "hello.txt");
        assert_eq!(innername(&PathBuf::from("plain")), "plain");
    }
}
