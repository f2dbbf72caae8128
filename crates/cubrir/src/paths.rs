//! Filename normalization and coverage-output path helpers.

use std::path::{Path, PathBuf};

/// Returns the URI scheme of `path`, if `path` looks like a URI
/// (`scheme://...`).
pub(crate) fn uri_scheme(path: &str) -> Option<&str> {
    let (scheme, _) = path.split_once("://")?;
    let mut chars = scheme.chars();
    let first = chars.next()?;
    if !first.is_ascii_alphabetic() {
        return None;
    }
    if chars.all(|c| c.is_ascii_alphanumeric() || matches!(c, '+' | '-' | '.')) {
        Some(scheme)
    } else {
        None
    }
}

/// Strips the scheme and `://` separator from a URI, returning the
/// remainder, or `None` if `path` is not a URI.
pub(crate) fn strip_uri_scheme(path: &str) -> Option<&str> {
    uri_scheme(path).map(|scheme| &path[scheme.len() + 3..])
}

/// The interpreter's filename normalization rule: URIs pass through
/// untouched, absolute paths pass through, relative paths are
/// prefixed with the current working directory.
///
/// Scripts may be announced with just a basename when they live in the
/// working directory, so both breakpoint targets and script-load names
/// go through this before any comparison.
pub(crate) fn normalize_path(filename: &str) -> String {
    if uri_scheme(filename).is_some() {
        return filename.to_owned();
    }

    if Path::new(filename).is_absolute() {
        filename.to_owned()
    } else {
        match std::env::current_dir() {
            Ok(cwd) => format!("{}/{}", cwd.display(), filename),
            Err(_) => filename.to_owned(),
        }
    }
}

/// An absolute version of `path`, resolved against the current working
/// directory when relative.
pub(crate) fn absolute_path(path: &Path) -> PathBuf {
    if path.is_absolute() {
        path.to_path_buf()
    } else {
        match std::env::current_dir() {
            Ok(cwd) => cwd.join(path),
            Err(_) => path.to_path_buf(),
        }
    }
}

/// The pathname components of `child_path` from the point where it
/// diverges from `parent_path`.
///
/// ```text
/// child:  /a/b/c/d/e
/// parent: /a/b/d
/// result: c/d/e
/// ```
///
/// Entirely dissimilar paths yield the full child path. A child that is
/// a URI yields the URI path with the scheme stripped, verbatim.
pub(crate) fn diverging_child_components(child_path: &str, parent_path: &Path) -> String {
    if let Some(stripped) = strip_uri_scheme(child_path) {
        return stripped.to_owned();
    }

    let parent = parent_path.to_string_lossy();
    let child_components: Vec<&str> = child_path.split('/').collect();
    let parent_components: Vec<&str> = parent.split('/').collect();

    let mut shared = 0;
    while shared < child_components.len()
        && shared < parent_components.len()
        && child_components[shared] == parent_components[shared]
    {
        shared += 1;
    }

    child_components[shared..].join("/")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn uri_scheme_detected() {
        assert_eq!(uri_scheme("resource:///org/app/main.js"), Some("resource"));
        assert_eq!(uri_scheme("file:///tmp/a.js"), Some("file"));
        assert_eq!(uri_scheme("/tmp/a.js"), None);
        assert_eq!(uri_scheme("a.js"), None);
        assert_eq!(uri_scheme("3ad://x"), None);
    }

    #[test]
    fn strip_scheme_keeps_remainder_verbatim() {
        assert_eq!(
            strip_uri_scheme("resource:///org/app/main.js"),
            Some("/org/app/main.js")
        );
        assert_eq!(strip_uri_scheme("/org/app/main.js"), None);
    }

    #[test]
    fn normalize_passes_uris_and_absolute_paths_through() {
        assert_eq!(
            normalize_path("resource:///org/app/main.js"),
            "resource:///org/app/main.js"
        );
        assert_eq!(normalize_path("/tmp/a.js"), "/tmp/a.js");
    }

    #[test]
    fn normalize_prefixes_relative_paths_with_cwd() {
        let normalized = normalize_path("a.js");
        assert!(normalized.ends_with("/a.js"));
        assert!(Path::new(&normalized).is_absolute());
    }

    #[test]
    fn diverging_components_drop_the_shared_prefix() {
        assert_eq!(
            diverging_child_components("/a/b/c/d/e", Path::new("/a/b/d")),
            "c/d/e"
        );
    }

    #[test]
    fn diverging_components_for_unrelated_paths_keep_the_child() {
        assert_eq!(
            diverging_child_components("/x/y/a.js", Path::new("/out/dir")),
            "x/y/a.js"
        );
    }

    #[test]
    fn diverging_components_for_uris_strip_the_scheme() {
        assert_eq!(
            diverging_child_components("resource:///org/app/main.js", Path::new("/out")),
            "/org/app/main.js"
        );
    }
}
