//! Lexical POSIX path helpers.
//!
//! Request paths and index subpaths are slash-separated strings independent
//! of the host platform, so they are normalized here rather than through
//! `std::path`.

/// Lexically clean a slash-separated path: collapse repeated slashes, drop
/// `.` segments, and resolve `..` against preceding segments. A relative
/// path that would escape its root keeps its leading `..` segments.
pub(crate) fn clean(path: &str) -> String {
    let rooted = path.starts_with('/');
    let mut out: Vec<&str> = Vec::new();

    for seg in path.split('/') {
        match seg {
            "" | "." => {}
            ".." => {
                if out.last().is_some_and(|s| *s != "..") {
                    out.pop();
                } else if !rooted {
                    out.push("..");
                }
            }
            seg => out.push(seg),
        }
    }

    let joined = out.join("/");
    if rooted {
        format!("/{joined}")
    } else if joined.is_empty() {
        ".".to_string()
    } else {
        joined
    }
}

/// Join path elements with slashes and clean the result. Empty elements are
/// ignored; joining nothing yields the empty string.
pub(crate) fn join(parts: &[&str]) -> String {
    let nonempty: Vec<&str> = parts.iter().copied().filter(|p| !p.is_empty()).collect();
    if nonempty.is_empty() {
        return String::new();
    }
    clean(&nonempty.join("/"))
}

/// The directory portion of a path, `.` when there is none.
pub(crate) fn parent(path: &str) -> &str {
    match path.rfind('/') {
        Some(0) => "/",
        Some(idx) => &path[..idx],
        None => ".",
    }
}

/// The final path segment.
pub(crate) fn base(path: &str) -> &str {
    path.rsplit('/').next().unwrap_or(path)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn clean_collapses_and_resolves() {
        assert_eq!(clean("a/b/c"), "a/b/c");
        assert_eq!(clean("a//b/./c"), "a/b/c");
        assert_eq!(clean("a/b/../c"), "a/c");
        assert_eq!(clean("./a"), "a");
        assert_eq!(clean("../a"), "../a");
        assert_eq!(clean(""), ".");
        assert_eq!(clean("/a/../b"), "/b");
    }

    #[test]
    fn join_skips_empty_elements() {
        assert_eq!(join(&["ubuntu", "pool/main", "apt.deb"]), "ubuntu/pool/main/apt.deb");
        assert_eq!(join(&["a", "", "b"]), "a/b");
        assert_eq!(join(&[".", "main/binary-amd64/Packages"]), "main/binary-amd64/Packages");
        assert_eq!(join(&[]), "");
    }

    #[test]
    fn parent_and_base() {
        assert_eq!(parent("ubuntu/dists/trusty/Release"), "ubuntu/dists/trusty");
        assert_eq!(parent("Release"), ".");
        assert_eq!(parent("/Release"), "/");
        assert_eq!(base("ubuntu/dists/trusty/Release"), "Release");
        assert_eq!(base("Release"), "Release");
    }
}
