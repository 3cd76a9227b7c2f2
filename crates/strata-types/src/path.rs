//! Virtual path algebra.
//!
//! Every path the kernel routes is absolute, `/`-separated, and clean: a
//! single leading slash, no trailing slash except for the root, no empty,
//! `.` or `..` segments. The helpers here produce and compare paths in that
//! form. Nothing in this module touches the filesystem.

use thiserror::Error;

/// Suffix that marks a mount path as a load-balanced replica.
pub const BALANCE_SUFFIX: &str = ".balance";

/// Errors raised when a path cannot be normalized into a mount path.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum PathError {
    #[error("mount path is empty")]
    Empty,
    #[error("path escapes root: {0}")]
    EscapesRoot(String),
    #[error("path contains a NUL byte")]
    Nul,
}

/// Normalize any path into clean absolute form.
///
/// Backslashes are treated as separators, `.` segments vanish, and `..`
/// pops a segment (clamping at the root). The result always starts with
/// `/` and never ends with one unless it is the root.
pub fn fix_and_clean_path(path: &str) -> String {
    let mut segments: Vec<&str> = Vec::new();
    for seg in path.split(['/', '\\']) {
        match seg {
            "" | "." => {}
            ".." => {
                segments.pop();
            }
            s => segments.push(s),
        }
    }
    if segments.is_empty() {
        "/".to_string()
    } else {
        let mut out = String::with_capacity(path.len() + 1);
        for seg in segments {
            out.push('/');
            out.push_str(seg);
        }
        out
    }
}

/// Validate and normalize a mount path supplied by an administrator.
///
/// Unlike [`fix_and_clean_path`], a `..` that would climb above the root is
/// rejected instead of clamped.
pub fn standardize_mount_path(path: &str) -> Result<String, PathError> {
    let trimmed = path.trim();
    if trimmed.is_empty() {
        return Err(PathError::Empty);
    }
    if trimmed.contains('\0') {
        return Err(PathError::Nul);
    }
    let mut depth: usize = 0;
    for seg in trimmed.split(['/', '\\']) {
        match seg {
            "" | "." => {}
            ".." => {
                depth = depth
                    .checked_sub(1)
                    .ok_or_else(|| PathError::EscapesRoot(trimmed.to_string()))?;
            }
            _ => depth += 1,
        }
    }
    Ok(fix_and_clean_path(trimmed))
}

/// Whether `sub` equals `parent` or lives beneath it on a segment boundary.
///
/// `/a/bc` is not under `/a/b`.
pub fn is_sub_path(parent: &str, sub: &str) -> bool {
    let parent = fix_and_clean_path(parent);
    let sub = fix_and_clean_path(sub);
    if parent == "/" || parent == sub {
        return true;
    }
    sub.strip_prefix(parent.as_str())
        .is_some_and(|rest| rest.starts_with('/'))
}

/// Compare two paths after normalization.
pub fn path_equal(a: &str, b: &str) -> bool {
    fix_and_clean_path(a) == fix_and_clean_path(b)
}

/// Join a clean directory path and a child name (or relative path).
pub fn join(dir: &str, name: &str) -> String {
    fix_and_clean_path(&format!("{dir}/{name}"))
}

/// Split a path into its parent directory and final segment.
///
/// The root splits into `("/", "")`.
pub fn split(path: &str) -> (String, String) {
    let clean = fix_and_clean_path(path);
    match clean.rfind('/') {
        Some(0) => ("/".to_string(), clean[1..].to_string()),
        Some(idx) => (clean[..idx].to_string(), clean[idx + 1..].to_string()),
        None => ("/".to_string(), clean),
    }
}

/// Parent directory of a path. The parent of the root is the root.
pub fn parent(path: &str) -> String {
    split(path).0
}

/// Final segment of a path. Empty for the root.
pub fn base_name(path: &str) -> String {
    split(path).1
}

/// Number of `/` separators, used to rank mount path depth.
///
/// The root mount counts as zero so that any named mount outranks it.
pub fn depth(path: &str) -> usize {
    if path == "/" || path.is_empty() {
        0
    } else {
        path.matches('/').count()
    }
}

/// Whether a mount path is a load-balanced replica (`/x.balance`, `/x.balance2`).
pub fn is_balance(mount_path: &str) -> bool {
    mount_path.contains(BALANCE_SUFFIX)
}

/// Strip the balance marker so replicas share their primary's mount path.
///
/// Everything from the last `.balance` onwards is removed.
pub fn actual_mount_path(mount_path: &str) -> &str {
    match mount_path.rfind(BALANCE_SUFFIX) {
        Some(idx) => &mount_path[..idx],
        None => mount_path,
    }
}

/// Whether `path` is the driver root described by `root_path`.
pub fn is_root(path: &str, root_path: &str) -> bool {
    if path_equal(path, root_path) {
        return true;
    }
    // Drivers that report their root as "" or "." treat "/" as the root.
    matches!(root_path.trim(), "" | "." | "/") && fix_and_clean_path(path) == "/"
}
