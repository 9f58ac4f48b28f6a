use crate::error::{ErrorKind, FerryError};

/// 远端路径规范化：远端永远是 POSIX 语义，与本机平台无关。
/// Resolves `.`/`..`, collapses duplicate separators and forces a leading `/`.
/// Idempotent: normalizing an already-normalized path is a no-op.
pub fn normalize_remote_path(path: &str) -> String {
    let mut stack: Vec<&str> = Vec::new();
    for seg in path.split('/') {
        match seg {
            "" | "." => {}
            ".." => {
                // `..` above the root clamps at `/` (posixpath.normpath behavior)
                stack.pop();
            }
            other => stack.push(other),
        }
    }
    if stack.is_empty() { "/".to_string() } else { format!("/{}", stack.join("/")) }
}

/// 沙箱前缀检查 — every destructive or writing remote operation must pass
/// through here before touching the wire. Exact root or a true child of root
/// is allowed; anything else (including `/a/b-other` against root `/a/b`) is
/// rejected with `ValidationFailed`.
pub fn ensure_in_sandbox(path: &str, remote_root: &str) -> Result<(), FerryError> {
    let normalized_path = normalize_remote_path(path);
    let normalized_root = normalize_remote_path(remote_root);

    if normalized_path == normalized_root {
        return Ok(());
    }
    // root `/` normalizes without a trailing separator; special-case the prefix
    let prefix = if normalized_root == "/" {
        normalized_root.clone()
    } else {
        format!("{}/", normalized_root)
    };
    if normalized_path.starts_with(&prefix) {
        return Ok(());
    }

    Err(FerryError::new(
        ErrorKind::ValidationFailed,
        format!(
            "path '{}' is outside sandbox '{}' (normalized: '{}' vs root '{}')",
            path, remote_root, normalized_path, normalized_root
        ),
    ))
}

/// POSIX join；绝对路径分量会丢弃之前的部分 — an absolute component discards
/// everything accumulated so far, mirroring `posixpath.join`.
pub fn join_remote_path(parts: &[&str]) -> String {
    let mut joined = String::new();
    for part in parts {
        if part.starts_with('/') {
            joined = (*part).to_string();
        } else if joined.is_empty() {
            joined = (*part).to_string();
        } else {
            if !joined.ends_with('/') {
                joined.push('/');
            }
            joined.push_str(part);
        }
    }
    joined
}

/// Parent directory of a normalized remote path; `/` has none.
pub fn remote_parent(path: &str) -> Option<String> {
    let normalized = normalize_remote_path(path);
    if normalized == "/" {
        return None;
    }
    match normalized.rfind('/') {
        Some(0) => Some("/".to_string()),
        Some(idx) => Some(normalized[..idx].to_string()),
        None => Some("/".to_string()),
    }
}

/// Final component of a remote path (empty for `/`).
pub fn remote_basename(path: &str) -> String {
    let trimmed = path.trim_end_matches('/');
    match trimmed.rfind('/') {
        Some(idx) => trimmed[idx + 1..].to_string(),
        None => trimmed.to_string(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn normalize_absolute_and_trailing() {
        assert_eq!(normalize_remote_path("/root/autodl-tmp"), "/root/autodl-tmp");
        assert_eq!(normalize_remote_path("/root/autodl-tmp/"), "/root/autodl-tmp");
    }

    #[test]
    fn normalize_relative_becomes_absolute() {
        assert_eq!(normalize_remote_path("root/autodl-tmp"), "/root/autodl-tmp");
        assert_eq!(normalize_remote_path("test"), "/test");
    }

    #[test]
    fn normalize_dot_components() {
        assert_eq!(normalize_remote_path("/root/./autodl-tmp"), "/root/autodl-tmp");
        assert_eq!(normalize_remote_path("/root/test/../autodl-tmp"), "/root/autodl-tmp");
    }

    #[test]
    fn normalize_duplicate_slashes() {
        assert_eq!(normalize_remote_path("/root//autodl-tmp"), "/root/autodl-tmp");
        assert_eq!(normalize_remote_path("///root///autodl-tmp///"), "/root/autodl-tmp");
    }

    #[test]
    fn normalize_complex() {
        assert_eq!(normalize_remote_path("//root/./test/../autodl-tmp//"), "/root/autodl-tmp");
        assert_eq!(normalize_remote_path("//a/./b/../c//"), "/a/c");
    }

    #[test]
    fn normalize_idempotent() {
        for p in ["//a/./b/../c//", "/x/y/z", "weird/../path", "/"] {
            let once = normalize_remote_path(p);
            assert_eq!(normalize_remote_path(&once), once);
        }
    }

    #[test]
    fn normalize_dotdot_clamps_at_root() {
        assert_eq!(normalize_remote_path("/../../etc"), "/etc");
        assert_eq!(normalize_remote_path("/.."), "/");
    }

    #[test]
    fn sandbox_exact_root_allowed() {
        ensure_in_sandbox("/root/autodl-tmp", "/root/autodl-tmp").unwrap();
    }

    #[test]
    fn sandbox_children_allowed() {
        ensure_in_sandbox("/root/autodl-tmp/test", "/root/autodl-tmp").unwrap();
        ensure_in_sandbox("/root/autodl-tmp/a/b/c", "/root/autodl-tmp").unwrap();
    }

    #[test]
    fn sandbox_outside_rejected() {
        assert!(ensure_in_sandbox("/root/other", "/root/autodl-tmp").is_err());
        assert!(ensure_in_sandbox("/etc/passwd", "/root/autodl-tmp").is_err());
        assert!(ensure_in_sandbox("/", "/root/autodl-tmp").is_err());
    }

    #[test]
    fn sandbox_dotdot_escape_rejected() {
        assert!(ensure_in_sandbox("/root/autodl-tmp/../other", "/root/autodl-tmp").is_err());
        assert!(ensure_in_sandbox("/root/autodl-tmp/../../etc", "/root/autodl-tmp").is_err());
        assert!(ensure_in_sandbox("/a/b/../c", "/a/b").is_err());
    }

    #[test]
    fn sandbox_prefix_confusion_rejected() {
        assert!(ensure_in_sandbox("/root/autodl-tmp-other", "/root/autodl-tmp").is_err());
        assert!(ensure_in_sandbox("/a/b-other", "/a/b").is_err());
        ensure_in_sandbox("/a/b/c", "/a/b").unwrap();
    }

    #[test]
    fn sandbox_trailing_slash_handled() {
        ensure_in_sandbox("/root/autodl-tmp/test", "/root/autodl-tmp/").unwrap();
        ensure_in_sandbox("/root/autodl-tmp/test/", "/root/autodl-tmp").unwrap();
    }

    #[test]
    fn sandbox_root_sandbox_allows_all_absolute() {
        ensure_in_sandbox("/anything/at/all", "/").unwrap();
    }

    #[test]
    fn sandbox_error_kind_is_validation() {
        let err = ensure_in_sandbox("/etc", "/root/autodl-tmp").unwrap_err();
        assert_eq!(err.kind, ErrorKind::ValidationFailed);
    }

    #[test]
    fn join_simple() {
        assert_eq!(join_remote_path(&["/root", "autodl-tmp"]), "/root/autodl-tmp");
        assert_eq!(join_remote_path(&["/root", "autodl-tmp", "test"]), "/root/autodl-tmp/test");
    }

    #[test]
    fn join_absolute_component_resets() {
        assert_eq!(join_remote_path(&["/root", "/autodl-tmp"]), "/autodl-tmp");
    }

    #[test]
    fn parent_walks_up_to_root() {
        assert_eq!(remote_parent("/root/autodl-tmp/test").as_deref(), Some("/root/autodl-tmp"));
        assert_eq!(remote_parent("/root/autodl-tmp").as_deref(), Some("/root"));
        assert_eq!(remote_parent("/root").as_deref(), Some("/"));
        assert_eq!(remote_parent("/"), None);
    }

    #[test]
    fn basename_variants() {
        assert_eq!(remote_basename("/root/autodl-tmp/test.txt"), "test.txt");
        assert_eq!(remote_basename("/root/autodl-tmp"), "autodl-tmp");
        assert_eq!(remote_basename("/root"), "root");
    }
}
