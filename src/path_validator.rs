//! Path validation and traversal/sensitivity detection.
//!
//! Grounded on the dotfile-protection guardian's sensitive-path reasoning,
//! generalized from "dotfiles only" to the full write-gate described by the
//! permission engine: normalize, reject traversal, reject known-sensitive
//! locations, then honor the project's allow/block lists.

use std::path::{Path, PathBuf};

use once_cell::sync::Lazy;
use regex::Regex;

/// Outcome of validating a candidate path against project policy.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PathValidation {
    pub valid: bool,
    pub reason: String,
}

impl PathValidation {
    fn allow(reason: impl Into<String>) -> Self {
        Self {
            valid: true,
            reason: reason.into(),
        }
    }

    fn deny(reason: impl Into<String>) -> Self {
        Self {
            valid: false,
            reason: reason.into(),
        }
    }
}

/// Directories that are always blocked regardless of project policy.
const SENSITIVE_DIRS: &[&str] = &[
    ".ssh",
    ".gnupg",
    ".aws",
    ".config/gcloud",
    ".kube",
];

/// Exact relative filenames (from home or root) that are always blocked.
const SENSITIVE_FILES: &[&str] = &[
    ".netrc",
    "/etc/passwd",
    "/etc/shadow",
    "/etc/sudoers",
];

/// Absolute system roots that are always blocked.
const SENSITIVE_SYSTEM_ROOTS: &[&str] = &["/System", "/Library/Preferences", "/private/etc"];

static SENSITIVE_FILENAME_PATTERNS: Lazy<Vec<Regex>> = Lazy::new(|| {
    [
        r"^\.env(\..+)?$",
        r"^credentials\.(json|ya?ml)$",
        r"^secrets\.(json|ya?ml)$",
        r"^\..+_history$",
        r".*\.pem$",
        r".*\.key$",
        r"^id_rsa$",
        r"^id_ed25519$",
        r".*\.p12$",
        r".*\.pfx$",
        r".*\.keystore$",
        r"^token\.json$",
    ]
    .iter()
    .map(|pattern| Regex::new(pattern).expect("static sensitive-filename pattern must compile"))
    .collect()
});

/// Expand `~` to the process home directory; otherwise return the path unchanged.
fn expand_home(path: &str) -> PathBuf {
    if let Some(rest) = path.strip_prefix("~/") {
        if let Some(home) = dirs::home_dir() {
            return home.join(rest);
        }
    } else if path == "~" {
        if let Some(home) = dirs::home_dir() {
            return home;
        }
    }
    PathBuf::from(path)
}

/// Literal-level traversal detection. Deliberately conservative: it rejects
/// on the literal presence of `..` / null bytes / encoded dot-slash even when
/// the post-normalization path would be harmless, so there is no edge case
/// where a crafted `a/../../b` escapes an `allowed_paths` entry after
/// resolution.
fn has_traversal_marker(raw: &str) -> bool {
    if raw.contains('\u{0}') {
        return true;
    }
    let lowered = raw.to_ascii_lowercase();
    if lowered.contains("%2e") || lowered.contains("%2f") {
        return true;
    }
    raw.split(['/', '\\']).any(|segment| segment == "..")
}

/// `p` is under `parent` iff they are lexically equal or `parent` is an
/// ancestor of `p`, compared on canonicalized absolute forms when both paths
/// exist on disk and on normalized-lexical forms otherwise.
fn under(p: &Path, parent: &Path) -> bool {
    let canon_p = p.canonicalize().unwrap_or_else(|_| p.to_path_buf());
    let canon_parent = parent.canonicalize().unwrap_or_else(|_| parent.to_path_buf());
    canon_p == canon_parent || canon_p.starts_with(&canon_parent)
}

fn matches_sensitive(path: &Path) -> bool {
    let home = dirs::home_dir();

    if let Some(home) = &home {
        for dir in SENSITIVE_DIRS {
            if under(path, &home.join(dir)) {
                return true;
            }
        }
        for file in SENSITIVE_FILES {
            if file.starts_with('/') {
                continue;
            }
            if under(path, &home.join(file)) {
                return true;
            }
        }
    }

    for file in SENSITIVE_FILES {
        if file.starts_with('/') && under(path, Path::new(file)) {
            return true;
        }
    }

    for root in SENSITIVE_SYSTEM_ROOTS {
        if under(path, Path::new(root)) {
            return true;
        }
    }

    if let Some(name) = path.file_name().and_then(|n| n.to_str()) {
        if SENSITIVE_FILENAME_PATTERNS
            .iter()
            .any(|re| re.is_match(name))
        {
            return true;
        }
    }

    false
}

/// Validate a candidate path for modification against a project's
/// allow/block lists and an optional project root.
///
/// Resolution order: traversal -> blocked -> sensitive -> allowed (if
/// non-empty, must match) -> project root (if given, must be under it) ->
/// accept.
pub fn validate_path(
    raw_path: &str,
    project_root: Option<&Path>,
    allowed_paths: &[String],
    blocked_paths: &[String],
) -> PathValidation {
    if has_traversal_marker(raw_path) {
        return PathValidation::deny("path traversal or encoded traversal marker rejected");
    }

    let expanded = expand_home(raw_path);
    let candidate = if expanded.is_absolute() {
        expanded
    } else {
        match project_root {
            Some(root) => root.join(&expanded),
            None => expanded,
        }
    };

    for blocked in blocked_paths {
        let blocked_path = expand_home(blocked);
        if under(&candidate, &blocked_path) {
            return PathValidation::deny(format!("path is under blocked path {blocked}"));
        }
    }

    if matches_sensitive(&candidate) {
        return PathValidation::deny("path matches a sensitive system location");
    }

    if !allowed_paths.is_empty() {
        let within_allowed = allowed_paths
            .iter()
            .map(|p| expand_home(p))
            .any(|allowed| under(&candidate, &allowed));
        if !within_allowed {
            return PathValidation::deny("path is not within any allowed_paths entry");
        }
    }

    if let Some(root) = project_root {
        if !under(&candidate, root) {
            return PathValidation::deny("path is outside the project root");
        }
    }

    PathValidation::allow("path passed traversal, sensitivity, and policy checks")
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    #[test]
    fn rejects_literal_traversal_even_if_harmless_after_resolution() {
        let result = validate_path("a/../../b", None, &[], &[]);
        assert!(!result.valid);
    }

    #[test]
    fn rejects_null_byte() {
        let result = validate_path("foo\u{0}bar", None, &[], &[]);
        assert!(!result.valid);
    }

    #[test]
    fn rejects_url_encoded_traversal_case_insensitive() {
        assert!(!validate_path("foo%2E%2E/bar", None, &[], &[]).valid);
        assert!(!validate_path("foo%2fbar", None, &[], &[]).valid);
    }

    #[test]
    fn blocks_sensitive_path_even_when_explicitly_allowed() {
        let result = validate_path("~/.ssh/id_rsa", None, &["/".to_string()], &[]);
        assert!(!result.valid);
        assert!(result.reason.contains("sensitive"));
    }

    #[test]
    fn allows_path_within_project_root() {
        let dir = tempdir().unwrap();
        let file = dir.path().join("src/main.rs");
        std::fs::create_dir_all(file.parent().unwrap()).unwrap();
        std::fs::write(&file, b"fn main() {}").unwrap();

        let result = validate_path(file.to_str().unwrap(), Some(dir.path()), &[], &[]);
        assert!(result.valid);
    }

    #[test]
    fn denies_path_outside_project_root() {
        let dir = tempdir().unwrap();
        let result = validate_path("/etc/hosts", Some(dir.path()), &[], &[]);
        assert!(!result.valid);
    }

    #[test]
    fn blocked_beats_allowed() {
        let dir = tempdir().unwrap();
        let sub = dir.path().join("locked");
        std::fs::create_dir_all(&sub).unwrap();
        let file = sub.join("f.txt");
        std::fs::write(&file, b"x").unwrap();

        let result = validate_path(
            file.to_str().unwrap(),
            None,
            &[dir.path().to_str().unwrap().to_string()],
            &[sub.to_str().unwrap().to_string()],
        );
        assert!(!result.valid);
    }
}
