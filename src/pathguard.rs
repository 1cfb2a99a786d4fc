//! Resolves untrusted, client-supplied relative paths against the share root.
//!
//! Grounded on libunftp's `Filesystem::full_path` (`storage/filesystem.rs`), which
//! joins a relative path onto a root and rejects anything that canonicalizes
//! outside of it. This version additionally pre-scrubs `..` textually (the
//! libunftp version relies solely on `path_abs` canonicalization), lowercases
//! both sides for the prefix test to tolerate case-insensitive filesystems, and
//! offers a write-mode variant that skips the existence check.

use crate::error::{AppError, AppErrorKind};
use std::path::{Path, PathBuf};

#[derive(Clone)]
pub struct PathGuard {
    /// Canonical, symlink-resolved share root.
    root: PathBuf,
    /// Lowercased string form of `root`, used for the prefix test.
    root_lower: String,
}

impl PathGuard {
    /// Canonicalizes `root` once at startup. Fails fast if the share path is missing.
    pub async fn new(root: impl AsRef<Path>) -> std::io::Result<Self> {
        let canonical = tokio::fs::canonicalize(root.as_ref()).await?;
        let root_lower = normalize_for_compare(&canonical);
        Ok(PathGuard {
            root: canonical,
            root_lower,
        })
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Scrubs a client-supplied relative path: backslashes become slashes, a
    /// leading slash/`./` is stripped, and every `..` segment is dropped
    /// textually before any filesystem call is made.
    fn scrub(rel_path: &str) -> PathBuf {
        let normalized = rel_path.replace('\\', "/");
        let mut out = PathBuf::new();
        for segment in normalized.split('/') {
            if segment.is_empty() || segment == "." || segment == ".." {
                continue;
            }
            out.push(segment);
        }
        out
    }

    /// Resolves `rel_path` for a read: the target must already exist.
    pub async fn resolve_read(&self, rel_path: &str) -> Result<PathBuf, AppError> {
        let joined = self.root.join(Self::scrub(rel_path));
        let canonical = tokio::fs::canonicalize(&joined).await.map_err(|_| AppError::path_denied())?;
        self.check_contained(&canonical)
    }

    /// Resolves `rel_path` for a write: the target may not exist yet, so only
    /// the scrub and the containment check on the existing parent run.
    pub async fn resolve_write(&self, rel_path: &str) -> Result<PathBuf, AppError> {
        let scrubbed = Self::scrub(rel_path);
        let joined = self.root.join(&scrubbed);

        // Walk up to the nearest existing ancestor to canonicalize it, then
        // re-append the remaining (not-yet-existing) components.
        let mut existing = joined.clone();
        let mut tail: Vec<std::ffi::OsString> = Vec::new();
        loop {
            match tokio::fs::canonicalize(&existing).await {
                Ok(canonical_existing) => {
                    let mut result = canonical_existing;
                    for component in tail.into_iter().rev() {
                        result.push(component);
                    }
                    return self.check_contained_textual(&result);
                }
                Err(_) => {
                    let Some(parent) = existing.parent() else {
                        return Err(AppError::path_denied());
                    };
                    let Some(name) = existing.file_name() else {
                        return Err(AppError::path_denied());
                    };
                    tail.push(name.to_os_string());
                    existing = parent.to_path_buf();
                    if existing.as_os_str().is_empty() {
                        return Err(AppError::path_denied());
                    }
                }
            }
        }
    }

    fn check_contained(&self, canonical: &Path) -> Result<PathBuf, AppError> {
        let lowered = normalize_for_compare(canonical);
        if is_prefix_at_boundary(&self.root_lower, &lowered) {
            Ok(canonical.to_path_buf())
        } else {
            Err(AppError::path_denied())
        }
    }

    /// Same boundary check, but for a path whose tail doesn't exist yet (so we
    /// can't rely on the OS to have resolved any symlinks in that tail). The
    /// existing-ancestor portion was already canonicalized by the caller.
    fn check_contained_textual(&self, candidate: &Path) -> Result<PathBuf, AppError> {
        let lowered = normalize_for_compare(candidate);
        if is_prefix_at_boundary(&self.root_lower, &lowered) {
            Ok(candidate.to_path_buf())
        } else {
            Err(AppError::path_denied())
        }
    }

    /// Returns the path relative to the share root, forward-slash separated.
    pub fn relativize(&self, absolute: &Path) -> String {
        absolute
            .strip_prefix(&self.root)
            .unwrap_or(absolute)
            .components()
            .map(|c| c.as_os_str().to_string_lossy().into_owned())
            .collect::<Vec<_>>()
            .join("/")
    }
}

fn normalize_for_compare(path: &Path) -> String {
    path.to_string_lossy().replace('\\', "/").to_lowercase()
}

fn is_prefix_at_boundary(root_lower: &str, candidate_lower: &str) -> bool {
    if candidate_lower == root_lower {
        return true;
    }
    match candidate_lower.strip_prefix(root_lower) {
        Some(rest) => rest.starts_with('/'),
        None => false,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    async fn guard_in(dir: &std::path::Path) -> PathGuard {
        PathGuard::new(dir).await.unwrap()
    }

    #[tokio::test]
    async fn rejects_textual_traversal() {
        let dir = tempdir();
        tokio::fs::write(dir.path().join("a.txt"), b"hi").await.unwrap();
        let guard = guard_in(dir.path()).await;
        assert!(guard.resolve_read("../../etc/passwd").await.is_err());
        assert!(guard.resolve_read("./../a.txt").await.is_ok());
    }

    #[tokio::test]
    async fn accepts_plain_child() {
        let dir = tempdir();
        tokio::fs::write(dir.path().join("a.txt"), b"hi").await.unwrap();
        let guard = guard_in(dir.path()).await;
        let resolved = guard.resolve_read("a.txt").await.unwrap();
        assert_eq!(guard.relativize(&resolved), "a.txt");
    }

    #[tokio::test]
    async fn rejects_symlink_escape() {
        let dir = tempdir();
        let outside = tempdir();
        tokio::fs::write(outside.path().join("secret.txt"), b"shh").await.unwrap();
        #[cfg(unix)]
        {
            std::os::unix::fs::symlink(outside.path().join("secret.txt"), dir.path().join("link.txt")).unwrap();
            let guard = guard_in(dir.path()).await;
            assert!(guard.resolve_read("link.txt").await.is_err());
        }
    }

    #[tokio::test]
    async fn write_mode_allows_nonexistent_target() {
        let dir = tempdir();
        let guard = guard_in(dir.path()).await;
        let resolved = guard.resolve_write("new/sub/file.txt").await.unwrap();
        assert_eq!(guard.relativize(&resolved), "new/sub/file.txt");
    }

    #[tokio::test]
    async fn write_mode_rejects_traversal() {
        let dir = tempdir();
        let guard = guard_in(dir.path()).await;
        assert!(guard.resolve_write("../escape.txt").await.is_err());
    }

    fn tempdir() -> tempfile::TempDir {
        tempfile::tempdir().unwrap()
    }
}
