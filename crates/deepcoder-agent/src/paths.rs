//! Workspace path confinement for filesystem tools

use std::io;
use std::path::{Component, Path, PathBuf};

/// Tools whose `path` argument names a file in the workspace
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FsTool {
    WriteFile,
    ReadFile,
    ReadTextFile,
    EditFile,
}

impl FsTool {
    /// Exact-name lookup. `my_write_file_helper` is not `write_file`.
    pub fn from_name(name: &str) -> Option<Self> {
        match name {
            "write_file" => Some(Self::WriteFile),
            "read_file" => Some(Self::ReadFile),
            "read_text_file" => Some(Self::ReadTextFile),
            "edit_file" => Some(Self::EditFile),
            _ => None,
        }
    }

    /// Whether this tool may need its parent directory created first
    pub fn creates_files(&self) -> bool {
        matches!(self, Self::WriteFile)
    }
}

/// Argument keys that may carry the target path, in lookup order
pub const PATH_KEYS: [&str; 2] = ["path", "file_path"];

/// Error for any path that escapes the workspace
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("Access denied - path outside allowed directories: {0}")]
pub struct OutsideWorkspace(pub String);

/// A workspace root that relative tool paths are resolved against
#[derive(Debug, Clone)]
pub struct WorkspacePaths {
    root: PathBuf,
}

impl WorkspacePaths {
    /// Canonicalize `root` once. The directory must exist.
    pub fn new(root: impl AsRef<Path>) -> io::Result<Self> {
        Ok(Self {
            root: root.as_ref().canonicalize()?,
        })
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Resolve a tool-supplied path to an absolute path inside the workspace.
    ///
    /// Relative paths lose one leading `./` and are joined to the root. `..`
    /// segments are folded and symlinks in the existing part of the path are
    /// followed. Absolute paths are accepted only when they land inside the root.
    pub fn resolve(&self, raw: &str) -> Result<PathBuf, OutsideWorkspace> {
        let trimmed = raw.strip_prefix("./").unwrap_or(raw);
        let candidate = Path::new(trimmed);
        let joined = if candidate.is_absolute() {
            candidate.to_path_buf()
        } else {
            self.root.join(candidate)
        };

        match canonicalize_lenient(&joined) {
            Some(resolved) if resolved.starts_with(&self.root) => Ok(resolved),
            _ => Err(OutsideWorkspace(raw.to_string())),
        }
    }

    /// Workspace-relative parent of a not-yet-resolved path, for auto-mkdir.
    /// `None` when the file sits directly in the root.
    pub fn mkdir_parent(raw: &str) -> Option<String> {
        let trimmed = raw.strip_prefix("./").unwrap_or(raw);
        let parent = Path::new(trimmed).parent()?;
        let parent = parent.to_string_lossy();
        if parent.is_empty() || parent == "." {
            None
        } else {
            Some(parent.into_owned())
        }
    }
}

/// Symlink hops followed before a path is treated as a loop
const MAX_SYMLINK_HOPS: u32 = 40;

/// Lexically fold `.` and `..`, then canonicalize the deepest ancestor that
/// exists and re-attach the rest. Works for paths that do not exist yet.
/// Dangling symlinks are followed to their target. `None` on a symlink loop.
fn canonicalize_lenient(path: &Path) -> Option<PathBuf> {
    let mut current = path.to_path_buf();
    for _ in 0..=MAX_SYMLINK_HOPS {
        match canonicalize_step(&current) {
            Step::Done(resolved) => return Some(resolved),
            Step::Follow(next) => current = next,
        }
    }
    None
}

enum Step {
    Done(PathBuf),
    Follow(PathBuf),
}

fn canonicalize_step(path: &Path) -> Step {
    let normalized = fold_dots(path);
    let mut existing = normalized.clone();
    let mut tail = Vec::new();
    loop {
        if let Ok(canonical) = existing.canonicalize() {
            return Step::Done(reattach(canonical, &tail));
        }
        // canonicalize fails on a link whose target is missing
        let is_link = existing
            .symlink_metadata()
            .is_ok_and(|m| m.file_type().is_symlink());
        if is_link {
            if let (Ok(target), Some(parent)) = (existing.read_link(), existing.parent()) {
                return Step::Follow(reattach(parent.join(target), &tail));
            }
        }
        match (existing.file_name().map(|n| n.to_os_string()), existing.parent()) {
            (Some(name), Some(parent)) => {
                tail.push(name);
                existing = parent.to_path_buf();
            }
            _ => return Step::Done(normalized),
        }
    }
}

fn fold_dots(path: &Path) -> PathBuf {
    let mut normalized = PathBuf::new();
    for component in path.components() {
        match component {
            Component::ParentDir => {
                normalized.pop();
            }
            Component::CurDir => {}
            other => normalized.push(other.as_os_str()),
        }
    }
    normalized
}

/// Push `tail` (collected leaf-first) back onto `base`
fn reattach(mut base: PathBuf, tail: &[std::ffi::OsString]) -> PathBuf {
    for part in tail.iter().rev() {
        base.push(part);
    }
    base
}

#[cfg(test)]
mod tests {
    use super::*;

    fn workspace() -> (tempfile::TempDir, WorkspacePaths) {
        let dir = tempfile::tempdir().unwrap();
        let paths = WorkspacePaths::new(dir.path()).unwrap();
        (dir, paths)
    }

    #[test]
    fn test_fs_tool_exact_names() {
        assert_eq!(FsTool::from_name("write_file"), Some(FsTool::WriteFile));
        assert_eq!(FsTool::from_name("read_text_file"), Some(FsTool::ReadTextFile));
        assert_eq!(FsTool::from_name("my_write_file_helper"), None);
        assert_eq!(FsTool::from_name("Write_File"), None);
        assert!(FsTool::WriteFile.creates_files());
        assert!(!FsTool::EditFile.creates_files());
    }

    #[test]
    fn test_relative_paths_confined() {
        let (_dir, paths) = workspace();
        for raw in ["hello.txt", "./hello.txt", "src/app/main.rs", "./src/../lib.rs", "a/./b"] {
            let resolved = paths.resolve(raw).unwrap();
            assert!(resolved.is_absolute(), "{raw}");
            assert!(resolved.starts_with(paths.root()), "{raw}: {resolved:?}");
        }
        assert_eq!(
            paths.resolve("./hello.txt").unwrap(),
            paths.root().join("hello.txt")
        );
    }

    #[test]
    fn test_repeated_dot_slash_folds() {
        let (_dir, paths) = workspace();
        assert_eq!(
            paths.resolve("././x.txt").unwrap(),
            paths.root().join("x.txt")
        );
    }

    #[test]
    fn test_escape_via_parent_rejected() {
        let (_dir, paths) = workspace();
        let err = paths.resolve("../outside.txt").unwrap_err();
        assert_eq!(
            err.to_string(),
            "Access denied - path outside allowed directories: ../outside.txt"
        );
        assert!(paths.resolve("./a/../../b").is_err());
    }

    #[test]
    fn test_absolute_paths() {
        let (_dir, paths) = workspace();
        let inside = paths.root().join("nested/file.txt");
        assert_eq!(
            paths.resolve(inside.to_str().unwrap()).unwrap(),
            inside
        );
        assert!(paths.resolve("/etc/passwd").is_err());
    }

    #[cfg(unix)]
    #[test]
    fn test_symlink_out_of_workspace_rejected() {
        let (dir, paths) = workspace();
        let outside = tempfile::tempdir().unwrap();
        std::os::unix::fs::symlink(outside.path(), dir.path().join("link")).unwrap();
        assert!(paths.resolve("link/secret.txt").is_err());
    }

    #[cfg(unix)]
    #[test]
    fn test_dangling_symlink_out_of_workspace_rejected() {
        let (dir, paths) = workspace();
        let outside = tempfile::tempdir().unwrap();
        let planted = outside.path().join("planted.txt");
        std::os::unix::fs::symlink(&planted, dir.path().join("link.txt")).unwrap();
        std::os::unix::fs::symlink(outside.path().join("gone"), dir.path().join("dir")).unwrap();

        assert!(paths.resolve("link.txt").is_err());
        assert!(paths.resolve("./dir/new.txt").is_err());
        assert!(!planted.exists());
    }

    #[cfg(unix)]
    #[test]
    fn test_dangling_symlink_inside_workspace_followed() {
        let (dir, paths) = workspace();
        std::os::unix::fs::symlink("real/target.txt", dir.path().join("alias.txt")).unwrap();
        assert_eq!(
            paths.resolve("alias.txt").unwrap(),
            paths.root().join("real/target.txt")
        );
    }

    #[cfg(unix)]
    #[test]
    fn test_symlink_loop_rejected() {
        let (dir, paths) = workspace();
        std::os::unix::fs::symlink("b", dir.path().join("a")).unwrap();
        std::os::unix::fs::symlink("a", dir.path().join("b")).unwrap();
        assert!(paths.resolve("a").is_err());
    }

    #[test]
    fn test_mkdir_parent() {
        assert_eq!(WorkspacePaths::mkdir_parent("./hello.txt"), None);
        assert_eq!(WorkspacePaths::mkdir_parent("hello.txt"), None);
        assert_eq!(
            WorkspacePaths::mkdir_parent("./src/app/main.rs").as_deref(),
            Some("src/app")
        );
        assert_eq!(WorkspacePaths::mkdir_parent("docs/a.md").as_deref(), Some("docs"));
    }
}
