//! Hook discovery: executable files in a directory, addressed by file name.
//!
//! An event named `notify` runs `<hooks_dir>/notify`. The directory is
//! rescanned on every lookup, so hooks added or removed while the consumer
//! runs take effect on the next event.

use std::path::{Component, Path, PathBuf};
use tracing::warn;

/// Registry of hooks backed by a directory on disk.
#[derive(Debug, Clone)]
pub struct HookRegistry {
    dir: PathBuf,
}

impl HookRegistry {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self { dir: dir.into() }
    }

    /// The directory hooks are read from.
    pub fn dir(&self) -> &Path {
        &self.dir
    }

    /// Names of all runnable hooks, sorted.
    ///
    /// A missing or unreadable directory yields an empty list.
    pub fn list(&self) -> Vec<String> {
        let entries = match std::fs::read_dir(&self.dir) {
            Ok(entries) => entries,
            Err(e) => {
                warn!(dir = %self.dir.display(), error = %e, "Cannot read hooks directory");
                return Vec::new();
            }
        };

        let mut names: Vec<String> = entries
            .filter_map(|entry| entry.ok())
            .filter(|entry| is_runnable(&entry.path()))
            .filter_map(|entry| entry.file_name().into_string().ok())
            .filter(|name| validate_hook_name(name).is_ok())
            .collect();
        names.sort();
        names
    }

    /// Whether a hook named `name` currently exists.
    pub fn contains(&self, name: &str) -> bool {
        self.resolve(name).is_some()
    }

    /// Path of the hook bound to `name`, if it exists and is runnable.
    pub fn resolve(&self, name: &str) -> Option<PathBuf> {
        validate_hook_name(name).ok()?;
        let path = self.dir.join(name);
        is_runnable(&path).then_some(path)
    }
}

/// Reject names that could address anything outside the hooks directory.
pub fn validate_hook_name(name: &str) -> Result<(), String> {
    if name.is_empty() {
        return Err("hook name is empty".into());
    }
    if name.starts_with('.') {
        return Err(format!("hook name '{name}' starts with '.'"));
    }
    if name.contains('/') || name.contains('\\') {
        return Err(format!("hook name '{name}' contains a path separator"));
    }
    let mut components = Path::new(name).components();
    match (components.next(), components.next()) {
        (Some(Component::Normal(_)), None) => Ok(()),
        _ => Err(format!("hook name '{name}' is not a plain file name")),
    }
}

#[cfg(unix)]
fn is_runnable(path: &Path) -> bool {
    use std::os::unix::fs::PermissionsExt;
    std::fs::metadata(path)
        .map(|m| m.is_file() && m.permissions().mode() & 0o111 != 0)
        .unwrap_or(false)
}

#[cfg(not(unix))]
fn is_runnable(path: &Path) -> bool {
    path.is_file()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_validate_hook_name() {
        assert!(validate_hook_name("notify").is_ok());
        assert!(validate_hook_name("copy-to-clipboard.sh").is_ok());
        assert!(validate_hook_name("").is_err());
        assert!(validate_hook_name("..").is_err());
        assert!(validate_hook_name(".hidden").is_err());
        assert!(validate_hook_name("../../bin/sh").is_err());
        assert!(validate_hook_name("a/b").is_err());
        assert!(validate_hook_name("a\\b").is_err());
    }

    #[test]
    fn test_missing_directory_is_empty() {
        let registry = HookRegistry::new("/nonexistent/tether/hooks");
        assert!(registry.list().is_empty());
        assert!(!registry.contains("notify"));
    }

    #[cfg(unix)]
    #[test]
    fn test_lists_only_executables() {
        use std::os::unix::fs::PermissionsExt;

        let dir = tempfile::tempdir().unwrap();
        let write = |name: &str, mode: u32| {
            let path = dir.path().join(name);
            std::fs::write(&path, "#!/bin/sh\n").unwrap();
            std::fs::set_permissions(&path, std::fs::Permissions::from_mode(mode)).unwrap();
        };
        write("notify", 0o755);
        write("copy", 0o700);
        write("README", 0o644);
        write(".secret", 0o755);
        std::fs::create_dir(dir.path().join("subdir")).unwrap();

        let registry = HookRegistry::new(dir.path());
        assert_eq!(registry.list(), vec!["copy", "notify"]);
        assert!(registry.contains("notify"));
        assert!(!registry.contains("README"));
        assert!(!registry.contains("subdir"));
        assert!(!registry.contains(".secret"));
        assert_eq!(
            registry.resolve("notify"),
            Some(dir.path().join("notify"))
        );
    }

    #[cfg(unix)]
    #[test]
    fn test_picks_up_hooks_added_later() {
        use std::os::unix::fs::PermissionsExt;

        let dir = tempfile::tempdir().unwrap();
        let registry = HookRegistry::new(dir.path());
        assert!(!registry.contains("late"));

        let path = dir.path().join("late");
        std::fs::write(&path, "#!/bin/sh\n").unwrap();
        std::fs::set_permissions(&path, std::fs::Permissions::from_mode(0o755)).unwrap();
        assert!(registry.contains("late"));
    }
}
