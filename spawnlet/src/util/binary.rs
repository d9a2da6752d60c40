//! Locating helper binaries.

use spawnlet_shared::{SpawnletError, SpawnletResult};
use std::path::{Path, PathBuf};

/// Find a binary next to the running executable, falling back to `$PATH`.
pub fn find_binary(name: &str) -> SpawnletResult<PathBuf> {
    if let Ok(exe) = std::env::current_exe()
        && let Some(dir) = exe.parent()
    {
        let candidate = dir.join(name);
        if is_executable(&candidate) {
            return Ok(candidate);
        }
    }

    std::env::var_os("PATH")
        .and_then(|paths| {
            std::env::split_paths(&paths)
                .map(|dir| dir.join(name))
                .find(|candidate| is_executable(candidate))
        })
        .ok_or_else(|| SpawnletError::Config(format!("binary '{}' not found in PATH", name)))
}

fn is_executable(path: &Path) -> bool {
    use std::os::unix::fs::PermissionsExt;

    std::fs::metadata(path)
        .map(|m| m.is_file() && m.permissions().mode() & 0o111 != 0)
        .unwrap_or(false)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_find_binary_in_path() {
        let sh = find_binary("sh").unwrap();
        assert!(sh.ends_with("sh"));
    }

    #[test]
    fn test_find_binary_missing() {
        let err = find_binary("definitely-not-a-real-binary-xyz").unwrap_err();
        assert!(err.to_string().contains("not found in PATH"));
    }
}
