//! Platform-specific path utilities.
//!
//! This module provides functions to get platform-specific paths for:
//! - The running executable, as written into an association
//! - The directory desktop entries are installed into

use crate::error::{DeeplinkError, Result};
use std::path::PathBuf;

/// Get the directory holding per-user desktop entries.
///
/// # Platform Behavior
/// - **Linux**: `$XDG_DATA_HOME/applications`, defaulting to
///   `~/.local/share/applications`
/// - **Other**: not used for scheme registration
pub fn applications_dir() -> Result<PathBuf> {
    let data_dir = dirs::data_dir().ok_or_else(|| DeeplinkError::Config {
        message: "Could not determine user data directory".to_string(),
    })?;
    Ok(data_dir.join("applications"))
}

/// Absolute path of the running executable.
///
/// Symlinks are resolved so the association survives the link being
/// removed. On Windows the verbatim `\\?\` prefix that canonicalization
/// adds is stripped again, since the shell does not accept it in commands.
pub fn current_executable() -> Result<PathBuf> {
    let exe = std::env::current_exe().map_err(|e| DeeplinkError::Io {
        message: format!("could not determine the running executable: {}", e),
        path: None,
        source: Some(e),
    })?;
    let resolved = exe
        .canonicalize()
        .map_err(|e| DeeplinkError::io_with_path(e, &exe))?;
    Ok(strip_verbatim_prefix(resolved))
}

fn strip_verbatim_prefix(path: PathBuf) -> PathBuf {
    #[cfg(windows)]
    {
        let text = path.to_string_lossy();
        if let Some(stripped) = text.strip_prefix(r"\\?\") {
            if !stripped.starts_with("UNC\\") {
                return PathBuf::from(stripped);
            }
        }
        path
    }

    #[cfg(not(windows))]
    {
        path
    }
}

/// Check if a command exists in the system PATH.
///
/// # Platform Behavior
/// - **Linux/macOS**: Uses `which` command
/// - **Windows**: Uses `where` command
pub fn command_exists(cmd: &str) -> bool {
    #[cfg(unix)]
    let finder = "which";
    #[cfg(windows)]
    let finder = "where";

    std::process::Command::new(finder)
        .arg(cmd)
        .output()
        .map(|o| o.status.success())
        .unwrap_or(false)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_applications_dir_ends_with_applications() {
        // Headless CI may lack a home directory entirely
        if let Ok(dir) = applications_dir() {
            assert!(dir.ends_with("applications"), "unexpected dir: {:?}", dir);
        }
    }

    #[test]
    fn test_current_executable_is_absolute() {
        let exe = current_executable().unwrap();
        assert!(exe.is_absolute());
        assert!(exe.exists());
    }

    #[test]
    fn test_strip_verbatim_prefix_keeps_plain_paths() {
        let path = PathBuf::from("/opt/app/bin/app");
        assert_eq!(strip_verbatim_prefix(path.clone()), path);
    }

    #[test]
    fn test_command_exists_false_for_garbage() {
        assert!(!command_exists("definitely-not-a-real-command-1f2e3d"));
    }
}
