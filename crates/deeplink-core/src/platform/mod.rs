//! Platform abstraction layer.
//!
//! All `#[cfg]` blocks for OS-specific behavior live here or in the store
//! that needs them, rather than scattered through the coordinator.
//!
//! # Supported Platforms
//!
//! - **Windows**: per-user registry under `HKCU\Software\Classes`
//! - **Linux**: XDG desktop entry with `x-scheme-handler/<scheme>`
//! - **macOS**: not supported; scheme handlers live in the app bundle's
//!   `Info.plist`, which a running binary cannot register on its own

pub mod paths;

pub use paths::{applications_dir, command_exists, current_executable};

use crate::error::Result;
use crate::registrar::AssociationStore;

/// Returns the current platform name.
pub fn current_platform() -> &'static str {
    #[cfg(target_os = "linux")]
    {
        "linux"
    }
    #[cfg(target_os = "windows")]
    {
        "windows"
    }
    #[cfg(target_os = "macos")]
    {
        "macos"
    }
    #[cfg(not(any(target_os = "linux", target_os = "windows", target_os = "macos")))]
    {
        "unknown"
    }
}

/// Returns true if scheme registration is supported on this platform.
pub fn is_supported_platform() -> bool {
    cfg!(any(target_os = "linux", target_os = "windows"))
}

/// The association store for the current user on this platform.
pub fn default_store() -> Result<Box<dyn AssociationStore>> {
    #[cfg(target_os = "windows")]
    {
        use crate::registrar::{RegistryStore, WindowsHive};
        Ok(Box::new(RegistryStore::new(WindowsHive::new())))
    }

    #[cfg(target_os = "linux")]
    {
        use crate::registrar::DesktopEntryStore;
        Ok(Box::new(DesktopEntryStore::user_default()?))
    }

    #[cfg(not(any(target_os = "linux", target_os = "windows")))]
    {
        Err(crate::error::DeeplinkError::UnsupportedPlatform {
            platform: current_platform(),
        })
    }
}
