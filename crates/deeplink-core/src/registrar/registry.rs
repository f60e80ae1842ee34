//! Windows registry layout for URL protocol handlers.
//!
//! ```text
//! HKCU\Software\Classes\<scheme>                      (default) = "URL:<scheme>"
//!                                                     URL Protocol = ""
//! HKCU\Software\Classes\<scheme>\DefaultIcon          (default) = "<exe>,0"
//! HKCU\Software\Classes\<scheme>\shell\open\command   (default) = "\"<exe>\" \"%1\""
//! ```
//!
//! The layout is written through the [`RegistryHive`] trait so it can run
//! against the real registry ([`WindowsHive`](super::WindowsHive)) or an
//! in-memory hive ([`MemoryHive`]).

use super::{Association, AssociationRecord, AssociationStore};
use crate::{DeeplinkError, Result};
use std::collections::BTreeMap;
use std::sync::{Mutex, MutexGuard};
use tracing::{debug, warn};

const CLASSES_ROOT: &str = r"Software\Classes";
const PROTOCOL_MARKER: &str = "URL Protocol";
const ICON_SUBKEY: &str = "DefaultIcon";
const COMMAND_SUBKEY: &str = r"shell\open\command";

/// Minimal string-value registry access, rooted at the current user's hive.
///
/// Paths use `\` separators; the empty value name is the key's default value.
pub trait RegistryHive: Send + Sync {
    fn key_exists(&self, path: &str) -> std::io::Result<bool>;

    /// Create `path` and any missing parents.
    fn create_key(&self, path: &str) -> std::io::Result<()>;

    fn set_string(&self, path: &str, name: &str, value: &str) -> std::io::Result<()>;

    /// `Ok(None)` when the key or the value does not exist.
    fn get_string(&self, path: &str, name: &str) -> std::io::Result<Option<String>>;

    /// Delete a value; missing values are not an error.
    fn delete_value(&self, path: &str, name: &str) -> std::io::Result<()>;

    /// Delete `path` with all subkeys; missing keys are not an error.
    fn delete_tree(&self, path: &str) -> std::io::Result<()>;
}

impl<H: RegistryHive + ?Sized> RegistryHive for &H {
    fn key_exists(&self, path: &str) -> std::io::Result<bool> {
        (**self).key_exists(path)
    }

    fn create_key(&self, path: &str) -> std::io::Result<()> {
        (**self).create_key(path)
    }

    fn set_string(&self, path: &str, name: &str, value: &str) -> std::io::Result<()> {
        (**self).set_string(path, name, value)
    }

    fn get_string(&self, path: &str, name: &str) -> std::io::Result<Option<String>> {
        (**self).get_string(path, name)
    }

    fn delete_value(&self, path: &str, name: &str) -> std::io::Result<()> {
        (**self).delete_value(path, name)
    }

    fn delete_tree(&self, path: &str) -> std::io::Result<()> {
        (**self).delete_tree(path)
    }
}

/// One value this store manages, addressed by subkey and value name.
#[derive(Debug, Clone, Copy)]
struct Slot {
    subkey: Option<&'static str>,
    name: &'static str,
}

const DISPLAY_SLOT: Slot = Slot {
    subkey: None,
    name: "",
};
const MARKER_SLOT: Slot = Slot {
    subkey: None,
    name: PROTOCOL_MARKER,
};
const ICON_SLOT: Slot = Slot {
    subkey: Some(ICON_SUBKEY),
    name: "",
};
const COMMAND_SLOT: Slot = Slot {
    subkey: Some(COMMAND_SUBKEY),
    name: "",
};

/// [`AssociationStore`] using the Windows URL protocol layout.
pub struct RegistryStore<H> {
    hive: H,
}

impl<H: RegistryHive> RegistryStore<H> {
    pub fn new(hive: H) -> Self {
        Self { hive }
    }

    pub fn hive(&self) -> &H {
        &self.hive
    }

    fn scheme_key(scheme: &str) -> String {
        format!(r"{}\{}", CLASSES_ROOT, scheme)
    }

    fn slot_path(scheme: &str, slot: Slot) -> String {
        match slot.subkey {
            Some(subkey) => format!(r"{}\{}", Self::scheme_key(scheme), subkey),
            None => Self::scheme_key(scheme),
        }
    }

    fn read_slot(&self, scheme: &str, slot: Slot) -> std::io::Result<Option<String>> {
        self.hive.get_string(&Self::slot_path(scheme, slot), slot.name)
    }

    fn write_slot(&self, scheme: &str, slot: Slot, value: &str) -> std::io::Result<()> {
        let path = Self::slot_path(scheme, slot);
        self.hive.create_key(&path)?;
        self.hive.set_string(&path, slot.name, value)
    }

    /// Put back what was there before a failed write.
    fn rollback(&self, scheme: &str, existed: bool, previous: &[(Slot, Option<String>)]) {
        let key = Self::scheme_key(scheme);

        if !existed {
            if let Err(e) = self.hive.delete_tree(&key) {
                warn!("Rollback of {} failed: {}", key, e);
            }
            return;
        }

        for (slot, value) in previous {
            let path = Self::slot_path(scheme, *slot);
            let restored = match value {
                Some(value) => self.write_slot(scheme, *slot, value),
                None => self.hive.delete_value(&path, slot.name),
            };
            if let Err(e) = restored {
                warn!("Rollback of {}\\{:?} failed: {}", path, slot.name, e);
            }
        }
    }
}

impl<H: RegistryHive> AssociationStore for RegistryStore<H> {
    fn write(&self, association: &Association) -> Result<()> {
        let scheme = association.scheme();
        let key = Self::scheme_key(scheme);
        let fail = |message: &str, e: std::io::Error| DeeplinkError::registration(scheme, message, e);

        let existed = self
            .hive
            .key_exists(&key)
            .map_err(|e| fail("failed to open scheme key", e))?;

        let values = [
            (DISPLAY_SLOT, association.display_name()),
            (MARKER_SLOT, String::new()),
            (ICON_SLOT, association.icon_reference()),
            (COMMAND_SLOT, association.open_command()),
        ];

        let mut previous = Vec::with_capacity(values.len());
        if existed {
            for (slot, _) in &values {
                let value = self
                    .read_slot(scheme, *slot)
                    .map_err(|e| fail("failed to read existing association", e))?;
                previous.push((*slot, value));
            }
        }

        for (slot, value) in &values {
            if let Err(e) = self.write_slot(scheme, *slot, value) {
                self.rollback(scheme, existed, &previous);
                return Err(fail(
                    &format!("failed to write {}", Self::slot_path(scheme, *slot)),
                    e,
                ));
            }
        }

        debug!("Wrote registry association under {}", key);
        Ok(())
    }

    fn read(&self, scheme: &str) -> Result<Option<AssociationRecord>> {
        let fail = |e: std::io::Error| {
            DeeplinkError::registration(scheme, "failed to read association", e)
        };

        if !self.hive.key_exists(&Self::scheme_key(scheme)).map_err(fail)? {
            return Ok(None);
        }

        Ok(Some(AssociationRecord {
            scheme: scheme.to_string(),
            display_name: self.read_slot(scheme, DISPLAY_SLOT).map_err(fail)?,
            protocol_marker: self.read_slot(scheme, MARKER_SLOT).map_err(fail)?.is_some(),
            icon: self.read_slot(scheme, ICON_SLOT).map_err(fail)?,
            command: self.read_slot(scheme, COMMAND_SLOT).map_err(fail)?,
        }))
    }

    fn remove(&self, scheme: &str) -> Result<()> {
        let key = Self::scheme_key(scheme);
        let fail = |e: std::io::Error| {
            DeeplinkError::registration(scheme, "failed to delete association", e)
        };

        if !self.hive.key_exists(&key).map_err(fail)? {
            return Err(DeeplinkError::NotFound {
                scheme: scheme.to_string(),
            });
        }

        self.hive.delete_tree(&key).map_err(fail)?;
        debug!("Deleted registry key {}", key);
        Ok(())
    }

    fn location(&self, scheme: &str) -> String {
        format!(r"HKEY_CURRENT_USER\{}", Self::scheme_key(scheme))
    }
}

/// In-memory registry hive.
///
/// Keys and value names compare case-insensitively, as in the real registry.
/// Useful for dry runs and on platforms without a registry.
#[derive(Debug, Default)]
pub struct MemoryHive {
    keys: Mutex<KeyMap>,
}

type KeyMap = BTreeMap<String, BTreeMap<String, String>>;

impl MemoryHive {
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of keys currently present.
    pub fn key_count(&self) -> usize {
        self.keys.lock().map(|keys| keys.len()).unwrap_or(0)
    }

    fn normalize(path: &str) -> String {
        path.trim_matches('\\').to_ascii_lowercase()
    }

    fn lock(&self) -> std::io::Result<MutexGuard<'_, KeyMap>> {
        self.keys
            .lock()
            .map_err(|_| std::io::Error::other("memory hive lock poisoned"))
    }
}

impl RegistryHive for MemoryHive {
    fn key_exists(&self, path: &str) -> std::io::Result<bool> {
        Ok(self.lock()?.contains_key(&Self::normalize(path)))
    }

    fn create_key(&self, path: &str) -> std::io::Result<()> {
        let normalized = Self::normalize(path);
        let mut keys = self.lock()?;

        let mut current = String::new();
        for part in normalized.split('\\') {
            if !current.is_empty() {
                current.push('\\');
            }
            current.push_str(part);
            keys.entry(current.clone()).or_default();
        }
        Ok(())
    }

    fn set_string(&self, path: &str, name: &str, value: &str) -> std::io::Result<()> {
        let mut keys = self.lock()?;
        let values = keys.get_mut(&Self::normalize(path)).ok_or_else(|| {
            std::io::Error::new(std::io::ErrorKind::NotFound, format!("key {} not found", path))
        })?;
        values.insert(name.to_ascii_lowercase(), value.to_string());
        Ok(())
    }

    fn get_string(&self, path: &str, name: &str) -> std::io::Result<Option<String>> {
        let keys = self.lock()?;
        Ok(keys
            .get(&Self::normalize(path))
            .and_then(|values| values.get(&name.to_ascii_lowercase()).cloned()))
    }

    fn delete_value(&self, path: &str, name: &str) -> std::io::Result<()> {
        let mut keys = self.lock()?;
        if let Some(values) = keys.get_mut(&Self::normalize(path)) {
            values.remove(&name.to_ascii_lowercase());
        }
        Ok(())
    }

    fn delete_tree(&self, path: &str) -> std::io::Result<()> {
        let normalized = Self::normalize(path);
        let prefix = format!("{}\\", normalized);
        self.lock()?
            .retain(|key, _| key != &normalized && !key.starts_with(&prefix));
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    /// Hive that fails every write to a key containing `fail_on`.
    struct FailingHive {
        inner: MemoryHive,
        fail_on: &'static str,
    }

    impl RegistryHive for FailingHive {
        fn key_exists(&self, path: &str) -> std::io::Result<bool> {
            self.inner.key_exists(path)
        }

        fn create_key(&self, path: &str) -> std::io::Result<()> {
            self.inner.create_key(path)
        }

        fn set_string(&self, path: &str, name: &str, value: &str) -> std::io::Result<()> {
            if path.contains(self.fail_on) {
                return Err(std::io::Error::from(std::io::ErrorKind::PermissionDenied));
            }
            self.inner.set_string(path, name, value)
        }

        fn get_string(&self, path: &str, name: &str) -> std::io::Result<Option<String>> {
            self.inner.get_string(path, name)
        }

        fn delete_value(&self, path: &str, name: &str) -> std::io::Result<()> {
            self.inner.delete_value(path, name)
        }

        fn delete_tree(&self, path: &str) -> std::io::Result<()> {
            self.inner.delete_tree(path)
        }
    }

    #[test]
    fn test_registry_layout() {
        let store = RegistryStore::new(MemoryHive::new());
        let association = Association::new("myapp", r"C:\Apps\My App\app.exe").unwrap();
        store.write(&association).unwrap();

        let hive = store.hive();
        assert_eq!(
            hive.get_string(r"Software\Classes\myapp", "").unwrap().as_deref(),
            Some("URL:myapp")
        );
        assert_eq!(
            hive.get_string(r"Software\Classes\myapp", "URL Protocol")
                .unwrap()
                .as_deref(),
            Some("")
        );
        assert_eq!(
            hive.get_string(r"Software\Classes\myapp\DefaultIcon", "")
                .unwrap()
                .as_deref(),
            Some(r"C:\Apps\My App\app.exe,0")
        );
        assert_eq!(
            hive.get_string(r"SOFTWARE\Classes\MyApp\shell\open\command", "")
                .unwrap()
                .as_deref(),
            Some(r#""C:\Apps\My App\app.exe" "%1""#)
        );
    }

    #[test]
    fn test_failed_first_write_leaves_nothing() {
        let store = RegistryStore::new(FailingHive {
            inner: MemoryHive::new(),
            fail_on: "command",
        });
        let association = Association::new("myapp", r"C:\app.exe").unwrap();

        let err = store.write(&association).unwrap_err();
        assert!(err.is_registration_error());
        assert!(store.read("myapp").unwrap().is_none());
        assert!(!store.hive().key_exists(r"Software\Classes\myapp").unwrap());
    }

    #[test]
    fn test_failed_overwrite_restores_previous_values() {
        let inner = MemoryHive::new();
        let original = Association::new("myapp", r"C:\old\app.exe").unwrap();
        RegistryStore::new(&inner).write(&original).unwrap();
        let before = RegistryStore::new(&inner).read("myapp").unwrap();
        assert!(before.is_some());

        let store = RegistryStore::new(FailingHive {
            inner,
            fail_on: "command",
        });
        let updated = Association::new("myapp", r"C:\new\app.exe").unwrap();
        assert!(store.write(&updated).is_err());

        assert_eq!(store.read("myapp").unwrap(), before);
    }

    #[test]
    fn test_memory_hive_delete_tree_is_scoped() {
        let hive = MemoryHive::new();
        hive.create_key(r"Software\Classes\myapp\shell\open\command").unwrap();
        hive.create_key(r"Software\Classes\myapp2").unwrap();

        hive.delete_tree(r"Software\Classes\myapp").unwrap();

        assert!(!hive.key_exists(r"Software\Classes\myapp\shell").unwrap());
        assert!(hive.key_exists(r"Software\Classes\myapp2").unwrap());
        assert!(hive.key_exists(r"Software\Classes").unwrap());
    }
}
