//! Registry hive backed by the Win32 registry API.
//!
//! All paths are relative to `HKEY_CURRENT_USER`, so registering a scheme
//! never needs elevation.

#![allow(unsafe_code)]

use super::RegistryHive;
use std::io;
use std::ptr;
use windows_sys::Win32::Foundation::{ERROR_FILE_NOT_FOUND, ERROR_SUCCESS, WIN32_ERROR};
use windows_sys::Win32::System::Registry::{
    RegCloseKey, RegCreateKeyExW, RegDeleteTreeW, RegDeleteValueW, RegOpenKeyExW,
    RegQueryValueExW, RegSetValueExW, HKEY, HKEY_CURRENT_USER, KEY_READ, KEY_WRITE,
    REG_OPTION_NON_VOLATILE, REG_SAM_FLAGS, REG_SZ,
};

/// [`RegistryHive`] for the current user's registry.
#[derive(Debug, Default, Clone, Copy)]
pub struct WindowsHive;

impl WindowsHive {
    pub fn new() -> Self {
        Self
    }
}

/// An open registry key, closed on drop.
struct OwnedKey(HKEY);

impl Drop for OwnedKey {
    fn drop(&mut self) {
        // SAFETY: the handle came from a successful RegOpenKeyExW/RegCreateKeyExW
        // and is closed exactly once.
        unsafe {
            RegCloseKey(self.0);
        }
    }
}

fn to_wide(value: &str) -> Vec<u16> {
    value.encode_utf16().chain(std::iter::once(0)).collect()
}

fn check(status: WIN32_ERROR) -> io::Result<()> {
    if status == ERROR_SUCCESS {
        Ok(())
    } else {
        Err(io::Error::from_raw_os_error(status as i32))
    }
}

fn open_key(path: &str, access: REG_SAM_FLAGS) -> io::Result<Option<OwnedKey>> {
    let wide = to_wide(path);
    let mut key: HKEY = ptr::null_mut();
    // SAFETY: `wide` is NUL-terminated and outlives the call; `key` is a valid out pointer.
    let status = unsafe { RegOpenKeyExW(HKEY_CURRENT_USER, wide.as_ptr(), 0, access, &mut key) };
    if status == ERROR_FILE_NOT_FOUND {
        return Ok(None);
    }
    check(status)?;
    Ok(Some(OwnedKey(key)))
}

fn create_key(path: &str) -> io::Result<OwnedKey> {
    let wide = to_wide(path);
    let mut key: HKEY = ptr::null_mut();
    // SAFETY: pointers are valid for the duration of the call; optional
    // class, security attributes and disposition are passed as null.
    let status = unsafe {
        RegCreateKeyExW(
            HKEY_CURRENT_USER,
            wide.as_ptr(),
            0,
            ptr::null(),
            REG_OPTION_NON_VOLATILE,
            KEY_READ | KEY_WRITE,
            ptr::null(),
            &mut key,
            ptr::null_mut(),
        )
    };
    check(status)?;
    Ok(OwnedKey(key))
}

impl RegistryHive for WindowsHive {
    fn key_exists(&self, path: &str) -> io::Result<bool> {
        Ok(open_key(path, KEY_READ)?.is_some())
    }

    fn create_key(&self, path: &str) -> io::Result<()> {
        create_key(path).map(|_| ())
    }

    fn set_string(&self, path: &str, name: &str, value: &str) -> io::Result<()> {
        let key = open_key(path, KEY_WRITE)?
            .ok_or_else(|| io::Error::new(io::ErrorKind::NotFound, format!("key {} not found", path)))?;
        let name = to_wide(name);
        let data = to_wide(value);
        let byte_len = u32::try_from(data.len() * std::mem::size_of::<u16>())
            .map_err(|_| io::Error::new(io::ErrorKind::InvalidInput, "registry value too large"))?;

        // SAFETY: `data` holds `byte_len` bytes of NUL-terminated UTF-16 as REG_SZ requires.
        let status = unsafe {
            RegSetValueExW(
                key.0,
                name.as_ptr(),
                0,
                REG_SZ,
                data.as_ptr().cast::<u8>(),
                byte_len,
            )
        };
        check(status)
    }

    fn get_string(&self, path: &str, name: &str) -> io::Result<Option<String>> {
        let Some(key) = open_key(path, KEY_READ)? else {
            return Ok(None);
        };
        let name = to_wide(name);

        let mut byte_len: u32 = 0;
        // SAFETY: size query with a null data pointer.
        let status = unsafe {
            RegQueryValueExW(
                key.0,
                name.as_ptr(),
                ptr::null(),
                ptr::null_mut(),
                ptr::null_mut(),
                &mut byte_len,
            )
        };
        if status == ERROR_FILE_NOT_FOUND {
            return Ok(None);
        }
        check(status)?;

        let mut buf = vec![0u16; (byte_len as usize).div_ceil(2)];
        let mut value_type = 0;
        // SAFETY: `buf` provides at least `byte_len` writable bytes.
        let status = unsafe {
            RegQueryValueExW(
                key.0,
                name.as_ptr(),
                ptr::null(),
                &mut value_type,
                buf.as_mut_ptr().cast::<u8>(),
                &mut byte_len,
            )
        };
        check(status)?;
        if value_type != REG_SZ {
            return Err(io::Error::new(
                io::ErrorKind::InvalidData,
                "registry value is not a string",
            ));
        }

        buf.truncate(byte_len as usize / 2);
        while buf.last() == Some(&0) {
            buf.pop();
        }
        String::from_utf16(&buf)
            .map(Some)
            .map_err(|e| io::Error::new(io::ErrorKind::InvalidData, e))
    }

    fn delete_value(&self, path: &str, name: &str) -> io::Result<()> {
        let Some(key) = open_key(path, KEY_WRITE)? else {
            return Ok(());
        };
        let name = to_wide(name);
        // SAFETY: `name` is NUL-terminated and outlives the call.
        let status = unsafe { RegDeleteValueW(key.0, name.as_ptr()) };
        if status == ERROR_FILE_NOT_FOUND {
            return Ok(());
        }
        check(status)
    }

    fn delete_tree(&self, path: &str) -> io::Result<()> {
        let wide = to_wide(path);
        // SAFETY: `wide` is NUL-terminated and outlives the call.
        let status = unsafe { RegDeleteTreeW(HKEY_CURRENT_USER, wide.as_ptr()) };
        if status == ERROR_FILE_NOT_FOUND {
            return Ok(());
        }
        check(status)
    }
}
