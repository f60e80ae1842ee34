//! Scheme registration: the OS association `scheme -> invocation command`.
//!
//! An [`Association`] describes what should be persisted; an
//! [`AssociationStore`] knows how a particular OS persists it:
//! - **Windows**: `HKCU\Software\Classes\<scheme>` via [`RegistryStore`]
//! - **Linux**: an XDG desktop entry with `x-scheme-handler/<scheme>` via
//!   [`DesktopEntryStore`]
//!
//! Writes are all-or-nothing. A store that fails halfway restores what was
//! there before and reports [`DeeplinkError::Registration`].

pub mod desktop_entry;
pub mod registry;
#[cfg(windows)]
pub mod windows;

pub use desktop_entry::DesktopEntryStore;
pub use registry::{MemoryHive, RegistryHive, RegistryStore};
#[cfg(windows)]
pub use windows::WindowsHive;

use crate::config::validate_scheme;
use crate::{DeeplinkError, Result};
use serde::Serialize;
use std::path::{Path, PathBuf};
use tracing::{debug, info};

/// Placeholder the Windows shell replaces with the activating URI.
pub const WINDOWS_URI_PLACEHOLDER: &str = "%1";

/// What gets persisted for one scheme.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Association {
    scheme: String,
    executable: PathBuf,
    icon: Option<PathBuf>,
    launch_args: Vec<String>,
}

impl Association {
    /// Create an association for `scheme` handled by `executable`.
    pub fn new(scheme: impl Into<String>, executable: impl Into<PathBuf>) -> Result<Self> {
        let scheme = scheme.into();
        validate_scheme(&scheme)?;

        let executable = executable.into();
        if executable.as_os_str().is_empty() {
            return Err(DeeplinkError::Config {
                message: "executable path is empty".to_string(),
            });
        }

        Ok(Self {
            scheme,
            executable,
            icon: None,
            launch_args: Vec::new(),
        })
    }

    /// Use a different file than the executable for the icon reference.
    pub fn with_icon(mut self, icon: impl Into<PathBuf>) -> Self {
        self.icon = Some(icon.into());
        self
    }

    /// Arguments placed between the executable and the URI placeholder.
    ///
    /// The OS-launched process must agree with the running primary on port
    /// and wire format, so any non-default settings travel here.
    pub fn with_launch_args<I, A>(mut self, args: I) -> Self
    where
        I: IntoIterator<Item = A>,
        A: Into<String>,
    {
        self.launch_args = args.into_iter().map(Into::into).collect();
        self
    }

    pub fn scheme(&self) -> &str {
        &self.scheme
    }

    pub fn executable(&self) -> &Path {
        &self.executable
    }

    pub fn icon(&self) -> Option<&Path> {
        self.icon.as_deref()
    }

    pub fn launch_args(&self) -> &[String] {
        &self.launch_args
    }

    /// Display / content-type marker, `URL:<scheme>`.
    pub fn display_name(&self) -> String {
        format!("URL:{}", self.scheme)
    }

    /// Icon resource reference, `<path>,0`.
    pub fn icon_reference(&self) -> String {
        let path = self.icon.as_deref().unwrap_or(&self.executable);
        format!("{},0", path.display())
    }

    /// Open command with the Windows `"%1"` placeholder.
    pub fn open_command(&self) -> String {
        self.open_command_with(&format!("\"{}\"", WINDOWS_URI_PLACEHOLDER))
    }

    /// Quoted executable, launch arguments, then a store-specific URI
    /// placeholder.
    pub fn open_command_with(&self, placeholder: &str) -> String {
        let mut command = format!("\"{}\"", self.executable.display());
        for arg in &self.launch_args {
            command.push(' ');
            command.push_str(&quote_windows_arg(arg));
        }
        command.push(' ');
        command.push_str(placeholder);
        command
    }
}

/// Quote an argument for a Windows command line when it needs it.
fn quote_windows_arg(arg: &str) -> String {
    if !arg.is_empty() && !arg.contains(|c: char| c.is_whitespace() || c == '"') {
        return arg.to_string();
    }
    format!("\"{}\"", arg.replace('"', "\\\""))
}

/// An association as read back from a store.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct AssociationRecord {
    pub scheme: String,
    pub display_name: Option<String>,
    /// Whether the store marks the entry as a URL protocol handler.
    pub protocol_marker: bool,
    pub icon: Option<String>,
    pub command: Option<String>,
}

/// Persistence backend for associations.
pub trait AssociationStore: Send + Sync {
    /// Create or overwrite the association. Must not leave a partial entry.
    fn write(&self, association: &Association) -> Result<()>;

    /// Read the association for `scheme`, if any.
    fn read(&self, scheme: &str) -> Result<Option<AssociationRecord>>;

    /// Delete the association. Returns `NotFound` when there is none.
    fn remove(&self, scheme: &str) -> Result<()>;

    /// The command this store would persist for `association`.
    fn expected_command(&self, association: &Association) -> String {
        association.open_command()
    }

    /// Human-readable location of the entry for `scheme`.
    fn location(&self, scheme: &str) -> String;
}

impl<S: AssociationStore + ?Sized> AssociationStore for Box<S> {
    fn write(&self, association: &Association) -> Result<()> {
        (**self).write(association)
    }

    fn read(&self, scheme: &str) -> Result<Option<AssociationRecord>> {
        (**self).read(scheme)
    }

    fn remove(&self, scheme: &str) -> Result<()> {
        (**self).remove(scheme)
    }

    fn expected_command(&self, association: &Association) -> String {
        (**self).expected_command(association)
    }

    fn location(&self, scheme: &str) -> String {
        (**self).location(scheme)
    }
}

/// Registers and unregisters schemes against an [`AssociationStore`].
pub struct SchemeRegistrar<S> {
    store: S,
}

impl<S: AssociationStore> SchemeRegistrar<S> {
    pub fn new(store: S) -> Self {
        Self { store }
    }

    pub fn store(&self) -> &S {
        &self.store
    }

    /// Associate `scheme` with `executable`, overwriting any existing entry.
    pub fn register(&self, scheme: &str, executable: impl Into<PathBuf>) -> Result<Association> {
        let association = Association::new(scheme, executable)?;
        self.register_association(&association)?;
        Ok(association)
    }

    /// Associate `scheme` with the running executable.
    pub fn register_current_exe(&self, scheme: &str) -> Result<Association> {
        let exe = crate::platform::current_executable()?;
        self.register(scheme, exe)
    }

    /// Persist a prepared association.
    pub fn register_association(&self, association: &Association) -> Result<()> {
        self.store.write(association)?;
        info!(
            "Registered {}:// -> {} at {}",
            association.scheme(),
            association.executable().display(),
            self.store.location(association.scheme())
        );
        Ok(())
    }

    /// Remove the association for `scheme`.
    pub fn unregister(&self, scheme: &str) -> Result<()> {
        validate_scheme(scheme)?;
        self.store.remove(scheme)?;
        info!("Unregistered {}://", scheme);
        Ok(())
    }

    /// Read the current association for `scheme`.
    pub fn lookup(&self, scheme: &str) -> Result<Option<AssociationRecord>> {
        validate_scheme(scheme)?;
        self.store.read(scheme)
    }

    /// Whether the stored association launches `association`'s executable.
    pub fn is_registered_to(&self, association: &Association) -> Result<bool> {
        let Some(record) = self.store.read(association.scheme())? else {
            debug!("{}:// is not registered", association.scheme());
            return Ok(false);
        };
        let expected = self.store.expected_command(association);
        Ok(record.protocol_marker && record.command.as_deref() == Some(expected.as_str()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_association_strings() {
        let association = Association::new("myapp", "C:\\Program Files\\My App\\app.exe").unwrap();

        assert_eq!(association.display_name(), "URL:myapp");
        assert_eq!(
            association.icon_reference(),
            "C:\\Program Files\\My App\\app.exe,0"
        );
        assert_eq!(
            association.open_command(),
            "\"C:\\Program Files\\My App\\app.exe\" \"%1\""
        );
    }

    #[test]
    fn test_open_command_carries_launch_args() {
        let association = Association::new("myapp", "C:\\My App\\app.exe")
            .unwrap()
            .with_launch_args(["--port", "4000", "--raw", "two words"]);

        assert_eq!(association.launch_args().len(), 4);
        assert_eq!(
            association.open_command(),
            "\"C:\\My App\\app.exe\" --port 4000 --raw \"two words\" \"%1\""
        );
    }

    #[test]
    fn test_launch_args_change_registration_match() {
        let registrar = SchemeRegistrar::new(RegistryStore::new(MemoryHive::new()));
        let plain = Association::new("myapp", "/opt/app/bin/app").unwrap();
        let with_port = plain.clone().with_launch_args(["--port", "4000"]);
        registrar.register_association(&with_port).unwrap();

        assert!(registrar.is_registered_to(&with_port).unwrap());
        assert!(!registrar.is_registered_to(&plain).unwrap());
    }

    #[test]
    fn test_register_current_exe() {
        let registrar = SchemeRegistrar::new(RegistryStore::new(MemoryHive::new()));
        let association = registrar.register_current_exe("myapp").unwrap();

        assert!(association.executable().is_absolute());
        assert!(association.launch_args().is_empty());
        assert!(registrar.is_registered_to(&association).unwrap());
    }

    #[test]
    fn test_association_with_icon() {
        let association = Association::new("myapp", "/opt/app/bin/app")
            .unwrap()
            .with_icon("/opt/app/share/app.png");
        assert_eq!(association.icon_reference(), "/opt/app/share/app.png,0");
    }

    #[test]
    fn test_association_rejects_bad_input() {
        assert!(Association::new("myapp://", "/bin/app").is_err());
        assert!(Association::new("myapp", "").is_err());
    }

    #[test]
    fn test_record_json_field_names() {
        let registrar = SchemeRegistrar::new(RegistryStore::new(MemoryHive::new()));
        registrar.register("myapp", "/opt/app/bin/app").unwrap();
        let record = registrar.lookup("myapp").unwrap().unwrap();

        let json = serde_json::to_value(&record).unwrap();
        assert_eq!(json["scheme"], "myapp");
        assert_eq!(json["display_name"], "URL:myapp");
        assert_eq!(json["protocol_marker"], true);
        assert_eq!(json["command"], "\"/opt/app/bin/app\" \"%1\"");
    }

    #[test]
    fn test_registrar_is_registered_to() {
        let registrar = SchemeRegistrar::new(RegistryStore::new(MemoryHive::new()));
        let association = registrar.register("myapp", "/opt/app/bin/app").unwrap();
        assert!(registrar.is_registered_to(&association).unwrap());

        let other = Association::new("myapp", "/opt/other/bin/app").unwrap();
        assert!(!registrar.is_registered_to(&other).unwrap());

        registrar.unregister("myapp").unwrap();
        assert!(!registrar.is_registered_to(&association).unwrap());
    }
}
