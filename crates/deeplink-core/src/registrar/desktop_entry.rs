//! XDG desktop entry store for URL scheme handlers.
//!
//! Linux desktops route `<scheme>://` links to the application whose desktop
//! entry lists `x-scheme-handler/<scheme>` in its `MimeType` key. The entry
//! is written atomically (temp file + rename) so a failed write leaves the
//! previous file untouched.

use super::{Association, AssociationRecord, AssociationStore};
use crate::{DeeplinkError, Result};
use std::fmt;
use std::fs;
use std::io::Write;
use std::path::{Path, PathBuf};
use std::process::Command;
use tracing::{debug, warn};

/// Field code the desktop replaces with the activating URI.
pub const XDG_URI_PLACEHOLDER: &str = "%u";

const GROUP_HEADER: &str = "[Desktop Entry]";

/// Characters that force an `Exec` argument into quotes.
const EXEC_RESERVED: &str = " \t\n\"'\\><~|&;$*?#()`";

/// A desktop entry representation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DesktopEntry {
    /// Entry name.
    pub name: String,
    /// Executable command line, already quoted.
    pub exec: String,
    /// Icon name or path.
    pub icon: Option<String>,
    /// Whether to run in a terminal.
    pub terminal: bool,
    /// Hidden from application menus.
    pub no_display: bool,
    /// MIME types handled, e.g. `x-scheme-handler/myapp`.
    pub mime_types: Vec<String>,
}

impl DesktopEntry {
    /// Create a new desktop entry builder.
    pub fn builder() -> DesktopEntryBuilder {
        DesktopEntryBuilder::new()
    }

    /// Parse the `[Desktop Entry]` group of a desktop file.
    ///
    /// Keys outside the group, comments and localized keys are ignored.
    pub fn parse(content: &str) -> Option<Self> {
        let mut in_group = false;
        let mut seen_group = false;
        let mut entry = DesktopEntry {
            name: String::new(),
            exec: String::new(),
            icon: None,
            terminal: false,
            no_display: false,
            mime_types: Vec::new(),
        };

        for line in content.lines() {
            let line = line.trim();
            if line.is_empty() || line.starts_with('#') {
                continue;
            }
            if line.starts_with('[') {
                in_group = line == GROUP_HEADER;
                seen_group |= in_group;
                continue;
            }
            if !in_group {
                continue;
            }
            let Some((key, value)) = line.split_once('=') else {
                continue;
            };
            let value = unescape_value(value.trim());
            match key.trim() {
                "Name" => entry.name = value,
                "Exec" => entry.exec = value,
                "Icon" => entry.icon = Some(value),
                "Terminal" => entry.terminal = value == "true",
                "NoDisplay" => entry.no_display = value == "true",
                "MimeType" => {
                    entry.mime_types = value
                        .split(';')
                        .filter(|s| !s.is_empty())
                        .map(str::to_string)
                        .collect();
                }
                _ => {}
            }
        }

        seen_group.then_some(entry)
    }

    /// Write the desktop entry to `path` atomically.
    pub fn write_to_file(&self, path: &Path) -> Result<()> {
        let parent = path.parent().ok_or_else(|| DeeplinkError::Io {
            message: "desktop file has no parent directory".to_string(),
            path: Some(path.to_path_buf()),
            source: None,
        })?;
        fs::create_dir_all(parent).map_err(|e| DeeplinkError::io_with_path(e, parent))?;

        let mut temp = tempfile::NamedTempFile::new_in(parent)
            .map_err(|e| DeeplinkError::io_with_path(e, parent))?;
        temp.write_all(self.to_string().as_bytes())
            .and_then(|_| temp.as_file().sync_all())
            .map_err(|e| DeeplinkError::io_with_path(e, temp.path()))?;
        temp.persist(path)
            .map_err(|e| DeeplinkError::io_with_path(e.error, path))?;

        debug!("Wrote desktop entry to {:?}", path);
        Ok(())
    }
}

impl fmt::Display for DesktopEntry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(f, "{}", GROUP_HEADER)?;
        writeln!(f, "Type=Application")?;
        writeln!(f, "Name={}", escape_value(&self.name))?;
        writeln!(f, "Exec={}", escape_value(&self.exec))?;
        if let Some(ref icon) = self.icon {
            writeln!(f, "Icon={}", escape_value(icon))?;
        }
        writeln!(f, "Terminal={}", self.terminal)?;
        if self.no_display {
            writeln!(f, "NoDisplay=true")?;
        }
        if !self.mime_types.is_empty() {
            writeln!(f, "MimeType={};", self.mime_types.join(";"))?;
        }
        Ok(())
    }
}

/// Builder for desktop entries.
pub struct DesktopEntryBuilder {
    entry: DesktopEntry,
}

impl DesktopEntryBuilder {
    pub fn new() -> Self {
        Self {
            entry: DesktopEntry {
                name: String::new(),
                exec: String::new(),
                icon: None,
                terminal: false,
                no_display: false,
                mime_types: Vec::new(),
            },
        }
    }

    pub fn name(mut self, name: impl Into<String>) -> Self {
        self.entry.name = name.into();
        self
    }

    pub fn exec(mut self, exec: impl Into<String>) -> Self {
        self.entry.exec = exec.into();
        self
    }

    pub fn icon(mut self, icon: impl Into<String>) -> Self {
        self.entry.icon = Some(icon.into());
        self
    }

    pub fn no_display(mut self, no_display: bool) -> Self {
        self.entry.no_display = no_display;
        self
    }

    pub fn mime_type(mut self, mime_type: impl Into<String>) -> Self {
        self.entry.mime_types.push(mime_type.into());
        self
    }

    pub fn build(self) -> DesktopEntry {
        self.entry
    }
}

impl Default for DesktopEntryBuilder {
    fn default() -> Self {
        Self::new()
    }
}

/// [`AssociationStore`] writing one desktop entry per scheme.
#[derive(Debug, Clone)]
pub struct DesktopEntryStore {
    dir: PathBuf,
    refresh_mime_defaults: bool,
}

impl DesktopEntryStore {
    /// Store under an explicit applications directory. Does not touch the
    /// user's MIME defaults.
    pub fn at(dir: impl Into<PathBuf>) -> Self {
        Self {
            dir: dir.into(),
            refresh_mime_defaults: false,
        }
    }

    /// Store under the user's applications directory, making each written
    /// entry the default handler via `xdg-mime`.
    pub fn user_default() -> Result<Self> {
        Ok(Self {
            dir: crate::platform::applications_dir()?,
            refresh_mime_defaults: true,
        })
    }

    pub fn with_mime_refresh(mut self, refresh: bool) -> Self {
        self.refresh_mime_defaults = refresh;
        self
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    /// Path of the desktop file for `scheme`.
    pub fn entry_path(&self, scheme: &str) -> PathBuf {
        self.dir.join(Self::file_name(scheme))
    }

    fn file_name(scheme: &str) -> String {
        format!("{}-url-handler.desktop", scheme.to_ascii_lowercase())
    }

    fn mime_type(scheme: &str) -> String {
        format!("x-scheme-handler/{}", scheme.to_ascii_lowercase())
    }

    fn set_default_handler(&self, scheme: &str) {
        if !crate::platform::command_exists("xdg-mime") {
            debug!("xdg-mime not found, leaving MIME defaults untouched");
            return;
        }

        let result = Command::new("xdg-mime")
            .args(["default", &Self::file_name(scheme), &Self::mime_type(scheme)])
            .output();

        match result {
            Ok(output) if output.status.success() => {
                debug!("xdg-mime now routes {} to {}", Self::mime_type(scheme), Self::file_name(scheme));
            }
            Ok(output) => warn!(
                "xdg-mime could not set the default handler for {}: {}",
                scheme,
                String::from_utf8_lossy(&output.stderr).trim()
            ),
            Err(e) => warn!("Failed to run xdg-mime for {}: {}", scheme, e),
        }
    }
}

impl AssociationStore for DesktopEntryStore {
    fn write(&self, association: &Association) -> Result<()> {
        let scheme = association.scheme();
        let icon = association
            .icon()
            .unwrap_or(association.executable())
            .display()
            .to_string();

        let entry = DesktopEntry::builder()
            .name(association.display_name())
            .exec(self.expected_command(association))
            .icon(icon)
            .no_display(true)
            .mime_type(Self::mime_type(scheme))
            .build();

        let path = self.entry_path(scheme);
        entry.write_to_file(&path).map_err(|e| match e {
            DeeplinkError::Io {
                source: Some(source),
                ..
            } => DeeplinkError::registration(
                scheme,
                format!("failed to write {}", path.display()),
                source,
            ),
            other => other,
        })?;

        if self.refresh_mime_defaults {
            self.set_default_handler(scheme);
        }
        Ok(())
    }

    fn read(&self, scheme: &str) -> Result<Option<AssociationRecord>> {
        let path = self.entry_path(scheme);
        let content = match fs::read_to_string(&path) {
            Ok(content) => content,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(None),
            Err(e) => {
                return Err(DeeplinkError::registration(
                    scheme,
                    format!("failed to read {}", path.display()),
                    e,
                ))
            }
        };

        let Some(entry) = DesktopEntry::parse(&content) else {
            warn!("{} is not a desktop entry", path.display());
            return Ok(None);
        };

        let mime_type = Self::mime_type(scheme);
        Ok(Some(AssociationRecord {
            scheme: scheme.to_string(),
            display_name: Some(entry.name).filter(|name| !name.is_empty()),
            protocol_marker: entry.mime_types.iter().any(|m| *m == mime_type),
            icon: entry.icon,
            command: Some(entry.exec).filter(|exec| !exec.is_empty()),
        }))
    }

    fn remove(&self, scheme: &str) -> Result<()> {
        let path = self.entry_path(scheme);
        match fs::remove_file(&path) {
            Ok(()) => {
                debug!("Removed desktop entry {:?}", path);
                Ok(())
            }
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Err(DeeplinkError::NotFound {
                scheme: scheme.to_string(),
            }),
            Err(e) => Err(DeeplinkError::registration(
                scheme,
                format!("failed to remove {}", path.display()),
                e,
            )),
        }
    }

    fn expected_command(&self, association: &Association) -> String {
        let mut exec = quote_exec_arg(&association.executable().display().to_string());
        for arg in association.launch_args() {
            exec.push(' ');
            if arg.is_empty() || arg.contains(|c: char| EXEC_RESERVED.contains(c)) {
                exec.push_str(&quote_exec_arg(arg));
            } else {
                exec.push_str(arg);
            }
        }
        exec.push(' ');
        exec.push_str(XDG_URI_PLACEHOLDER);
        exec
    }

    fn location(&self, scheme: &str) -> String {
        self.entry_path(scheme).display().to_string()
    }
}

/// Quote one `Exec` argument using freedesktop.org quoting rules.
fn quote_exec_arg(arg: &str) -> String {
    let mut quoted = String::with_capacity(arg.len() + 2);
    quoted.push('"');
    for c in arg.chars() {
        if matches!(c, '"' | '`' | '$' | '\\') {
            quoted.push('\\');
        }
        quoted.push(c);
    }
    quoted.push('"');
    quoted
}

/// Escape a value of the freedesktop.org `string` type.
fn escape_value(value: &str) -> String {
    let mut escaped = String::with_capacity(value.len());
    for c in value.chars() {
        match c {
            '\\' => escaped.push_str("\\\\"),
            '\n' => escaped.push_str("\\n"),
            '\t' => escaped.push_str("\\t"),
            '\r' => escaped.push_str("\\r"),
            _ => escaped.push(c),
        }
    }
    escaped
}

fn unescape_value(value: &str) -> String {
    let mut unescaped = String::with_capacity(value.len());
    let mut chars = value.chars();
    while let Some(c) = chars.next() {
        if c != '\\' {
            unescaped.push(c);
            continue;
        }
        match chars.next() {
            Some('s') => unescaped.push(' '),
            Some('n') => unescaped.push('\n'),
            Some('t') => unescaped.push('\t'),
            Some('r') => unescaped.push('\r'),
            Some('\\') => unescaped.push('\\'),
            Some(other) => {
                unescaped.push('\\');
                unescaped.push(other);
            }
            None => unescaped.push('\\'),
        }
    }
    unescaped
}
