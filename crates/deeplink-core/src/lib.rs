//! Deeplink Core - custom URI scheme registration and single-instance handoff.
//!
//! This crate lets an application own a URL scheme (`myapp://...`) and be
//! launched by the OS whenever such a link is opened, while only one copy of
//! the application ever handles links:
//!
//! - [`SchemeRegistrar`] persists the OS association `scheme -> command`
//!   (per-user registry on Windows, XDG desktop entry on Linux).
//! - [`InstanceCoordinator`] decides at startup whether this process is the
//!   **primary** (it claimed the loopback port) or a **secondary** (it
//!   forwards its link to the primary and lets its embedder exit).
//!
//! # Example
//!
//! ```rust,ignore
//! use deeplink_core::{invocation_payload, InstanceCoordinator, LinkConfig, Startup};
//!
//! #[tokio::main]
//! async fn main() -> deeplink_core::Result<()> {
//!     let config = LinkConfig::for_scheme("myapp")
//!         .handler(|link| println!("opened: {}", link))
//!         .build()?;
//!
//!     let payload = invocation_payload(std::env::args()).unwrap_or_default();
//!     match InstanceCoordinator::new(config).start(&payload).await? {
//!         Startup::Primary(handle) => {
//!             // Run the application; links keep arriving at the handler.
//!             tokio::signal::ctrl_c().await?;
//!             handle.stop().await;
//!         }
//!         Startup::Forwarded => {}
//!     }
//!     Ok(())
//! }
//! ```

pub mod cancel;
pub mod config;
pub mod coordinator;
pub mod error;
pub mod platform;
pub mod registrar;

// Re-export commonly used types
pub use cancel::CancellationToken;
pub use config::{
    validate_scheme, CoordinatorConfig, LinkConfig, LinkConfigBuilder, MessageHandler, WireFormat,
};
pub use coordinator::{
    forward, invocation_payload, InstanceCoordinator, InstanceRole, PrimaryHandle, Startup,
};
pub use error::{DeeplinkError, Result};
pub use registrar::{Association, AssociationRecord, AssociationStore, SchemeRegistrar};

/// Scheme of a URI, if it has one (`myapp://x` -> `myapp`).
///
/// Only returns a syntactically valid scheme, so Windows drive paths like
/// `C:\foo` yield `None`.
pub fn scheme_of(link: &str) -> Option<&str> {
    let (scheme, _) = link.split_once(':')?;
    // A single letter is a drive letter, not a scheme.
    if scheme.len() < 2 || validate_scheme(scheme).is_err() {
        return None;
    }
    Some(scheme)
}
