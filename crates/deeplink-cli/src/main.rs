//! Deeplink - custom URL scheme handler with single-instance handoff.
//!
//! Registered as the handler for a scheme, the OS launches this binary with
//! the link as its last argument. The first invocation becomes the primary
//! and prints every link it receives; later invocations forward their link
//! to it and exit.

mod commands;

use clap::{Parser, Subcommand};
use deeplink_core::{CoordinatorConfig, DeeplinkError, LinkConfig, WireFormat};
use std::path::PathBuf;
use std::process::ExitCode;
use tracing::error;
use tracing_subscriber::{EnvFilter, FmtSubscriber};

#[derive(Parser, Debug)]
#[command(name = "deeplink")]
#[command(about = "Custom URL scheme handler with single-instance link forwarding")]
struct Args {
    /// URL scheme to handle (defaults to the link's scheme, then "deeplink")
    #[arg(long, global = true)]
    scheme: Option<String>,

    /// Coordination port (defaults to a port derived from the scheme)
    #[arg(short, long, global = true)]
    port: Option<u16>,

    /// Enable debug logging
    #[arg(short, long, global = true)]
    debug: bool,

    /// Use the unframed legacy wire format
    #[arg(long, global = true)]
    raw: bool,

    /// Do not register the scheme when becoming the primary instance
    #[arg(long)]
    no_register: bool,

    /// Link the OS launched us with
    uri: Option<String>,

    #[command(subcommand)]
    command: Option<Command>,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Register this executable (or --exe) as the scheme handler
    Register {
        /// Executable to register instead of the running one
        #[arg(long)]
        exe: Option<PathBuf>,

        /// Icon file (defaults to the executable)
        #[arg(long)]
        icon: Option<PathBuf>,
    },
    /// Remove the scheme association
    Unregister,
    /// Show the current association and whether a primary is listening
    Status {
        /// Print machine-readable JSON
        #[arg(long)]
        json: bool,
    },
    /// Forward a link to the running primary without ever becoming one
    Send {
        /// Link to forward
        uri: String,
    },
}

impl Args {
    /// Link whose scheme decides the defaults, if any.
    fn link(&self) -> Option<&str> {
        match &self.command {
            Some(Command::Send { uri }) => Some(uri),
            _ => self.uri.as_deref(),
        }
    }

    fn resolve_scheme(&self) -> String {
        self.scheme
            .clone()
            .or_else(|| {
                self.link()
                    .and_then(deeplink_core::scheme_of)
                    .map(str::to_ascii_lowercase)
            })
            .unwrap_or_else(|| CoordinatorConfig::DEFAULT_SCHEME.to_string())
    }

    fn link_config(&self) -> deeplink_core::Result<deeplink_core::LinkConfigBuilder> {
        let scheme = self.resolve_scheme();
        deeplink_core::validate_scheme(&scheme)?;

        let port = self.port.unwrap_or_else(|| LinkConfig::derived_port(&scheme));
        let wire_format = if self.raw {
            WireFormat::Raw
        } else {
            WireFormat::Framed
        };
        Ok(LinkConfig::builder(scheme, port).wire_format(wire_format))
    }
}

/// Log filter used when `RUST_LOG` is unset or invalid.
fn default_log_filter(debug: bool) -> &'static str {
    if debug {
        "debug"
    } else {
        "info"
    }
}

#[tokio::main]
async fn main() -> ExitCode {
    let args = Args::parse();

    // Logs go to stderr; stdout carries the received links.
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(default_log_filter(args.debug)));
    FmtSubscriber::builder()
        .with_env_filter(filter)
        .with_target(false)
        .with_thread_ids(false)
        .with_writer(std::io::stderr)
        .compact()
        .init();

    match run(args).await {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            error!("{:#}", e);
            ExitCode::from(exit_status(&e))
        }
    }
}

async fn run(args: Args) -> anyhow::Result<()> {
    let builder = args.link_config()?;

    match args.command {
        None => commands::serve_or_forward(builder, args.uri, !args.no_register).await,
        Some(Command::Send { uri }) => commands::send(builder, &uri).await,
        Some(Command::Register { exe, icon }) => commands::register(builder, exe, icon),
        Some(Command::Unregister) => commands::unregister(builder),
        Some(Command::Status { json }) => commands::status(builder, json).await,
    }
}

/// Exit status for a failed run, from the library error if there is one.
fn exit_status(err: &anyhow::Error) -> u8 {
    err.chain()
        .find_map(|cause| cause.downcast_ref::<DeeplinkError>())
        .map(DeeplinkError::exit_code)
        .and_then(|code| u8::try_from(code).ok())
        .unwrap_or(1)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn parse(argv: &[&str]) -> Args {
        Args::try_parse_from(argv).unwrap()
    }

    #[test]
    fn test_default_log_filter() {
        assert_eq!(default_log_filter(false), "info");
        assert_eq!(default_log_filter(true), "debug");
        assert!(EnvFilter::try_new(default_log_filter(true)).is_ok());
    }

    #[test]
    fn test_scheme_from_link() {
        let args = parse(&["deeplink", "MyApp://open/1"]);
        assert_eq!(args.resolve_scheme(), "myapp");

        let config = args.link_config().unwrap().build().unwrap();
        assert_eq!(config.port(), LinkConfig::derived_port("myapp"));
        assert_eq!(config.wire_format(), WireFormat::Framed);
    }

    #[test]
    fn test_explicit_scheme_and_port_win() {
        let args = parse(&["deeplink", "--scheme", "other", "--port", "4000", "--raw", "myapp://x"]);
        let config = args.link_config().unwrap().build().unwrap();
        assert_eq!(config.scheme(), "other");
        assert_eq!(config.port(), 4000);
        assert_eq!(config.wire_format(), WireFormat::Raw);
    }

    #[test]
    fn test_default_scheme_without_link() {
        let args = parse(&["deeplink"]);
        assert_eq!(args.resolve_scheme(), CoordinatorConfig::DEFAULT_SCHEME);
    }

    #[test]
    fn test_send_uses_its_uri_for_scheme() {
        let args = parse(&["deeplink", "send", "web+thing:abc", "--debug"]);
        assert_eq!(args.resolve_scheme(), "web+thing");
        assert!(args.debug);
    }

    #[test]
    fn test_invalid_scheme_is_usage_error() {
        let args = parse(&["deeplink", "--scheme", "bad scheme", "status"]);
        let Err(err) = args.link_config() else {
            panic!("scheme with a space must be rejected");
        };
        let err = anyhow::Error::from(err);
        assert_eq!(exit_status(&err), 64);
    }

    #[test]
    fn test_exit_status_through_context() {
        let err = anyhow::Error::from(DeeplinkError::NotFound {
            scheme: "myapp".into(),
        })
        .context("unregister failed");
        assert_eq!(exit_status(&err), 3);
        assert_eq!(exit_status(&anyhow::anyhow!("plain")), 1);
    }
}
