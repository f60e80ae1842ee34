//! Command handlers for the `deeplink` binary.

use anyhow::Context;
use deeplink_core::platform;
use deeplink_core::{
    forward, Association, AssociationRecord, InstanceCoordinator, LinkConfig, LinkConfigBuilder,
    SchemeRegistrar, Startup, WireFormat,
};
use serde::Serialize;
use std::net::{Ipv4Addr, SocketAddr};
use std::path::PathBuf;
use std::time::Duration;
use tokio::net::TcpStream;
use tracing::{info, warn};

/// How long `status` waits when checking for a primary.
const LISTEN_CHECK_TIMEOUT: Duration = Duration::from_millis(300);

/// Print one received link. Stdout is the output channel for embedders.
fn print_link(link: String) {
    println!("{}", link);
}

/// Flags an OS-launched invocation needs to reach a primary on `port` with
/// `wire_format`. Empty when both are the defaults for `scheme`.
fn launch_args(scheme: &str, port: u16, wire_format: WireFormat) -> Vec<String> {
    let mut args = Vec::new();
    if port != LinkConfig::derived_port(scheme) {
        args.push("--port".to_string());
        args.push(port.to_string());
    }
    if wire_format == WireFormat::Raw {
        args.push("--raw".to_string());
    }
    args
}

/// The association this binary should have for the given settings.
fn self_association(
    scheme: &str,
    port: u16,
    wire_format: WireFormat,
) -> deeplink_core::Result<Association> {
    let exe = platform::current_executable()?;
    Ok(Association::new(scheme, exe)?.with_launch_args(launch_args(scheme, port, wire_format)))
}

/// Default mode: become the primary and serve, or forward to it and return.
pub async fn serve_or_forward(
    builder: LinkConfigBuilder,
    uri: Option<String>,
    register: bool,
) -> anyhow::Result<()> {
    let config = builder.handler(print_link).build()?;
    let scheme = config.scheme().to_string();
    let wire_format = config.wire_format();
    let payload = uri.unwrap_or_default();

    if !payload.is_empty() && !config.matches_scheme(&payload) {
        warn!("Link {:?} does not use the {}:// scheme", payload, scheme);
    }

    let coordinator = InstanceCoordinator::new(config);
    let handle = match coordinator.start(&payload).await? {
        Startup::Forwarded => return Ok(()),
        Startup::Primary(handle) => handle,
    };

    // Intentional stdout so wrappers can find an ephemeral port.
    println!("PRIMARY_PORT={}", handle.local_addr().port());

    if register {
        // The bound port, so an ephemeral `--port 0` is registered as chosen.
        register_self(&scheme, handle.local_addr().port(), wire_format);
    }

    // The launching link is handled the same way as forwarded ones.
    if !payload.is_empty() {
        print_link(payload);
    }

    info!("Primary instance running, waiting for links (Ctrl-C to exit)");
    tokio::signal::ctrl_c()
        .await
        .context("failed to listen for the shutdown signal")?;
    info!("Shutdown signal received, exiting");

    handle.stop().await;
    Ok(())
}

/// Registration from the primary is best effort.
fn register_self(scheme: &str, port: u16, wire_format: WireFormat) {
    let result = self_association(scheme, port, wire_format).and_then(|association| {
        let registrar = SchemeRegistrar::new(platform::default_store()?);
        registrar.register_association(&association)
    });

    if let Err(e) = result {
        warn!("Could not register {}:// for this executable: {}", scheme, e);
    }
}

/// Forward `uri` to the running primary; fails if there is none.
pub async fn send(builder: LinkConfigBuilder, uri: &str) -> anyhow::Result<()> {
    let config = builder.build()?;
    let addr = SocketAddr::from((Ipv4Addr::LOCALHOST, config.port()));

    forward(addr, uri, &config)
        .await
        .with_context(|| format!("no primary instance reachable on {}", addr))?;
    Ok(())
}

pub fn register(
    builder: LinkConfigBuilder,
    exe: Option<PathBuf>,
    icon: Option<PathBuf>,
) -> anyhow::Result<()> {
    let config = builder.build()?;
    let exe = match exe {
        Some(exe) => exe,
        None => platform::current_executable()?,
    };

    let args = launch_args(config.scheme(), config.port(), config.wire_format());
    let mut association = Association::new(config.scheme(), exe)?.with_launch_args(args);
    if let Some(icon) = icon {
        association = association.with_icon(icon);
    }

    let registrar = SchemeRegistrar::new(platform::default_store()?);
    registrar.register_association(&association)?;
    println!(
        "Registered {}:// at {}",
        association.scheme(),
        registrar.store().location(association.scheme())
    );
    Ok(())
}

pub fn unregister(builder: LinkConfigBuilder) -> anyhow::Result<()> {
    let config = builder.build()?;
    let registrar = SchemeRegistrar::new(platform::default_store()?);

    registrar.unregister(config.scheme())?;
    println!("Unregistered {}://", config.scheme());
    Ok(())
}

/// Snapshot printed by `status`.
#[derive(Debug, Serialize)]
struct StatusReport {
    scheme: String,
    port: u16,
    platform: &'static str,
    location: Option<String>,
    association: Option<AssociationRecord>,
    registered_to_this_executable: bool,
    primary_listening: bool,
}

pub async fn status(builder: LinkConfigBuilder, json: bool) -> anyhow::Result<()> {
    let config = builder.build()?;
    let scheme = config.scheme().to_string();

    let mut report = StatusReport {
        scheme: scheme.clone(),
        port: config.port(),
        platform: platform::current_platform(),
        location: None,
        association: None,
        registered_to_this_executable: false,
        primary_listening: primary_is_listening(config.port()).await,
    };

    if platform::is_supported_platform() {
        let registrar = SchemeRegistrar::new(platform::default_store()?);
        report.location = Some(registrar.store().location(&scheme));
        report.association = registrar.lookup(&scheme)?;

        let association = self_association(&scheme, config.port(), config.wire_format())?;
        report.registered_to_this_executable = registrar.is_registered_to(&association)?;
    }

    if json {
        println!("{}", serde_json::to_string_pretty(&report)?);
        return Ok(());
    }

    println!("Scheme:      {}://", report.scheme);
    println!("Port:        {}", report.port);
    println!("Platform:    {}", report.platform);
    if let Some(ref location) = report.location {
        println!("Location:    {}", location);
    }
    match report.association {
        Some(ref record) => println!(
            "Command:     {}",
            record.command.as_deref().unwrap_or("<missing>")
        ),
        None => println!("Command:     <not registered>"),
    }
    println!("This binary: {}", yes_no(report.registered_to_this_executable));
    println!("Primary:     {}", yes_no(report.primary_listening));
    Ok(())
}

fn yes_no(value: bool) -> &'static str {
    if value {
        "yes"
    } else {
        "no"
    }
}

/// Whether something accepts connections on the coordination port.
///
/// A primary treats the resulting empty connection as a no-op.
async fn primary_is_listening(port: u16) -> bool {
    let addr = SocketAddr::from((Ipv4Addr::LOCALHOST, port));
    matches!(
        tokio::time::timeout(LISTEN_CHECK_TIMEOUT, TcpStream::connect(addr)).await,
        Ok(Ok(_))
    )
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio::net::TcpListener;

    #[test]
    fn test_launch_args_only_for_non_defaults() {
        let derived = LinkConfig::derived_port("myapp");
        assert!(launch_args("myapp", derived, WireFormat::Framed).is_empty());
        assert_eq!(launch_args("myapp", derived, WireFormat::Raw), vec!["--raw"]);

        let other = if derived == 4000 { 4001 } else { 4000 };
        assert_eq!(
            launch_args("myapp", other, WireFormat::Raw),
            vec!["--port".to_string(), other.to_string(), "--raw".to_string()]
        );
    }

    #[tokio::test]
    async fn test_primary_is_listening() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let port = listener.local_addr().unwrap().port();
        assert!(primary_is_listening(port).await);

        drop(listener);
        assert!(!primary_is_listening(port).await);
    }

    #[tokio::test]
    async fn test_send_without_primary_fails_with_coordination_code() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let port = listener.local_addr().unwrap().port();
        drop(listener);

        let builder = LinkConfig::builder("myapp", port)
            .connect_attempts(1)
            .connect_timeout(Duration::from_millis(200));
        let err = send(builder, "myapp://x").await.unwrap_err();

        assert_eq!(crate::exit_status(&err), 1);
    }
}
