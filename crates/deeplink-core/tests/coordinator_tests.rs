//! Integration tests for primary/secondary coordination over loopback TCP.
//!
//! Every test claims an ephemeral port for its primary and points the
//! secondaries at that port, so tests can run in parallel.

use deeplink_core::coordinator::protocol::write_message;
use deeplink_core::{
    forward, InstanceCoordinator, InstanceRole, LinkConfig, PrimaryHandle, Startup, WireFormat,
};
use std::net::SocketAddr;
use std::time::Duration;
use tokio::io::AsyncWriteExt;
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::mpsc::UnboundedReceiver;

const RECV_TIMEOUT: Duration = Duration::from_secs(5);

/// Start a primary on an ephemeral port, delivering into a channel.
async fn start_primary(format: WireFormat) -> (PrimaryHandle, UnboundedReceiver<String>) {
    let (builder, rx) = LinkConfig::builder("myapp", 0).wire_format(format).channel();
    let config = builder.build().unwrap();

    match InstanceCoordinator::new(config).start("").await.unwrap() {
        Startup::Primary(handle) => (handle, rx),
        Startup::Forwarded => panic!("ephemeral port must yield a primary"),
    }
}

fn secondary_config(port: u16, format: WireFormat) -> LinkConfig {
    LinkConfig::builder("myapp", port)
        .wire_format(format)
        .build()
        .unwrap()
}

async fn recv(rx: &mut UnboundedReceiver<String>) -> String {
    tokio::time::timeout(RECV_TIMEOUT, rx.recv())
        .await
        .expect("timed out waiting for a link")
        .expect("channel closed")
}

#[tokio::test]
async fn test_secondary_delivers_exactly_once() {
    let (handle, mut rx) = start_primary(WireFormat::Framed).await;
    let port = handle.local_addr().port();

    let startup = InstanceCoordinator::new(secondary_config(port, WireFormat::Framed))
        .start("myapp://foo/bar")
        .await
        .unwrap();
    assert_eq!(startup.role(), InstanceRole::Secondary);

    assert_eq!(recv(&mut rx).await, "myapp://foo/bar");

    tokio::time::sleep(Duration::from_millis(200)).await;
    assert!(rx.try_recv().is_err(), "link delivered more than once");
    assert_eq!(handle.messages_delivered(), 1);

    handle.stop().await;
}

#[tokio::test]
async fn test_concurrent_secondaries_each_deliver() {
    let (handle, mut rx) = start_primary(WireFormat::Framed).await;
    let port = handle.local_addr().port();

    let mut tasks = Vec::new();
    for i in 0..8 {
        tasks.push(tokio::spawn(async move {
            InstanceCoordinator::new(secondary_config(port, WireFormat::Framed))
                .start(&format!("myapp://item/{}", i))
                .await
                .map(|startup| startup.role())
        }));
    }
    for task in tasks {
        assert_eq!(task.await.unwrap().unwrap(), InstanceRole::Secondary);
    }

    let mut received = Vec::new();
    for _ in 0..8 {
        received.push(recv(&mut rx).await);
    }
    received.sort();

    let mut expected: Vec<String> = (0..8).map(|i| format!("myapp://item/{}", i)).collect();
    expected.sort();
    assert_eq!(received, expected);

    handle.stop().await;
}

#[tokio::test]
async fn test_payload_with_unicode_and_spaces() {
    let (handle, mut rx) = start_primary(WireFormat::Framed).await;
    let link = "myapp://search?q=caf\u{e9} au lait&tag=\u{1f600}";

    forward(
        handle.local_addr(),
        link,
        &secondary_config(0, WireFormat::Framed),
    )
    .await
    .unwrap();

    assert_eq!(recv(&mut rx).await, link);
    handle.stop().await;
}

#[tokio::test]
async fn test_forward_to_closed_port_is_retryable_error() {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    drop(listener);

    let config = LinkConfig::builder("myapp", addr.port())
        .connect_attempts(2)
        .retry_delay(Duration::from_millis(10))
        .connect_timeout(Duration::from_millis(500))
        .build()
        .unwrap();

    let err = tokio::time::timeout(RECV_TIMEOUT, forward(addr, "myapp://x", &config))
        .await
        .expect("forward must not hang")
        .unwrap_err();

    assert!(err.is_coordination_error());
    assert!(err.is_retryable());
    assert_eq!(err.exit_code(), 1);
}

#[tokio::test]
async fn test_raw_format_truncates_to_buffer() {
    let (handle, mut rx) = start_primary(WireFormat::Raw).await;
    let long = format!("myapp://{}", "a".repeat(2000));

    // The primary may close before the tail is consumed, so write errors are
    // expected and irrelevant here.
    let mut stream = TcpStream::connect(handle.local_addr()).await.unwrap();
    let _ = stream.write_all(long.as_bytes()).await;
    let _ = stream.shutdown().await;

    let received = recv(&mut rx).await;
    assert_eq!(received.len(), 1024);
    assert_eq!(received, long[..1024]);

    handle.stop().await;
}

#[tokio::test]
async fn test_raw_format_roundtrip_through_coordinator() {
    let (handle, mut rx) = start_primary(WireFormat::Raw).await;
    let port = handle.local_addr().port();

    InstanceCoordinator::new(secondary_config(port, WireFormat::Raw))
        .start("myapp://legacy")
        .await
        .unwrap();

    assert_eq!(recv(&mut rx).await, "myapp://legacy");
    handle.stop().await;
}

#[tokio::test]
async fn test_oversized_frame_is_dropped_and_loop_continues() {
    let (builder, mut rx) = LinkConfig::builder("myapp", 0).max_message_bytes(16).channel();
    let config = builder.build().unwrap();
    let handle = match InstanceCoordinator::new(config).start("").await.unwrap() {
        Startup::Primary(handle) => handle,
        Startup::Forwarded => panic!("ephemeral port must yield a primary"),
    };

    let mut stream = TcpStream::connect(handle.local_addr()).await.unwrap();
    let _ = write_message(&mut stream, WireFormat::Framed, &"x".repeat(100)).await;
    drop(stream);

    forward(
        handle.local_addr(),
        "myapp://ok",
        &secondary_config(0, WireFormat::Framed),
    )
    .await
    .unwrap();

    assert_eq!(recv(&mut rx).await, "myapp://ok");
    assert_eq!(handle.messages_delivered(), 1);

    handle.stop().await;
}

#[tokio::test]
async fn test_stalled_client_does_not_block_others() {
    let (builder, mut rx) = LinkConfig::builder("myapp", 0)
        .read_timeout(Duration::from_millis(200))
        .channel();
    let handle = match InstanceCoordinator::new(builder.build().unwrap())
        .start("")
        .await
        .unwrap()
    {
        Startup::Primary(handle) => handle,
        Startup::Forwarded => panic!("ephemeral port must yield a primary"),
    };

    // Connects and never writes.
    let _stalled = TcpStream::connect(handle.local_addr()).await.unwrap();

    forward(
        handle.local_addr(),
        "myapp://after-stall",
        &secondary_config(0, WireFormat::Framed),
    )
    .await
    .unwrap();

    assert_eq!(recv(&mut rx).await, "myapp://after-stall");
    handle.stop().await;
}

#[tokio::test]
async fn test_stop_releases_port() {
    let (handle, _rx) = start_primary(WireFormat::Framed).await;
    let port = handle.local_addr().port();
    handle.stop().await;

    let startup = InstanceCoordinator::new(secondary_config(port, WireFormat::Framed))
        .start("myapp://x")
        .await
        .unwrap();

    match startup {
        Startup::Primary(handle) => {
            assert_eq!(handle.local_addr().port(), port);
            handle.stop().await;
        }
        Startup::Forwarded => panic!("port should be free after stop"),
    }
}

#[tokio::test]
async fn test_primary_without_handler_discards_links() {
    let config = LinkConfig::builder("myapp", 0).build().unwrap();
    let handle = match InstanceCoordinator::new(config).start("").await.unwrap() {
        Startup::Primary(handle) => handle,
        Startup::Forwarded => panic!("ephemeral port must yield a primary"),
    };
    let addr: SocketAddr = handle.local_addr();

    forward(addr, "myapp://nobody", &secondary_config(0, WireFormat::Framed))
        .await
        .unwrap();

    tokio::time::sleep(Duration::from_millis(200)).await;
    assert_eq!(handle.messages_delivered(), 0);
    assert!(handle.is_running());

    handle.stop().await;
}
