//! Connection handlers for the Tether server.
//!
//! Every accepted socket becomes a [`RemoteEventEmitter`]. Events named in the
//! echo configuration are raised back on the sender with the same arguments.

use crate::config::Config;
use crate::metrics::{self, ConnectionMetricsGuard};
use anyhow::{Context, Result};
use serde_json::Value;
use std::net::SocketAddr;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use tether_core::{
    once, Emission, ErrorRegistry, EventEmitter, EventError, ERROR_EVENT, MESSAGE_EVENT,
};
use tether_transport::{ConnectionConfig, RemoteEventEmitter, END_EVENT};
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::mpsc;
use tracing::{debug, error, info, warn};

/// Run the TCP server.
///
/// # Errors
///
/// Returns an error if the server fails to start.
pub async fn run_server(config: Config) -> Result<()> {
    // Start metrics server if enabled
    if config.metrics.enabled {
        if let Err(e) = metrics::start_metrics_server(config.metrics.port) {
            error!("Failed to start metrics server: {}", e);
        }
    }

    let addr = config.bind_addr()?;
    let listener = TcpListener::bind(addr)
        .await
        .with_context(|| format!("Failed to bind {}", addr))?;

    info!("Tether server listening on {}", addr);
    info!(events = ?config.echo.events, "Echoing events");

    serve(listener, Arc::new(config)).await
}

/// Accept connections on `listener` until it fails.
///
/// # Errors
///
/// Returns an error if accepting a connection fails.
pub async fn serve(listener: TcpListener, config: Arc<Config>) -> Result<()> {
    let active = Arc::new(AtomicUsize::new(0));

    loop {
        let (stream, peer) = listener.accept().await.context("Accept failed")?;

        if active.load(Ordering::SeqCst) >= config.limits.max_connections {
            warn!(peer = %peer, max = config.limits.max_connections, "Connection limit reached");
            metrics::record_rejection();
            continue;
        }

        let guard = ConnectionMetricsGuard::new(active.clone());
        tokio::spawn(handle_connection(stream, peer, config.clone(), guard));
    }
}

/// Handle one socket until the peer goes away.
async fn handle_connection(
    stream: TcpStream,
    peer: SocketAddr,
    config: Arc<Config>,
    guard: ConnectionMetricsGuard,
) {
    if let Err(e) = stream.set_nodelay(true) {
        debug!(peer = %peer, error = %e, "Failed to set TCP_NODELAY");
    }

    // Listeners go on before the first read.
    let events = EventEmitter::new();
    let ended = once(&events, END_EVENT);
    let mut echo_rx = attach_echo(&events, &config.echo.events);
    attach_observers(&events);

    let remote = RemoteEventEmitter::with_config(
        stream,
        events.clone(),
        ConnectionConfig {
            max_frame_size: config.limits.max_frame_size,
        },
        ErrorRegistry::global(),
    );
    debug!(connection = %remote.id(), peer = %peer, "Connected");

    tokio::pin!(ended);
    loop {
        tokio::select! {
            Some((event, args)) = echo_rx.recv() => {
                if remote.remote_emit(&event, args) {
                    metrics::record_event("outbound");
                } else {
                    debug!(
                        connection = %remote.id(),
                        event = %event,
                        "Echo dropped, connection dead"
                    );
                }
            }
            _ = &mut ended => break,
        }
    }

    remote.close();
    // Listeners hold the echo sender; drop them with the connection.
    events.clear();
    debug!(connection = %remote.id(), peer = %peer, "Disconnected");
    drop(guard);
}

/// Forward every configured event to the returned queue.
fn attach_echo(
    events: &EventEmitter,
    names: &[String],
) -> mpsc::UnboundedReceiver<(String, Vec<Value>)> {
    let (tx, rx) = mpsc::unbounded_channel();
    for name in names {
        let tx = tx.clone();
        let event = name.clone();
        events.on(name, move |emission| {
            if let Emission::Args(args) = emission {
                let _ = tx.send((event.clone(), args.clone()));
            }
        });
    }
    rx
}

/// Count inbound traffic and log errors raised on the connection.
fn attach_observers(events: &EventEmitter) {
    events.on(MESSAGE_EVENT, |_| metrics::record_event("inbound"));
    events.on(ERROR_EVENT, |emission| match emission.error() {
        Some(EventError::Remote(error)) => {
            info!(name = %error.name(), message = %error.message(), "Peer raised error");
            metrics::record_remote_error(error.name());
        }
        Some(EventError::Frame(error)) => {
            warn!(error = %error, "Bad frame from peer");
            metrics::record_error("frame");
        }
        Some(EventError::Value(value)) => {
            info!(value = %value, "Peer raised error value");
            metrics::record_remote_error("value");
        }
        None => {
            info!(args = ?emission.args(), "Peer raised error event");
            metrics::record_remote_error("value");
        }
    });
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use std::time::Duration;
    use tether_core::{once_all, ErrorKind, RemoteError};

    async fn start(config: Config) -> SocketAddr {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        tokio::spawn(serve(listener, Arc::new(config)));
        addr
    }

    fn config(events: &[&str]) -> Config {
        let mut config = Config::default();
        config.echo.events = events.iter().map(|e| e.to_string()).collect();
        config.metrics.enabled = false;
        config
    }

    #[tokio::test]
    async fn test_configured_event_is_echoed() {
        let addr = start(config(&["hello"])).await;
        let client = RemoteEventEmitter::new(TcpStream::connect(addr).await.unwrap());
        let echoed = once_all(&client, "hello");

        assert!(client.remote_emit("hello", vec![json!("arg1"), json!({"n": 2})]));

        let args = tokio::time::timeout(Duration::from_secs(2), echoed)
            .await
            .unwrap()
            .unwrap();
        assert_eq!(args, json!(["arg1", {"n": 2}]));
    }

    #[tokio::test]
    async fn test_unconfigured_event_is_not_echoed() {
        let addr = start(config(&["hello"])).await;
        let client = RemoteEventEmitter::new(TcpStream::connect(addr).await.unwrap());
        let silent = once(&client, "quiet");
        let echoed = once(&client, "hello");

        client.remote_emit("quiet", vec![json!(1)]);
        client.remote_emit("hello", vec![json!(2)]);

        // Frames are handled in order, so the echo proves "quiet" was skipped.
        let value = tokio::time::timeout(Duration::from_secs(2), echoed)
            .await
            .unwrap()
            .unwrap();
        assert_eq!(value, json!(2));
        assert!(tokio::time::timeout(Duration::from_millis(20), silent)
            .await
            .is_err());
    }

    #[tokio::test]
    async fn test_errors_from_peer_do_not_drop_connection() {
        let addr = start(config(&["hello"])).await;
        let client = RemoteEventEmitter::new(TcpStream::connect(addr).await.unwrap());
        let echoed = once(&client, "hello");

        client.remote_emit_error(&RemoteError::new(ErrorKind::Range, "out of range"));
        client.send(&json!("not an envelope"));
        client.remote_emit("hello", vec![json!("still here")]);

        let value = tokio::time::timeout(Duration::from_secs(2), echoed)
            .await
            .unwrap()
            .unwrap();
        assert_eq!(value, json!("still here"));
    }

    #[tokio::test]
    async fn test_connection_limit_rejects_extra_clients() {
        let mut limited = config(&["hello"]);
        limited.limits.max_connections = 1;
        let addr = start(limited).await;

        let first = RemoteEventEmitter::new(TcpStream::connect(addr).await.unwrap());
        let ready = once(&first, "hello");
        first.remote_emit("hello", Vec::<Value>::new());
        tokio::time::timeout(Duration::from_secs(2), ready)
            .await
            .unwrap()
            .unwrap();

        let second = RemoteEventEmitter::new(TcpStream::connect(addr).await.unwrap());
        let ended = once(&second, END_EVENT);
        tokio::time::timeout(Duration::from_secs(2), ended)
            .await
            .unwrap()
            .unwrap();
        assert!(second.is_dead());
    }

    #[tokio::test]
    async fn test_remote_end_keeps_connection_counted() {
        let mut limited = config(&["hello"]);
        limited.limits.max_connections = 1;
        let addr = start(limited).await;

        let first = RemoteEventEmitter::new(TcpStream::connect(addr).await.unwrap());
        let echoed = once(&first, "hello");
        first.remote_emit(END_EVENT, Vec::<Value>::new());
        first.remote_emit("hello", vec![json!("after end")]);

        let value = tokio::time::timeout(Duration::from_secs(2), echoed)
            .await
            .unwrap()
            .unwrap();
        assert_eq!(value, json!("after end"));
        assert!(!first.is_dead());

        let second = RemoteEventEmitter::new(TcpStream::connect(addr).await.unwrap());
        let ended = once(&second, END_EVENT);
        tokio::time::timeout(Duration::from_secs(2), ended)
            .await
            .unwrap()
            .unwrap();
        assert!(second.is_dead());
    }

    #[tokio::test]
    async fn test_slot_is_released_after_client_leaves() {
        let mut limited = config(&["hello"]);
        limited.limits.max_connections = 1;
        let addr = start(limited).await;

        let first = RemoteEventEmitter::new(TcpStream::connect(addr).await.unwrap());
        let ready = once(&first, "hello");
        first.remote_emit("hello", Vec::<Value>::new());
        tokio::time::timeout(Duration::from_secs(2), ready)
            .await
            .unwrap()
            .unwrap();

        let closed = once(&first, END_EVENT);
        assert!(first.close());
        tokio::time::timeout(Duration::from_secs(2), closed)
            .await
            .unwrap()
            .unwrap();

        // The server may still be releasing the slot; retry briefly.
        let mut echoed = None;
        for _ in 0..50 {
            let client = RemoteEventEmitter::new(TcpStream::connect(addr).await.unwrap());
            let hello = once(&client, "hello");
            client.remote_emit("hello", vec![json!("again")]);
            if let Ok(Ok(value)) = tokio::time::timeout(Duration::from_millis(100), hello).await {
                echoed = Some(value);
                break;
            }
        }
        assert_eq!(echoed, Some(json!("again")));
    }
}
