//! The RDP connection-request liveness check run by the scan workers.
use async_trait::async_trait;
use log::debug;
use std::net::SocketAddr;
use std::time::Duration;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::TcpStream;
use tokio::time;

/// TPKT header, COTP connection request and RDP negotiation request
/// advertising one protocol variant. Sent verbatim on every probe.
pub const RDP_CONNECTION_REQUEST: [u8; 21] = [
    0x03, 0x00, 0x00, 0x13, 0x0e, 0xe0, 0x00, 0x00, 0x00, 0x00, 0x00, 0x01, 0x00, 0x08, 0x00,
    0x03, 0x00, 0x00, 0x00, 0x00, 0x00,
];

/// A liveness check against a single socket address.
///
/// Implementations must collapse every network failure into a plain
/// `false`: the engine never distinguishes closed, filtered and host-down,
/// and nothing upstream retries a negative.
#[async_trait]
pub trait Probe: Send + Sync + 'static {
    /// Returns true when the target responds like an RDP service.
    async fn probe(&self, target: SocketAddr) -> bool;
}

/// Probes by writing a fixed X.224 connection request and treating any
/// reply byte that arrives within the timeout as a positive signal.
///
/// The reply content is not inspected, so any TCP responder that echoes
/// bytes quickly enough is reported as RDP. That heuristic is part of the
/// detection semantics, not something to strengthen here.
#[derive(Debug, Clone)]
pub struct RdpProbe {
    timeout: Duration,
}

impl RdpProbe {
    /// `timeout` bounds the connect and the read phase independently.
    #[must_use]
    pub const fn new(timeout: Duration) -> Self {
        Self { timeout }
    }
}

#[async_trait]
impl Probe for RdpProbe {
    async fn probe(&self, target: SocketAddr) -> bool {
        let Ok(Ok(mut stream)) = time::timeout(self.timeout, TcpStream::connect(target)).await
        else {
            return false;
        };

        if let Err(e) = stream.write_all(&RDP_CONNECTION_REQUEST).await {
            debug!("Write to {} failed: {}", target, e);
            return false;
        }

        let mut reply = [0u8; 1];
        let open = matches!(
            time::timeout(self.timeout, stream.read(&mut reply)).await,
            Ok(Ok(n)) if n > 0
        );

        if let Err(e) = stream.shutdown().await {
            debug!("Shutdown stream error {}", &e);
        }

        open
    }
}

#[cfg(test)]
mod tests {
    use super::{Probe, RdpProbe, RDP_CONNECTION_REQUEST};
    use std::time::Duration;
    use tokio::io::{AsyncReadExt, AsyncWriteExt};
    use tokio::net::TcpListener;

    async fn local_listener() -> (TcpListener, std::net::SocketAddr) {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        (listener, addr)
    }

    #[tokio::test]
    async fn closed_port_is_negative() {
        let (listener, addr) = local_listener().await;
        drop(listener);

        let probe = RdpProbe::new(Duration::from_millis(500));
        assert!(!probe.probe(addr).await);
    }

    #[tokio::test]
    async fn replying_listener_is_positive() {
        let (listener, addr) = local_listener().await;
        tokio::spawn(async move {
            let (mut socket, _) = listener.accept().await.unwrap();
            let mut request = vec![0u8; RDP_CONNECTION_REQUEST.len()];
            socket.read_exact(&mut request).await.unwrap();
            assert_eq!(request, RDP_CONNECTION_REQUEST);
            socket.write_all(&[0x03]).await.unwrap();
        });

        let probe = RdpProbe::new(Duration::from_secs(1));
        assert!(probe.probe(addr).await);
    }

    #[tokio::test]
    async fn silent_listener_times_out_negative() {
        let (listener, addr) = local_listener().await;
        tokio::spawn(async move {
            let (socket, _) = listener.accept().await.unwrap();
            // Hold the connection open without ever replying.
            tokio::time::sleep(Duration::from_secs(5)).await;
            drop(socket);
        });

        let probe = RdpProbe::new(Duration::from_millis(200));
        assert!(!probe.probe(addr).await);
    }

    #[tokio::test]
    async fn immediate_eof_is_negative() {
        let (listener, addr) = local_listener().await;
        tokio::spawn(async move {
            let (socket, _) = listener.accept().await.unwrap();
            drop(socket);
        });

        let probe = RdpProbe::new(Duration::from_millis(500));
        assert!(!probe.probe(addr).await);
    }
}
