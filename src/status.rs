//! Operator-facing status: the keypress reporter and the keep-alive
//! listener. Both only read engine state, they never mutate it.
use log::{debug, warn};
use std::io;
use std::net::Ipv4Addr;
use tokio::io::{AsyncBufReadExt, AsyncReadExt, AsyncWriteExt, BufReader};
use tokio::net::TcpListener;
use tokio::sync::watch;
use tokio_util::sync::CancellationToken;

/// Prints the dispatch cursor each time a newline arrives on stdin.
pub async fn report_on_keypress(cursor: watch::Receiver<Ipv4Addr>, cancel: CancellationToken) {
    let mut lines = BufReader::new(tokio::io::stdin()).lines();
    loop {
        tokio::select! {
            () = cancel.cancelled() => break,
            line = lines.next_line() => match line {
                Ok(Some(_)) => println!("[NOW SCANNING]: {}", *cursor.borrow()),
                Ok(None) | Err(_) => break,
            },
        }
    }
}

/// Binds the keep-alive listener and answers health checks until
/// cancelled.
///
/// Every connection gets an empty HTTP 200 no matter what it sent. The
/// listener exists purely so a hosting platform sees the process as
/// alive; it has no connection to the sweep.
pub async fn serve_liveness(port: u16, cancel: CancellationToken) -> io::Result<()> {
    let listener = TcpListener::bind(("0.0.0.0", port)).await?;
    debug!("Liveness listener bound on port {port}");
    run_liveness(listener, cancel).await;
    Ok(())
}

async fn run_liveness(listener: TcpListener, cancel: CancellationToken) {
    loop {
        tokio::select! {
            () = cancel.cancelled() => break,
            accepted = listener.accept() => {
                let (mut socket, peer) = match accepted {
                    Ok(pair) => pair,
                    Err(e) => {
                        warn!("Liveness accept failed: {e}");
                        continue;
                    }
                };
                tokio::spawn(async move {
                    let mut request = [0u8; 512];
                    let _ = socket.read(&mut request).await;
                    let response = b"HTTP/1.1 200 OK\r\ncontent-length: 0\r\nconnection: close\r\n\r\n";
                    if let Err(e) = socket.write_all(response).await {
                        debug!("Liveness reply to {peer} failed: {e}");
                    }
                });
            }
        }
    }
}
