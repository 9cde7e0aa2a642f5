//!
//! Protocol multiplexer: classifies accepted TCP connections by peeking at
//! their first bytes, without ever consuming them, and routes each one to
//! the HTTP/1.1 pipeline or the binary RPC (HTTP/2) surface. Unclassified
//! connections are dropped. Classification runs in a per-connection task so
//! a slow sniff cannot head-of-line block the acceptor.
//!

use crate::imports::*;
use crate::server::http::ClientAddr;
use axum::Router;
use hyper_util::rt::TokioIo;
use tokio::net::{TcpListener, TcpStream};
use tower::ServiceExt;

/// The HTTP/2 client connection preface, which gRPC clients always send
/// first.
const H2_PREFACE: &[u8] = b"PRI * HTTP/2.0\r\n\r\nSM\r\n\r\n";
/// Frame type id of the SETTINGS frame expected right after the preface.
const H2_FRAME_SETTINGS: u8 = 0x4;
/// Enough for the preface plus the following frame header.
const SNIFF_LEN: usize = H2_PREFACE.len() + 9;

const SNIFF_TIMEOUT: Duration = Duration::from_secs(10);
const SNIFF_POLL_INTERVAL: Duration = Duration::from_millis(25);

const HTTP1_METHODS: [&str; 9] = [
    "GET", "HEAD", "POST", "PUT", "PATCH", "DELETE", "OPTIONS", "CONNECT", "TRACE",
];

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum Classification {
    Http1,
    BinaryRpc,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Sniff {
    Decided(Classification),
    Rejected,
    NeedMore,
}

fn classify_bytes(buf: &[u8]) -> Sniff {
    if buf.is_empty() {
        return Sniff::NeedMore;
    }

    // HTTP/2: the full client preface followed by a SETTINGS frame
    let prefix = buf.len().min(H2_PREFACE.len());
    if buf[..prefix] == H2_PREFACE[..prefix] {
        if buf.len() < H2_PREFACE.len() + 4 {
            return Sniff::NeedMore;
        }
        return if buf[H2_PREFACE.len() + 3] == H2_FRAME_SETTINGS {
            Sniff::Decided(Classification::BinaryRpc)
        } else {
            Sniff::Rejected
        };
    }

    // HTTP/1.x: a known method token followed by a space
    let mut partial = false;
    for method in HTTP1_METHODS {
        let token = method.as_bytes();
        let expected_len = token.len() + 1;
        let n = buf.len().min(expected_len);
        let matches = (0..n).all(|i| {
            if i < token.len() {
                buf[i] == token[i]
            } else {
                buf[i] == b' '
            }
        });
        if matches {
            if buf.len() >= expected_len {
                return Sniff::Decided(Classification::Http1);
            }
            partial = true;
        }
    }

    if partial {
        Sniff::NeedMore
    } else {
        Sniff::Rejected
    }
}

/// Peek at the connection until its protocol can be decided. The peeked
/// bytes stay in the socket buffer for the winning handler.
pub(crate) async fn classify(stream: &TcpStream) -> std::io::Result<Option<Classification>> {
    let mut buf = [0u8; SNIFF_LEN];
    let deadline = Instant::now() + SNIFF_TIMEOUT;
    loop {
        let n = stream.peek(&mut buf).await?;
        if n == 0 {
            return Ok(None);
        }
        match classify_bytes(&buf[..n]) {
            Sniff::Decided(classification) => return Ok(Some(classification)),
            Sniff::Rejected => return Ok(None),
            Sniff::NeedMore => {
                if n == buf.len() || Instant::now() >= deadline {
                    return Ok(None);
                }
                tokio::time::sleep(SNIFF_POLL_INTERVAL).await;
            }
        }
    }
}

/// One acceptor loop; per-connection classification and serving happen in
/// spawned tasks. A clean stop returns `Ok(())`.
pub(crate) async fn run(
    listener: TcpListener,
    router: Router,
    binary: Sender<TcpStream>,
    stop: DuplexChannel,
) -> Result<()> {
    let result = loop {
        tokio::select! {
            accepted = listener.accept() => {
                match accepted {
                    Ok((stream, peer)) => {
                        let router = router.clone();
                        let binary = binary.clone();
                        tokio::spawn(handle_connection(router, binary, stream, peer));
                    }
                    Err(err) => break Err(Error::Io(err)),
                }
            }
            _ = stop.request.receiver.recv() => break Ok(()),
        }
    };

    stop.response
        .sender
        .send(())
        .await
        .map_err(|err| Error::Join(err.to_string()))?;
    result
}

async fn handle_connection(
    router: Router,
    binary: Sender<TcpStream>,
    stream: TcpStream,
    peer: SocketAddr,
) {
    match classify(&stream).await {
        Ok(Some(Classification::Http1)) => {
            if let Err(err) = serve_http1(router, stream, peer).await {
                trace!("http connection from {peer} ended: {err}");
            }
        }
        Ok(Some(Classification::BinaryRpc)) => {
            // handed to the host's binary RPC server via the incoming stream
            if binary.send(stream).await.is_err() {
                trace!("binary rpc connection from {peer} dropped: no consumer");
            }
        }
        Ok(None) => {
            trace!("unclassified connection from {peer} closed");
        }
        Err(err) => {
            trace!("connection sniff from {peer} failed: {err}");
        }
    }
}

async fn serve_http1(router: Router, stream: TcpStream, peer: SocketAddr) -> hyper::Result<()> {
    let service = hyper::service::service_fn(move |mut request: http::Request<hyper::body::Incoming>| {
        request.extensions_mut().insert(ClientAddr(peer));
        let router = router.clone();
        async move { router.oneshot(request.map(axum::body::Body::new)).await }
    });

    hyper::server::conn::http1::Builder::new()
        .serve_connection(TokioIo::new(stream), service)
        .with_upgrades()
        .await
}
