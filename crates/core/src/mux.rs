// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Connection multiplexer: a single TCP listen socket serving both the HTTP
//! surface and the line-framed ingest protocol. Each accepted connection is
//! classified by peeking its first bytes and routed to one of two
//! sub-listener channels without consuming anything from the stream, so the
//! eventual consumer (axum's hyper connection handler, or the ingest reader)
//! sees the full byte stream from the start.

use std::io;
use std::net::SocketAddr;
use std::time::Duration;

use tokio::net::{TcpListener, TcpStream};
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;

/// Prefixes that mark a connection as HTTP; anything else is ingest.
const HTTP_PREFIXES: &[&[u8]] =
    &[b"GET ", b"POST ", b"PUT ", b"DELETE ", b"HEAD ", b"OPTIONS ", b"PATCH ", b"TRACE ", b"CONNECT "];

const PEEK_LEN: usize = 8;
const PEEK_DEADLINE: Duration = Duration::from_secs(5);
const SUB_LISTENER_CAPACITY: usize = 64;

type Accepted = (TcpStream, SocketAddr);

/// The two sub-listener halves produced by [`spawn`]. `http` is handed to
/// `axum::serve`; `ingest` is drained directly by the ingest handler's own
/// accept loop.
pub struct MuxHandles {
    pub http: HttpSubListener,
    pub ingest: mpsc::Receiver<Accepted>,
}

/// Adapts a bounded channel of pre-classified connections into something
/// `axum::serve` can drive, so the HTTP path never needs its own listen
/// socket or its own accept loop.
pub struct HttpSubListener {
    rx: mpsc::Receiver<Accepted>,
    local_addr: SocketAddr,
}

impl axum::serve::Listener for HttpSubListener {
    type Io = TcpStream;
    type Addr = SocketAddr;

    async fn accept(&mut self) -> (Self::Io, Self::Addr) {
        loop {
            if let Some(pair) = self.rx.recv().await {
                return pair;
            }
            // Sender side is gone: the mux accept loop has shut down. Park
            // forever rather than spin; `axum::serve` will be dropped by its
            // own graceful-shutdown future racing this one.
            std::future::pending::<()>().await;
        }
    }

    fn local_addr(&self) -> io::Result<Self::Addr> {
        Ok(self.local_addr)
    }
}

/// Binds `addr` and spawns the accept loop, returning the two sub-listener
/// halves. The accept loop runs until `shutdown` is cancelled, at which
/// point it stops accepting and drops both channel senders so any consumer
/// blocked in `accept` observes a closed channel.
pub async fn spawn(addr: &str, shutdown: CancellationToken) -> io::Result<MuxHandles> {
    let listener = TcpListener::bind(addr).await?;
    let local_addr = listener.local_addr()?;
    let (http_tx, http_rx) = mpsc::channel(SUB_LISTENER_CAPACITY);
    let (ingest_tx, ingest_rx) = mpsc::channel(SUB_LISTENER_CAPACITY);

    tokio::spawn(accept_loop(listener, http_tx, ingest_tx, shutdown));

    Ok(MuxHandles { http: HttpSubListener { rx: http_rx, local_addr }, ingest: ingest_rx })
}

async fn accept_loop(
    listener: TcpListener,
    http_tx: mpsc::Sender<Accepted>,
    ingest_tx: mpsc::Sender<Accepted>,
    shutdown: CancellationToken,
) {
    loop {
        tokio::select! {
            _ = shutdown.cancelled() => break,
            accepted = listener.accept() => {
                match accepted {
                    Ok((stream, peer_addr)) => {
                        tokio::spawn(classify_and_route(stream, peer_addr, http_tx.clone(), ingest_tx.clone()));
                    }
                    Err(e) => {
                        tracing::debug!("mux accept error: {e}");
                    }
                }
            }
        }
    }
    tracing::debug!("mux accept loop shutting down");
}

/// Peeks the connection's first bytes and forwards it, unconsumed, to the
/// matching sub-listener channel. Connections that exceed the peek deadline,
/// or land on a full channel, are dropped.
async fn classify_and_route(
    stream: TcpStream,
    peer_addr: SocketAddr,
    http_tx: mpsc::Sender<Accepted>,
    ingest_tx: mpsc::Sender<Accepted>,
) {
    let mut buf = [0u8; PEEK_LEN];
    let peeked = tokio::time::timeout(PEEK_DEADLINE, peek_prefix(&stream, &mut buf)).await;
    let n = match peeked {
        Ok(Ok(n)) => n,
        Ok(Err(e)) => {
            tracing::debug!("mux peek error from {peer_addr}: {e}");
            return;
        }
        Err(_) => {
            tracing::debug!("mux peek deadline exceeded from {peer_addr}");
            return;
        }
    };

    let tx = if is_http_prefix(&buf[..n]) { &http_tx } else { &ingest_tx };
    if tx.try_send((stream, peer_addr)).is_err() {
        tracing::warn!("mux sub-listener channel full, dropping connection from {peer_addr}");
    }
}

/// Peeks until `buf` is full, the peer closes, or the caller's timeout
/// fires. `TcpStream::peek` never consumes bytes, so partial reads are
/// retried rather than treated as the final answer.
async fn peek_prefix(stream: &TcpStream, buf: &mut [u8; PEEK_LEN]) -> io::Result<usize> {
    loop {
        let n = stream.peek(buf).await?;
        if n == buf.len() || n == 0 {
            return Ok(n);
        }
        tokio::time::sleep(Duration::from_millis(5)).await;
    }
}

fn is_http_prefix(prefix: &[u8]) -> bool {
    HTTP_PREFIXES.iter().any(|p| prefix.starts_with(p))
}

#[cfg(test)]
#[path = "mux_tests.rs"]
mod tests;
