//! Per-connection session loop, shared by host and peer.
//!
//! A [`Session`] owns the socket for its whole life. [`Session::run`] reads
//! chunks, re-frames them, and hands each data frame to the frame handler
//! in arrival order. A companion writer task drains the connection's
//! outbound queue. On every exit path (close signal, EOF, read error,
//! handler error or panic, local cancellation) the connection is removed
//! from the table, marked closed, and the socket released.

use std::io;
use std::sync::Arc;
use std::time::Duration;

use tokio::net::TcpStream;
use tokio::sync::mpsc::{self, UnboundedReceiver};
use tokio_util::sync::CancellationToken;

use super::connection::Connection;
use super::framing::{Frame, FrameDecoder};
use super::table::ConnectionTable;
use crate::constants::{CLOSE_FLUSH_TIMEOUT, READ_CHUNK_SIZE};

/// Callback invoked for every application frame received on a connection.
///
/// Runs synchronously inside the session loop, so the next frame on the
/// same connection is not delivered until it returns. An `Err` (or panic)
/// ends this session only.
pub type FrameHandler = Arc<dyn Fn(&Connection, &[u8]) -> anyhow::Result<()> + Send + Sync>;

/// Tunables for a session.
#[derive(Debug, Clone)]
pub struct SessionOptions {
    /// Bytes requested per socket read.
    pub read_chunk_size: usize,
    /// Upper bound on flushing queued frames after a local close.
    pub close_flush_timeout: Duration,
}

impl Default for SessionOptions {
    fn default() -> Self {
        Self {
            read_chunk_size: READ_CHUNK_SIZE,
            close_flush_timeout: CLOSE_FLUSH_TIMEOUT,
        }
    }
}

/// Why a session loop stopped.
#[derive(Debug)]
enum SessionEnd {
    CloseSignal,
    PeerClosed,
    Cancelled,
    Transport(io::Error),
    HandlerFault(anyhow::Error),
}

/// One accepted or dialed socket, ready to be driven.
#[derive(Debug)]
pub struct Session {
    conn: Arc<Connection>,
    stream: Arc<TcpStream>,
    frame_rx: UnboundedReceiver<Vec<u8>>,
    options: SessionOptions,
}

impl Session {
    /// Wrap a connected stream.
    ///
    /// Fails only if the remote address cannot be read, which means the
    /// socket is already dead.
    pub fn new(stream: TcpStream, options: SessionOptions) -> io::Result<Self> {
        let remote_addr = stream.peer_addr()?;
        let stream = Arc::new(stream);
        let (frame_tx, frame_rx) = mpsc::unbounded_channel();
        let conn = Arc::new(Connection::new(
            remote_addr,
            &stream,
            frame_tx,
            CancellationToken::new(),
        ));
        Ok(Self {
            conn,
            stream,
            frame_rx,
            options,
        })
    }

    /// Handle to this session's connection.
    pub fn connection(&self) -> &Arc<Connection> {
        &self.conn
    }

    /// Drive the connection until it closes.
    ///
    /// `table` is the host's connection table, if any; the entry for this
    /// connection is removed on exit.
    pub async fn run(self, handler: FrameHandler, table: Option<ConnectionTable>) {
        let Self {
            conn,
            stream,
            frame_rx,
            options,
        } = self;
        let remote = conn.remote_addr();
        log::debug!("[Session] Started for {}", remote);

        let writer = tokio::spawn(write_loop(
            Arc::clone(&stream),
            frame_rx,
            conn.cancel_token().clone(),
            options.close_flush_timeout,
        ));

        let cleanup = scopeguard::guard((Arc::clone(&conn), table), |(conn, table)| {
            conn.begin_closing();
            conn.cancel_token().cancel();
            if let Some(table) = table {
                table.remove(&conn);
            }
            conn.mark_closed();
        });

        let end = read_loop(&conn, &stream, &handler, options.read_chunk_size).await;
        match &end {
            SessionEnd::CloseSignal => log::info!("[Session] {} sent close signal", remote),
            SessionEnd::PeerClosed => log::info!("[Session] {} disconnected", remote),
            SessionEnd::Cancelled => log::debug!("[Session] {} closed locally", remote),
            SessionEnd::Transport(e) => log::info!("[Session] {} transport fault: {e}", remote),
            SessionEnd::HandlerFault(e) => {
                log::warn!("[Session] Handler failed for {}, closing: {e:#}", remote);
            }
        }

        // Table entry goes first, then the socket.
        drop(cleanup);
        drop(stream);
        if let Err(e) = writer.await {
            log::warn!("[Session] Writer task for {} failed: {e}", remote);
        }
    }
}

async fn read_loop(
    conn: &Connection,
    stream: &TcpStream,
    handler: &FrameHandler,
    chunk_size: usize,
) -> SessionEnd {
    let mut decoder = FrameDecoder::new();
    let mut buf = vec![0u8; chunk_size.max(1)];
    let cancel = conn.cancel_token();

    loop {
        let read = tokio::select! {
            () = cancel.cancelled() => return SessionEnd::Cancelled,
            read = read_chunk(stream, &mut buf) => read,
        };

        let n = match read {
            Ok(0) => return SessionEnd::PeerClosed,
            Ok(n) => n,
            Err(e) => return SessionEnd::Transport(e),
        };

        for frame in decoder.feed(&buf[..n]) {
            conn.touch();
            match frame {
                Frame::Close => return SessionEnd::CloseSignal,
                Frame::HeartbeatRequest => {
                    // A failed reply means the writer is gone; the read side
                    // will notice on its own.
                    let _ = conn.enqueue(Frame::HeartbeatReply.encode());
                }
                Frame::HeartbeatReply => {}
                Frame::Data(payload) => {
                    if let Err(e) = handler(conn, &payload) {
                        return SessionEnd::HandlerFault(e);
                    }
                }
            }
        }
    }
}

async fn write_loop(
    stream: Arc<TcpStream>,
    mut frame_rx: UnboundedReceiver<Vec<u8>>,
    cancel: CancellationToken,
    flush_timeout: Duration,
) {
    let mut unfinished = Vec::new();
    loop {
        let bytes = tokio::select! {
            biased;
            next = frame_rx.recv() => match next {
                Some(bytes) => bytes,
                None => return,
            },
            () = cancel.cancelled() => break,
        };
        let mut rest: &[u8] = &bytes;
        tokio::select! {
            written = write_all(&stream, &mut rest) => {
                if let Err(e) = written {
                    log::debug!("[Session] Write failed: {e}");
                    return;
                }
            }
            () = cancel.cancelled() => {
                unfinished = rest.to_vec();
                break;
            }
        }
    }

    // Flush what was queued before the close, including the close signal.
    // An interrupted frame is finished first so framing stays intact.
    frame_rx.close();
    let flush = async {
        write_all(&stream, &mut unfinished.as_slice()).await?;
        while let Some(bytes) = frame_rx.recv().await {
            write_all(&stream, &mut bytes.as_slice()).await?;
        }
        Ok::<(), io::Error>(())
    };
    match tokio::time::timeout(flush_timeout, flush).await {
        Ok(Ok(())) => {}
        Ok(Err(e)) => log::debug!("[Session] Flush on close failed: {e}"),
        Err(_) => log::debug!("[Session] Flush on close timed out"),
    }
}

/// Read one chunk using readiness on a shared stream.
async fn read_chunk(stream: &TcpStream, buf: &mut [u8]) -> io::Result<usize> {
    loop {
        stream.readable().await?;
        match stream.try_read(buf) {
            Ok(n) => return Ok(n),
            Err(e) if e.kind() == io::ErrorKind::WouldBlock => {}
            Err(e) => return Err(e),
        }
    }
}

/// Write a whole buffer using readiness on a shared stream.
///
/// `buf` is advanced as bytes go out, so a caller that drops this future
/// part-way still knows what is left.
async fn write_all(stream: &TcpStream, buf: &mut &[u8]) -> io::Result<()> {
    while !buf.is_empty() {
        stream.writable().await?;
        match stream.try_write(buf) {
            Ok(0) => return Err(io::ErrorKind::WriteZero.into()),
            Ok(n) => *buf = &buf[n..],
            Err(e) if e.kind() == io::ErrorKind::WouldBlock => {}
            Err(e) => return Err(e),
        }
    }
    Ok(())
}
