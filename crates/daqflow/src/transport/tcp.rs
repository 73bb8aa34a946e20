// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 daqflow developers

//! TCP links for pattern sockets.
//!
//! Messages are length-prefixed on the stream (`u32` little-endian, then
//! the payload). Every connection runs one reader thread feeding the
//! owning socket's incoming queue and one writer thread draining the
//! per-peer queue. All blocking calls carry short timeouts so a single
//! shutdown flag stops every thread promptly.

use super::endpoint::{Endpoint, SocketPattern, TransportError};
use super::socket::{Peer, PeerLink, DEFAULT_QUEUE_CAPACITY, MAX_MESSAGE_SIZE};
use crossbeam::channel::{bounded, RecvTimeoutError, Sender};
use parking_lot::Mutex;
use socket2::{Domain, Socket, Type};
use std::io::{Read, Write};
use std::net::{SocketAddr, TcpListener, TcpStream, ToSocketAddrs};
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Arc;
use std::thread;
use std::thread::JoinHandle;
use std::time::Duration;

/// Poll interval of the accept loop and of reader/writer timeout checks.
const POLL_INTERVAL: Duration = Duration::from_millis(100);

/// How long `connect_peer` keeps retrying before giving up.
const CONNECT_RETRY_BUDGET: Duration = Duration::from_secs(5);

/// Bind `endpoint` and start the accept loop.
///
/// Returns the actual local port (meaningful when binding port 0).
#[allow(clippy::too_many_arguments)]
pub(crate) fn spawn_acceptor(
    endpoint: &Endpoint,
    pattern: SocketPattern,
    peers: Arc<Mutex<Vec<Peer>>>,
    incoming_tx: Sender<(usize, Vec<u8>)>,
    next_peer_id: Arc<AtomicUsize>,
    shutdown: Arc<AtomicBool>,
    threads: Arc<Mutex<Vec<JoinHandle<()>>>>,
) -> Result<u16, TransportError> {
    let addr_str = endpoint
        .bind_addr()
        .ok_or_else(|| TransportError::Bind(format!("not a TCP endpoint: {endpoint}")))?;
    let addr: SocketAddr = resolve(&addr_str).map_err(TransportError::Bind)?;

    let socket = Socket::new(Domain::for_address(addr), Type::STREAM, None)
        .map_err(|e| TransportError::Bind(e.to_string()))?;
    socket
        .set_reuse_address(true)
        .map_err(|e| TransportError::Bind(e.to_string()))?;
    socket
        .bind(&addr.into())
        .map_err(|e| TransportError::Bind(format!("{addr_str}: {e}")))?;
    socket
        .listen(128)
        .map_err(|e| TransportError::Bind(e.to_string()))?;

    let listener: TcpListener = socket.into();
    listener
        .set_nonblocking(true)
        .map_err(|e| TransportError::Bind(e.to_string()))?;
    let port = listener
        .local_addr()
        .map_err(|e| TransportError::Bind(e.to_string()))?
        .port();

    let accept_shutdown = Arc::clone(&shutdown);
    let accept_threads = Arc::clone(&threads);
    let handle = thread::spawn(move || {
        loop {
            if accept_shutdown.load(Ordering::SeqCst) {
                break;
            }
            match listener.accept() {
                Ok((stream, peer_addr)) => {
                    log::debug!("[Transport] accepted {} peer {}", pattern.as_str(), peer_addr);
                    spawn_connection(
                        stream,
                        pattern,
                        &peers,
                        incoming_tx.clone(),
                        &next_peer_id,
                        &accept_shutdown,
                        &accept_threads,
                    );
                }
                Err(e) if e.kind() == std::io::ErrorKind::WouldBlock => {
                    thread::sleep(Duration::from_millis(20));
                }
                Err(e) => {
                    log::warn!("[Transport] accept error: {e}");
                    thread::sleep(POLL_INTERVAL);
                }
            }
        }
    });
    threads.lock().push(handle);

    Ok(port)
}

/// Dial `endpoint`, retrying briefly, and wire the connection in.
#[allow(clippy::too_many_arguments)]
pub(crate) fn connect_peer(
    endpoint: &Endpoint,
    pattern: SocketPattern,
    peers: Arc<Mutex<Vec<Peer>>>,
    incoming_tx: Sender<(usize, Vec<u8>)>,
    next_peer_id: Arc<AtomicUsize>,
    shutdown: Arc<AtomicBool>,
    threads: Arc<Mutex<Vec<JoinHandle<()>>>>,
) -> Result<(), TransportError> {
    let addr_str = endpoint
        .connect_addr()
        .ok_or_else(|| TransportError::Connect(format!("not a TCP endpoint: {endpoint}")))?;
    let addr: SocketAddr = resolve(&addr_str).map_err(TransportError::Connect)?;

    let deadline = std::time::Instant::now() + CONNECT_RETRY_BUDGET;
    let stream = loop {
        match TcpStream::connect_timeout(&addr, Duration::from_millis(250)) {
            Ok(stream) => break stream,
            Err(e) => {
                if std::time::Instant::now() >= deadline {
                    return Err(TransportError::Connect(format!("{addr_str}: {e}")));
                }
                thread::sleep(Duration::from_millis(100));
            }
        }
    };

    log::debug!("[Transport] connected {} to {}", pattern.as_str(), addr_str);
    spawn_connection(
        stream,
        pattern,
        &peers,
        incoming_tx,
        &next_peer_id,
        &shutdown,
        &threads,
    );
    Ok(())
}

/// Register a peer for `stream` and start its reader/writer threads.
fn spawn_connection(
    stream: TcpStream,
    pattern: SocketPattern,
    peers: &Arc<Mutex<Vec<Peer>>>,
    incoming_tx: Sender<(usize, Vec<u8>)>,
    next_peer_id: &Arc<AtomicUsize>,
    shutdown: &Arc<AtomicBool>,
    threads: &Arc<Mutex<Vec<JoinHandle<()>>>>,
) {
    let id = next_peer_id.fetch_add(1, Ordering::SeqCst);
    let alive = Arc::new(AtomicBool::new(true));

    let _ = stream.set_nodelay(true);
    let _ = stream.set_read_timeout(Some(POLL_INTERVAL));

    let writer_stream = match stream.try_clone() {
        Ok(s) => s,
        Err(e) => {
            log::warn!("[Transport] failed to clone stream for peer {id}: {e}");
            return;
        }
    };

    let (tx, rx) = bounded::<Vec<u8>>(DEFAULT_QUEUE_CAPACITY);
    peers.lock().push(Peer {
        id,
        link: PeerLink::Queue(tx),
        alive: Arc::clone(&alive),
    });

    // Writer: drain the per-peer queue onto the stream.
    let writer_alive = Arc::clone(&alive);
    let writer_shutdown = Arc::clone(shutdown);
    let writer = thread::spawn(move || {
        let mut stream = writer_stream;
        loop {
            if writer_shutdown.load(Ordering::SeqCst) || !writer_alive.load(Ordering::Relaxed) {
                break;
            }
            match rx.recv_timeout(POLL_INTERVAL) {
                Ok(msg) => {
                    let len = (msg.len() as u32).to_le_bytes();
                    if stream.write_all(&len).is_err() || stream.write_all(&msg).is_err() {
                        writer_alive.store(false, Ordering::Relaxed);
                        break;
                    }
                    let _ = stream.flush();
                }
                Err(RecvTimeoutError::Timeout) => {}
                Err(RecvTimeoutError::Disconnected) => break,
            }
        }
    });

    // Reader: length-prefixed messages into the socket's incoming queue.
    let reader_alive = Arc::clone(&alive);
    let reader_shutdown = Arc::clone(shutdown);
    let reader = thread::spawn(move || {
        let mut stream = stream;
        let mut len_buf = [0u8; 4];
        loop {
            match read_full(&mut stream, &mut len_buf, &reader_shutdown, &reader_alive) {
                Ok(true) => {}
                Ok(false) | Err(_) => break,
            }
            let len = u32::from_le_bytes(len_buf) as usize;
            if len > MAX_MESSAGE_SIZE {
                log::warn!("[Transport] peer {id} sent oversized message ({len} bytes)");
                break;
            }
            let mut msg = vec![0u8; len];
            match read_full(&mut stream, &mut msg, &reader_shutdown, &reader_alive) {
                Ok(true) => {}
                Ok(false) | Err(_) => break,
            }

            if !pattern.can_recv() {
                continue;
            }
            if pattern == SocketPattern::Sub {
                // Slow local consumer: drop, the sequence gap will tell.
                let _ = incoming_tx.try_send((id, msg));
            } else if !deliver_blocking(&incoming_tx, id, msg, &reader_shutdown, &reader_alive) {
                break;
            }
        }
        reader_alive.store(false, Ordering::Relaxed);
    });

    let mut guard = threads.lock();
    guard.push(writer);
    guard.push(reader);
}

/// Fill `buf` completely, tolerating read timeouts.
///
/// Returns `Ok(false)` on EOF or shutdown, `Ok(true)` when filled.
fn read_full(
    stream: &mut TcpStream,
    buf: &mut [u8],
    shutdown: &AtomicBool,
    alive: &AtomicBool,
) -> std::io::Result<bool> {
    let mut filled = 0;
    while filled < buf.len() {
        if shutdown.load(Ordering::SeqCst) || !alive.load(Ordering::Relaxed) {
            return Ok(false);
        }
        match stream.read(&mut buf[filled..]) {
            Ok(0) => return Ok(false),
            Ok(n) => filled += n,
            Err(e)
                if e.kind() == std::io::ErrorKind::WouldBlock
                    || e.kind() == std::io::ErrorKind::TimedOut
                    || e.kind() == std::io::ErrorKind::Interrupted => {}
            Err(e) => return Err(e),
        }
    }
    Ok(true)
}

/// Deliver with back-pressure: block in bounded waits until the incoming
/// queue accepts the message or the connection dies.
fn deliver_blocking(
    incoming_tx: &Sender<(usize, Vec<u8>)>,
    id: usize,
    msg: Vec<u8>,
    shutdown: &AtomicBool,
    alive: &AtomicBool,
) -> bool {
    let mut pending = (id, msg);
    loop {
        if shutdown.load(Ordering::SeqCst) || !alive.load(Ordering::Relaxed) {
            return false;
        }
        match incoming_tx.send_timeout(pending, POLL_INTERVAL) {
            Ok(()) => return true,
            Err(crossbeam::channel::SendTimeoutError::Timeout(back)) => pending = back,
            Err(crossbeam::channel::SendTimeoutError::Disconnected(_)) => return false,
        }
    }
}

fn resolve(addr: &str) -> Result<SocketAddr, String> {
    addr.to_socket_addrs()
        .map_err(|e| format!("{addr}: {e}"))?
        .next()
        .ok_or_else(|| format!("{addr}: no address"))
}
