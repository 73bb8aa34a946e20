// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 daqflow developers

//! Pattern sockets: the send/receive engine shared by TCP and inproc links.
//!
//! A [`PatternSocket`] owns a peer table and one bounded incoming queue.
//! Links feed the queue from reader threads (TCP) or directly from the
//! sending socket (inproc). The pattern decides the delivery policy:
//! fan-out clones to every peer and drops to a full peer queue, load
//! balancing round-robins and reports back-pressure, request/reply tracks
//! the peer to answer.

use super::endpoint::{Endpoint, SocketPattern, TransportError};
use super::{inproc, tcp};
use crossbeam::channel::{bounded, Receiver, Sender, TrySendError};
use parking_lot::Mutex;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Arc;
use std::thread::JoinHandle;
use std::time::{Duration, Instant};

/// Default bound of the incoming queue and of each per-peer queue.
pub const DEFAULT_QUEUE_CAPACITY: usize = 1024;

/// Default receive timeout bounding `receive` calls.
pub const DEFAULT_RECV_TIMEOUT: Duration = Duration::from_secs(1);

/// Upper bound on a single wire message; larger length prefixes are
/// treated as stream corruption.
pub const MAX_MESSAGE_SIZE: usize = 64 * 1024 * 1024;

/// Delivery path to one peer.
pub(crate) enum PeerLink {
    /// TCP: per-connection writer queue, drained by a writer thread.
    Queue(Sender<Vec<u8>>),
    /// Inproc: the remote socket's incoming queue, tagged with the id this
    /// socket has in the remote peer table.
    Direct {
        tx: Sender<(usize, Vec<u8>)>,
        remote_peer_id: usize,
    },
}

/// One entry of a socket's peer table.
pub(crate) struct Peer {
    /// Peer id as seen by the owning socket.
    pub id: usize,
    pub link: PeerLink,
    /// Shared with the other end of the link; either side may clear it.
    pub alive: Arc<AtomicBool>,
}

impl Peer {
    pub(crate) fn is_alive(&self) -> bool {
        self.alive.load(Ordering::Relaxed)
    }

    /// Non-blocking send; hands the message back on a full queue so the
    /// caller can retry another peer without cloning.
    pub(crate) fn try_send(&self, msg: Vec<u8>) -> Result<(), Vec<u8>> {
        if !self.is_alive() {
            return Err(msg);
        }
        match &self.link {
            PeerLink::Queue(tx) => match tx.try_send(msg) {
                Ok(()) => Ok(()),
                Err(TrySendError::Full(m)) => Err(m),
                Err(TrySendError::Disconnected(m)) => {
                    self.alive.store(false, Ordering::Relaxed);
                    Err(m)
                }
            },
            PeerLink::Direct { tx, remote_peer_id } => {
                match tx.try_send((*remote_peer_id, msg)) {
                    Ok(()) => Ok(()),
                    Err(TrySendError::Full((_, m))) => Err(m),
                    Err(TrySendError::Disconnected((_, m))) => {
                        self.alive.store(false, Ordering::Relaxed);
                        Err(m)
                    }
                }
            }
        }
    }
}

/// A single socket speaking one messaging pattern on one endpoint.
pub struct PatternSocket {
    pattern: SocketPattern,
    endpoint: Endpoint,
    peers: Arc<Mutex<Vec<Peer>>>,
    /// Keeps the incoming channel connected even with zero live links, so
    /// `receive` honors its timeout instead of failing fast.
    _incoming_keepalive: Sender<(usize, Vec<u8>)>,
    incoming_rx: Receiver<(usize, Vec<u8>)>,
    rr_cursor: AtomicUsize,
    last_peer: Mutex<Option<usize>>,
    recv_timeout: Duration,
    shutdown: Arc<AtomicBool>,
    threads: Arc<Mutex<Vec<JoinHandle<()>>>>,
    /// Actual local port for TCP binds (relevant when binding port 0).
    local_port: Option<u16>,
}

impl PatternSocket {
    /// Bind or connect `endpoint` according to the pattern's role.
    pub fn open(
        endpoint: Endpoint,
        pattern: SocketPattern,
        recv_timeout: Duration,
    ) -> Result<Self, TransportError> {
        let (incoming_tx, incoming_rx) = bounded(DEFAULT_QUEUE_CAPACITY);
        let peers = Arc::new(Mutex::new(Vec::new()));
        let next_peer_id = Arc::new(AtomicUsize::new(0));
        let shutdown = Arc::new(AtomicBool::new(false));
        let threads = Arc::new(Mutex::new(Vec::new()));
        let mut local_port = None;

        match (&endpoint, pattern.binds()) {
            (Endpoint::Inproc(name), true) => {
                inproc::bind(
                    name,
                    inproc::InprocBinding {
                        incoming_tx: incoming_tx.clone(),
                        peers: Arc::clone(&peers),
                        next_peer_id: Arc::clone(&next_peer_id),
                    },
                )?;
            }
            (Endpoint::Inproc(name), false) => {
                let peer = inproc::connect(name, incoming_tx.clone())?;
                peers.lock().push(peer);
            }
            (Endpoint::Tcp { .. }, true) => {
                local_port = Some(tcp::spawn_acceptor(
                    &endpoint,
                    pattern,
                    Arc::clone(&peers),
                    incoming_tx.clone(),
                    Arc::clone(&next_peer_id),
                    Arc::clone(&shutdown),
                    Arc::clone(&threads),
                )?);
            }
            (Endpoint::Tcp { .. }, false) => {
                tcp::connect_peer(
                    &endpoint,
                    pattern,
                    Arc::clone(&peers),
                    incoming_tx.clone(),
                    Arc::clone(&next_peer_id),
                    Arc::clone(&shutdown),
                    Arc::clone(&threads),
                )?;
            }
        }

        log::debug!(
            "[Transport] opened {} socket on {}",
            pattern.as_str(),
            endpoint
        );

        Ok(Self {
            pattern,
            endpoint,
            peers,
            _incoming_keepalive: incoming_tx,
            incoming_rx,
            rr_cursor: AtomicUsize::new(0),
            last_peer: Mutex::new(None),
            recv_timeout,
            shutdown,
            threads,
            local_port,
        })
    }

    #[must_use]
    pub fn pattern(&self) -> SocketPattern {
        self.pattern
    }

    #[must_use]
    pub fn endpoint(&self) -> &Endpoint {
        &self.endpoint
    }

    /// Local TCP port after binding (`Some` only for TCP binders).
    #[must_use]
    pub fn local_port(&self) -> Option<u16> {
        self.local_port
    }

    /// Number of live peers.
    #[must_use]
    pub fn peer_count(&self) -> usize {
        self.peers.lock().iter().filter(|p| p.is_alive()).count()
    }

    /// Send one message according to the pattern's delivery policy.
    ///
    /// Ownership of `msg` moves into the socket. Returns `false` when the
    /// pattern cannot send, when a non-lossy send would block, or when a
    /// reply has no peer to go to. A fan-out send to zero peers succeeds
    /// (fire-and-forget semantics).
    pub fn send(&self, msg: Vec<u8>) -> bool {
        if !self.pattern.can_send() {
            return false;
        }

        let mut peers = self.peers.lock();
        peers.retain(Peer::is_alive);

        match self.pattern {
            SocketPattern::Pub => {
                for peer in peers.iter() {
                    // Slow subscribers lose frames; that is the pattern's
                    // contract and the gap detector's reason to exist.
                    if peer.try_send(msg.clone()).is_err() {
                        log::debug!("[Transport] dropping frame to slow peer {}", peer.id);
                    }
                }
                true
            }
            SocketPattern::Push => {
                if peers.is_empty() {
                    return false;
                }
                let n = peers.len();
                let start = self.rr_cursor.fetch_add(1, Ordering::Relaxed);
                let mut msg = msg;
                for k in 0..n {
                    match peers[(start + k) % n].try_send(msg) {
                        Ok(()) => return true,
                        Err(back) => msg = back,
                    }
                }
                false
            }
            SocketPattern::Rep => {
                let Some(target) = *self.last_peer.lock() else {
                    return false;
                };
                match peers.iter().find(|p| p.id == target) {
                    Some(peer) => peer.try_send(msg).is_ok(),
                    None => false,
                }
            }
            _ => match peers.first() {
                Some(peer) => peer.try_send(msg).is_ok(),
                None => false,
            },
        }
    }

    /// Receive one message, waiting up to the configured timeout.
    #[must_use]
    pub fn receive(&self) -> Option<Vec<u8>> {
        self.receive_timeout(self.recv_timeout)
    }

    /// Receive one message, waiting up to `timeout`.
    #[must_use]
    pub fn receive_timeout(&self, timeout: Duration) -> Option<Vec<u8>> {
        if !self.pattern.can_recv() {
            return None;
        }
        match self.incoming_rx.recv_timeout(timeout) {
            Ok((peer, msg)) => {
                if self.pattern == SocketPattern::Rep {
                    *self.last_peer.lock() = Some(peer);
                }
                Some(msg)
            }
            Err(_) => None,
        }
    }

    /// Wait until at least `count` peers are connected, bounded by `timeout`.
    ///
    /// Binding sockets accept asynchronously; tests and the arm sequence
    /// use this to avoid publishing into the void.
    pub fn wait_for_peers(&self, count: usize, timeout: Duration) -> bool {
        let deadline = Instant::now() + timeout;
        while self.peer_count() < count {
            if Instant::now() >= deadline {
                return false;
            }
            std::thread::sleep(Duration::from_millis(5));
        }
        true
    }

    fn close(&self) {
        self.shutdown.store(true, Ordering::SeqCst);
        {
            let peers = self.peers.lock();
            for peer in peers.iter() {
                peer.alive.store(false, Ordering::Relaxed);
            }
        }
        if let (Endpoint::Inproc(name), true) = (&self.endpoint, self.pattern.binds()) {
            inproc::unbind(name);
        }
        let handles: Vec<JoinHandle<()>> = std::mem::take(&mut *self.threads.lock());
        for handle in handles {
            let _ = handle.join();
        }
    }
}

impl Drop for PatternSocket {
    fn drop(&mut self) {
        self.close();
    }
}

impl std::fmt::Debug for PatternSocket {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PatternSocket")
            .field("pattern", &self.pattern)
            .field("endpoint", &self.endpoint)
            .field("peers", &self.peers.lock().len())
            .finish()
    }
}
