// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 daqflow developers

//! Process-wide registry of `inproc://` endpoints.
//!
//! Binding an inproc endpoint publishes the binder's peer table and
//! incoming channel under the endpoint name; connecting wires the two
//! sockets together with direct channel links. Messages never touch the
//! network stack, which makes this the transport of choice for tests.

use super::endpoint::TransportError;
use super::socket::{Peer, PeerLink};
use crossbeam::channel::Sender;
use dashmap::DashMap;
use parking_lot::Mutex;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, OnceLock};

/// What a bound inproc endpoint exposes to connectors.
pub(crate) struct InprocBinding {
    /// Feeds the binder's incoming queue; the tag is the connector's peer
    /// id as assigned by the binder.
    pub incoming_tx: Sender<(usize, Vec<u8>)>,
    /// The binder's peer table; connectors add themselves here.
    pub peers: Arc<Mutex<Vec<Peer>>>,
    /// Allocator for peer ids on the binder side.
    pub next_peer_id: Arc<AtomicUsize>,
}

fn registry() -> &'static DashMap<String, InprocBinding> {
    static REGISTRY: OnceLock<DashMap<String, InprocBinding>> = OnceLock::new();
    REGISTRY.get_or_init(DashMap::new)
}

/// Publish a binding under `name`.
pub(crate) fn bind(name: &str, binding: InprocBinding) -> Result<(), TransportError> {
    use dashmap::mapref::entry::Entry;
    match registry().entry(name.to_string()) {
        Entry::Occupied(_) => Err(TransportError::EndpointInUse(name.to_string())),
        Entry::Vacant(slot) => {
            slot.insert(binding);
            Ok(())
        }
    }
}

/// Remove a binding; connectors see the link go dead on their next send.
pub(crate) fn unbind(name: &str) {
    registry().remove(name);
}

/// Wire a connector into the binding registered under `name`.
///
/// Returns the peer entry the connector should add to its own peer table.
pub(crate) fn connect(
    name: &str,
    connector_incoming: Sender<(usize, Vec<u8>)>,
) -> Result<Peer, TransportError> {
    let binding = registry()
        .get(name)
        .ok_or_else(|| TransportError::EndpointNotFound(name.to_string()))?;

    let alive = Arc::new(AtomicBool::new(true));
    let id_at_binder = binding.next_peer_id.fetch_add(1, Ordering::SeqCst);

    // The binder sees the connector as peer `id_at_binder`; the connector
    // sees the binder as its peer 0.
    binding.peers.lock().push(Peer {
        id: id_at_binder,
        link: PeerLink::Direct {
            tx: connector_incoming,
            remote_peer_id: 0,
        },
        alive: Arc::clone(&alive),
    });

    Ok(Peer {
        id: 0,
        link: PeerLink::Direct {
            tx: binding.incoming_tx.clone(),
            remote_peer_id: id_at_binder,
        },
        alive,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crossbeam::channel::bounded;

    #[test]
    fn bind_connect_unbind() {
        let (bind_tx, bind_rx) = bounded(8);
        let peers = Arc::new(Mutex::new(Vec::new()));
        bind(
            "test-bind-connect",
            InprocBinding {
                incoming_tx: bind_tx,
                peers: Arc::clone(&peers),
                next_peer_id: Arc::new(AtomicUsize::new(0)),
            },
        )
        .expect("bind");

        let (conn_tx, conn_rx) = bounded(8);
        let peer = connect("test-bind-connect", conn_tx).expect("connect");

        // Connector -> binder.
        assert!(peer.try_send(vec![1, 2, 3]).is_ok());
        let (from, msg) = bind_rx.try_recv().expect("delivered");
        assert_eq!(from, 0);
        assert_eq!(msg, vec![1, 2, 3]);

        // Binder -> connector through its peer table.
        let binder_peers = peers.lock();
        assert_eq!(binder_peers.len(), 1);
        assert!(binder_peers[0].try_send(vec![9]).is_ok());
        drop(binder_peers);
        assert_eq!(conn_rx.try_recv().expect("delivered").1, vec![9]);

        unbind("test-bind-connect");
        assert!(connect("test-bind-connect", bounded(1).0).is_err());
    }

    #[test]
    fn double_bind_rejected() {
        let make = || InprocBinding {
            incoming_tx: bounded(1).0,
            peers: Arc::new(Mutex::new(Vec::new())),
            next_peer_id: Arc::new(AtomicUsize::new(0)),
        };
        bind("test-double-bind", make()).expect("first bind");
        assert_eq!(
            bind("test-double-bind", make()),
            Err(TransportError::EndpointInUse("test-double-bind".into()))
        );
        unbind("test-double-bind");
    }

    #[test]
    fn connect_unknown_endpoint_fails() {
        assert_eq!(
            connect("test-no-such-endpoint", bounded(1).0).err(),
            Some(TransportError::EndpointNotFound(
                "test-no-such-endpoint".into()
            ))
        );
    }
}
