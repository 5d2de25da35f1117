use std::cell::RefCell;
use std::collections::{HashMap, HashSet, VecDeque};
use std::rc::Rc;

use crate::protocol::PeerId;

/// Connection-lifecycle notification from the underlying P2P service.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TransportEvent {
    /// A peer attempted first contact; nothing is delivered until the
    /// session is explicitly accepted.
    SessionRequested(PeerId),
    SessionFailed { peer: PeerId, reason: String },
}

/// Unreliable, per-peer-ordered datagram channel. Sends are best-effort with
/// no delivery guarantee; receives are non-blocking polls driven from the
/// per-frame pump.
pub trait PeerTransport {
    fn local_id(&self) -> PeerId;
    /// Best-effort send. `false` means the transport refused the datagram;
    /// there is no retry.
    fn send(&mut self, peer: PeerId, bytes: &[u8]) -> bool;
    fn try_recv(&mut self) -> Option<(PeerId, Vec<u8>)>;
    fn poll_event(&mut self) -> Option<TransportEvent>;
    fn accept_session(&mut self, peer: PeerId);
    fn close_session(&mut self, peer: PeerId);
}

#[derive(Debug, Default)]
struct Endpoint {
    inbox: VecDeque<(PeerId, Vec<u8>)>,
    events: VecDeque<TransportEvent>,
    accepted: HashSet<PeerId>,
    requested: HashSet<PeerId>,
    pending: HashMap<PeerId, VecDeque<Vec<u8>>>,
}

#[derive(Debug, Default)]
struct HubInner {
    endpoints: HashMap<PeerId, Endpoint>,
}

/// In-memory P2P network connecting loopback endpoints by peer id. Mirrors
/// the session semantics of a relayed P2P service: first contact raises
/// `SessionRequested` on the receiver and buffers datagrams until the
/// session is accepted; rejection drops the buffer and reports failure to
/// the sender. Single-threaded by design, like the rest of the core.
#[derive(Debug, Clone, Default)]
pub struct LoopbackHub {
    inner: Rc<RefCell<HubInner>>,
}

impl LoopbackHub {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn endpoint(&self, id: PeerId) -> LoopbackTransport {
        self.inner.borrow_mut().endpoints.entry(id).or_default();
        LoopbackTransport {
            inner: Rc::clone(&self.inner),
            local: id,
        }
    }

    /// Deliver raw bytes with an arbitrary claimed sender, bypassing session
    /// establishment. Spoofing entry point for tests.
    pub fn inject(&self, from: PeerId, to: PeerId, bytes: &[u8]) {
        if let Some(endpoint) = self.inner.borrow_mut().endpoints.get_mut(&to) {
            endpoint.inbox.push_back((from, bytes.to_vec()));
        }
    }
}

#[derive(Debug)]
pub struct LoopbackTransport {
    inner: Rc<RefCell<HubInner>>,
    local: PeerId,
}

impl PeerTransport for LoopbackTransport {
    fn local_id(&self) -> PeerId {
        self.local
    }

    fn send(&mut self, peer: PeerId, bytes: &[u8]) -> bool {
        let mut inner = self.inner.borrow_mut();
        let Some(endpoint) = inner.endpoints.get_mut(&peer) else {
            return false;
        };
        if endpoint.accepted.contains(&self.local) {
            endpoint.inbox.push_back((self.local, bytes.to_vec()));
            return true;
        }
        if endpoint.requested.insert(self.local) {
            endpoint
                .events
                .push_back(TransportEvent::SessionRequested(self.local));
        }
        endpoint
            .pending
            .entry(self.local)
            .or_default()
            .push_back(bytes.to_vec());
        true
    }

    fn try_recv(&mut self) -> Option<(PeerId, Vec<u8>)> {
        self.inner
            .borrow_mut()
            .endpoints
            .get_mut(&self.local)?
            .inbox
            .pop_front()
    }

    fn poll_event(&mut self) -> Option<TransportEvent> {
        self.inner
            .borrow_mut()
            .endpoints
            .get_mut(&self.local)?
            .events
            .pop_front()
    }

    fn accept_session(&mut self, peer: PeerId) {
        let mut inner = self.inner.borrow_mut();
        let Some(endpoint) = inner.endpoints.get_mut(&self.local) else {
            return;
        };
        endpoint.requested.remove(&peer);
        endpoint.accepted.insert(peer);
        if let Some(buffered) = endpoint.pending.remove(&peer) {
            for bytes in buffered {
                endpoint.inbox.push_back((peer, bytes));
            }
        }
    }

    fn close_session(&mut self, peer: PeerId) {
        let mut inner = self.inner.borrow_mut();
        let mut rejected = false;
        if let Some(endpoint) = inner.endpoints.get_mut(&self.local) {
            rejected = endpoint.requested.remove(&peer);
            endpoint.accepted.remove(&peer);
            endpoint.pending.remove(&peer);
        }
        if let Some(remote) = inner.endpoints.get_mut(&peer) {
            remote.accepted.remove(&self.local);
            if rejected {
                remote.events.push_back(TransportEvent::SessionFailed {
                    peer: self.local,
                    reason: String::from("session rejected"),
                });
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_first_contact_requests_session() {
        let hub = LoopbackHub::new();
        let mut a = hub.endpoint(1);
        let mut b = hub.endpoint(2);

        assert!(a.send(2, b"hello"));
        // Nothing delivered before acceptance.
        assert_eq!(b.try_recv(), None);
        assert_eq!(b.poll_event(), Some(TransportEvent::SessionRequested(1)));

        b.accept_session(1);
        assert_eq!(b.try_recv(), Some((1, b"hello".to_vec())));

        // Established session delivers directly.
        assert!(a.send(2, b"again"));
        assert_eq!(b.try_recv(), Some((1, b"again".to_vec())));
    }

    #[test]
    fn test_rejection_drops_buffer_and_notifies_sender() {
        let hub = LoopbackHub::new();
        let mut a = hub.endpoint(1);
        let mut b = hub.endpoint(2);

        a.send(2, b"one");
        a.send(2, b"two");
        assert_eq!(b.poll_event(), Some(TransportEvent::SessionRequested(1)));
        b.close_session(1);

        assert_eq!(b.try_recv(), None);
        assert_eq!(
            a.poll_event(),
            Some(TransportEvent::SessionFailed {
                peer: 2,
                reason: String::from("session rejected"),
            })
        );
    }

    #[test]
    fn test_send_to_unknown_peer_fails() {
        let hub = LoopbackHub::new();
        let mut a = hub.endpoint(1);
        assert!(!a.send(99, b"void"));
    }

    #[test]
    fn test_per_peer_ordering() {
        let hub = LoopbackHub::new();
        let mut a = hub.endpoint(1);
        let mut b = hub.endpoint(2);
        b.accept_session(1);

        for i in 0..5u8 {
            a.send(2, &[i]);
        }
        for i in 0..5u8 {
            assert_eq!(b.try_recv(), Some((1, vec![i])));
        }
    }

    #[test]
    fn test_inject_bypasses_sessions() {
        let hub = LoopbackHub::new();
        let mut b = hub.endpoint(2);
        hub.inject(7, 2, b"spoof");
        assert_eq!(b.try_recv(), Some((7, b"spoof".to_vec())));
    }
}
