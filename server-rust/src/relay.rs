//! LAN relay: routes frames between clients and workers of a session.
//!
//! Clients' requests queue per session and go out to idle workers one at a
//! time. A result goes back to the client that sent the request with the
//! same id. When a worker drops, its in-flight request goes back to the
//! front of the queue.

use std::collections::{HashMap, VecDeque};
use std::net::SocketAddr;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};

use grid_protocol::shutdown::{cancelled, ShutdownReceiver};
use grid_protocol::transport::{read_frame, write_frame, Frame};
use grid_protocol::{Envelope, PeerRole, WireMessage};
use tokio::io::{AsyncBufReadExt, BufReader};
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::mpsc;

use crate::models::RelayStatus;

type PeerId = u64;

struct Peer {
    role: PeerRole,
    session: String,
    name: String,
    tx: mpsc::UnboundedSender<Frame>,
}

#[derive(Default)]
struct Routing {
    peers: HashMap<PeerId, Peer>,
    /// Pending requests per session
    queues: HashMap<String, VecDeque<Envelope>>,
    /// Idle workers per session
    idle: HashMap<String, VecDeque<PeerId>>,
    /// Request id -> client that sent it
    origins: HashMap<String, PeerId>,
    /// Worker -> request it is working on
    in_flight: HashMap<PeerId, Envelope>,
    routed_results: u64,
}

pub struct Relay {
    routing: Mutex<Routing>,
    next_peer: AtomicU64,
}

impl Relay {
    pub fn new() -> Arc<Self> {
        Arc::new(Self { routing: Mutex::new(Routing::default()), next_peer: AtomicU64::new(1) })
    }

    fn routing(&self) -> MutexGuard<'_, Routing> {
        self.routing.lock().unwrap_or_else(|e| e.into_inner())
    }

    pub fn status(&self) -> RelayStatus {
        let routing = self.routing();
        let workers = routing.peers.values().filter(|p| p.role == PeerRole::Worker).count();
        RelayStatus {
            clients: routing.peers.len() - workers,
            workers,
            idle_workers: routing.idle.values().map(VecDeque::len).sum(),
            queued_requests: routing.queues.values().map(VecDeque::len).sum(),
            in_flight: routing.in_flight.len(),
            routed_results: routing.routed_results,
        }
    }

    /// Accept peers until `shutdown` fires, then say goodbye to everyone
    pub async fn serve(self: Arc<Self>, listener: TcpListener, mut shutdown: ShutdownReceiver) {
        loop {
            let accepted = tokio::select! {
                accepted = listener.accept() => accepted,
                _ = cancelled(&mut shutdown) => break,
            };
            match accepted {
                Ok((stream, addr)) => {
                    let relay = self.clone();
                    tokio::spawn(async move {
                        relay.handle_connection(stream, addr).await;
                    });
                }
                Err(e) => tracing::warn!("Relay accept failed: {e}"),
            }
        }
        {
            let routing = self.routing();
            for peer in routing.peers.values() {
                let _ = peer.tx.send(Frame::Bye);
            }
        }
        tracing::info!("Relay stopped");
    }

    async fn handle_connection(self: Arc<Self>, stream: TcpStream, addr: SocketAddr) {
        if let Err(e) = stream.set_nodelay(true) {
            tracing::debug!(peer = %addr, "set_nodelay failed: {e}");
        }
        let (read_half, mut write_half) = stream.into_split();
        let mut lines = BufReader::new(read_half).lines();

        let (role, session, name) = match read_frame(&mut lines).await {
            Ok(Some(Frame::Hello { role, session, name })) => (role, session, name),
            Ok(other) => {
                tracing::warn!(peer = %addr, frame = ?other, "Connection did not open with hello, dropped");
                return;
            }
            Err(e) => {
                tracing::warn!(peer = %addr, "Bad hello: {e}");
                return;
            }
        };

        let (tx, mut rx) = mpsc::unbounded_channel::<Frame>();
        let writer = tokio::spawn(async move {
            while let Some(frame) = rx.recv().await {
                let last = matches!(frame, Frame::Bye);
                if let Err(e) = write_frame(&mut write_half, &frame).await {
                    tracing::debug!("Relay write failed: {e}");
                    break;
                }
                if last {
                    break;
                }
            }
        });

        let id = self.register(role, &session, &name, tx);
        tracing::info!(peer = id, addr = %addr, role = ?role, session = %session, name = %name, "🔌 Peer joined");

        loop {
            match read_frame(&mut lines).await {
                Ok(Some(Frame::Deliver { envelope })) => self.deliver(id, envelope),
                Ok(Some(Frame::Bye)) | Ok(None) => break,
                Ok(Some(Frame::Hello { .. })) => tracing::warn!(peer = id, "Repeated hello ignored"),
                Err(e) => {
                    tracing::warn!(peer = id, "Relay read failed: {e}");
                    break;
                }
            }
        }

        self.unregister(id);
        writer.abort();
        tracing::info!(peer = id, role = ?role, session = %session, "Peer left");
    }

    fn register(&self, role: PeerRole, session: &str, name: &str, tx: mpsc::UnboundedSender<Frame>) -> PeerId {
        let id = self.next_peer.fetch_add(1, Ordering::SeqCst);
        let mut routing = self.routing();
        routing.peers.insert(id, Peer { role, session: session.to_string(), name: name.to_string(), tx });
        if role == PeerRole::Worker {
            routing.idle.entry(session.to_string()).or_default().push_back(id);
            routing.dispatch(session);
        }
        id
    }

    fn deliver(&self, from: PeerId, envelope: Envelope) {
        let mut guard = self.routing();
        let routing = &mut *guard;
        let Some(peer) = routing.peers.get(&from) else {
            return;
        };
        let (role, session) = (peer.role, peer.session.clone());
        let id = envelope.message.id().to_string();
        let is_request = matches!(envelope.message, WireMessage::WorkRequest(_));

        match (role, is_request) {
            (PeerRole::Client, true) => {
                routing.origins.insert(id, from);
                routing.queues.entry(session.clone()).or_default().push_back(envelope);
                routing.dispatch(&session);
            }
            (PeerRole::Worker, false) => {
                routing.in_flight.remove(&from);
                let client = routing.origins.remove(&id).and_then(|c| routing.peers.get(&c));
                let delivered = match client {
                    Some(client) => client.tx.send(Frame::Deliver { envelope }).is_ok(),
                    None => false,
                };
                if delivered {
                    routing.routed_results += 1;
                } else {
                    tracing::warn!(request = %id, "No client waiting for this result, dropped");
                }
                routing.idle.entry(session.clone()).or_default().push_back(from);
                routing.dispatch(&session);
            }
            (role, _) => {
                tracing::warn!(peer = from, role = ?role, id = %id, "Unexpected message direction, dropped");
            }
        }
    }

    fn unregister(&self, id: PeerId) {
        let mut routing = self.routing();
        let Some(peer) = routing.peers.remove(&id) else {
            return;
        };
        match peer.role {
            PeerRole::Worker => {
                if let Some(idle) = routing.idle.get_mut(&peer.session) {
                    idle.retain(|w| *w != id);
                }
                if let Some(envelope) = routing.in_flight.remove(&id) {
                    tracing::warn!(worker = %peer.name, request = %envelope.message.id(), "Worker dropped mid-request, re-queued");
                    routing.queues.entry(peer.session.clone()).or_default().push_front(envelope);
                    routing.dispatch(&peer.session);
                }
            }
            PeerRole::Client => {
                let Routing { queues, origins, .. } = &mut *routing;
                if let Some(queue) = queues.get_mut(&peer.session) {
                    let before = queue.len();
                    queue.retain(|e| origins.get(e.message.id()) != Some(&id));
                    if before != queue.len() {
                        tracing::info!(client = %peer.name, dropped = before - queue.len(), "Discarded queued requests of departed client");
                    }
                }
                origins.retain(|_, client| *client != id);
            }
        }
    }
}

impl Routing {
    /// Hand queued requests of `session` to its idle workers
    fn dispatch(&mut self, session: &str) {
        loop {
            let has_work = self.queues.get(session).is_some_and(|q| !q.is_empty());
            if !has_work {
                return;
            }
            let Some(worker) = self.idle.get_mut(session).and_then(VecDeque::pop_front) else {
                return;
            };
            let Some(tx) = self.peers.get(&worker).map(|p| p.tx.clone()) else {
                continue;
            };
            let Some(envelope) = self.queues.get_mut(session).and_then(VecDeque::pop_front) else {
                return;
            };
            if tx.send(Frame::Deliver { envelope: envelope.clone() }).is_err() {
                self.queues.entry(session.to_string()).or_default().push_front(envelope);
                continue;
            }
            tracing::debug!(worker = worker, request = %envelope.message.id(), "Request dispatched");
            self.in_flight.insert(worker, envelope);
        }
    }
}
