//! Root role: registration, neighbour assignment and liveness pruning

use std::collections::HashMap;
use std::time::Duration;

use canopy_topology::{NetworkGraph, TopologyError};
use canopy_wire::{Address, Packet, PacketBody};
use chrono::{DateTime, Utc};
use tracing::{debug, info, warn};

use crate::bridge::DisplayEvent;
use crate::config::PeerConfig;
use crate::handler::{HandlerContext, PacketHandler};

pub struct RootHandler {
    local_addr: Address,
    graph: NetworkGraph,
    /// When each tracked peer last proved liveness (Advertise counts).
    last_reunion_recv: HashMap<Address, DateTime<Utc>>,
    turn_off_after: Duration,
    remove_after: Duration,
}

fn stale(since: DateTime<Utc>, threshold: Duration) -> bool {
    Utc::now().signed_duration_since(since)
        > chrono::Duration::from_std(threshold).unwrap_or_else(|_| chrono::Duration::max_value())
}

impl RootHandler {
    pub fn new(local_addr: Address, config: &PeerConfig) -> Self {
        Self {
            local_addr,
            graph: NetworkGraph::new(local_addr),
            last_reunion_recv: HashMap::new(),
            turn_off_after: config.turn_off_after,
            remove_after: config.remove_after,
        }
    }

    pub fn graph(&self) -> &NetworkGraph {
        &self.graph
    }

    pub fn is_tracking(&self, peer: Address) -> bool {
        self.last_reunion_recv.contains_key(&peer)
    }

    /// Staleness sweep, run once per main-loop tick before the flush.
    ///
    /// Silence past `turn_off_after` excludes the peer's subtree from
    /// neighbour assignment; past `remove_after` the peer is expired:
    /// subtree deleted, connection dropped, tracking entry removed.
    pub fn sweep(&mut self, ctx: &mut HandlerContext<'_>) {
        let mut expired = Vec::new();
        for (&peer, &last) in &self.last_reunion_recv {
            if stale(last, self.remove_after) {
                expired.push(peer);
            } else if stale(last, self.turn_off_after) {
                self.graph.turn_off(peer);
            }
        }
        for peer in expired {
            info!(peer = %peer, "peer silent past removal threshold, expiring");
            self.graph.expire(peer);
            ctx.connections.remove_peer(peer);
            self.last_reunion_recv.remove(&peer);
            ctx.emit(DisplayEvent::PeerExpired { peer });
        }
    }

    /// A flushed send failed: logically detach the peer's subtree and
    /// stop tracking it. The connection itself was already dropped. A
    /// later re-Advertise from the peer revives and re-parents it.
    pub fn recover_failed(&mut self, failed: &[Address]) {
        for &peer in failed {
            warn!(peer = %peer, "send failed, detaching subtree");
            self.graph.remove_subtree(peer);
            self.last_reunion_recv.remove(&peer);
        }
    }
}

impl PacketHandler for RootHandler {
    fn handle_register(&mut self, ctx: &mut HandlerContext<'_>, packet: &Packet) {
        if !packet.is_request() {
            return;
        }
        let peer = packet.source;
        // Idempotent: a duplicate request re-ACKs on the existing
        // connection, so a peer whose ACK was lost can re-register.
        ctx.connections.add(peer, true);
        ctx.enqueue(peer, PacketBody::RegisterResponse, true);
        debug!(peer = %peer, "peer registered");
    }

    fn handle_advertise(&mut self, ctx: &mut HandlerContext<'_>, packet: &Packet) {
        if !packet.is_request() {
            return;
        }
        let peer = packet.source;
        // Advertise from an unregistered address is a stale or
        // out-of-order request; ignore it rather than error.
        if !ctx.connections.contains(peer, true) {
            debug!(peer = %peer, "advertise from unregistered peer ignored");
            return;
        }

        let neighbour = match self.graph.find_live_neighbour(peer) {
            Ok(neighbour) => neighbour,
            Err(TopologyError::NoCapacity) => {
                // Degrade instead of rejecting: advertise the root
                // itself and let the join land as a deeper placement.
                warn!(peer = %peer, "tree at capacity, advertising root");
                self.local_addr
            }
            Err(e) => {
                warn!(peer = %peer, error = %e, "neighbour selection failed");
                return;
            }
        };

        let result = if self.graph.contains(peer) {
            self.graph.reparent(peer, neighbour)
        } else {
            self.graph.add_node(peer, neighbour)
        };
        if let Err(e) = result {
            warn!(peer = %peer, error = %e, "graph update failed");
            return;
        }

        self.last_reunion_recv.insert(peer, Utc::now());
        ctx.enqueue(peer, PacketBody::AdvertiseResponse { neighbour }, true);
        info!(peer = %peer, neighbour = %neighbour, "neighbour assigned");
    }

    fn handle_join(&mut self, ctx: &mut HandlerContext<'_>, packet: &Packet) {
        ctx.connections.add(packet.source, false);
        ctx.emit(DisplayEvent::PeerJoined {
            peer: packet.source,
        });
    }

    fn handle_message(&mut self, ctx: &mut HandlerContext<'_>, packet: &Packet) {
        let PacketBody::Message { text } = &packet.body else {
            return;
        };
        if !ctx.connections.contains(packet.source, false) {
            debug!(peer = %packet.source, "message from unknown connection ignored");
            return;
        }
        ctx.emit(DisplayEvent::Message {
            from: packet.source,
            text: text.clone(),
        });
        for target in ctx.connections.broadcast_targets(packet.source) {
            ctx.enqueue(target, PacketBody::Message { text: text.clone() }, false);
        }
    }

    fn handle_reunion(&mut self, ctx: &mut HandlerContext<'_>, packet: &Packet) {
        let PacketBody::ReunionRequest { path } = &packet.body else {
            return;
        };
        let (Some(&sender), Some(&last_hop)) = (path.first(), path.last()) else {
            return;
        };
        self.graph.turn_on(sender);
        self.last_reunion_recv.insert(sender, Utc::now());

        // The response retraces the exact upward path, root-to-leaf.
        let mut reversed = path.clone();
        reversed.reverse();
        ctx.enqueue(
            last_hop,
            PacketBody::ReunionResponse { path: reversed },
            false,
        );
        debug!(peer = %sender, hops = path.len(), "reunion answered");
    }
}
