//! Non-root role: registration, join flow and the reunion cycle
//!
//! Reunion is a ping/ack over the tree path: `Accepted` means the last
//! hello was answered, `Pending` means one is in flight. A hello left
//! unanswered past the valid window means the path to root broke
//! somewhere, and the peer re-discovers a parent via Advertise instead
//! of assuming permanent failure.

use std::time::Duration;

use canopy_wire::{Address, Packet, PacketBody, PacketKind};
use chrono::{DateTime, Utc};
use tracing::{debug, info, warn};

use crate::bridge::DisplayEvent;
use crate::config::PeerConfig;
use crate::handler::{HandlerContext, PacketHandler};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReunionMode {
    /// Not yet in the reunion cycle, or back out of it after a timeout.
    Idle,
    /// Hello sent, response outstanding.
    Pending,
    /// Last hello answered; path to root confirmed.
    Accepted,
}

pub struct LeafHandler {
    root_addr: Address,
    pub(crate) parent: Option<Address>,
    pub(crate) registered: bool,
    pub(crate) reunion_mode: ReunionMode,
    /// Set by the first Advertise-Response; the reunion timer no-ops
    /// until then and is never armed twice.
    timer_armed: bool,
    pub(crate) last_reunion_send: Option<DateTime<Utc>>,
    last_advertise_send: Option<DateTime<Utc>>,
    reunion_valid: Duration,
    pub(crate) disconnected: bool,
}

fn expired(since: Option<DateTime<Utc>>, window: Duration) -> bool {
    match since {
        Some(t) => {
            Utc::now().signed_duration_since(t)
                > chrono::Duration::from_std(window)
                    .unwrap_or_else(|_| chrono::Duration::max_value())
        }
        None => false,
    }
}

impl LeafHandler {
    pub fn new(root_addr: Address, config: &PeerConfig) -> Self {
        Self {
            root_addr,
            parent: None,
            registered: false,
            reunion_mode: ReunionMode::Idle,
            timer_armed: false,
            last_reunion_send: None,
            last_advertise_send: None,
            reunion_valid: config.reunion_valid,
            disconnected: false,
        }
    }

    pub fn root_addr(&self) -> Address {
        self.root_addr
    }

    pub fn parent(&self) -> Option<Address> {
        self.parent
    }

    /// Startup handshake: register with the root and ask for a
    /// neighbour, both over the permanent register connection.
    pub fn start(&mut self, ctx: &mut HandlerContext<'_>) {
        self.send_register(ctx);
        self.send_advertise(ctx);
    }

    pub fn send_register(&mut self, ctx: &mut HandlerContext<'_>) {
        ctx.connections.add(self.root_addr, true);
        let addr = ctx.local_addr;
        ctx.enqueue(self.root_addr, PacketBody::RegisterRequest { addr }, true);
    }

    pub fn send_advertise(&mut self, ctx: &mut HandlerContext<'_>) {
        ctx.connections.add(self.root_addr, true);
        ctx.enqueue(self.root_addr, PacketBody::AdvertiseRequest, true);
        self.last_advertise_send = Some(Utc::now());
    }

    /// One reunion-timer tick. Returns the parent a hello was buffered
    /// for; the caller flushes and calls [`Self::confirm_hello_sent`]
    /// only when that flush succeeded, so the valid window starts at a
    /// confirmed send, not at a buffered one.
    pub fn prepare_reunion(&mut self, ctx: &mut HandlerContext<'_>) -> Option<Address> {
        if !self.timer_armed {
            return None;
        }
        match self.reunion_mode {
            ReunionMode::Accepted => {
                let parent = self.parent?;
                let path = vec![ctx.local_addr];
                ctx.enqueue(parent, PacketBody::ReunionRequest { path }, false);
                Some(parent)
            }
            ReunionMode::Pending => {
                if expired(self.last_reunion_send, self.reunion_valid) {
                    warn!("reunion unanswered past valid window, re-advertising");
                    self.reunion_mode = ReunionMode::Idle;
                    self.send_advertise(ctx);
                }
                None
            }
            ReunionMode::Idle => {
                // Still waiting on an Advertise-Response; nudge the root
                // again if that too has gone unanswered.
                if expired(self.last_advertise_send, self.reunion_valid) {
                    self.send_advertise(ctx);
                }
                None
            }
        }
    }

    pub fn confirm_hello_sent(&mut self) {
        self.last_reunion_send = Some(Utc::now());
        self.reunion_mode = ReunionMode::Pending;
    }

    /// React to flushed sends that failed. A dead parent triggers
    /// re-discovery through the root; a dead root is terminal.
    pub fn recover_failed(&mut self, ctx: &mut HandlerContext<'_>, failed: &[Address]) {
        for &addr in failed {
            if self.parent == Some(addr) {
                warn!(parent = %addr, "parent unreachable, re-advertising");
                self.parent = None;
                self.reunion_mode = ReunionMode::Idle;
                self.send_advertise(ctx);
            }
            if addr == self.root_addr {
                warn!("root unreachable, disconnecting");
                self.disconnected = true;
            }
        }
    }
}

impl PacketHandler for LeafHandler {
    /// Until the peer holds a confirmed path to root, it only acts on
    /// the handshake traffic that can establish one; everything else is
    /// dropped so stale topology never drives decisions. While a hello
    /// is in flight the gate stays open for the duration of the valid
    /// window so the response itself (and traffic riding the same path)
    /// gets through.
    fn admits(&self, packet: &Packet) -> bool {
        if !self.registered {
            return packet.kind() == PacketKind::Register;
        }
        match self.reunion_mode {
            ReunionMode::Accepted => true,
            ReunionMode::Pending => {
                !expired(self.last_reunion_send, self.reunion_valid)
                    || matches!(
                        packet.kind(),
                        PacketKind::Register | PacketKind::Advertise
                    )
            }
            ReunionMode::Idle => matches!(
                packet.kind(),
                PacketKind::Register | PacketKind::Advertise
            ),
        }
    }

    fn handle_register(&mut self, ctx: &mut HandlerContext<'_>, packet: &Packet) {
        if packet.body == PacketBody::RegisterResponse {
            self.registered = true;
            ctx.emit(DisplayEvent::Registered);
        }
    }

    fn handle_advertise(&mut self, ctx: &mut HandlerContext<'_>, packet: &Packet) {
        let PacketBody::AdvertiseResponse { neighbour } = packet.body else {
            return;
        };
        self.parent = Some(neighbour);
        ctx.connections.add(neighbour, false);
        ctx.enqueue(neighbour, PacketBody::Join, false);
        // The assigned path counts as confirmed until the first hello
        // goes out; the timer arms exactly once.
        self.reunion_mode = ReunionMode::Accepted;
        self.timer_armed = true;
        ctx.emit(DisplayEvent::NeighbourAssigned { neighbour });
        info!(neighbour = %neighbour, "joining assigned neighbour");
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
        match &packet.body {
            // A descendant's hello on its way up: append ourselves and
            // pass it to our parent.
            PacketBody::ReunionRequest { path } => {
                let Some(parent) = self.parent else {
                    debug!("reunion request with no parent to forward to");
                    return;
                };
                let mut path = path.clone();
                path.push(ctx.local_addr);
                ctx.enqueue(parent, PacketBody::ReunionRequest { path }, false);
            }
            // The root's answer on its way down. One entry left means
            // it is ours; otherwise strip our own leading entry and
            // hand the rest to the next hop.
            PacketBody::ReunionResponse { path } => {
                if path.len() == 1 {
                    debug!("reunion answered, path to root confirmed");
                    self.reunion_mode = ReunionMode::Accepted;
                    return;
                }
                let rest = path[1..].to_vec();
                let next = rest[0];
                ctx.enqueue(next, PacketBody::ReunionResponse { path: rest }, false);
            }
            _ => {}
        }
    }
}
