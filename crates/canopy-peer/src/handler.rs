//! Per-role packet dispatch
//!
//! Both roles implement [`PacketHandler`]; the main loop selects the
//! implementation once at construction and dispatches every decoded
//! packet through it. Handlers are synchronous: they mutate the
//! connection table and enqueue replies, and the loop flushes
//! afterwards.

use canopy_wire::{Address, Packet, PacketBody, PacketKind};
use tokio::sync::mpsc;
use tracing::debug;

use crate::bridge::DisplayEvent;
use canopy_transport::ConnectionTable;

/// What a handler may touch while processing one packet.
pub struct HandlerContext<'a> {
    pub local_addr: Address,
    pub connections: &'a mut ConnectionTable,
    pub events: &'a mpsc::Sender<DisplayEvent>,
}

impl HandlerContext<'_> {
    /// Emit a display event; dropped if the front end is not keeping up.
    pub fn emit(&self, event: DisplayEvent) {
        let _ = self.events.try_send(event);
    }

    /// Encode and buffer a packet for `target`.
    ///
    /// A missing connection means the target became unreachable between
    /// decision and enqueue; the packet is skipped, not an error.
    pub fn enqueue(&mut self, target: Address, body: PacketBody, is_register: bool) {
        let packet = Packet::new(self.local_addr, body);
        if let Err(e) = self.connections.enqueue(target, packet.encode(), is_register) {
            debug!(target = %target, error = %e, "target unreachable, skipping");
        }
    }
}

pub trait PacketHandler: Send {
    /// Gate applied before dispatch; a refused packet is dropped.
    fn admits(&self, _packet: &Packet) -> bool {
        true
    }

    fn handle_register(&mut self, ctx: &mut HandlerContext<'_>, packet: &Packet);
    fn handle_advertise(&mut self, ctx: &mut HandlerContext<'_>, packet: &Packet);
    fn handle_join(&mut self, ctx: &mut HandlerContext<'_>, packet: &Packet);
    fn handle_message(&mut self, ctx: &mut HandlerContext<'_>, packet: &Packet);
    fn handle_reunion(&mut self, ctx: &mut HandlerContext<'_>, packet: &Packet);
}

/// Route one packet to the role's handler for its type.
pub fn dispatch(handler: &mut dyn PacketHandler, ctx: &mut HandlerContext<'_>, packet: &Packet) {
    if !handler.admits(packet) {
        debug!(kind = ?packet.kind(), peer = %packet.source, "packet refused by admission gate");
        return;
    }
    match packet.kind() {
        PacketKind::Register => handler.handle_register(ctx, packet),
        PacketKind::Advertise => handler.handle_advertise(ctx, packet),
        PacketKind::Join => handler.handle_join(ctx, packet),
        PacketKind::Message => handler.handle_message(ctx, packet),
        PacketKind::Reunion => handler.handle_reunion(ctx, packet),
    }
}
