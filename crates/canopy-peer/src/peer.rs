//! The peer itself: shared state, the main protocol loop and the
//! reunion timer
//!
//! All mutable protocol state (connection table, role handler) lives in
//! one [`Inner`] behind a mutex, because the main loop and the reunion
//! timer both enqueue outbound traffic and both touch peer state. Each
//! loop takes the lock once per tick, works synchronously, flushes, and
//! releases. A `disconnected` flag checked at the top of every tick is
//! the cooperative shutdown mechanism.

use std::sync::Arc;

use canopy_wire::{Address, Packet, PacketBody};
use canopy_transport::{ConnectionTable, Transport};
use tokio::sync::{Mutex, mpsc};
use tracing::{debug, info};

use crate::bridge::{Command, DisplayEvent};
use crate::config::PeerConfig;
use crate::error::PeerError;
use crate::handler::{HandlerContext, PacketHandler, dispatch};
use crate::leaf::LeafHandler;
use crate::root::RootHandler;

pub(crate) enum Role {
    Root(RootHandler),
    Leaf(LeafHandler),
}

pub(crate) struct Inner {
    pub(crate) connections: ConnectionTable,
    pub(crate) role: Role,
    pub(crate) disconnected: bool,
    /// Distinguishes losing the root from an operator quit.
    pub(crate) lost_root: bool,
}

pub struct Peer<T: Transport> {
    transport: Arc<T>,
    local_addr: Address,
    config: PeerConfig,
    inner: Arc<Mutex<Inner>>,
    events: mpsc::Sender<DisplayEvent>,
}

impl<T: Transport + 'static> Peer<T> {
    /// Create the root peer for an overlay.
    pub fn root(transport: T, config: PeerConfig) -> (Arc<Self>, mpsc::Receiver<DisplayEvent>) {
        let transport = Arc::new(transport);
        let local_addr = transport.local_addr();
        let (events, events_rx) = mpsc::channel(config.event_capacity);
        let inner = Inner {
            connections: ConnectionTable::new(),
            role: Role::Root(RootHandler::new(local_addr, &config)),
            disconnected: false,
            lost_root: false,
        };
        info!(local = %local_addr, "root peer created");
        let peer = Arc::new(Self {
            transport,
            local_addr,
            config,
            inner: Arc::new(Mutex::new(inner)),
            events,
        });
        (peer, events_rx)
    }

    /// Create a non-root peer. The Register and Advertise requests are
    /// buffered immediately and go out on the first tick.
    pub fn leaf(
        transport: T,
        root_addr: Address,
        config: PeerConfig,
    ) -> (Arc<Self>, mpsc::Receiver<DisplayEvent>) {
        let transport = Arc::new(transport);
        let local_addr = transport.local_addr();
        let (events, events_rx) = mpsc::channel(config.event_capacity);

        let mut connections = ConnectionTable::new();
        let mut handler = LeafHandler::new(root_addr, &config);
        {
            let mut ctx = HandlerContext {
                local_addr,
                connections: &mut connections,
                events: &events,
            };
            handler.start(&mut ctx);
        }

        let inner = Inner {
            connections,
            role: Role::Leaf(handler),
            disconnected: false,
            lost_root: false,
        };
        info!(local = %local_addr, root = %root_addr, "peer created");
        let peer = Arc::new(Self {
            transport,
            local_addr,
            config,
            inner: Arc::new(Mutex::new(inner)),
            events,
        });
        (peer, events_rx)
    }

    pub fn local_addr(&self) -> Address {
        self.local_addr
    }

    /// Drive both loops until shutdown. Resolves `Ok` on an operator
    /// quit and [`PeerError::Disconnected`] when the root became
    /// unreachable.
    pub async fn run(self: Arc<Self>, mut commands: mpsc::Receiver<Command>) -> Result<(), PeerError> {
        let reunion = {
            let peer = self.clone();
            tokio::spawn(async move {
                let mut tick = tokio::time::interval(peer.config.reunion_tick);
                loop {
                    tick.tick().await;
                    peer.reunion_tick_once().await;
                }
            })
        };

        let mut tick = tokio::time::interval(self.config.main_tick);
        let result = loop {
            tick.tick().await;
            let mut pending = Vec::new();
            loop {
                match commands.try_recv() {
                    Ok(cmd) => pending.push(cmd),
                    Err(mpsc::error::TryRecvError::Empty) => break,
                    Err(mpsc::error::TryRecvError::Disconnected) => {
                        // Front end went away; shut down with it.
                        pending.push(Command::Quit);
                        break;
                    }
                }
            }
            if !self.tick_once(pending).await {
                let lost_root = self.inner.lock().await.lost_root;
                break if lost_root {
                    Err(PeerError::Disconnected)
                } else {
                    Ok(())
                };
            }
        };
        reunion.abort();
        result
    }

    /// One main-loop tick: drain inbound, dispatch, apply commands, run
    /// the root's staleness sweep, flush, recover from failed sends.
    /// Returns `false` once the peer is shut down.
    ///
    /// Exposed so tests can drive the protocol deterministically.
    pub async fn tick_once(&self, commands: Vec<Command>) -> bool {
        let frames = self.transport.receive_all().await;
        let mut guard = self.inner.lock().await;
        let inner = &mut *guard;
        if inner.disconnected {
            return false;
        }

        {
            let mut ctx = HandlerContext {
                local_addr: self.local_addr,
                connections: &mut inner.connections,
                events: &self.events,
            };
            for frame in frames {
                match Packet::decode(&frame) {
                    Ok(packet) => {
                        let handler: &mut dyn PacketHandler = match &mut inner.role {
                            Role::Root(h) => h,
                            Role::Leaf(h) => h,
                        };
                        dispatch(handler, &mut ctx, &packet);
                    }
                    Err(e) => debug!(error = %e, "dropping malformed packet"),
                }
            }

            for cmd in commands {
                match cmd {
                    Command::Quit => inner.disconnected = true,
                    Command::Register => {
                        if let Role::Leaf(leaf) = &mut inner.role {
                            leaf.send_register(&mut ctx);
                        }
                    }
                    Command::Advertise => {
                        if let Role::Leaf(leaf) = &mut inner.role {
                            leaf.send_advertise(&mut ctx);
                        }
                    }
                    Command::Send(text) => {
                        for target in ctx.connections.broadcast_targets(self.local_addr) {
                            ctx.enqueue(target, PacketBody::Message { text: text.clone() }, false);
                        }
                    }
                }
            }

            // The sweep runs before the flush so a freshly expired
            // peer's buffered frames die with its connection.
            if let Role::Root(root) = &mut inner.role {
                root.sweep(&mut ctx);
            }
        }

        let failed = inner.connections.flush_all(self.transport.as_ref()).await;
        if !failed.is_empty() {
            let lost_root = match &mut inner.role {
                Role::Root(root) => {
                    root.recover_failed(&failed);
                    false
                }
                Role::Leaf(leaf) => {
                    let mut ctx = HandlerContext {
                        local_addr: self.local_addr,
                        connections: &mut inner.connections,
                        events: &self.events,
                    };
                    leaf.recover_failed(&mut ctx, &failed);
                    leaf.disconnected
                }
            };
            if lost_root {
                inner.disconnected = true;
                inner.lost_root = true;
            }
        }
        !inner.disconnected
    }

    /// One reunion-timer tick (non-root only). The hello's send window
    /// only starts once the flush confirms it actually went out.
    ///
    /// Exposed so tests can drive the timer deterministically.
    pub async fn reunion_tick_once(&self) {
        let mut guard = self.inner.lock().await;
        let inner = &mut *guard;
        if inner.disconnected {
            return;
        }
        let hello_to = {
            let Role::Leaf(leaf) = &mut inner.role else {
                return;
            };
            let mut ctx = HandlerContext {
                local_addr: self.local_addr,
                connections: &mut inner.connections,
                events: &self.events,
            };
            leaf.prepare_reunion(&mut ctx)
        };

        let failed = inner.connections.flush_all(self.transport.as_ref()).await;

        let lost_root = {
            let Role::Leaf(leaf) = &mut inner.role else {
                return;
            };
            if let Some(parent) = hello_to {
                if !failed.contains(&parent) {
                    leaf.confirm_hello_sent();
                }
            }
            if !failed.is_empty() {
                let mut ctx = HandlerContext {
                    local_addr: self.local_addr,
                    connections: &mut inner.connections,
                    events: &self.events,
                };
                leaf.recover_failed(&mut ctx, &failed);
            }
            leaf.disconnected
        };
        if lost_root {
            inner.disconnected = true;
            inner.lost_root = true;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::leaf::ReunionMode;
    use canopy_transport::{ChannelNetwork, ChannelTransport};
    use std::net::Ipv4Addr;
    use std::time::Duration;

    fn root_addr() -> Address {
        "127.000.000.001:05000".parse().unwrap()
    }

    fn addr(last: u8) -> Address {
        Address::new(Ipv4Addr::new(127, 0, 0, 1), 5000 + last as u16)
    }

    type TestPeer = Arc<Peer<ChannelTransport>>;
    type Events = mpsc::Receiver<DisplayEvent>;

    fn spawn_root(network: &ChannelNetwork, config: PeerConfig) -> (TestPeer, Events) {
        Peer::root(network.endpoint(root_addr()), config)
    }

    fn spawn_leaf(network: &ChannelNetwork, last: u8, config: PeerConfig) -> (TestPeer, Events) {
        Peer::leaf(network.endpoint(addr(last)), root_addr(), config)
    }

    /// Run the Register/Advertise/Join handshake for one leaf.
    async fn join(leaf: &TestPeer, root: &TestPeer) {
        leaf.tick_once(vec![]).await; // Register + Advertise go out
        root.tick_once(vec![]).await; // ACK + neighbour assignment
        leaf.tick_once(vec![]).await; // Join goes out
        root.tick_once(vec![]).await; // Join lands (when root is the neighbour)
    }

    async fn leaf_state(peer: &TestPeer) -> (bool, Option<Address>, ReunionMode) {
        let inner = peer.inner.lock().await;
        let Role::Leaf(leaf) = &inner.role else {
            panic!("not a leaf");
        };
        (leaf.registered, leaf.parent(), leaf.reunion_mode)
    }

    fn drain_messages(events: &mut Events) -> Vec<(Address, String)> {
        let mut messages = Vec::new();
        while let Ok(event) = events.try_recv() {
            if let DisplayEvent::Message { from, text } = event {
                messages.push((from, text));
            }
        }
        messages
    }

    #[tokio::test]
    async fn test_first_peer_joins_the_root_itself() {
        let network = ChannelNetwork::new();
        let (root, _) = spawn_root(&network, PeerConfig::default());
        let (a, mut a_events) = spawn_leaf(&network, 1, PeerConfig::default());

        join(&a, &root).await;

        let (registered, parent, mode) = leaf_state(&a).await;
        assert!(registered);
        assert_eq!(parent, Some(root_addr()));
        assert_eq!(mode, ReunionMode::Accepted);

        assert_eq!(a_events.try_recv(), Ok(DisplayEvent::Registered));
        assert_eq!(
            a_events.try_recv(),
            Ok(DisplayEvent::NeighbourAssigned {
                neighbour: root_addr()
            })
        );

        let inner = root.inner.lock().await;
        let Role::Root(handler) = &inner.role else {
            panic!("not a root");
        };
        assert_eq!(handler.graph().node(addr(1)).unwrap().parent, Some(root_addr()));
        assert!(handler.is_tracking(addr(1)));
    }

    #[tokio::test]
    async fn test_second_peer_is_assigned_the_first() {
        let network = ChannelNetwork::new();
        let (root, _) = spawn_root(&network, PeerConfig::default());
        let (a, _) = spawn_leaf(&network, 1, PeerConfig::default());
        let (b, _) = spawn_leaf(&network, 2, PeerConfig::default());

        join(&a, &root).await;
        join(&b, &root).await;
        a.tick_once(vec![]).await; // B's Join lands at A

        let (_, parent, _) = leaf_state(&b).await;
        assert_eq!(parent, Some(addr(1)));

        let inner = root.inner.lock().await;
        let Role::Root(handler) = &inner.role else {
            panic!("not a root");
        };
        assert_eq!(handler.graph().node(addr(2)).unwrap().parent, Some(addr(1)));
    }

    #[tokio::test]
    async fn test_reunion_roundtrip_through_intermediate_hop() {
        let network = ChannelNetwork::new();
        let (root, _) = spawn_root(&network, PeerConfig::default());
        let (a, _) = spawn_leaf(&network, 1, PeerConfig::default());
        let (b, _) = spawn_leaf(&network, 2, PeerConfig::default());
        join(&a, &root).await;
        join(&b, &root).await;
        a.tick_once(vec![]).await;

        // B's hello goes up B -> A -> root, the answer retraces it.
        b.reunion_tick_once().await;
        let (_, _, mode) = leaf_state(&b).await;
        assert_eq!(mode, ReunionMode::Pending);

        a.tick_once(vec![]).await; // forward REQ, path now [B, A]
        root.tick_once(vec![]).await; // reverse, answer to A
        a.tick_once(vec![]).await; // strip own entry, forward to B
        b.tick_once(vec![]).await; // one entry left: confirmed

        let (_, _, mode) = leaf_state(&b).await;
        assert_eq!(mode, ReunionMode::Accepted);

        let inner = root.inner.lock().await;
        let Role::Root(handler) = &inner.role else {
            panic!("not a root");
        };
        assert!(handler.is_tracking(addr(2)));
        assert!(handler.graph().node(addr(2)).unwrap().alive);
    }

    #[tokio::test]
    async fn test_message_floods_tree_except_sender_and_register_links() {
        let network = ChannelNetwork::new();
        let (root, mut root_events) = spawn_root(&network, PeerConfig::default());
        let (a, mut a_events) = spawn_leaf(&network, 1, PeerConfig::default());
        let (b, mut b_events) = spawn_leaf(&network, 2, PeerConfig::default());
        join(&a, &root).await;
        join(&b, &root).await;
        a.tick_once(vec![]).await;

        b.tick_once(vec![Command::Send("hi".into())]).await;
        a.tick_once(vec![]).await; // receives from B, forwards up
        root.tick_once(vec![]).await; // receives from A, no one else to flood

        assert_eq!(drain_messages(&mut a_events), vec![(addr(2), "hi".into())]);
        assert_eq!(drain_messages(&mut root_events), vec![(addr(1), "hi".into())]);
        // The sender itself never sees its own message.
        assert!(drain_messages(&mut b_events).is_empty());
    }

    #[tokio::test]
    async fn test_unregistered_peer_drops_non_handshake_traffic() {
        let network = ChannelNetwork::new();
        let (c, mut c_events) = spawn_leaf(&network, 3, PeerConfig::default());
        let stranger = network.endpoint(addr(9));

        let packet = Packet::new(addr(9), PacketBody::Message { text: "spoof".into() });
        stranger.send(addr(3), packet.encode()).await.unwrap();

        // The leaf has not even registered yet; the message must not
        // surface or be re-broadcast.
        c.tick_once(vec![]).await;
        assert!(drain_messages(&mut c_events).is_empty());
    }

    #[tokio::test]
    async fn test_root_expires_silent_peer() {
        let config = PeerConfig::default()
            .with_turn_off_after(Duration::from_millis(30))
            .with_remove_after(Duration::from_millis(80));
        let network = ChannelNetwork::new();
        let (root, mut root_events) = spawn_root(&network, config.clone());
        let (a, _) = spawn_leaf(&network, 1, config);
        join(&a, &root).await;

        tokio::time::sleep(Duration::from_millis(45)).await;
        root.tick_once(vec![]).await;
        {
            let inner = root.inner.lock().await;
            let Role::Root(handler) = &inner.role else {
                panic!("not a root");
            };
            // Suspected, not yet expired.
            assert!(!handler.graph().node(addr(1)).unwrap().alive);
            assert!(handler.is_tracking(addr(1)));
        }

        tokio::time::sleep(Duration::from_millis(50)).await;
        root.tick_once(vec![]).await;
        {
            let inner = root.inner.lock().await;
            let Role::Root(handler) = &inner.role else {
                panic!("not a root");
            };
            assert!(!handler.graph().contains(addr(1)));
            assert!(!handler.is_tracking(addr(1)));
            assert!(!inner.connections.contains_peer(addr(1)));
        }

        let mut expired = Vec::new();
        while let Ok(event) = root_events.try_recv() {
            if let DisplayEvent::PeerExpired { peer } = event {
                expired.push(peer);
            }
        }
        assert_eq!(expired, vec![addr(1)]);
    }

    #[tokio::test]
    async fn test_parent_failure_triggers_readvertise() {
        let network = ChannelNetwork::new();
        let (root, _) = spawn_root(&network, PeerConfig::default());
        let (a, _) = spawn_leaf(&network, 1, PeerConfig::default());
        let (b, _) = spawn_leaf(&network, 2, PeerConfig::default());
        join(&a, &root).await;
        join(&b, &root).await;
        a.tick_once(vec![]).await;

        // A crashes; B's next hello cannot be delivered.
        network.disconnect(addr(1));
        b.reunion_tick_once().await;

        let (_, parent, mode) = leaf_state(&b).await;
        assert_eq!(parent, None);
        assert_eq!(mode, ReunionMode::Idle);

        // The buffered Advertise-Request reaches the root, which still
        // believes in A and re-parents B under it.
        b.tick_once(vec![]).await;
        root.tick_once(vec![]).await;
        {
            let inner = root.inner.lock().await;
            let Role::Root(handler) = &inner.role else {
                panic!("not a root");
            };
            assert_eq!(handler.graph().node(addr(2)).unwrap().parent, Some(addr(1)));
        }

        // B's Join to the dead neighbour fails at the flush, sending it
        // straight back into re-discovery; the cycle repeats until the
        // root's own staleness sweep stops assigning A.
        b.tick_once(vec![]).await;
        let (_, parent, mode) = leaf_state(&b).await;
        assert_eq!(parent, None);
        assert_eq!(mode, ReunionMode::Idle);
    }

    #[tokio::test]
    async fn test_root_failure_disconnects_leaf() {
        let network = ChannelNetwork::new();
        let (root, _) = spawn_root(&network, PeerConfig::default());
        let (a, _) = spawn_leaf(&network, 1, PeerConfig::default());
        join(&a, &root).await;

        network.disconnect(root_addr());
        a.reunion_tick_once().await;

        assert!(!a.tick_once(vec![]).await);
        assert!(a.inner.lock().await.lost_root);
    }

    #[tokio::test]
    async fn test_quit_command_stops_the_peer() {
        let network = ChannelNetwork::new();
        let (root, _) = spawn_root(&network, PeerConfig::default());

        assert!(!root.tick_once(vec![Command::Quit]).await);
        assert!(!root.inner.lock().await.lost_root);
    }
}
