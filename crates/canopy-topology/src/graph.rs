//! The overlay tree arena

use std::collections::{HashMap, VecDeque};

use canopy_wire::Address;
use tracing::{debug, trace};

use crate::error::TopologyError;

/// One peer's position and liveness in the overlay tree.
#[derive(Debug, Clone)]
pub struct GraphNode {
    pub address: Address,
    /// Back-reference to the parent; `None` only for the root.
    pub parent: Option<Address>,
    /// Children in insertion order. Order matters: it is the BFS
    /// tie-break for neighbour assignment.
    pub children: Vec<Address>,
    pub alive: bool,
}

/// The root peer's tree of known peers.
///
/// Exactly one node (the root) has no parent. A node's `alive = false`
/// detaches its whole subtree from neighbour-assignment eligibility
/// without structural change.
#[derive(Debug)]
pub struct NetworkGraph {
    root: Address,
    nodes: HashMap<Address, GraphNode>,
}

impl NetworkGraph {
    /// Create a graph containing only the root.
    pub fn new(root: Address) -> Self {
        let mut nodes = HashMap::new();
        nodes.insert(
            root,
            GraphNode {
                address: root,
                parent: None,
                children: Vec::new(),
                alive: true,
            },
        );
        Self { root, nodes }
    }

    pub fn root(&self) -> Address {
        self.root
    }

    pub fn len(&self) -> usize {
        self.nodes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.nodes.is_empty()
    }

    pub fn contains(&self, addr: Address) -> bool {
        self.nodes.contains_key(&addr)
    }

    pub fn node(&self, addr: Address) -> Option<&GraphNode> {
        self.nodes.get(&addr)
    }

    /// Add a new node under an existing parent and mark it alive.
    pub fn add_node(&mut self, addr: Address, parent: Address) -> Result<(), TopologyError> {
        if self.nodes.contains_key(&addr) {
            return Err(TopologyError::DuplicateNode(addr));
        }
        let parent_node = self
            .nodes
            .get_mut(&parent)
            .ok_or(TopologyError::UnknownParent(parent))?;
        parent_node.children.push(addr);
        self.nodes.insert(
            addr,
            GraphNode {
                address: addr,
                parent: Some(parent),
                children: Vec::new(),
                alive: true,
            },
        );
        trace!(node = %addr, parent = %parent, "node added");
        Ok(())
    }

    /// Move an existing node under a new parent and mark it alive.
    ///
    /// This is the re-advertise-after-failure path: the node keeps its
    /// own children, only its upward edge changes. The caller must pick
    /// `new_parent` outside the node's subtree (neighbour selection
    /// already guarantees that).
    pub fn reparent(&mut self, addr: Address, new_parent: Address) -> Result<(), TopologyError> {
        if !self.nodes.contains_key(&addr) {
            return Err(TopologyError::UnknownNode(addr));
        }
        if !self.nodes.contains_key(&new_parent) {
            return Err(TopologyError::UnknownParent(new_parent));
        }
        debug_assert!(!self.subtree(addr).contains(&new_parent));

        let old_parent = self.nodes[&addr].parent;
        if let Some(old) = old_parent {
            if let Some(old_node) = self.nodes.get_mut(&old) {
                old_node.children.retain(|c| *c != addr);
            }
        }
        self.nodes
            .get_mut(&new_parent)
            .expect("checked above")
            .children
            .push(addr);
        let node = self.nodes.get_mut(&addr).expect("checked above");
        node.parent = Some(new_parent);
        node.alive = true;
        debug!(node = %addr, parent = %new_parent, "node re-parented");
        Ok(())
    }

    /// Pick the best neighbour for `sender`: breadth-first from the root,
    /// shallowest depth first and then child insertion order, skipping
    /// the sender and its subtree, returning the first living node with a
    /// free child slot (fan-out cap of 2). Dead nodes are not traversed,
    /// so a dead node's whole subtree is ineligible.
    ///
    /// Falls back to the root itself when no descendant qualifies and the
    /// root still has a free slot; otherwise there is no capacity.
    pub fn find_live_neighbour(&self, sender: Address) -> Result<Address, TopologyError> {
        let mut queue = VecDeque::from([self.root]);
        while let Some(addr) = queue.pop_front() {
            let node = &self.nodes[&addr];
            for child in &node.children {
                if *child == sender {
                    continue;
                }
                let child_node = &self.nodes[child];
                if !child_node.alive {
                    continue;
                }
                if child_node.children.len() < 2 {
                    return Ok(*child);
                }
                queue.push_back(*child);
            }
        }
        if self.nodes[&self.root].children.len() < 2 {
            Ok(self.root)
        } else {
            Err(TopologyError::NoCapacity)
        }
    }

    /// Mark a node alive. Idempotent; unknown addresses are ignored
    /// (stale Reunion traffic after expiry is expected).
    pub fn turn_on(&mut self, addr: Address) {
        if let Some(node) = self.nodes.get_mut(&addr) {
            node.alive = true;
        }
    }

    /// Mark a node not-alive without structural change.
    pub fn turn_off(&mut self, addr: Address) {
        if let Some(node) = self.nodes.get_mut(&addr) {
            node.alive = false;
        }
    }

    /// Logically detach a subtree: mark `addr` and every descendant
    /// not-alive. Ancestors and siblings are untouched; nothing is
    /// removed from the arena.
    pub fn remove_subtree(&mut self, addr: Address) {
        for member in self.subtree(addr) {
            if let Some(node) = self.nodes.get_mut(&member) {
                node.alive = false;
            }
        }
    }

    /// Physically delete `addr` and its entire subtree from the arena,
    /// unlinking from the parent. Returns the removed addresses. The
    /// root itself cannot be expired.
    pub fn expire(&mut self, addr: Address) -> Vec<Address> {
        if addr == self.root || !self.nodes.contains_key(&addr) {
            return Vec::new();
        }
        if let Some(parent) = self.nodes[&addr].parent {
            if let Some(parent_node) = self.nodes.get_mut(&parent) {
                parent_node.children.retain(|c| *c != addr);
            }
        }
        let removed = self.subtree(addr);
        for member in &removed {
            self.nodes.remove(member);
        }
        debug!(node = %addr, removed = removed.len(), "subtree expired");
        removed
    }

    /// All addresses in `addr`'s subtree (including `addr`), BFS order.
    /// Empty when `addr` is unknown.
    pub fn subtree(&self, addr: Address) -> Vec<Address> {
        if !self.nodes.contains_key(&addr) {
            return Vec::new();
        }
        let mut out = Vec::new();
        let mut queue = VecDeque::from([addr]);
        while let Some(current) = queue.pop_front() {
            out.push(current);
            if let Some(node) = self.nodes.get(&current) {
                queue.extend(node.children.iter().copied());
            }
        }
        out
    }

    /// Distance from the root, or `None` for unknown addresses.
    pub fn depth_of(&self, addr: Address) -> Option<usize> {
        let mut depth = 0;
        let mut current = self.nodes.get(&addr)?;
        while let Some(parent) = current.parent {
            depth += 1;
            current = self.nodes.get(&parent)?;
        }
        Some(depth)
    }
}
