//! # Canopy Topology
//!
//! The root peer's view of the overlay tree.
//!
//! [`NetworkGraph`] is an arena of [`GraphNode`]s keyed by address: a
//! child holds its parent as a plain address back-reference and a parent
//! owns an ordered list of child addresses, so the parent/child structure
//! never forms an ownership cycle. Insertion order of children drives the
//! BFS tie-break in neighbour assignment, which keeps assignment
//! deterministic for a given join order.
//!
//! Liveness is a flag, not membership: `turn_off` excludes a node (and,
//! transitively, its subtree) from neighbour assignment without removing
//! it, giving a suspected peer a grace window to resume Reunion traffic.
//! Physical removal only happens on staleness expiry via [`NetworkGraph::expire`].

pub mod error;
pub mod graph;

pub use error::*;
pub use graph::*;
