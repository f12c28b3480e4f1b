//! Command and display bridge
//!
//! The front end talks to a peer through two bounded channels: it
//! produces [`Command`]s the main loop drains once per tick, and it
//! consumes [`DisplayEvent`]s the handlers emit. Neither side holds a
//! lock on peer state.

use std::fmt;

use canopy_wire::Address;

/// One line of operator input, parsed.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Command {
    /// Re-send a Register-Request to the root.
    Register,
    /// Re-send an Advertise-Request to the root.
    Advertise,
    /// Broadcast a text message through the tree.
    Send(String),
    /// Shut the peer down cooperatively.
    Quit,
}

/// Parse one input line. Unknown input yields `None`.
pub fn parse_line(line: &str) -> Option<Command> {
    let line = line.trim();
    if let Some(text) = line.strip_prefix("send ") {
        return Some(Command::Send(text.to_string()));
    }
    match line {
        "Register" => Some(Command::Register),
        "Advertise" => Some(Command::Advertise),
        "quit" | "exit" => Some(Command::Quit),
        _ => None,
    }
}

/// Something the front end should show the operator.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DisplayEvent {
    /// Incoming broadcast text; `from` is the forwarding hop.
    Message { from: Address, text: String },
    /// The root acknowledged our registration.
    Registered,
    /// The root assigned us a neighbour to join.
    NeighbourAssigned { neighbour: Address },
    /// A peer joined us as a child.
    PeerJoined { peer: Address },
    /// Root only: a silent peer's subtree was expired.
    PeerExpired { peer: Address },
}

impl fmt::Display for DisplayEvent {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Message { from, text } => write!(f, "{from}: {text}"),
            Self::Registered => write!(f, "registered with root"),
            Self::NeighbourAssigned { neighbour } => write!(f, "assigned neighbour {neighbour}"),
            Self::PeerJoined { peer } => write!(f, "{peer} joined"),
            Self::PeerExpired { peer } => write!(f, "{peer} expired"),
        }
    }
}
