//! Error taxonomy shared by the NDB and LTP layers.
//!
//! Only [`Error::IoFault`] is fatal to a whole parse. Every other variant is
//! scoped to the node, block or table that referenced the bad structure, and
//! callers walking many nodes turn it into a [`NodeFailure`] and keep going.

use crate::ndb::{Bid, CryptMethod, Hid, Nid};

/// Where a structural problem was found.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Location {
    /// Absolute file offset (header, B-tree pages, blocks).
    Offset(u64),
    /// A block, by identifier.
    Block(Bid),
    /// A node, by identifier.
    Node(Nid),
    /// A heap allocation.
    Heap(Hid),
    /// A property or table column, by property identifier.
    Property(u16),
}

impl std::fmt::Display for Location {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Offset(offset) => write!(f, "offset 0x{offset:x}"),
            Self::Block(bid) => write!(f, "block {bid}"),
            Self::Node(nid) => write!(f, "node {nid}"),
            Self::Heap(hid) => write!(f, "heap item {hid}"),
            Self::Property(id) => write!(f, "property 0x{id:04x}"),
        }
    }
}

/// A reference that failed to resolve in its owning store.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Handle {
    Nid(Nid),
    Bid(Bid),
    Hid(Hid),
}

impl std::fmt::Display for Handle {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Nid(nid) => write!(f, "NID {nid}"),
            Self::Bid(bid) => write!(f, "BID {bid}"),
            Self::Hid(hid) => write!(f, "HID {hid}"),
        }
    }
}

/// Errors produced while reading a store.
#[derive(Debug)]
pub enum Error {
    /// The byte source could not produce the requested range.
    IoFault {
        offset: u64,
        len: usize,
        source: std::io::Error,
    },
    /// A page, B-tree, block or heap invariant does not hold.
    CorruptStructure { at: Location, reason: String },
    /// A NID, BID or HID does not resolve.
    InvalidHandle(Handle),
    /// The node's blocks use an encoding with no registered codec.
    UnsupportedEncoding { nid: Nid, method: CryptMethod },
}

impl Error {
    /// Build a `CorruptStructure` error.
    pub fn corrupt(at: Location, reason: impl Into<String>) -> Self {
        Self::CorruptStructure {
            at,
            reason: reason.into(),
        }
    }

    /// Whether the error ends the whole parse rather than one node.
    #[must_use]
    pub const fn is_fatal(&self) -> bool {
        matches!(self, Self::IoFault { .. })
    }
}

impl std::fmt::Display for Error {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::IoFault {
                offset,
                len,
                source,
            } => write!(f, "I/O fault reading {len} bytes at 0x{offset:x}: {source}"),
            Self::CorruptStructure { at, reason } => {
                write!(f, "corrupt structure at {at}: {reason}")
            }
            Self::InvalidHandle(handle) => write!(f, "invalid handle: {handle}"),
            Self::UnsupportedEncoding { nid, method } => {
                write!(f, "node {nid} uses unsupported encoding {method}")
            }
        }
    }
}

impl std::error::Error for Error {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            Self::IoFault { source, .. } => Some(source),
            _ => None,
        }
    }
}

impl From<std::io::Error> for Error {
    fn from(source: std::io::Error) -> Self {
        Self::IoFault {
            offset: 0,
            len: 0,
            source,
        }
    }
}

/// A scoped failure, attributed to the node whose decode hit it.
#[derive(Debug)]
pub struct NodeFailure {
    pub nid: Nid,
    pub error: Error,
}

impl NodeFailure {
    #[must_use]
    pub const fn new(nid: Nid, error: Error) -> Self {
        Self { nid, error }
    }
}

impl std::fmt::Display for NodeFailure {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "node {}: {}", self.nid, self.error)
    }
}

impl std::error::Error for NodeFailure {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        Some(&self.error)
    }
}
