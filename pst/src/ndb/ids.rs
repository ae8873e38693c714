//! Identifier newtypes for nodes, blocks and heap items.
//!
//! The inner fields are public so that the raw on-disk values stay at hand
//! for diagnostics and for the fixture writer used in tests.

use std::fmt;

/// Node type, stored in the low 5 bits of a NID.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum NodeType {
    Hid,
    Internal,
    NormalFolder,
    SearchFolder,
    NormalMessage,
    Attachment,
    SearchUpdateQueue,
    SearchCriteriaObject,
    AssocMessage,
    ContentsTableIndex,
    ReceiveFolderTable,
    OutgoingQueueTable,
    HierarchyTable,
    ContentsTable,
    AssocContentsTable,
    SearchContentsTable,
    AttachmentTable,
    RecipientTable,
    SearchTableIndex,
    Ltp,
    Unknown(u8),
}

impl NodeType {
    #[must_use]
    pub const fn from_code(code: u8) -> Self {
        match code {
            0x00 => Self::Hid,
            0x01 => Self::Internal,
            0x02 => Self::NormalFolder,
            0x03 => Self::SearchFolder,
            0x04 => Self::NormalMessage,
            0x05 => Self::Attachment,
            0x06 => Self::SearchUpdateQueue,
            0x07 => Self::SearchCriteriaObject,
            0x08 => Self::AssocMessage,
            0x0A => Self::ContentsTableIndex,
            0x0B => Self::ReceiveFolderTable,
            0x0C => Self::OutgoingQueueTable,
            0x0D => Self::HierarchyTable,
            0x0E => Self::ContentsTable,
            0x0F => Self::AssocContentsTable,
            0x10 => Self::SearchContentsTable,
            0x11 => Self::AttachmentTable,
            0x12 => Self::RecipientTable,
            0x13 => Self::SearchTableIndex,
            0x1F => Self::Ltp,
            other => Self::Unknown(other),
        }
    }

    #[must_use]
    pub const fn code(self) -> u8 {
        match self {
            Self::Hid => 0x00,
            Self::Internal => 0x01,
            Self::NormalFolder => 0x02,
            Self::SearchFolder => 0x03,
            Self::NormalMessage => 0x04,
            Self::Attachment => 0x05,
            Self::SearchUpdateQueue => 0x06,
            Self::SearchCriteriaObject => 0x07,
            Self::AssocMessage => 0x08,
            Self::ContentsTableIndex => 0x0A,
            Self::ReceiveFolderTable => 0x0B,
            Self::OutgoingQueueTable => 0x0C,
            Self::HierarchyTable => 0x0D,
            Self::ContentsTable => 0x0E,
            Self::AssocContentsTable => 0x0F,
            Self::SearchContentsTable => 0x10,
            Self::AttachmentTable => 0x11,
            Self::RecipientTable => 0x12,
            Self::SearchTableIndex => 0x13,
            Self::Ltp => 0x1F,
            Self::Unknown(code) => code,
        }
    }
}

/// A node identifier.
///
/// # Invariants
///
/// - The low 5 bits are the node type, the upper 27 bits the node index.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Default)]
pub struct Nid(pub u32);

impl Nid {
    pub const MESSAGE_STORE: Self = Self(0x21);
    pub const NAME_TO_ID_MAP: Self = Self(0x61);
    pub const ROOT_FOLDER: Self = Self(0x122);
    pub const ATTACHMENT_TABLE: Self = Self(0x671);
    pub const RECIPIENT_TABLE: Self = Self(0x692);

    /// Build a NID from a type and an index.
    #[must_use]
    pub const fn new(node_type: NodeType, index: u32) -> Self {
        Self((index << 5) | (node_type.code() as u32 & 0x1F))
    }

    #[must_use]
    #[allow(clippy::cast_possible_truncation)]
    pub const fn node_type(self) -> NodeType {
        NodeType::from_code((self.0 & 0x1F) as u8)
    }

    #[must_use]
    pub const fn index(self) -> u32 {
        self.0 >> 5
    }
}

impl fmt::Display for Nid {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "0x{:x}", self.0)
    }
}

/// A block identifier.
///
/// Bit 0 is reserved and ignored on lookup; bit 1 marks an internal block
/// (one that holds further BIDs rather than user data).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Default)]
pub struct Bid(pub u64);

impl Bid {
    const INTERNAL_FLAG: u64 = 0x2;

    #[must_use]
    pub const fn is_internal(self) -> bool {
        self.0 & Self::INTERNAL_FLAG != 0
    }

    #[must_use]
    pub const fn is_null(self) -> bool {
        self.key() == 0
    }

    /// The value used as the BBT key (reserved bit cleared).
    #[must_use]
    pub const fn key(self) -> u64 {
        self.0 & !0x1
    }
}

impl fmt::Display for Bid {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "0x{:x}", self.0)
    }
}

/// A heap identifier.
///
/// Layout: type (5 bits, always 0), index (11 bits, 1-based), block index
/// within the heap's block chain (16 bits).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Default)]
pub struct Hid(pub u32);

impl Hid {
    #[must_use]
    pub const fn new(block_index: u16, index: u16) -> Self {
        Self(((block_index as u32) << 16) | (((index as u32) & 0x7FF) << 5))
    }

    #[must_use]
    #[allow(clippy::cast_possible_truncation)]
    pub const fn hid_type(self) -> u8 {
        (self.0 & 0x1F) as u8
    }

    #[must_use]
    #[allow(clippy::cast_possible_truncation)]
    pub const fn index(self) -> u16 {
        ((self.0 >> 5) & 0x7FF) as u16
    }

    #[must_use]
    #[allow(clippy::cast_possible_truncation)]
    pub const fn block_index(self) -> u16 {
        (self.0 >> 16) as u16
    }
}

impl fmt::Display for Hid {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "0x{:x}", self.0)
    }
}

/// A value reference that is either a heap item or a sub-node.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Hnid {
    /// Zero: no storage behind the reference.
    Empty,
    Hid(Hid),
    SubNode(Nid),
}

impl Hnid {
    #[must_use]
    pub const fn from_raw(raw: u32) -> Self {
        if raw == 0 {
            Self::Empty
        } else if raw & 0x1F == 0 {
            Self::Hid(Hid(raw))
        } else {
            Self::SubNode(Nid(raw))
        }
    }
}
