//! Heap-on-node.
//!
//! A heap spreads variable-length allocations over a node's data blocks.
//! Every block ends its used space with a page map listing where each
//! allocation starts:
//!
//! ```text
//! block 0   HNHDR       ibHnpm u16 | bSig 0xEC | bClientSig | hidUserRoot u32 | fill u32
//! block i   HNPAGEHDR   ibHnpm u16
//! block 8+128k  HNBITMAPHDR  ibHnpm u16 | fill [u8; 64]
//!
//! at ibHnpm  HNPAGEMAP  cAlloc u16 | cFree u16 | rgibAlloc[cAlloc + 1] u16
//! ```
//!
//! Allocation `n` (1-based, as carried by the HID) spans
//! `rgibAlloc[n - 1]..rgibAlloc[n]`.

use crate::error::{Error, Handle, Location};
use crate::ndb::{Hid, Nid, NodeData, read_u16, read_u32};

/// `bSig` of a heap header.
pub const HEAP_SIGNATURE: u8 = 0xEC;

/// Size of the block 0 header.
pub const HEAP_HEADER_SIZE: usize = 12;

/// Size of the header of blocks other than 0 without a fill bitmap.
pub const PAGE_HEADER_SIZE: usize = 2;

/// Size of the header of blocks carrying a fill bitmap.
pub const BITMAP_HEADER_SIZE: usize = 66;

/// Client signatures found in `bClientSig`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ClientSignature {
    /// A standalone BTH.
    Bth,
    PropertyContext,
    TableContext,
    Other(u8),
}

impl ClientSignature {
    #[must_use]
    pub const fn from_code(code: u8) -> Self {
        match code {
            0xB5 => Self::Bth,
            0xBC => Self::PropertyContext,
            0x7C => Self::TableContext,
            other => Self::Other(other),
        }
    }

    #[must_use]
    pub const fn code(self) -> u8 {
        match self {
            Self::Bth => 0xB5,
            Self::PropertyContext => 0xBC,
            Self::TableContext => 0x7C,
            Self::Other(code) => code,
        }
    }
}

/// Size of the header that starts heap block `index`.
#[must_use]
pub const fn block_header_size(index: usize) -> usize {
    if index == 0 {
        HEAP_HEADER_SIZE
    } else if index >= 8 && (index - 8) % 128 == 0 {
        BITMAP_HEADER_SIZE
    } else {
        PAGE_HEADER_SIZE
    }
}

/// One block's bytes with its parsed page map.
#[derive(Debug, PartialEq, Eq)]
struct HeapPage {
    data: Vec<u8>,
    /// `rgibAlloc`: `cAlloc + 1` offsets.
    offsets: Vec<u16>,
    /// Where the page map starts; no allocation may extend past it.
    map_offset: usize,
}

impl HeapPage {
    fn parse(nid: Nid, index: usize, data: Vec<u8>) -> Result<Self, Error> {
        let at = Location::Node(nid);
        let header = block_header_size(index);
        if data.len() < header {
            return Err(Error::corrupt(
                at,
                format!("heap block {index} shorter than its header"),
            ));
        }
        let map_offset = usize::from(read_u16(&data, 0));
        if map_offset < header || map_offset + 4 > data.len() {
            return Err(Error::corrupt(
                at,
                format!("heap block {index}: page map offset {map_offset} out of range"),
            ));
        }
        let count = usize::from(read_u16(&data, map_offset));
        let end = map_offset + 4 + (count + 1) * 2;
        if end > data.len() {
            return Err(Error::corrupt(
                at,
                format!("heap block {index}: {count} allocations overflow the page map"),
            ));
        }
        let offsets: Vec<u16> = (0..=count)
            .map(|i| read_u16(&data, map_offset + 4 + i * 2))
            .collect();

        Ok(Self {
            data,
            offsets,
            map_offset,
        })
    }
}

/// A decoded heap over one node's data.
#[derive(Debug, PartialEq, Eq)]
pub struct Heap {
    nid: Nid,
    client: ClientSignature,
    user_root: Hid,
    pages: Vec<HeapPage>,
}

impl Heap {
    /// Parse the heap header and every block's page map.
    ///
    /// # Errors
    ///
    /// `UnsupportedEncoding` when the node's bytes are still encoded,
    /// `CorruptStructure` for a bad signature or page map.
    pub fn new(data: NodeData) -> Result<Self, Error> {
        data.require_decoded()?;
        let nid = data.nid;
        let at = Location::Node(nid);
        let Some(first) = data.blocks.first() else {
            return Err(Error::corrupt(at, "heap has no data"));
        };
        if first.len() < HEAP_HEADER_SIZE {
            return Err(Error::corrupt(at, "heap header truncated"));
        }
        if first[2] != HEAP_SIGNATURE {
            return Err(Error::corrupt(
                at,
                format!("bad heap signature 0x{:02x}", first[2]),
            ));
        }
        let client = ClientSignature::from_code(first[3]);
        let user_root = Hid(read_u32(first, 4));

        let pages = data
            .blocks
            .into_iter()
            .enumerate()
            .map(|(i, block)| HeapPage::parse(nid, i, block))
            .collect::<Result<Vec<_>, _>>()?;

        Ok(Self {
            nid,
            client,
            user_root,
            pages,
        })
    }

    /// Like [`Heap::new`], also checking the client signature.
    pub fn with_client(data: NodeData, expected: ClientSignature) -> Result<Self, Error> {
        let heap = Self::new(data)?;
        if heap.client != expected {
            return Err(Error::corrupt(
                Location::Node(heap.nid),
                format!(
                    "heap client signature 0x{:02x}, expected 0x{:02x}",
                    heap.client.code(),
                    expected.code()
                ),
            ));
        }
        Ok(heap)
    }

    #[must_use]
    pub const fn nid(&self) -> Nid {
        self.nid
    }

    #[must_use]
    pub const fn client(&self) -> ClientSignature {
        self.client
    }

    /// `hidUserRoot`: the client's root structure.
    #[must_use]
    pub const fn user_root(&self) -> Hid {
        self.user_root
    }

    /// Number of blocks in the heap.
    #[must_use]
    pub fn block_count(&self) -> usize {
        self.pages.len()
    }

    /// Bytes of one allocation.
    ///
    /// # Errors
    ///
    /// `InvalidHandle` for HID 0, a non-heap HID type, a block past the
    /// chain or an index past the page's allocation count.
    /// `CorruptStructure` when the page map's offsets are inconsistent.
    pub fn resolve(&self, hid: Hid) -> Result<&[u8], Error> {
        let invalid = || Error::InvalidHandle(Handle::Hid(hid));
        if hid.0 == 0 || hid.hid_type() != 0 {
            return Err(invalid());
        }
        let page = self
            .pages
            .get(usize::from(hid.block_index()))
            .ok_or_else(invalid)?;
        let index = usize::from(hid.index());
        if index == 0 || index >= page.offsets.len() {
            return Err(invalid());
        }

        let start = usize::from(page.offsets[index - 1]);
        let end = usize::from(page.offsets[index]);
        if start > end || end > page.map_offset {
            return Err(Error::corrupt(
                Location::Heap(hid),
                format!("allocation spans {start}..{end}, page map at {}", page.map_offset),
            ));
        }
        Ok(&page.data[start..end])
    }
}
