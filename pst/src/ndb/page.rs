//! Page layout and validation.
//!
//! The B-trees live in 512-byte pages, each ending with a 16-byte trailer:
//!
//! ```text
//! +---------------------+-------+--------+------+-------+-----+
//! | body (496 bytes)    | ptype | ptype' | wSig | dwCRC | bid |
//! |                     | (1)   | (1)    | (2)  | (4)   | (8) |
//! +---------------------+-------+--------+------+-------+-----+
//! ```
//!
//! B-tree pages use the body as 488 bytes of entries followed by `cEnt`,
//! `cEntMax`, `cbEnt` and `cLevel`.

use crate::error::{Error, Location};
use crate::ndb::Bid;
use crate::ndb::header::Bref;
use crate::ndb::source::ReadRange;

/// Page size in bytes.
pub const PAGE_SIZE: usize = 512;

/// Offset of the page trailer.
pub const TRAILER_OFFSET: usize = PAGE_SIZE - 16;

/// Bytes available for B-tree entries.
pub const ENTRIES_SIZE: usize = 488;

/// Page type identifiers stored in the trailer.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum PageType {
    /// Block B-tree page
    BlockBTree = 0x80,
    /// Node B-tree page
    NodeBTree = 0x81,
    /// Free map page
    FreeMap = 0x82,
    /// Allocation page map
    PageMap = 0x83,
    /// Allocation map
    AllocationMap = 0x84,
    /// Free page map
    FreePageMap = 0x85,
    /// Density list
    DensityList = 0x86,
}

impl TryFrom<u8> for PageType {
    type Error = u8;

    fn try_from(value: u8) -> Result<Self, Self::Error> {
        match value {
            0x80 => Ok(Self::BlockBTree),
            0x81 => Ok(Self::NodeBTree),
            0x82 => Ok(Self::FreeMap),
            0x83 => Ok(Self::PageMap),
            0x84 => Ok(Self::AllocationMap),
            0x85 => Ok(Self::FreePageMap),
            0x86 => Ok(Self::DensityList),
            _ => Err(value),
        }
    }
}

/// CRC used by pages, blocks and the file header.
///
/// Reflected CRC-32 (0xEDB88320) seeded with zero and not inverted at the
/// end. `crc32fast` inverts on entry and exit, so seed it with all ones and
/// invert the result.
#[must_use]
pub fn compute_crc(data: &[u8]) -> u32 {
    let mut hasher = crc32fast::Hasher::new_with_initial(0xFFFF_FFFF);
    hasher.update(data);
    !hasher.finalize()
}

/// Signature binding a page or block to its file offset and identifier.
#[must_use]
#[allow(clippy::cast_possible_truncation)]
pub const fn compute_signature(ib: u64, bid: u64) -> u16 {
    let w = (ib ^ bid) as u32;
    ((w >> 16) ^ w) as u16
}

pub(crate) fn read_u16(bytes: &[u8], offset: usize) -> u16 {
    u16::from_le_bytes([bytes[offset], bytes[offset + 1]])
}

pub(crate) fn read_u32(bytes: &[u8], offset: usize) -> u32 {
    u32::from_le_bytes([
        bytes[offset],
        bytes[offset + 1],
        bytes[offset + 2],
        bytes[offset + 3],
    ])
}

pub(crate) fn read_u64(bytes: &[u8], offset: usize) -> u64 {
    u64::from_le_bytes([
        bytes[offset],
        bytes[offset + 1],
        bytes[offset + 2],
        bytes[offset + 3],
        bytes[offset + 4],
        bytes[offset + 5],
        bytes[offset + 6],
        bytes[offset + 7],
    ])
}

/// Trailer present at the end of every page.
#[derive(Debug, Clone, Copy)]
pub struct PageTrailer {
    pub page_type: PageType,
    pub signature: u16,
    pub crc: u32,
    pub bid: Bid,
}

impl PageTrailer {
    /// Parse and check the trailer of a raw page.
    pub fn parse(page: &[u8], ib: u64) -> Result<Self, Error> {
        let at = Location::Offset(ib);
        let raw_type = page[TRAILER_OFFSET];
        let repeat = page[TRAILER_OFFSET + 1];
        if raw_type != repeat {
            return Err(Error::corrupt(
                at,
                format!("page type 0x{raw_type:02x} does not match repeat 0x{repeat:02x}"),
            ));
        }
        let page_type = PageType::try_from(raw_type)
            .map_err(|v| Error::corrupt(at, format!("invalid page type: 0x{v:02x}")))?;

        Ok(Self {
            page_type,
            signature: read_u16(page, TRAILER_OFFSET + 2),
            crc: read_u32(page, TRAILER_OFFSET + 4),
            bid: Bid(read_u64(page, TRAILER_OFFSET + 8)),
        })
    }
}

/// A parsed B-tree page (either tree, any level).
#[derive(Debug)]
pub struct BTreePage {
    /// Where the page was read from.
    pub offset: u64,
    pub page_type: PageType,
    /// 0 for leaves.
    pub level: u8,
    pub entry_size: usize,
    /// Raw entry bytes, `entry_count * entry_size` long.
    entries: Vec<u8>,
}

impl BTreePage {
    /// Read a B-tree page referenced by `bref` and check its trailer.
    ///
    /// # Validation
    ///
    /// - page type matches `expected` (and its repeat byte)
    /// - CRC over the first 496 bytes (when `verify_crc`)
    /// - signature and trailer BID match `bref`
    /// - entry count and size fit the entry area
    pub fn read(
        source: &dyn ReadRange,
        bref: Bref,
        expected: PageType,
        verify_crc: bool,
    ) -> Result<Self, Error> {
        let at = Location::Offset(bref.ib);
        if bref.ib.saturating_add(PAGE_SIZE as u64) > source.len() {
            return Err(Error::corrupt(at, "page reference past end of file"));
        }
        let page = source.read_range(bref.ib, PAGE_SIZE)?;
        let trailer = PageTrailer::parse(&page, bref.ib)?;

        if trailer.page_type != expected {
            return Err(Error::corrupt(
                at,
                format!(
                    "expected {expected:?} page, found {:?}",
                    trailer.page_type
                ),
            ));
        }
        if verify_crc {
            let actual = compute_crc(&page[..TRAILER_OFFSET]);
            if actual != trailer.crc {
                return Err(Error::corrupt(
                    at,
                    format!(
                        "checksum mismatch: expected 0x{:08x}, got 0x{actual:08x}",
                        trailer.crc
                    ),
                ));
            }
        }
        if trailer.bid.key() != bref.bid.key() {
            return Err(Error::corrupt(
                at,
                format!("page BID {} does not match reference {}", trailer.bid, bref.bid),
            ));
        }
        let signature = compute_signature(bref.ib, bref.bid.0);
        if trailer.signature != signature {
            return Err(Error::corrupt(
                at,
                format!(
                    "signature mismatch: expected 0x{signature:04x}, got 0x{:04x}",
                    trailer.signature
                ),
            ));
        }

        let entry_count = usize::from(page[ENTRIES_SIZE]);
        let entry_size = usize::from(page[ENTRIES_SIZE + 2]);
        let level = page[ENTRIES_SIZE + 3];
        if entry_size == 0 || entry_count * entry_size > ENTRIES_SIZE {
            return Err(Error::corrupt(
                at,
                format!("{entry_count} entries of {entry_size} bytes overflow the page"),
            ));
        }

        Ok(Self {
            offset: bref.ib,
            page_type: trailer.page_type,
            level,
            entry_size,
            entries: page[..entry_count * entry_size].to_vec(),
        })
    }

    #[must_use]
    pub const fn len(&self) -> usize {
        self.entries.len() / self.entry_size
    }

    #[must_use]
    pub const fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Raw bytes of entry `index`.
    #[must_use]
    pub fn entry(&self, index: usize) -> &[u8] {
        let start = index * self.entry_size;
        &self.entries[start..start + self.entry_size]
    }

    /// The u64 key at the start of entry `index`.
    #[must_use]
    pub fn key(&self, index: usize) -> u64 {
        read_u64(self.entry(index), 0)
    }

    /// Check that keys are strictly increasing.
    pub fn check_order(&self) -> Result<(), Error> {
        for i in 1..self.len() {
            let (prev, key) = (self.key(i - 1), self.key(i));
            if prev >= key {
                return Err(Error::corrupt(
                    Location::Offset(self.offset),
                    format!("keys out of order at entry {i}: 0x{prev:x} >= 0x{key:x}"),
                ));
            }
        }
        Ok(())
    }
}
