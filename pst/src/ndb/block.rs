//! Blocks, block trailers and data trees.
//!
//! # Block Format
//!
//! ```text
//! +------------------+-----------+-----+------+-------+-----+
//! | data (cb bytes)  | padding   | cb  | wSig | dwCRC | bid |
//! |                  | to 64n-16 | (2) | (2)  | (4)   | (8) |
//! +------------------+-----------+-----+------+-------+-----+
//! ```
//!
//! # Data Trees
//!
//! A node's data is either one external block or, when its BID is internal,
//! an XBLOCK listing data blocks (`cLevel` 1) or an XXBLOCK listing XBLOCKs
//! (`cLevel` 2):
//!
//! ```text
//! +-------+--------+------+----------+-------------------+
//! | btype | cLevel | cEnt | lcbTotal | rgbid[cEnt] (8 b) |
//! | 0x01  | (1)    | (2)  | (4)      |                   |
//! +-------+--------+------+----------+-------------------+
//! ```

use std::fmt;

use crate::error::{Error, Location};
use crate::ndb::btree::BlockEntry;
use crate::ndb::header::CryptMethod;
use crate::ndb::page::{compute_crc, compute_signature, read_u16, read_u32, read_u64};
use crate::ndb::{Bid, Nid};

/// Size of a block trailer.
pub const BLOCK_TRAILER_SIZE: usize = 16;

/// Largest amount of data one block carries.
pub const MAX_BLOCK_DATA: usize = 8192 - BLOCK_TRAILER_SIZE;

/// `btype` of XBLOCK / XXBLOCK.
pub const BTYPE_DATA_TREE: u8 = 0x01;

/// `btype` of SLBLOCK / SIBLOCK.
pub const BTYPE_SUB_NODE: u8 = 0x02;

/// A block read from disk with its trailer checked.
#[derive(Debug, Clone)]
pub struct Block {
    pub bid: Bid,
    pub data: Vec<u8>,
}

/// Check a raw block (data, padding and trailer) against its BBT entry.
pub fn verify_block(raw: &[u8], entry: &BlockEntry, verify_crc: bool) -> Result<Vec<u8>, Error> {
    let at = Location::Offset(entry.offset);
    let size = usize::from(entry.size);
    if raw.len() < size + BLOCK_TRAILER_SIZE {
        return Err(Error::corrupt(at, "block shorter than its trailer"));
    }
    let trailer = &raw[raw.len() - BLOCK_TRAILER_SIZE..];
    let cb = usize::from(read_u16(trailer, 0));
    let signature = read_u16(trailer, 2);
    let crc = read_u32(trailer, 4);
    let bid = Bid(read_u64(trailer, 8));

    if cb != size {
        return Err(Error::corrupt(
            at,
            format!("trailer size {cb} does not match BBT size {size}"),
        ));
    }
    if bid.key() != entry.bid.key() {
        return Err(Error::corrupt(
            at,
            format!("trailer BID {bid} does not match {}", entry.bid),
        ));
    }
    let expected_signature = compute_signature(entry.offset, entry.bid.key());
    if signature != expected_signature {
        return Err(Error::corrupt(
            at,
            format!("signature mismatch: expected 0x{expected_signature:04x}, got 0x{signature:04x}"),
        ));
    }
    let data = &raw[..size];
    if verify_crc {
        let actual = compute_crc(data);
        if actual != crc {
            return Err(Error::corrupt(
                at,
                format!("checksum mismatch: expected 0x{crc:08x}, got 0x{actual:08x}"),
            ));
        }
    }
    Ok(data.to_vec())
}

/// A decoder for encoded (external) block payloads.
///
/// Registered per [`CryptMethod`] on the reader. The transform is applied
/// in place; it must not change the length.
pub trait BlockCodec: Send + Sync {
    fn decode(&self, bid: Bid, data: &mut [u8]);
}

/// How the bytes of a node's data blocks relate to what is on disk.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Encoding {
    /// Stored unencoded.
    Plain,
    /// Decoded by a registered codec.
    Decoded(CryptMethod),
    /// Encoded on disk and no codec is registered: the bytes are raw.
    Unresolved(CryptMethod),
}

/// The resolved payload of one node: its data blocks in order.
///
/// This is the hand-off from the NDB layer to the LTP layer.
#[derive(Clone, PartialEq, Eq)]
pub struct NodeData {
    pub nid: Nid,
    pub blocks: Vec<Vec<u8>>,
    pub encoding: Encoding,
}

impl NodeData {
    /// Total number of data bytes across all blocks.
    #[must_use]
    pub fn len(&self) -> usize {
        self.blocks.iter().map(Vec::len).sum()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// All blocks concatenated.
    #[must_use]
    pub fn concat(&self) -> Vec<u8> {
        self.blocks.concat()
    }

    /// Fail with `UnsupportedEncoding` if the bytes are still encoded.
    pub const fn require_decoded(&self) -> Result<(), Error> {
        match self.encoding {
            Encoding::Unresolved(method) => Err(Error::UnsupportedEncoding {
                nid: self.nid,
                method,
            }),
            Encoding::Plain | Encoding::Decoded(_) => Ok(()),
        }
    }
}

impl fmt::Debug for NodeData {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("NodeData")
            .field("nid", &self.nid)
            .field("blocks", &self.blocks.len())
            .field("len", &self.len())
            .field("encoding", &self.encoding)
            .finish()
    }
}

/// Parsed XBLOCK / XXBLOCK header and child list.
#[derive(Debug)]
pub struct DataTreeBlock {
    pub level: u8,
    pub total_size: u32,
    pub children: Vec<Bid>,
}

impl DataTreeBlock {
    pub fn parse(block: &Block) -> Result<Self, Error> {
        let at = Location::Block(block.bid);
        let data = &block.data;
        if data.len() < 8 {
            return Err(Error::corrupt(at, "data tree block too short"));
        }
        if data[0] != BTYPE_DATA_TREE {
            return Err(Error::corrupt(
                at,
                format!("expected data tree block, found btype 0x{:02x}", data[0]),
            ));
        }
        let level = data[1];
        if !(1..=2).contains(&level) {
            return Err(Error::corrupt(at, format!("invalid data tree level {level}")));
        }
        let count = usize::from(read_u16(data, 2));
        let total_size = read_u32(data, 4);
        if 8 + count * 8 > data.len() {
            return Err(Error::corrupt(
                at,
                format!("{count} children overflow a {}-byte block", data.len()),
            ));
        }
        let children = (0..count).map(|i| Bid(read_u64(data, 8 + i * 8))).collect();

        Ok(Self {
            level,
            total_size,
            children,
        })
    }
}
