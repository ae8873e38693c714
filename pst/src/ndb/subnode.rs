//! Sub-node trees.
//!
//! A node's sub-node BID points at a small B-tree built from blocks rather
//! than pages. Leaf blocks (SLBLOCK, `cLevel` 0) map a local NID to its own
//! data and sub-node BIDs; intermediate blocks (SIBLOCK, `cLevel` 1) map the
//! lowest NID below each child to the child's BID.
//!
//! ```text
//! header   btype 0x02 | cLevel | cEnt u16 | pad u32
//! SLENTRY  nid u64 | bidData u64 | bidSub u64     (24 bytes)
//! SIENTRY  nid u64 | bid u64                      (16 bytes)
//! ```

use std::collections::BTreeMap;

use crate::error::{Error, Location};
use crate::ndb::block::{BTYPE_SUB_NODE, Block};
use crate::ndb::page::read_u64;
use crate::ndb::{Bid, Nid};

const HEADER_SIZE: usize = 8;
const LEAF_ENTRY_SIZE: usize = 24;
const INTERMEDIATE_ENTRY_SIZE: usize = 16;

/// Where one sub-node's storage lives.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SubNodeEntry {
    pub data_bid: Bid,
    pub sub_bid: Option<Bid>,
}

/// Sub-nodes of one parent, ordered by local NID.
pub type SubNodeMap = BTreeMap<Nid, SubNodeEntry>;

/// A parsed SLBLOCK or SIBLOCK.
#[derive(Debug)]
enum SubNodeBlock {
    Leaf(Vec<(Nid, SubNodeEntry)>),
    Intermediate(Vec<(Nid, Bid)>),
}

impl SubNodeBlock {
    #[allow(clippy::cast_possible_truncation)] // NIDs are 32-bit, padded to 64 on disk
    fn parse(block: &Block) -> Result<Self, Error> {
        let at = Location::Block(block.bid);
        let data = &block.data;
        if data.len() < HEADER_SIZE {
            return Err(Error::corrupt(at, "sub-node block too short"));
        }
        if data[0] != BTYPE_SUB_NODE {
            return Err(Error::corrupt(
                at,
                format!("expected sub-node block, found btype 0x{:02x}", data[0]),
            ));
        }
        let level = data[1];
        let count = usize::from(u16::from_le_bytes([data[2], data[3]]));
        let entry_size = match level {
            0 => LEAF_ENTRY_SIZE,
            1 => INTERMEDIATE_ENTRY_SIZE,
            other => {
                return Err(Error::corrupt(at, format!("invalid sub-node level {other}")));
            }
        };
        if HEADER_SIZE + count * entry_size > data.len() {
            return Err(Error::corrupt(
                at,
                format!("{count} entries overflow a {}-byte block", data.len()),
            ));
        }

        let entries = (0..count).map(|i| &data[HEADER_SIZE + i * entry_size..][..entry_size]);
        let nids: Vec<Nid> = entries
            .clone()
            .map(|e| Nid(read_u64(e, 0) as u32))
            .collect();
        if nids.windows(2).any(|w| w[0] >= w[1]) {
            return Err(Error::corrupt(at, "sub-node keys out of order"));
        }

        Ok(if level == 0 {
            Self::Leaf(
                entries
                    .zip(nids)
                    .map(|(e, nid)| {
                        let sub_bid = Bid(read_u64(e, 16));
                        let entry = SubNodeEntry {
                            data_bid: Bid(read_u64(e, 8)),
                            sub_bid: (!sub_bid.is_null()).then_some(sub_bid),
                        };
                        (nid, entry)
                    })
                    .collect(),
            )
        } else {
            Self::Intermediate(
                entries
                    .zip(nids)
                    .map(|(e, nid)| (nid, Bid(read_u64(e, 8))))
                    .collect(),
            )
        })
    }
}

/// Walks a sub-node tree through a block reader.
///
/// The reader is handed in as a closure so the walk stays independent of
/// how blocks are fetched and cached.
pub struct SubNodeResolver<F> {
    read_block: F,
    max_depth: u8,
}

impl<F> SubNodeResolver<F>
where
    F: Fn(Bid) -> Result<Block, Error>,
{
    pub const fn new(read_block: F, max_depth: u8) -> Self {
        Self {
            read_block,
            max_depth,
        }
    }

    /// Resolve the whole tree rooted at `root`.
    ///
    /// # Errors
    ///
    /// `CorruptStructure` when a block is malformed, a NID appears twice or
    /// the tree is deeper than the configured cap; `InvalidHandle` when a
    /// BID is missing from the BBT.
    pub fn resolve(&self, root: Bid) -> Result<SubNodeMap, Error> {
        let mut map = SubNodeMap::new();
        self.walk(root, 1, &mut map)?;
        Ok(map)
    }

    fn walk(&self, bid: Bid, depth: usize, map: &mut SubNodeMap) -> Result<(), Error> {
        if depth > usize::from(self.max_depth) {
            return Err(Error::corrupt(
                Location::Block(bid),
                format!("sub-node tree deeper than {}", self.max_depth),
            ));
        }
        let block = (self.read_block)(bid)?;
        match SubNodeBlock::parse(&block)? {
            SubNodeBlock::Leaf(entries) => {
                for (nid, entry) in entries {
                    if map.insert(nid, entry).is_some() {
                        return Err(Error::corrupt(
                            Location::Block(bid),
                            format!("sub-node {nid} listed twice"),
                        ));
                    }
                }
            }
            SubNodeBlock::Intermediate(children) => {
                tracing::trace!("sub-node block {bid} at depth {depth}: {} children", children.len());
                for (_, child) in children {
                    self.walk(child, depth + 1, map)?;
                }
            }
        }
        Ok(())
    }
}
