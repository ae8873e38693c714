//! Node Database layer.
//!
//! Resolves node and block identifiers to bytes:
//!
//! - the header names the roots of the node B-tree (NBT) and block B-tree
//!   (BBT)
//! - the NBT maps a NID to a data BID, an optional sub-node BID and a parent
//! - the BBT maps a BID to a file offset and size
//! - internal BIDs point at data trees (XBLOCK/XXBLOCK) or sub-node trees
//!   (SLBLOCK/SIBLOCK)
//!
//! # Usage
//!
//! ```ignore
//! let ndb = Ndb::open(FileSource::open(path)?, ReaderConfig::default())?;
//! let entry = ndb.lookup_node(Nid::MESSAGE_STORE)?.ok_or(...)?;
//! let data = ndb.read_data_tree(entry.nid, entry.data_bid)?;
//! ```

mod block;
mod btree;
mod header;
mod ids;
mod page;
mod source;
mod subnode;

use std::collections::{HashMap, HashSet};
use std::sync::{Arc, RwLock};

pub use block::{
    BLOCK_TRAILER_SIZE, BTYPE_DATA_TREE, BTYPE_SUB_NODE, Block, BlockCodec, Encoding,
    MAX_BLOCK_DATA, NodeData,
};
pub use btree::{BTree, BTreeIter, BlockEntry, BlockTree, NodeEntry, NodeTree};
pub use header::{Bref, CryptMethod, HEADER_SIZE, Header, Root};
pub use ids::{Bid, Hid, Hnid, Nid, NodeType};
pub(crate) use page::{compute_crc, compute_signature, read_u16, read_u32, read_u64};
pub use page::{ENTRIES_SIZE, PAGE_SIZE, PageType};
pub use source::{FileSource, MemorySource, ReadRange};
pub use subnode::{SubNodeEntry, SubNodeMap};

use crate::config::ReaderConfig;
use crate::error::{Error, Handle, Location};
use block::{DataTreeBlock, verify_block};
use subnode::SubNodeResolver;

/// Everything needed to read one node: its data and its sub-node tree.
///
/// Top-level nodes come from the NBT and carry their parent; sub-nodes come
/// from a parent's sub-node tree.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct NodeRef {
    pub nid: Nid,
    pub data_bid: Bid,
    pub sub_bid: Option<Bid>,
    /// Parent folder (NBT nodes) or owning node (sub-nodes).
    pub parent: Option<Nid>,
}

impl NodeRef {
    /// A sub-node of `parent`.
    #[must_use]
    pub const fn sub_node(parent: Nid, nid: Nid, entry: SubNodeEntry) -> Self {
        Self {
            nid,
            data_bid: entry.data_bid,
            sub_bid: entry.sub_bid,
            parent: Some(parent),
        }
    }
}

impl From<NodeEntry> for NodeRef {
    fn from(entry: NodeEntry) -> Self {
        Self {
            nid: entry.nid,
            data_bid: entry.data_bid,
            sub_bid: entry.sub_bid,
            parent: (entry.parent.0 != 0).then_some(entry.parent),
        }
    }
}

/// What the LTP layer needs from the node database.
pub trait NodeStore: Send + Sync {
    /// Read and flatten the data tree rooted at `bid`, owned by `nid`.
    fn read_data_tree(&self, nid: Nid, bid: Bid) -> Result<NodeData, Error>;

    /// Resolve the sub-node tree rooted at `bid`.
    fn sub_nodes(&self, bid: Bid) -> Result<SubNodeMap, Error>;
}

/// An open node database over a byte source.
pub struct Ndb<S> {
    source: S,
    header: Header,
    config: ReaderConfig,
    codecs: RwLock<HashMap<CryptMethod, Arc<dyn BlockCodec>>>,
}

impl<S: ReadRange> Ndb<S> {
    /// Parse the header and get ready to read.
    ///
    /// # Errors
    ///
    /// Fails only when the header cannot be read or parsed; every other
    /// structure is validated lazily when it is first touched.
    pub fn open(source: S, config: ReaderConfig) -> Result<Self, Error> {
        #[allow(clippy::cast_possible_truncation)] // capped at HEADER_SIZE
        let len = source.len().min(HEADER_SIZE as u64) as usize;
        let header = Header::parse(&source.read_range(0, len)?)?;
        tracing::info!(
            "opened store: version {}, {} bytes, encoding {}",
            header.version,
            source.len(),
            header.crypt_method
        );

        Ok(Self {
            source,
            header,
            config,
            codecs: RwLock::new(HashMap::new()),
        })
    }

    pub const fn header(&self) -> &Header {
        &self.header
    }

    pub const fn config(&self) -> &ReaderConfig {
        &self.config
    }

    pub const fn source(&self) -> &S {
        &self.source
    }

    /// Register the decoder used for blocks stored under `method`.
    #[allow(clippy::expect_used)] // Lock poisoning indicates unrecoverable state
    pub fn register_codec(&self, method: CryptMethod, codec: Arc<dyn BlockCodec>) {
        self.codecs
            .write()
            .expect("lock poisoned")
            .insert(method, codec);
    }

    fn bbt(&self) -> BTree<'_, BlockTree> {
        BTree::new(&self.source, self.header.root.bbt, self.config.verify_checksums)
    }

    fn nbt(&self) -> BTree<'_, NodeTree> {
        BTree::new(&self.source, self.header.root.nbt, self.config.verify_checksums)
    }

    pub fn lookup_block(&self, bid: Bid) -> Result<Option<BlockEntry>, Error> {
        self.bbt().lookup(bid.key())
    }

    /// Lazy scan of the BBT.
    pub fn blocks(&self) -> BTreeIter<'_, BlockTree> {
        self.bbt().iter()
    }

    pub fn lookup_node(&self, nid: Nid) -> Result<Option<NodeEntry>, Error> {
        self.nbt().lookup(u64::from(nid.0))
    }

    /// Lazy scan of the NBT.
    pub fn nodes(&self) -> BTreeIter<'_, NodeTree> {
        self.nbt().iter()
    }

    /// Read one block and check its trailer. The payload is not decoded.
    ///
    /// # Errors
    ///
    /// `InvalidHandle` when the BID is not in the BBT, `CorruptStructure`
    /// when the block does not match its BBT entry.
    pub fn read_block(&self, bid: Bid) -> Result<Block, Error> {
        let entry = self
            .lookup_block(bid)?
            .ok_or(Error::InvalidHandle(Handle::Bid(bid)))?;
        if entry.offset.saturating_add(entry.disk_size() as u64) > self.source.len() {
            return Err(Error::corrupt(
                Location::Offset(entry.offset),
                format!("block {bid} extends past end of file"),
            ));
        }
        let raw = self.source.read_range(entry.offset, entry.disk_size())?;
        let data = verify_block(&raw, &entry, self.config.verify_checksums)?;
        Ok(Block { bid, data })
    }

    /// Collect the leaf blocks under `bid` in order and return their size.
    ///
    /// `parent_level` is the level of the data tree block that referenced
    /// `bid`, if any, and `budget` the bytes its `lcbTotal` still allows.
    /// A block may appear only once in a tree.
    fn collect_data(
        &self,
        bid: Bid,
        parent_level: Option<u8>,
        budget: u64,
        seen: &mut HashSet<Bid>,
        out: &mut Vec<(Bid, Vec<u8>)>,
    ) -> Result<u64, Error> {
        let at = Location::Block(bid);
        if !seen.insert(bid) {
            return Err(Error::corrupt(at, "block listed twice in one data tree"));
        }
        let block = self.read_block(bid)?;
        if !bid.is_internal() {
            if matches!(parent_level, Some(level) if level != 1) {
                return Err(Error::corrupt(at, "data block referenced from an XXBLOCK"));
            }
            let size = block.data.len() as u64;
            if size > budget {
                return Err(Error::corrupt(
                    at,
                    format!("{size}-byte block overruns lcbTotal by {}", size - budget),
                ));
            }
            out.push((bid, block.data));
            return Ok(size);
        }

        let tree = DataTreeBlock::parse(&block)?;
        if matches!(parent_level, Some(level) if level != tree.level + 1) {
            return Err(Error::corrupt(
                at,
                format!("data tree level {} under level {parent_level:?}", tree.level),
            ));
        }
        let total = u64::from(tree.total_size);
        if total > budget {
            return Err(Error::corrupt(
                at,
                format!("lcbTotal {total} exceeds the {budget} bytes left in its parent"),
            ));
        }
        let mut collected = 0;
        for child in &tree.children {
            collected += self.collect_data(*child, Some(tree.level), total - collected, seen, out)?;
        }
        if collected != total {
            return Err(Error::corrupt(
                at,
                format!("lcbTotal {total} but leaves hold {collected} bytes"),
            ));
        }
        Ok(collected)
    }

    /// Apply the registered codec, if the file is encoded.
    #[allow(clippy::expect_used)] // Lock poisoning indicates unrecoverable state
    fn decode_blocks(&self, nid: Nid, blocks: &mut [(Bid, Vec<u8>)]) -> Encoding {
        let method = self.header.crypt_method;
        if method == CryptMethod::None {
            return Encoding::Plain;
        }
        let codecs = self.codecs.read().expect("lock poisoned");
        match codecs.get(&method) {
            Some(codec) => {
                for (bid, data) in blocks {
                    codec.decode(*bid, data);
                }
                Encoding::Decoded(method)
            }
            None => {
                tracing::debug!("node {nid}: no codec for {method}, returning raw bytes");
                Encoding::Unresolved(method)
            }
        }
    }

    /// Read the data tree rooted at `bid` and flatten it into `NodeData`.
    ///
    /// A null BID yields empty data.
    pub fn read_data_tree(&self, nid: Nid, bid: Bid) -> Result<NodeData, Error> {
        let mut blocks = Vec::new();
        if !bid.is_null() {
            self.collect_data(bid, None, u64::MAX, &mut HashSet::new(), &mut blocks)?;
        }
        let encoding = self.decode_blocks(nid, &mut blocks);

        Ok(NodeData {
            nid,
            blocks: blocks.into_iter().map(|(_, data)| data).collect(),
            encoding,
        })
    }

    /// Resolve the sub-node tree rooted at `bid`.
    pub fn sub_nodes(&self, bid: Bid) -> Result<SubNodeMap, Error> {
        SubNodeResolver::new(|b| self.read_block(b), self.config.max_tree_depth).resolve(bid)
    }
}

impl<S: ReadRange> NodeStore for Ndb<S> {
    fn read_data_tree(&self, nid: Nid, bid: Bid) -> Result<NodeData, Error> {
        Self::read_data_tree(self, nid, bid)
    }

    fn sub_nodes(&self, bid: Bid) -> Result<SubNodeMap, Error> {
        Self::sub_nodes(self, bid)
    }
}
