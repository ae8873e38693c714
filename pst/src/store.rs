//! The reader facade handed to consumers.
//!
//! [`Pst`] ties the node database to the LTP decoders and memoizes what it
//! decodes. The file is treated as immutable while it is open, so any
//! decoded property context, table or sub-node map stays valid until
//! [`Pst::clear_caches`] is called.
//!
//! # Thread Safety
//!
//! Caches are `RwLock<HashMap<..>>`: lookups take the read lock, misses
//! decode without any lock held and then insert under the write lock. Two
//! threads missing on the same node both decode it; the first insert wins.

use std::collections::HashMap;
use std::hash::Hash;
use std::path::Path;
use std::sync::{Arc, RwLock};

use crate::config::ReaderConfig;
use crate::error::{Error, Handle, NodeFailure};
use crate::ltp::{PropertyContext, TableContext};
use crate::ndb::{
    BTreeIter, Bid, BlockCodec, BlockEntry, BlockTree, CryptMethod, FileSource, Header, Ndb, Nid,
    NodeData, NodeEntry, NodeRef, NodeStore, NodeTree, NodeType, ReadRange, SubNodeMap,
};

/// One memoization table.
struct Cache<K, T> {
    enabled: bool,
    entries: RwLock<HashMap<K, Arc<T>>>,
}

impl<K: Eq + Hash + Copy + std::fmt::Debug, T> Cache<K, T> {
    fn new(enabled: bool) -> Self {
        Self {
            enabled,
            entries: RwLock::new(HashMap::new()),
        }
    }

    /// Return the cached value for `key` or decode and remember it.
    /// Failures are never cached.
    #[allow(clippy::expect_used)] // Lock poisoning indicates unrecoverable state
    fn get_or_decode(
        &self,
        key: K,
        decode: impl FnOnce() -> Result<T, Error>,
    ) -> Result<Arc<T>, Error> {
        if !self.enabled {
            return decode().map(Arc::new);
        }
        let cached = self.entries.read().expect("lock poisoned").get(&key).cloned();
        if let Some(hit) = cached {
            return Ok(hit);
        }
        tracing::debug!("cache miss for {key:?}");
        let value = Arc::new(decode()?);
        let mut entries = self.entries.write().expect("lock poisoned");
        Ok(Arc::clone(entries.entry(key).or_insert(value)))
    }

    #[allow(clippy::expect_used)] // Lock poisoning indicates unrecoverable state
    fn clear(&self) {
        self.entries.write().expect("lock poisoned").clear();
    }

    #[allow(clippy::expect_used)] // Lock poisoning indicates unrecoverable state
    fn len(&self) -> usize {
        self.entries.read().expect("lock poisoned").len()
    }
}

/// An open store.
pub struct Pst<S> {
    ndb: Arc<Ndb<S>>,
    /// Keyed by the full node reference: sub-node NIDs are only unique
    /// within their parent.
    properties: Cache<NodeRef, PropertyContext>,
    tables: Cache<NodeRef, TableContext>,
    /// Keyed by the root block of the sub-node tree.
    sub_nodes: Cache<Bid, SubNodeMap>,
}

impl Pst<FileSource> {
    /// Open the store file at `path`.
    ///
    /// # Errors
    ///
    /// `IoFault` when the file cannot be opened or read, `CorruptStructure`
    /// when its header is invalid.
    pub fn open(path: impl AsRef<Path>, config: ReaderConfig) -> Result<Self, Error> {
        Self::from_source(FileSource::open(path.as_ref())?, config)
    }
}

impl<S: ReadRange + 'static> Pst<S> {
    /// Open a store over any byte source.
    pub fn from_source(source: S, config: ReaderConfig) -> Result<Self, Error> {
        let ndb = Ndb::open(source, config)?;
        Ok(Self {
            ndb: Arc::new(ndb),
            properties: Cache::new(config.memoize),
            tables: Cache::new(config.memoize),
            sub_nodes: Cache::new(config.memoize),
        })
    }

    pub fn header(&self) -> &Header {
        self.ndb.header()
    }

    pub fn config(&self) -> &ReaderConfig {
        self.ndb.config()
    }

    /// The underlying node database.
    pub fn ndb(&self) -> &Ndb<S> {
        &self.ndb
    }

    /// Register the decoder for blocks stored under `method`.
    ///
    /// Clears the caches so values decoded before registration are not
    /// served afterwards.
    pub fn register_codec(&self, method: CryptMethod, codec: Arc<dyn BlockCodec>) {
        self.ndb.register_codec(method, codec);
        self.clear_caches();
    }

    pub fn lookup_node(&self, nid: Nid) -> Result<Option<NodeEntry>, Error> {
        self.ndb.lookup_node(nid)
    }

    /// Look up a top-level node, treating absence as a dangling handle.
    pub fn node(&self, nid: Nid) -> Result<NodeRef, Error> {
        self.ndb
            .lookup_node(nid)?
            .map(NodeRef::from)
            .ok_or(Error::InvalidHandle(Handle::Nid(nid)))
    }

    pub fn nodes(&self) -> BTreeIter<'_, NodeTree> {
        self.ndb.nodes()
    }

    pub fn lookup_block(&self, bid: Bid) -> Result<Option<BlockEntry>, Error> {
        self.ndb.lookup_block(bid)
    }

    pub fn blocks(&self) -> BTreeIter<'_, BlockTree> {
        self.ndb.blocks()
    }

    /// NBT entries whose parent is `parent`, by a full scan.
    ///
    /// Scan errors are passed through so the caller can attribute them.
    pub fn children(&self, parent: Nid) -> impl Iterator<Item = Result<NodeEntry, Error>> + '_ {
        self.ndb
            .nodes()
            .filter(move |entry| !matches!(entry, Ok(e) if e.parent != parent))
    }

    /// Raw (decoded when possible) data of a top-level node.
    pub fn node_data(&self, nid: Nid) -> Result<NodeData, Error> {
        let node = self.node(nid)?;
        self.ndb.read_data_tree(nid, node.data_bid)
    }

    /// Property context of a top-level node.
    pub fn get_properties(&self, nid: Nid) -> Result<Arc<PropertyContext>, Error> {
        self.properties_of(&self.node(nid)?)
    }

    /// Sub-nodes of a top-level node. Empty when it has no sub-node tree.
    pub fn get_sub_nodes(&self, nid: Nid) -> Result<Arc<SubNodeMap>, Error> {
        self.sub_nodes_of(&self.node(nid)?)
    }

    /// Table context of a top-level node.
    pub fn get_table(&self, nid: Nid) -> Result<Arc<TableContext>, Error> {
        self.table_of(&self.node(nid)?)
    }

    pub fn properties_of(&self, node: &NodeRef) -> Result<Arc<PropertyContext>, Error> {
        self.properties.get_or_decode(*node, || {
            PropertyContext::decode(self.ndb.as_ref(), node)
        })
    }

    pub fn table_of(&self, node: &NodeRef) -> Result<Arc<TableContext>, Error> {
        self.tables.get_or_decode(*node, || {
            let store: Arc<dyn NodeStore> = Arc::clone(&self.ndb) as Arc<dyn NodeStore>;
            TableContext::decode(store, node)
        })
    }

    pub fn sub_nodes_of(&self, node: &NodeRef) -> Result<Arc<SubNodeMap>, Error> {
        let Some(bid) = node.sub_bid else {
            return Ok(Arc::new(SubNodeMap::new()));
        };
        self.sub_nodes.get_or_decode(bid, || self.ndb.sub_nodes(bid))
    }

    /// Resolve `child` in the sub-node tree of `parent`.
    ///
    /// # Errors
    ///
    /// `InvalidHandle` when `parent` has no such sub-node.
    pub fn sub_node(&self, parent: &NodeRef, child: Nid) -> Result<NodeRef, Error> {
        let map = self.sub_nodes_of(parent)?;
        let entry = map
            .get(&child)
            .ok_or(Error::InvalidHandle(Handle::Nid(child)))?;
        Ok(NodeRef::sub_node(parent.nid, child, *entry))
    }

    /// Decode the property context of every node that carries one.
    ///
    /// Folders, messages, the message store and the name-to-id map are
    /// decoded; tables and internal nodes are skipped. A scoped failure is
    /// yielded as a [`NodeFailure`] and the scan moves on; an NBT page that
    /// cannot be read is attributed to the lowest NID below it.
    pub fn scan_properties(&self) -> PropertyScan<'_, S> {
        PropertyScan {
            pst: self,
            nodes: self.ndb.nodes(),
        }
    }

    /// Drop every memoized value.
    pub fn clear_caches(&self) {
        self.properties.clear();
        self.tables.clear();
        self.sub_nodes.clear();
    }

    /// Number of memoized property contexts, tables and sub-node maps.
    pub fn cached_counts(&self) -> (usize, usize, usize) {
        (self.properties.len(), self.tables.len(), self.sub_nodes.len())
    }
}

/// Whether a node holds a property context.
const fn has_property_context(nid: Nid) -> bool {
    matches!(
        nid.node_type(),
        NodeType::NormalFolder
            | NodeType::SearchFolder
            | NodeType::NormalMessage
            | NodeType::AssocMessage
    ) || nid.0 == Nid::MESSAGE_STORE.0
        || nid.0 == Nid::NAME_TO_ID_MAP.0
}

/// Iterator returned by [`Pst::scan_properties`].
pub struct PropertyScan<'p, S> {
    pst: &'p Pst<S>,
    nodes: BTreeIter<'p, NodeTree>,
}

impl<S: ReadRange + 'static> Iterator for PropertyScan<'_, S> {
    type Item = Result<(Nid, Arc<PropertyContext>), NodeFailure>;

    fn next(&mut self) -> Option<Self::Item> {
        loop {
            let entry = match self.nodes.next()? {
                Ok(entry) => entry,
                Err(error) => {
                    #[allow(clippy::cast_possible_truncation)] // NBT keys are NIDs
                    let nid = Nid(self.nodes.last_failed_key().unwrap_or(0) as u32);
                    return Some(Err(NodeFailure::new(nid, error)));
                }
            };
            if !has_property_context(entry.nid) {
                continue;
            }
            let nid = entry.nid;
            return Some(
                self.pst
                    .properties_of(&NodeRef::from(entry))
                    .map(|pc| (nid, pc))
                    .map_err(|error| {
                        tracing::warn!("skipping node {nid}: {error}");
                        NodeFailure::new(nid, error)
                    }),
            );
        }
    }
}
