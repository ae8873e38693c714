//! Property contexts.
//!
//! A property context is a heap (client signature 0xBC) whose user root is
//! a BTH mapping a 2-byte property identifier to a 6-byte record
//! `{ type u16, value u32 }`. Values of fixed types up to 4 bytes sit in
//! `value`; everything else stores a HNID there.

use std::collections::BTreeMap;

use crate::error::{Error, Handle, Location};
use crate::ltp::bth::Bth;
use crate::ltp::heap::{ClientSignature, Heap};
use crate::ltp::prop::{PropType, Property, PropertyValue, PropertyView};
use crate::ndb::{Hnid, Nid, NodeRef, NodeStore, SubNodeMap, read_u16, read_u32};

const KEY_SIZE: usize = 2;
const ENTRY_SIZE: usize = 6;

/// Resolve a HNID-stored value to bytes.
///
/// Heap items come from `heap`; sub-node values are read as a data tree
/// through `store`. HNID 0 means the value has no storage.
pub(crate) fn resolve_hnid(
    store: &dyn NodeStore,
    heap: &Heap,
    sub_nodes: &SubNodeMap,
    raw: u32,
) -> Result<Vec<u8>, Error> {
    match Hnid::from_raw(raw) {
        Hnid::Empty => Ok(Vec::new()),
        Hnid::Hid(hid) => Ok(heap.resolve(hid)?.to_vec()),
        Hnid::SubNode(nid) => {
            let entry = sub_nodes
                .get(&nid)
                .ok_or(Error::InvalidHandle(Handle::Nid(nid)))?;
            let data = store.read_data_tree(nid, entry.data_bid)?;
            data.require_decoded()?;
            Ok(data.concat())
        }
    }
}

/// Resolve the sub-node map of `node`, empty when it has none.
pub(crate) fn node_sub_nodes(store: &dyn NodeStore, node: &NodeRef) -> Result<SubNodeMap, Error> {
    node.sub_bid
        .map_or_else(|| Ok(SubNodeMap::new()), |bid| store.sub_nodes(bid))
}

/// The decoded properties of one node.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PropertyContext {
    nid: Nid,
    properties: BTreeMap<u16, Property>,
    sub_nodes: SubNodeMap,
}

impl PropertyContext {
    /// Read and decode the property context stored in `node`.
    ///
    /// # Errors
    ///
    /// Any scoped error hit while reading the node's data, its heap, its
    /// BTH or a referenced value.
    pub fn decode(store: &dyn NodeStore, node: &NodeRef) -> Result<Self, Error> {
        let data = store.read_data_tree(node.nid, node.data_bid)?;
        let heap = Heap::with_client(data, ClientSignature::PropertyContext)?;
        let sub_nodes = node_sub_nodes(store, node)?;
        Self::from_heap(store, &heap, sub_nodes)
    }

    /// Decode from an already parsed heap.
    pub fn from_heap(
        store: &dyn NodeStore,
        heap: &Heap,
        sub_nodes: SubNodeMap,
    ) -> Result<Self, Error> {
        let nid = heap.nid();
        let bth = Bth::open(heap, heap.user_root())?;
        if bth.key_size() != KEY_SIZE || bth.entry_size() != ENTRY_SIZE {
            return Err(Error::corrupt(
                Location::Node(nid),
                format!(
                    "property BTH has {}-byte keys and {}-byte entries",
                    bth.key_size(),
                    bth.entry_size()
                ),
            ));
        }

        let mut properties = BTreeMap::new();
        for record in bth.iter() {
            let (key, entry) = record?;
            #[allow(clippy::cast_possible_truncation)] // 2-byte keys
            let id = key as u16;
            let prop_type = PropType::from_code(read_u16(entry, 0));
            let raw = read_u32(entry, 2);

            let data = match prop_type.fixed_size() {
                Some(size) if size <= 4 => entry[2..2 + size].to_vec(),
                _ => resolve_hnid(store, heap, &sub_nodes, raw).inspect_err(|e| {
                    tracing::debug!("node {nid}: property 0x{id:04x} unresolved: {e}");
                })?,
            };
            properties.insert(
                id,
                Property {
                    id,
                    prop_type,
                    data,
                },
            );
        }
        tracing::trace!("node {nid}: {} properties", properties.len());

        Ok(Self {
            nid,
            properties,
            sub_nodes,
        })
    }

    #[must_use]
    pub const fn nid(&self) -> Nid {
        self.nid
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.properties.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.properties.is_empty()
    }

    /// Property identifiers in ascending order.
    pub fn ids(&self) -> impl Iterator<Item = u16> + '_ {
        self.properties.keys().copied()
    }

    pub fn iter(&self) -> impl Iterator<Item = &Property> {
        self.properties.values()
    }

    /// Sub-nodes of the node this context was read from.
    #[must_use]
    pub const fn sub_nodes(&self) -> &SubNodeMap {
        &self.sub_nodes
    }

    /// Decode the embedded object stored in property `id` as a nested
    /// property context.
    ///
    /// # Errors
    ///
    /// `InvalidHandle` when the property is missing or its sub-node does
    /// not exist, `CorruptStructure` when the property is not an object.
    pub fn embedded_object(&self, store: &dyn NodeStore, id: u16) -> Result<Self, Error> {
        let property = self
            .properties
            .get(&id)
            .ok_or_else(|| Error::corrupt(Location::Property(id), "property not present"))?;
        let PropertyValue::Object { nid, .. } = property.value()? else {
            return Err(Error::corrupt(
                Location::Property(id),
                format!("{} is not an object", property.prop_type),
            ));
        };
        let entry = self
            .sub_nodes
            .get(&nid)
            .ok_or(Error::InvalidHandle(Handle::Nid(nid)))?;
        Self::decode(store, &NodeRef::sub_node(self.nid, nid, *entry))
    }
}

impl PropertyView for PropertyContext {
    fn property(&self, id: u16) -> Option<&Property> {
        self.properties.get(&id)
    }
}
