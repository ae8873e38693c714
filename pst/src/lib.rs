// Reading an item out of a store:
// 1. The file header gives the roots of the node and block B-trees
// 2. NID -> NBT entry -> data block tree + sub-node tree
// 3. Data blocks are read through the BBT, checked, and decoded
// 4. The blocks are interpreted as a heap (HN)
// 5. A BTH inside the heap indexes either properties (PC) or rows (TC)
//
// Layers:
//  - ndb: pages, B-trees, blocks, sub-nodes
//  - ltp: heap-on-node, BTH, property and table contexts
//  - store: the caching facade handed to consumers
//  - message: attachment and recipient views over the facade

#![cfg_attr(test, allow(clippy::unwrap_used, clippy::cast_possible_truncation))]

pub mod config;
pub mod error;
pub mod ltp;
pub mod message;
pub mod ndb;
pub mod store;

#[cfg(test)]
mod e2e_tests;

pub use config::ReaderConfig;
pub use error::{Error, Handle, Location, NodeFailure};
pub use ltp::{
    ColumnDesc, PropType, Property, PropertyContext, PropertyValue, PropertyView, Row,
    TableContext,
};
pub use message::{
    Attachment, AttachmentFlags, AttachmentMethod, Attachments, Recipient, RecipientType, Recipients,
};
pub use ndb::{Bid, Hid, Nid, NodeRef, NodeType};
pub use store::{PropertyScan, Pst};
