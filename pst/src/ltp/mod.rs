//! Lists, Tables and Properties layer.
//!
//! Interprets a node's data as a heap-on-node, then as a BTH-indexed
//! property context or table context.

pub mod bth;
pub mod heap;
pub mod pc;
pub mod prop;
pub mod tc;

pub use bth::{Bth, BthIter};
pub use heap::{ClientSignature, Heap};
pub use pc::PropertyContext;
pub use prop::{FileTime, PropType, Property, PropertyValue, PropertyView, tags};
pub use tc::{ColumnDesc, Row, Rows, TableContext};
