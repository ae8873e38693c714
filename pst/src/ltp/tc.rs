//! Table contexts.
//!
//! A table context is a heap (client signature 0x7C) whose user root is a
//! TCINFO allocation:
//!
//! ```text
//! 0   bType 0x7C
//! 1   cCols
//! 2   rgib[4]      end of 8/4-byte cells, end of 2-byte cells,
//!                  end of 1-byte cells (= start of the CEB), row size
//! 10  hidRowIndex  BTH: row id (4 bytes) -> row index (4 bytes)
//! 14  hnidRows     row matrix: heap item or sub-node
//! 18  hidIndex     (deprecated)
//! 22  rgTCOLDESC   { tag u32, ibData u16, cbData u8, iBit u8 } per column
//! ```
//!
//! Each row of the matrix is `row size` bytes: fixed cells, then the cell
//! existence bitmap (CEB). A cell is present only when its CEB bit is set.
//! Rows never straddle a block boundary.

use std::fmt;
use std::sync::Arc;

use crate::error::{Error, Handle, Location};
use crate::ltp::bth::Bth;
use crate::ltp::heap::{ClientSignature, Heap};
use crate::ltp::pc::{node_sub_nodes, resolve_hnid};
use crate::ltp::prop::{PropType, Property, PropertyView};
use crate::ndb::{Hid, Hnid, Nid, NodeRef, NodeStore, SubNodeMap, read_u16, read_u32};

/// `bType` of TCINFO.
pub const TABLE_SIGNATURE: u8 = 0x7C;

const TCINFO_SIZE: usize = 22;
const COLUMN_SIZE: usize = 8;

/// One column of a table.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ColumnDesc {
    pub id: u16,
    pub prop_type: PropType,
    /// Offset of the cell within a row.
    pub offset: u16,
    /// Width of the cell.
    pub size: u8,
    /// Index of the column's bit in the cell existence bitmap.
    pub bit: u8,
}

impl ColumnDesc {
    fn parse(bytes: &[u8]) -> Self {
        let tag = read_u32(bytes, 0);
        #[allow(clippy::cast_possible_truncation)]
        Self {
            id: (tag >> 16) as u16,
            prop_type: PropType::from_code(tag as u16),
            offset: read_u16(bytes, 4),
            size: bytes[6],
            bit: bytes[7],
        }
    }

    /// Whether the cell holds the value itself rather than a HNID.
    #[must_use]
    pub fn is_inline(&self) -> bool {
        self.prop_type.fixed_size().is_some_and(|size| size <= 8)
    }
}

/// A decoded table: column layout plus access to the row matrix.
pub struct TableContext {
    nid: Nid,
    store: Arc<dyn NodeStore>,
    heap: Heap,
    sub_nodes: SubNodeMap,
    columns: Vec<ColumnDesc>,
    row_size: usize,
    ceb_offset: usize,
    row_index: Hid,
    row_count: usize,
    /// Blocks of the row matrix.
    matrix: Vec<Vec<u8>>,
}

impl TableContext {
    /// Read and decode the table context stored in `node`.
    ///
    /// Rows are decoded lazily by [`TableContext::rows`]; only the header,
    /// the column descriptors and the row index are checked here.
    pub fn decode(store: Arc<dyn NodeStore>, node: &NodeRef) -> Result<Self, Error> {
        let nid = node.nid;
        let at = Location::Node(nid);
        let data = store.read_data_tree(nid, node.data_bid)?;
        let heap = Heap::with_client(data, ClientSignature::TableContext)?;
        let sub_nodes = node_sub_nodes(store.as_ref(), node)?;

        let info = heap.resolve(heap.user_root())?;
        if info.len() < TCINFO_SIZE || info[0] != TABLE_SIGNATURE {
            return Err(Error::corrupt(at, "bad TCINFO header"));
        }
        let column_count = usize::from(info[1]);
        if info.len() < TCINFO_SIZE + column_count * COLUMN_SIZE {
            return Err(Error::corrupt(
                at,
                format!("TCINFO too short for {column_count} columns"),
            ));
        }
        let ceb_offset = usize::from(read_u16(info, 6));
        let row_size = usize::from(read_u16(info, 8));
        let row_index = Hid(read_u32(info, 10));
        let rows_hnid = read_u32(info, 14);
        let columns: Vec<ColumnDesc> = (0..column_count)
            .map(|i| ColumnDesc::parse(&info[TCINFO_SIZE + i * COLUMN_SIZE..]))
            .collect();

        if ceb_offset > row_size {
            return Err(Error::corrupt(
                at,
                format!("CEB offset {ceb_offset} past row size {row_size}"),
            ));
        }
        let ceb_bits = (row_size - ceb_offset) * 8;
        for column in &columns {
            let end = usize::from(column.offset) + usize::from(column.size);
            if end > ceb_offset || usize::from(column.bit) >= ceb_bits {
                return Err(Error::corrupt(
                    Location::Property(column.id),
                    format!(
                        "column cell {}..{end} / bit {} outside a {row_size}-byte row",
                        column.offset, column.bit
                    ),
                ));
            }
            if !column.is_inline() && column.size != 4 {
                return Err(Error::corrupt(
                    Location::Property(column.id),
                    format!("variable column with {}-byte cell", column.size),
                ));
            }
        }

        let row_count = if row_index.0 == 0 {
            0
        } else {
            let bth = Bth::open(&heap, row_index)?;
            bth.iter().try_fold(0usize, |n, r| r.map(|_| n + 1))?
        };

        let matrix = match Hnid::from_raw(rows_hnid) {
            Hnid::Empty => Vec::new(),
            Hnid::Hid(hid) => vec![heap.resolve(hid)?.to_vec()],
            Hnid::SubNode(rows_nid) => resolve_matrix(store.as_ref(), &sub_nodes, rows_nid)?,
        };
        if row_count > 0 && row_size < 4 {
            return Err(Error::corrupt(
                at,
                format!("row size {row_size} cannot hold a row id"),
            ));
        }
        let capacity: usize = matrix.iter().map(|b| b.len() / row_size.max(1)).sum();
        if row_count > capacity {
            return Err(Error::corrupt(
                at,
                format!("{row_count} rows indexed but the matrix holds {capacity}"),
            ));
        }
        tracing::trace!("table {nid}: {} columns, {row_count} rows", columns.len());

        Ok(Self {
            nid,
            store,
            heap,
            sub_nodes,
            columns,
            row_size,
            ceb_offset,
            row_index,
            row_count,
            matrix,
        })
    }

    #[must_use]
    pub const fn nid(&self) -> Nid {
        self.nid
    }

    #[must_use]
    pub fn columns(&self) -> &[ColumnDesc] {
        &self.columns
    }

    #[must_use]
    pub fn column(&self, id: u16) -> Option<&ColumnDesc> {
        self.columns.iter().find(|c| c.id == id)
    }

    /// Number of rows: the number of entries in the row index.
    #[must_use]
    pub const fn row_count(&self) -> usize {
        self.row_count
    }

    /// Size of one row in bytes.
    #[must_use]
    pub const fn row_size(&self) -> usize {
        self.row_size
    }

    /// Raw bytes of row `index` in matrix order.
    fn row_bytes(&self, index: usize) -> Option<&[u8]> {
        if index >= self.row_count {
            return None;
        }
        let mut remaining = index;
        for block in &self.matrix {
            let rows = block.len() / self.row_size;
            if remaining < rows {
                let start = remaining * self.row_size;
                return Some(&block[start..start + self.row_size]);
            }
            remaining -= rows;
        }
        None
    }

    /// Decode row `index` in matrix order.
    pub fn row(&self, index: usize) -> Result<Row, Error> {
        let bytes = self.row_bytes(index).ok_or_else(|| {
            Error::corrupt(
                Location::Node(self.nid),
                format!("row {index} out of range ({} rows)", self.row_count),
            )
        })?;

        let mut properties = Vec::with_capacity(self.columns.len());
        for column in &self.columns {
            let bit = usize::from(column.bit);
            let ceb = bytes[self.ceb_offset + bit / 8];
            if ceb & (0x80 >> (bit % 8)) == 0 {
                continue;
            }
            let start = usize::from(column.offset);
            let cell = &bytes[start..start + usize::from(column.size)];
            let data = if column.is_inline() {
                cell.to_vec()
            } else {
                resolve_hnid(
                    self.store.as_ref(),
                    &self.heap,
                    &self.sub_nodes,
                    read_u32(cell, 0),
                )?
            };
            properties.push(Property {
                id: column.id,
                prop_type: column.prop_type,
                data,
            });
        }

        Ok(Row {
            row_id: read_u32(bytes, 0),
            index,
            properties,
        })
    }

    /// Lazily decode every row in matrix order.
    #[must_use]
    pub const fn rows(&self) -> Rows<'_> {
        Rows {
            table: self,
            next: 0,
        }
    }

    /// Find the row with the given row id through the row index.
    pub fn find_row(&self, row_id: u32) -> Result<Option<Row>, Error> {
        if self.row_index.0 == 0 {
            return Ok(None);
        }
        let bth = Bth::open(&self.heap, self.row_index)?;
        let Some(value) = bth.lookup(u64::from(row_id))? else {
            return Ok(None);
        };
        if value.len() < 4 {
            return Err(Error::corrupt(
                Location::Heap(self.row_index),
                "row index entry too short",
            ));
        }
        let index = usize::try_from(read_u32(value, 0)).map_err(|_| {
            Error::corrupt(Location::Heap(self.row_index), "row index out of range")
        })?;
        self.row(index).map(Some)
    }
}

/// Read a sub-node row matrix, keeping its block boundaries.
fn resolve_matrix(
    store: &dyn NodeStore,
    sub_nodes: &SubNodeMap,
    nid: Nid,
) -> Result<Vec<Vec<u8>>, Error> {
    let entry = sub_nodes
        .get(&nid)
        .ok_or(Error::InvalidHandle(Handle::Nid(nid)))?;
    let data = store.read_data_tree(nid, entry.data_bid)?;
    data.require_decoded()?;
    Ok(data.blocks)
}

impl fmt::Debug for TableContext {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("TableContext")
            .field("nid", &self.nid)
            .field("columns", &self.columns)
            .field("row_size", &self.row_size)
            .field("row_count", &self.row_count)
            .finish_non_exhaustive()
    }
}

/// One decoded table row.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Row {
    /// `dwRowID`, the first four bytes of the row.
    pub row_id: u32,
    /// Position in the row matrix.
    pub index: usize,
    properties: Vec<Property>,
}

impl Row {
    /// Present cells, in column order.
    pub fn iter(&self) -> impl Iterator<Item = &Property> {
        self.properties.iter()
    }
}

impl PropertyView for Row {
    fn property(&self, id: u16) -> Option<&Property> {
        self.properties.iter().find(|p| p.id == id)
    }
}

/// Lazy iterator over the rows of a table.
pub struct Rows<'t> {
    table: &'t TableContext,
    next: usize,
}

impl Iterator for Rows<'_> {
    type Item = Result<Row, Error>;

    fn next(&mut self) -> Option<Self::Item> {
        if self.next >= self.table.row_count {
            return None;
        }
        let index = self.next;
        self.next += 1;
        Some(self.table.row(index))
    }

    fn size_hint(&self) -> (usize, Option<usize>) {
        let left = self.table.row_count - self.next;
        (left, Some(left))
    }
}

impl ExactSizeIterator for Rows<'_> {}
