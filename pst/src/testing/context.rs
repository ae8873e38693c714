use std::collections::BTreeMap;

use super::file::PstBuilder;
use super::heap::{HeapBuilder, build_bth};
use crate::ltp::heap::ClientSignature;
use crate::ltp::prop::{PropType, tags};
use crate::ltp::tc::TABLE_SIGNATURE;
use crate::ndb::{Bid, MAX_BLOCK_DATA, Nid, NodeType};

fn utf16(text: &str) -> Vec<u8> {
    text.encode_utf16().flat_map(u16::to_le_bytes).collect()
}

enum PcValue {
    /// Stored in the BTH record itself.
    Inline(u32),
    /// Allocated on the heap.
    Heap(Vec<u8>),
    /// Written verbatim as the record's value, for dangling references.
    Raw(u32),
}

/// Builds the heap of a property context.
#[derive(Default)]
pub struct PcBuilder {
    values: BTreeMap<u16, (PropType, PcValue)>,
}

impl PcBuilder {
    pub fn new() -> Self {
        Self::default()
    }

    fn with(mut self, id: u16, prop_type: PropType, value: PcValue) -> Self {
        self.values.insert(id, (prop_type, value));
        self
    }

    #[must_use]
    pub fn string(self, id: u16, text: &str) -> Self {
        self.with(id, PropType::String, PcValue::Heap(utf16(text)))
    }

    #[must_use]
    pub fn int16(self, id: u16, value: i16) -> Self {
        self.with(id, PropType::Integer16, PcValue::Inline(u32::from(u16::from_le_bytes(value.to_le_bytes()))))
    }

    #[must_use]
    pub fn int32(self, id: u16, value: i32) -> Self {
        self.with(id, PropType::Integer32, PcValue::Inline(u32::from_le_bytes(value.to_le_bytes())))
    }

    #[must_use]
    pub fn boolean(self, id: u16, value: bool) -> Self {
        self.with(id, PropType::Boolean, PcValue::Inline(u32::from(value)))
    }

    #[must_use]
    pub fn int64(self, id: u16, value: i64) -> Self {
        self.with(id, PropType::Integer64, PcValue::Heap(value.to_le_bytes().to_vec()))
    }

    #[must_use]
    pub fn time(self, id: u16, filetime: u64) -> Self {
        self.with(id, PropType::Time, PcValue::Heap(filetime.to_le_bytes().to_vec()))
    }

    #[must_use]
    pub fn binary(self, id: u16, bytes: Vec<u8>) -> Self {
        self.with(id, PropType::Binary, PcValue::Heap(bytes))
    }

    /// An embedded object stored in sub-node `nid`.
    #[must_use]
    pub fn object(self, id: u16, nid: Nid, size: u32) -> Self {
        let mut bytes = nid.0.to_le_bytes().to_vec();
        bytes.extend(size.to_le_bytes());
        self.with(id, PropType::Object, PcValue::Heap(bytes))
    }

    /// A record whose value field is `raw`, whatever it points at.
    #[must_use]
    pub fn raw(self, id: u16, prop_type: PropType, raw: u32) -> Self {
        self.with(id, prop_type, PcValue::Raw(raw))
    }

    pub fn into_heap(self) -> HeapBuilder {
        let mut heap = HeapBuilder::new(ClientSignature::PropertyContext);
        let records: Vec<(u64, Vec<u8>)> = self
            .values
            .into_iter()
            .map(|(id, (prop_type, value))| {
                let raw = match value {
                    PcValue::Inline(v) | PcValue::Raw(v) => v,
                    PcValue::Heap(bytes) => heap.allocate(bytes).0,
                };
                let mut record = prop_type.code().to_le_bytes().to_vec();
                record.extend(raw.to_le_bytes());
                (u64::from(id), record)
            })
            .collect();
        let root = build_bth(&mut heap, 2, 6, &records, None);
        heap.set_user_root(root);
        heap
    }
}

/// A table cell value.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TcValue {
    Int16(i16),
    Int32(i32),
    Int64(i64),
    Boolean(bool),
    Time(u64),
    String(String),
    Binary(Vec<u8>),
}

impl TcValue {
    fn bytes(&self) -> Vec<u8> {
        match self {
            Self::Int16(v) => v.to_le_bytes().to_vec(),
            Self::Int32(v) => v.to_le_bytes().to_vec(),
            Self::Int64(v) => v.to_le_bytes().to_vec(),
            Self::Boolean(v) => vec![u8::from(*v)],
            Self::Time(v) => v.to_le_bytes().to_vec(),
            Self::String(text) => utf16(text),
            Self::Binary(bytes) => bytes.clone(),
        }
    }
}

struct Column {
    id: u16,
    prop_type: PropType,
    offset: usize,
    size: usize,
    bit: usize,
}

/// Builds a table context.
///
/// Every table gets the row id and row version columns first, the way
/// real tables lay them out.
pub struct TcBuilder {
    columns: Vec<(u16, PropType)>,
    rows: Vec<(u32, Vec<(u16, TcValue)>)>,
    matrix_in_sub_node: bool,
    large_value_threshold: Option<usize>,
    offset_overrides: Vec<(u16, u16)>,
}

impl Default for TcBuilder {
    fn default() -> Self {
        Self::new()
    }
}

impl TcBuilder {
    pub fn new() -> Self {
        Self {
            columns: vec![
                (tags::LTP_ROW_ID, PropType::Integer32),
                (tags::LTP_ROW_VERSION, PropType::Integer32),
            ],
            rows: Vec::new(),
            matrix_in_sub_node: false,
            large_value_threshold: None,
            offset_overrides: Vec::new(),
        }
    }

    #[must_use]
    pub fn column(mut self, id: u16, prop_type: PropType) -> Self {
        self.columns.push((id, prop_type));
        self
    }

    /// Append a row. Rows are stored in the order they are added.
    #[must_use]
    pub fn row(mut self, row_id: u32, values: Vec<(u16, TcValue)>) -> Self {
        self.rows.push((row_id, values));
        self
    }

    /// Store the row matrix in a sub-node instead of the heap.
    #[must_use]
    pub const fn matrix_in_sub_node(mut self, enabled: bool) -> Self {
        self.matrix_in_sub_node = enabled;
        self
    }

    /// Store variable values longer than `threshold` bytes in sub-nodes.
    #[must_use]
    pub const fn large_values_in_sub_nodes(mut self, threshold: usize) -> Self {
        self.large_value_threshold = Some(threshold);
        self
    }

    /// Write `offset` into the descriptor of column `id` regardless of the
    /// real layout.
    #[must_use]
    pub fn corrupt_column_offset(mut self, id: u16, offset: u16) -> Self {
        self.offset_overrides.push((id, offset));
        self
    }

    /// Assign cells: 8- and 4-byte cells, then 2-byte, then 1-byte, then
    /// the CEB. Returns the columns sorted by id and `rgib`.
    fn layout(&self) -> (Vec<Column>, [usize; 4]) {
        let cell_size = |t: PropType| t.fixed_size().filter(|n| *n <= 8).unwrap_or(4);
        let mut columns: Vec<Column> = self
            .columns
            .iter()
            .enumerate()
            .map(|(bit, (id, prop_type))| Column {
                id: *id,
                prop_type: *prop_type,
                offset: 0,
                size: cell_size(*prop_type),
                bit,
            })
            .collect();
        let mut rgib = [0; 4];
        let mut offset = 0;
        for (end, group) in rgib.iter_mut().zip([&[8, 4][..], &[2][..], &[1][..]]) {
            for column in columns.iter_mut().filter(|c| group.contains(&c.size)) {
                column.offset = offset;
                offset += column.size;
            }
            *end = offset;
        }
        rgib[3] = offset + columns.len().div_ceil(8);
        columns.sort_by_key(|c| c.id);
        (columns, rgib)
    }

    /// Write the table's heap and sub-nodes into `pst`.
    pub(super) fn write(&self, pst: &mut PstBuilder) -> (Bid, Option<Bid>) {
        let (columns, rgib) = self.layout();
        let (ceb_offset, row_size) = (rgib[2], rgib[3]);
        let mut heap = HeapBuilder::new(ClientSignature::TableContext);
        let mut sub_nodes: Vec<(Nid, Bid, Option<Bid>)> = Vec::new();
        let mut next_sub_node = 1;
        let mut sub_node_nid = || {
            let nid = Nid::new(NodeType::Ltp, next_sub_node);
            next_sub_node += 1;
            nid
        };

        let mut rows = Vec::with_capacity(self.rows.len());
        for (row_id, values) in &self.rows {
            let mut row = vec![0u8; row_size];
            let implicit = [
                (tags::LTP_ROW_ID, TcValue::Int32(i32::from_le_bytes(row_id.to_le_bytes()))),
                (tags::LTP_ROW_VERSION, TcValue::Int32(0)),
            ];
            for (id, value) in implicit.iter().chain(values) {
                let column = columns
                    .iter()
                    .find(|c| c.id == *id)
                    .unwrap_or_else(|| panic!("no column 0x{id:04x}"));
                let bytes = value.bytes();
                let cell = if column.prop_type.fixed_size().is_some_and(|n| n <= 8) {
                    assert_eq!(bytes.len(), column.size);
                    bytes
                } else if self.large_value_threshold.is_some_and(|t| bytes.len() > t) {
                    let nid = sub_node_nid();
                    let bid = pst.add_data(&bytes);
                    sub_nodes.push((nid, bid, None));
                    nid.0.to_le_bytes().to_vec()
                } else {
                    heap.allocate(bytes).0.to_le_bytes().to_vec()
                };
                row[column.offset..column.offset + column.size].copy_from_slice(&cell);
                row[ceb_offset + column.bit / 8] |= 0x80 >> (column.bit % 8);
            }
            rows.push(row);
        }

        let rows_hnid = if rows.is_empty() {
            0
        } else if self.matrix_in_sub_node {
            let per_block = MAX_BLOCK_DATA / row_size;
            let blocks: Vec<Vec<u8>> = rows.chunks(per_block).map(<[Vec<u8>]>::concat).collect();
            let bid = if blocks.len() == 1 {
                pst.add_data(&blocks[0])
            } else {
                pst.add_data_blocks(blocks)
            };
            let nid = sub_node_nid();
            sub_nodes.push((nid, bid, None));
            nid.0
        } else {
            heap.allocate(rows.concat()).0
        };

        let mut index: Vec<(u64, Vec<u8>)> = self
            .rows
            .iter()
            .enumerate()
            .map(|(i, (row_id, _))| (u64::from(*row_id), u32::try_from(i).unwrap().to_le_bytes().to_vec()))
            .collect();
        index.sort_by_key(|(key, _)| *key);
        let row_index = build_bth(&mut heap, 4, 4, &index, None);

        let mut info = vec![TABLE_SIGNATURE, u8::try_from(columns.len()).unwrap()];
        for end in rgib {
            info.extend(u16::try_from(end).unwrap().to_le_bytes());
        }
        info.extend(row_index.0.to_le_bytes());
        info.extend(rows_hnid.to_le_bytes());
        info.extend(0u32.to_le_bytes());
        for column in &columns {
            let tag = (u32::from(column.id) << 16) | u32::from(column.prop_type.code());
            let offset = self
                .offset_overrides
                .iter()
                .rfind(|(id, _)| *id == column.id)
                .map_or_else(|| u16::try_from(column.offset).unwrap(), |(_, o)| *o);
            info.extend(tag.to_le_bytes());
            info.extend(offset.to_le_bytes());
            info.push(u8::try_from(column.size).unwrap());
            info.push(u8::try_from(column.bit).unwrap());
        }
        let root = heap.allocate(info);
        heap.set_user_root(root);

        let bid = pst.add_heap(heap);
        let sub_bid = (!sub_nodes.is_empty()).then(|| pst.add_sub_nodes(&sub_nodes));
        (bid, sub_bid)
    }
}
