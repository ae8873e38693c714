//! Values too big for one block: data trees, sub-node values and heaps
//! spanning several blocks.

use crate::e2e_tests::helpers::*;
use crate::ltp::{PropType, PropertyView, tags};
use crate::ndb::{BTYPE_DATA_TREE, MAX_BLOCK_DATA, Nid, NodeType};
use crate::testing::{PcBuilder, PstBuilder, TcBuilder, TcValue};

fn utf16(text: &str) -> Vec<u8> {
    text.encode_utf16().flat_map(u16::to_le_bytes).collect()
}

#[test]
fn test_body_in_sub_node_through_xxblock() {
    let body: String = "0123456789".repeat(2000);
    let encoded = utf16(&body);
    assert!(encoded.len() > 4 * MAX_BLOCK_DATA);

    let mut builder = PstBuilder::new().data_tree_fanout(2);
    let body_nid = Nid::new(NodeType::Ltp, 1);
    let body_bid = builder.add_data(&encoded);
    let sub = builder.add_sub_nodes(&[(body_nid, body_bid, None)]);
    let pc = PcBuilder::new()
        .string(tags::SUBJECT, "Long")
        .raw(tags::BODY, PropType::String, body_nid.0);
    builder.add_property_context_with_sub_nodes(message(1), pc, Some(sub), inbox());
    let pst = open(&builder);

    // Five leaves in three XBLOCKs under one XXBLOCK.
    let root = pst.ndb().read_block(body_bid).unwrap();
    assert!(body_bid.is_internal());
    assert_eq!(root.data[0], BTYPE_DATA_TREE);
    assert_eq!(root.data[1], 2);

    let data = pst
        .ndb()
        .read_data_tree(body_nid, body_bid)
        .unwrap();
    assert_eq!(data.blocks.len(), 5);
    assert_eq!(data.len(), encoded.len());

    let pc = pst.get_properties(message(1)).unwrap();
    assert_eq!(pc.string(tags::BODY), Some(body));
    assert_eq!(pc.string(tags::SUBJECT).as_deref(), Some("Long"));
}

#[test]
fn test_missing_value_sub_node_is_scoped() {
    let mut builder = PstBuilder::new();
    let pc = PcBuilder::new().raw(tags::BODY, PropType::String, Nid::new(NodeType::Ltp, 9).0);
    builder.add_property_context(message(1), pc, inbox());
    builder.add_property_context(message(2), PcBuilder::new().string(tags::SUBJECT, "ok"), inbox());
    let pst = open(&builder);

    let error = pst.get_properties(message(1)).unwrap_err();
    assert!(matches!(error, crate::Error::InvalidHandle(_)));
    assert!(pst.get_properties(message(2)).is_ok());
}

#[test]
fn test_heap_spanning_blocks() {
    let mut pc = PcBuilder::new().string(tags::SUBJECT, "Many");
    for i in 0..200u16 {
        pc = pc.binary(0x6000 + i, vec![u8::try_from(i % 256).unwrap(); 64]);
    }
    let mut builder = PstBuilder::new();
    builder.add_property_context(message(1), pc, inbox());
    let pst = open(&builder);

    let data = pst.node_data(message(1)).unwrap();
    assert!(data.blocks.len() > 1, "heap fits one block");

    let pc = pst.get_properties(message(1)).unwrap();
    assert_eq!(pc.len(), 201);
    for i in 0..200u16 {
        let expected = vec![u8::try_from(i % 256).unwrap(); 64];
        assert_eq!(pc.binary(0x6000 + i), Some(expected.as_slice()), "property {i}");
    }
}

#[test]
fn test_table_values_and_matrix_in_sub_nodes() {
    let long = "x".repeat(300);
    let mut table = TcBuilder::new()
        .column(tags::SUBJECT, PropType::String)
        .column(tags::MESSAGE_SIZE, PropType::Integer32)
        .matrix_in_sub_node(true)
        .large_values_in_sub_nodes(64);
    for i in 1..=3 {
        let subject = if i == 2 { long.clone() } else { format!("row {i}") };
        table = table.row(
            i,
            vec![
                (tags::SUBJECT, TcValue::String(subject)),
                (tags::MESSAGE_SIZE, TcValue::Int32(i32::try_from(i).unwrap() * 10)),
            ],
        );
    }
    let contents = Nid::new(NodeType::ContentsTable, 0x401);
    let mut builder = PstBuilder::new();
    builder.add_table_context(contents, table, inbox());
    let pst = open(&builder);

    let sub_nodes = pst.get_sub_nodes(contents).unwrap();
    assert_eq!(sub_nodes.len(), 2, "matrix plus one large value");

    let table = pst.get_table(contents).unwrap();
    assert_eq!(table.row_count(), 3);
    let rows: Vec<_> = table.rows().collect::<Result<_, _>>().unwrap();
    assert_eq!(rows[0].string(tags::SUBJECT).as_deref(), Some("row 1"));
    assert_eq!(rows[1].string(tags::SUBJECT), Some(long));
    assert_eq!(rows[2].i32(tags::MESSAGE_SIZE), Some(30));
}
