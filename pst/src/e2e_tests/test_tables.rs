//! Table contexts: row counts, cell values and recipient grouping.

use crate::e2e_tests::helpers::*;
use crate::error::{Error, Location};
use crate::ltp::{Bth, Heap, PropType, PropertyView, tags};
use crate::ndb::{Hid, MemorySource, Nid, NodeRef, NodeType, read_u32};
use crate::testing::{PstBuilder, TcBuilder, TcValue};
use crate::{Pst, RecipientType};

fn recipient_node(pst: &Pst<MemorySource>, msg: Nid) -> NodeRef {
    let parent = pst.node(msg).unwrap();
    pst.sub_node(&parent, Nid::RECIPIENT_TABLE).unwrap()
}

/// Count the row index leaves by walking the table's heap directly.
fn row_index_entries(pst: &Pst<MemorySource>, node: &NodeRef) -> usize {
    let data = pst.ndb().read_data_tree(node.nid, node.data_bid).unwrap();
    let heap = Heap::new(data).unwrap();
    let info = heap.resolve(heap.user_root()).unwrap();
    let row_index = Hid(read_u32(info, 10));
    Bth::open(&heap, row_index).unwrap().iter().count()
}

#[test]
fn test_row_count_matches_row_index() {
    let mailbox = hello_mailbox(PstBuilder::new(), 0);
    let pst = open(&mailbox.builder);

    let node = recipient_node(&pst, message(2));
    let table = pst.table_of(&node).unwrap();
    assert_eq!(table.row_count(), 3);
    assert_eq!(table.row_count(), row_index_entries(&pst, &node));
}

#[test]
fn test_cells_in_matrix_order() {
    let mailbox = hello_mailbox(PstBuilder::new(), 0);
    let pst = open(&mailbox.builder);

    let table = pst.table_of(&recipient_node(&pst, message(2))).unwrap();
    let rows: Vec<_> = table.rows().collect::<Result<_, _>>().unwrap();
    let cells: Vec<(u32, Option<String>, Option<i32>)> = rows
        .iter()
        .map(|row| {
            (
                row.row_id,
                row.string(tags::DISPLAY_NAME),
                row.i32(tags::RECIPIENT_TYPE),
            )
        })
        .collect();
    assert_eq!(
        cells,
        vec![
            (1, Some("Ann".to_string()), Some(1)),
            (2, Some("Bob".to_string()), Some(2)),
            (3, Some("Cat".to_string()), Some(3)),
        ]
    );
    assert_eq!(rows[1].i32(tags::LTP_ROW_ID), Some(2));

    let bob = table.find_row(2).unwrap().unwrap();
    assert_eq!(bob.index, 1);
    assert!(table.find_row(7).unwrap().is_none());
}

#[test]
fn test_recipients_grouped_by_type() {
    let mut builder = PstBuilder::new();
    let table = recipient_table(&[
        ("To One", 1),
        ("Cc One", 2),
        ("To Two", 1),
        ("Originator", 0),
        ("Bcc One", 3),
    ]);
    let (bid, sub) = builder.add_table(&table);
    let sub = builder.add_sub_nodes(&[(Nid::RECIPIENT_TABLE, bid, sub)]);
    builder.add_property_context_with_sub_nodes(
        message(1),
        crate::testing::PcBuilder::new().string(tags::SUBJECT, "Group"),
        Some(sub),
        inbox(),
    );
    let pst = open(&builder);

    let recipients = pst.recipients(message(1)).unwrap();
    assert_eq!(recipients.len(), 4);
    let names = |list: &[crate::Recipient]| -> Vec<String> {
        list.iter().filter_map(|r| r.display_name.clone()).collect()
    };
    assert_eq!(names(&recipients.to), vec!["To One", "To Two"]);
    assert_eq!(names(&recipients.cc), vec!["Cc One"]);
    assert_eq!(names(&recipients.bcc), vec!["Bcc One"]);
    assert!(recipients.to.iter().all(|r| r.recipient_type == RecipientType::To));
}

#[test]
fn test_absent_cells_are_skipped() {
    let table = TcBuilder::new()
        .column(tags::DISPLAY_NAME, PropType::String)
        .column(tags::EMAIL_ADDRESS, PropType::String)
        .column(tags::RECIPIENT_TYPE, PropType::Integer32)
        .row(
            1,
            vec![
                (tags::DISPLAY_NAME, TcValue::String("No address".to_string())),
                (tags::RECIPIENT_TYPE, TcValue::Int32(1)),
            ],
        );
    let contents = Nid::new(NodeType::RecipientTable, 0x800);
    let mut builder = PstBuilder::new();
    builder.add_table_context(contents, table, inbox());
    let pst = open(&builder);

    let row = pst.get_table(contents).unwrap().row(0).unwrap();
    assert!(row.property(tags::EMAIL_ADDRESS).is_none());
    assert_eq!(row.string(tags::DISPLAY_NAME).as_deref(), Some("No address"));
}

#[test]
fn test_matrix_spanning_blocks() {
    let mut table = TcBuilder::new()
        .column(tags::MESSAGE_SIZE, PropType::Integer32)
        .column(tags::MESSAGE_FLAGS, PropType::Integer32)
        .matrix_in_sub_node(true);
    for i in 1..=1000u32 {
        table = table.row(
            i,
            vec![
                (tags::MESSAGE_SIZE, TcValue::Int32(i32::try_from(i).unwrap())),
                (tags::MESSAGE_FLAGS, TcValue::Int32(1)),
            ],
        );
    }
    let contents = Nid::new(NodeType::ContentsTable, 0x401);
    let mut builder = PstBuilder::new();
    builder.add_table_context(contents, table, inbox());
    let pst = open(&builder);

    let table = pst.get_table(contents).unwrap();
    assert_eq!(table.row_count(), 1000);
    let last = table.row(999).unwrap();
    assert_eq!(last.row_id, 1000);
    assert_eq!(last.i32(tags::MESSAGE_SIZE), Some(1000));
    let found = table.find_row(500).unwrap().unwrap();
    assert_eq!(found.i32(tags::MESSAGE_SIZE), Some(500));
    assert!(table.row(1000).is_err());
}

#[test]
fn test_bad_column_layout_is_scoped() {
    let table = recipient_table(&[("Ann", 1)]).corrupt_column_offset(tags::DISPLAY_NAME, 200);
    let mut builder = PstBuilder::new();
    let (bid, sub) = builder.add_table(&table);
    let sub = builder.add_sub_nodes(&[(Nid::RECIPIENT_TABLE, bid, sub)]);
    builder.add_property_context_with_sub_nodes(
        message(1),
        crate::testing::PcBuilder::new().string(tags::SUBJECT, "Bad"),
        Some(sub),
        inbox(),
    );
    let pst = open(&builder);

    let error = pst.recipients(message(1)).unwrap_err();
    assert!(matches!(
        error,
        Error::CorruptStructure {
            at: Location::Property(tags::DISPLAY_NAME),
            ..
        }
    ));
    assert!(pst.get_properties(message(1)).is_ok());
}
