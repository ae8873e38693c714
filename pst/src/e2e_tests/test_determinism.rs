//! Decoding the same bytes twice gives the same answers.

use std::sync::Arc;

use crate::e2e_tests::helpers::*;
use crate::ndb::{MemorySource, Nid};
use crate::testing::PstBuilder;
use crate::{Pst, Row};

fn recipient_rows(pst: &Pst<MemorySource>) -> Vec<Row> {
    let parent = pst.node(message(2)).unwrap();
    let node = pst.sub_node(&parent, Nid::RECIPIENT_TABLE).unwrap();
    let table = pst.table_of(&node).unwrap();
    table.rows().collect::<Result<_, _>>().unwrap()
}

#[test]
fn test_builder_output_is_stable() {
    let mailbox = hello_mailbox(PstBuilder::new(), 4);
    assert_eq!(mailbox.builder.build(), mailbox.builder.build());
}

#[test]
fn test_uncached_decodes_are_equal() {
    let mailbox = hello_mailbox(PstBuilder::new(), 4);
    let pst = Pst::from_source(MemorySource::new(mailbox.builder.build()), uncached()).unwrap();

    for (nid, _) in &mailbox.data_bids {
        let first = pst.get_properties(*nid).unwrap();
        let second = pst.get_properties(*nid).unwrap();
        assert!(!Arc::ptr_eq(&first, &second));
        assert_eq!(first, second);
    }
    assert_eq!(recipient_rows(&pst), recipient_rows(&pst));
    assert_eq!(pst.cached_counts(), (0, 0, 0));
}

#[test]
fn test_cached_and_uncached_agree() {
    let mailbox = hello_mailbox(PstBuilder::new(), 4);
    let bytes = mailbox.builder.build();
    let cached = open_bytes(bytes.clone());
    let uncached = Pst::from_source(MemorySource::new(bytes), uncached()).unwrap();

    for (nid, _) in &mailbox.data_bids {
        assert_eq!(
            cached.get_properties(*nid).unwrap(),
            uncached.get_properties(*nid).unwrap()
        );
    }
    assert_eq!(recipient_rows(&cached), recipient_rows(&uncached));
    assert_eq!(
        cached.attachments(message(1)).unwrap().items,
        uncached.attachments(message(1)).unwrap().items
    );
}

#[test]
fn test_scan_order_is_nid_order() {
    let mailbox = hello_mailbox(PstBuilder::new(), 6);
    let pst = open(&mailbox.builder);

    let scanned: Vec<Nid> = pst.scan_properties().map(|r| r.unwrap().0).collect();
    let mut expected: Vec<Nid> = mailbox.data_bids.iter().map(|(nid, _)| *nid).collect();
    expected.sort();
    assert_eq!(scanned, expected);
}
