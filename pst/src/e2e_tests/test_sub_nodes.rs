//! Sub-node trees: what was written is what resolves, at any depth.

use crate::e2e_tests::helpers::*;
use crate::error::Error;
use crate::ltp::{PropertyView, tags};
use crate::ndb::{BTYPE_SUB_NODE, Bid, MemorySource, Nid};
use crate::testing::{PcBuilder, PstBuilder};
use crate::{Pst, ReaderConfig};

/// A message whose sub-node tree holds `count` attachments, the first of
/// which has a nested sub-node tree of its own.
fn with_attachments(builder: PstBuilder, count: u32) -> (PstBuilder, Vec<(Nid, Bid, Option<Bid>)>) {
    let mut builder = builder;
    let nested_nid = attachment(100);
    let nested_bid = builder.add_heap(PcBuilder::new().string(tags::DISPLAY_NAME, "nested").into_heap());
    let nested = builder.add_sub_nodes(&[(nested_nid, nested_bid, None)]);

    let mut records = Vec::new();
    for i in 1..=count {
        let pc = PcBuilder::new()
            .int32(tags::ATTACH_METHOD, 1)
            .string(tags::ATTACH_FILENAME, &format!("file{i}.bin"));
        let bid = builder.add_heap(pc.into_heap());
        records.push((attachment(i), bid, (i == 1).then_some(nested)));
    }
    let sub = builder.add_sub_nodes(&records);
    builder.add_property_context_with_sub_nodes(
        message(1),
        PcBuilder::new().string(tags::SUBJECT, "Attachments"),
        Some(sub),
        inbox(),
    );
    builder.add_property_context(message(2), PcBuilder::new().string(tags::SUBJECT, "Plain"), inbox());
    (builder, records)
}

#[test]
fn test_sub_nodes_resolve_to_written_records() {
    let (builder, records) = with_attachments(PstBuilder::new(), 4);
    let pst = open(&builder);

    let map = pst.get_sub_nodes(message(1)).unwrap();
    assert_eq!(map.len(), records.len());
    let parent = pst.node(message(1)).unwrap();
    for (nid, data_bid, sub_bid) in &records {
        let entry = map[nid];
        assert_eq!(entry.data_bid, *data_bid);
        assert_eq!(entry.sub_bid, *sub_bid);

        let node = pst.sub_node(&parent, *nid).unwrap();
        assert_eq!(node.parent, Some(message(1)));
        let pc = pst.properties_of(&node).unwrap();
        assert_eq!(
            pc.string(tags::ATTACH_FILENAME),
            Some(format!("file{}.bin", nid.index()))
        );
    }
}

#[test]
fn test_nested_sub_node_tree() {
    let (builder, _) = with_attachments(PstBuilder::new(), 2);
    let pst = open(&builder);

    let parent = pst.node(message(1)).unwrap();
    let first = pst.sub_node(&parent, attachment(1)).unwrap();
    let nested = pst.sub_node(&first, attachment(100)).unwrap();
    assert_eq!(nested.parent, Some(attachment(1)));
    let pc = pst.properties_of(&nested).unwrap();
    assert_eq!(pc.string(tags::DISPLAY_NAME).as_deref(), Some("nested"));

    // Sub-node NIDs are scoped to their parent.
    assert!(matches!(
        pst.sub_node(&parent, attachment(100)),
        Err(Error::InvalidHandle(_))
    ));
    assert!(pst.sub_nodes_of(&pst.sub_node(&parent, attachment(2)).unwrap()).unwrap().is_empty());
}

#[test]
fn test_intermediate_sub_node_block() {
    let (builder, records) = with_attachments(PstBuilder::new().sub_node_fanout(2), 5);
    let pst = open(&builder);

    let parent = pst.node(message(1)).unwrap();
    let root = pst.ndb().read_block(parent.sub_bid.unwrap()).unwrap();
    assert_eq!(root.data[0], BTYPE_SUB_NODE);
    assert_eq!(root.data[1], 1, "expected an SIBLOCK");

    let map = pst.get_sub_nodes(message(1)).unwrap();
    let nids: Vec<Nid> = map.keys().copied().collect();
    let expected: Vec<Nid> = records.iter().map(|(nid, _, _)| *nid).collect();
    assert_eq!(nids, expected);

    let attachments = pst.attachments(message(1)).unwrap();
    assert_eq!(attachments.items.len(), 5);
    assert!(attachments.failures.is_empty());
}

#[test]
fn test_depth_cap_is_scoped() {
    let (builder, _) = with_attachments(PstBuilder::new().sub_node_fanout(2), 5);
    let config = ReaderConfig {
        max_tree_depth: 1,
        ..ReaderConfig::default()
    };
    let pst = Pst::from_source(MemorySource::new(builder.build()), config).unwrap();

    let error = pst.get_sub_nodes(message(1)).unwrap_err();
    assert!(matches!(error, Error::CorruptStructure { .. }));
    assert!(!error.is_fatal());

    let plain = pst.get_properties(message(2)).unwrap();
    assert_eq!(plain.string(tags::SUBJECT).as_deref(), Some("Plain"));
}

#[test]
fn test_node_without_sub_nodes() {
    let (builder, _) = with_attachments(PstBuilder::new(), 1);
    let pst = open(&builder);

    assert!(pst.get_sub_nodes(message(2)).unwrap().is_empty());
    assert!(pst.attachments(message(2)).unwrap().items.is_empty());
    assert!(matches!(
        pst.get_sub_nodes(message(9)),
        Err(Error::InvalidHandle(_))
    ));
}
