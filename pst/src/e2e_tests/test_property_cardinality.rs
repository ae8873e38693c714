//! A property context holds exactly the properties that were written.

use crate::e2e_tests::helpers::*;
use crate::ltp::{FileTime, PropType, PropertyView, tags};
use crate::testing::{PcBuilder, PstBuilder};

const FILETIME: u64 = 132_000_000_000_000_000;

fn mixed() -> PcBuilder {
    PcBuilder::new()
        .int16(tags::IMPORTANCE, 2)
        .string(tags::MESSAGE_CLASS, "IPM.Note")
        .string(tags::SUBJECT, "Mixed")
        .time(tags::CLIENT_SUBMIT_TIME, FILETIME)
        .int32(tags::MESSAGE_FLAGS, 0x11)
        .int32(tags::MESSAGE_SIZE, 2048)
        .boolean(tags::HAS_ATTACHMENTS, false)
        .int64(0x6001, -7)
        .binary(0x6002, vec![1, 2, 3])
        .string(tags::SENDER_NAME, "")
}

#[test]
fn test_ids_match_what_was_written() {
    let mut builder = PstBuilder::new();
    builder.add_property_context(message(1), mixed(), inbox());
    let pst = open(&builder);

    let pc = pst.get_properties(message(1)).unwrap();
    let ids: Vec<u16> = pc.ids().collect();
    let mut expected = vec![
        tags::IMPORTANCE,
        tags::MESSAGE_CLASS,
        tags::SUBJECT,
        tags::CLIENT_SUBMIT_TIME,
        tags::MESSAGE_FLAGS,
        tags::MESSAGE_SIZE,
        tags::HAS_ATTACHMENTS,
        0x6001,
        0x6002,
        tags::SENDER_NAME,
    ];
    expected.sort_unstable();
    assert_eq!(ids, expected);
    assert_eq!(pc.len(), expected.len());
    assert!(pc.property(tags::BODY).is_none());
}

#[test]
fn test_values_by_type() {
    let mut builder = PstBuilder::new();
    builder.add_property_context(message(1), mixed(), inbox());
    let pst = open(&builder);

    let pc = pst.get_properties(message(1)).unwrap();
    assert_eq!(pc.i32(tags::IMPORTANCE), Some(2));
    assert_eq!(pc.string(tags::MESSAGE_CLASS).as_deref(), Some("IPM.Note"));
    assert_eq!(pc.time(tags::CLIENT_SUBMIT_TIME), Some(FileTime(FILETIME)));
    assert_eq!(pc.u32(tags::MESSAGE_FLAGS), Some(0x11));
    assert_eq!(pc.bool(tags::HAS_ATTACHMENTS), Some(false));
    assert_eq!(pc.i64(0x6001), Some(-7));
    assert_eq!(pc.binary(0x6002), Some(&[1u8, 2, 3][..]));
    assert_eq!(pc.string(tags::SENDER_NAME).as_deref(), Some(""));

    // Typed accessors do not convert across types.
    assert_eq!(pc.string(tags::MESSAGE_SIZE), None);
    assert_eq!(pc.bool(tags::SUBJECT), None);
}

#[test]
fn test_empty_reference_counts_as_present() {
    let pc = PcBuilder::new()
        .string(tags::SUBJECT, "Empty body")
        .raw(tags::BODY, PropType::String, 0);
    let mut builder = PstBuilder::new();
    builder.add_property_context(message(1), pc, inbox());
    let pst = open(&builder);

    let pc = pst.get_properties(message(1)).unwrap();
    assert_eq!(pc.len(), 2);
    let body = pc.property(tags::BODY).unwrap();
    assert!(body.data.is_empty());
    assert_eq!(pc.string(tags::BODY).as_deref(), Some(""));
}

#[test]
fn test_every_scanned_context_matches_its_builder() {
    let mailbox = hello_mailbox(PstBuilder::new(), 5);
    let pst = open(&mailbox.builder);

    let mut seen = 0;
    for result in pst.scan_properties() {
        let (nid, pc) = result.unwrap();
        let expected = if nid.node_type() == crate::NodeType::NormalMessage {
            // Subject plus size, except the memo which has only a subject.
            if nid == message(2) { 1 } else { 2 }
        } else {
            1
        };
        assert_eq!(pc.len(), expected, "node {nid}");
        seen += 1;
    }
    assert_eq!(seen, mailbox.data_bids.len());
}
