//! The file-backed source reads the same store as the in-memory one.

use std::sync::Arc;
use std::thread;

use crate::e2e_tests::helpers::*;
use crate::error::Error;
use crate::ltp::{PropertyView, tags};
use crate::testing::{PstBuilder, write_temp_file};
use crate::{Pst, ReaderConfig};

#[test]
fn test_file_matches_memory() {
    let mailbox = hello_mailbox(PstBuilder::new(), 8);
    let bytes = mailbox.builder.build();
    let file = write_temp_file(&bytes);

    let from_file = Pst::open(file.path(), ReaderConfig::default()).unwrap();
    let from_memory = open_bytes(bytes);

    assert_eq!(from_file.header(), from_memory.header());
    for (nid, _) in &mailbox.data_bids {
        assert_eq!(
            from_file.get_properties(*nid).unwrap(),
            from_memory.get_properties(*nid).unwrap()
        );
    }
    assert_eq!(
        from_file.recipients(message(2)).unwrap().to,
        from_memory.recipients(message(2)).unwrap().to
    );
    let attachments = from_file.attachments(message(1)).unwrap();
    assert_eq!(attachments.items[0].1.data.as_deref(), Some(&b"abcd"[..]));
}

#[test]
fn test_concurrent_file_reads() {
    let mailbox = hello_mailbox(PstBuilder::new(), 16);
    let file = write_temp_file(&mailbox.builder.build());
    let pst = Arc::new(Pst::open(file.path(), ReaderConfig::default()).unwrap());

    let handles: Vec<_> = (0..4)
        .map(|t| {
            let pst = Arc::clone(&pst);
            thread::spawn(move || {
                for i in 0..16 {
                    let pc = pst.get_properties(message(3 + (i + t) % 16)).unwrap();
                    assert!(pc.string(tags::SUBJECT).unwrap().starts_with("Filler"));
                }
            })
        })
        .collect();
    for handle in handles {
        handle.join().unwrap();
    }
}

#[test]
fn test_missing_file_is_fatal() {
    let dir = tempfile::tempdir().unwrap();
    let result = Pst::open(dir.path().join("missing.pst"), ReaderConfig::default());
    match result {
        Err(e @ Error::IoFault { .. }) => assert!(e.is_fatal()),
        Err(other) => panic!("expected an I/O fault, got {other}"),
        Ok(_) => panic!("opened a missing file"),
    }
}

#[test]
fn test_truncated_file_fails_open() {
    let bytes = PstBuilder::new().build();
    let file = write_temp_file(&bytes[..100]);
    let result = Pst::open(file.path(), ReaderConfig::default());
    assert!(matches!(result, Err(Error::CorruptStructure { .. })));
}
