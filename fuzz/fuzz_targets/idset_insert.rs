#![no_main]

use std::collections::BTreeSet;

use libfuzzer_sys::fuzz_target;
use nack_core::EntryIdSet;

fuzz_target!(|data: &[u8]| {
    let mut ids = EntryIdSet::new();
    let mut model = BTreeSet::new();
    for chunk in data.chunks_exact(4) {
        // Keep ids clustered so containers fill up and promote.
        let raw = u32::from_le_bytes([chunk[0], chunk[1], chunk[2], chunk[3]]);
        let id = u64::from(raw % 300_000);
        assert_eq!(ids.insert(id), model.insert(id));
    }
    assert_eq!(ids.len(), model.len() as u64);
    assert!(ids.iter().eq(model.iter().copied()));
});
