#![no_main]

use arbor_core::content::{ContentItem, ContentStore, FINGERPRINT_LEN, Fingerprint, MaskCursor};
use libfuzzer_sys::fuzz_target;

// Split a store at an arbitrary depth and check that every item lands in
// exactly one of the three stores.
fuzz_target!(|data: &[u8]| {
    let Some((&depth, rest)) = data.split_first() else {
        return;
    };
    let Ok(cursor) = MaskCursor::at_depth(usize::from(depth)) else {
        return;
    };

    let store = ContentStore::new();
    let mut submitted = 0;
    for chunk in rest.chunks_exact(2 * FINGERPRINT_LEN).take(64) {
        let mut first = [0u8; FINGERPRINT_LEN];
        let mut second = [0u8; FINGERPRINT_LEN];
        first.copy_from_slice(&chunk[..FINGERPRINT_LEN]);
        second.copy_from_slice(&chunk[FINGERPRINT_LEN..]);
        let item = ContentItem::new(chunk, Fingerprint(first), Fingerprint(second));
        if store.submit_content(item) {
            submitted += 1;
        }
    }

    let split = store.separate_content(&cursor);
    assert_eq!(store.len() + split.left.len() + split.right.len(), submitted);
    assert_eq!(store.aggregate_content(&[&split.left, &split.right]), submitted - store.len());
    assert_eq!(store.len(), submitted);
});
