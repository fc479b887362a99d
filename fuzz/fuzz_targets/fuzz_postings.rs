#![no_main]

use libfuzzer_sys::fuzz_target;

fuzz_target!(|data: &[u8]| {
    // Corrupt postings snapshots decode to None, not a panic
    let _ = libcsearch::utils::decode_doc_ids(data);
    let _ = libcsearch::utils::decode_varint(data);
});
