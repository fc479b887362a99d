#![no_main]

use libfuzzer_sys::fuzz_target;

fuzz_target!(|data: &str| {
    // Malformed lines must come back as errors, never panics
    if let Ok(table) = libcsearch::symbols::SymbolTable::parse(data) {
        let _ = libcsearch::symbols::encode_all(&table);
    }
    let _ = libcsearch::delta::parse_delta(data);
});
