#![no_main]

use artship::refs::strip_namespace;
use libfuzzer_sys::fuzz_target;

fuzz_target!(|data: &[u8]| {
    let Ok(input) = std::str::from_utf8(data) else {
        return;
    };

    if let Ok(short) = strip_namespace(input) {
        let s = short.as_str();
        assert!(!s.is_empty());
        assert!(!s.contains(".."));
        assert!(!s.ends_with('/'));
    }
});
