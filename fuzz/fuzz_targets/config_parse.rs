#![no_main]

use artship::config::ArtshipConfig;
use libfuzzer_sys::fuzz_target;

fuzz_target!(|data: &[u8]| {
    let Ok(text) = std::str::from_utf8(data) else {
        return;
    };
    if let Ok(config) = toml::from_str::<ArtshipConfig>(text) {
        let _ = config.validate();
    }
});
