#![no_main]

use artship::descriptor;
use artship::environment::{EventPayload, TriggerContext};
use libfuzzer_sys::fuzz_target;

fuzz_target!(|data: &[u8]| {
    let Ok(text) = std::str::from_utf8(data) else {
        return;
    };
    let Ok(payload) = EventPayload::parse(text) else {
        return;
    };

    if let Some(head) = payload.head_commit.as_ref() {
        let trigger = TriggerContext::default();
        if let Ok(desc) = descriptor::from_event(head, &trigger) {
            assert_eq!(desc.hash.len(), 40);
            assert!(desc.hash.starts_with(&desc.short_hash));
        }
    }
});
