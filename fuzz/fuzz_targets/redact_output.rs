#![no_main]

use artship_git::Credentials;
use libfuzzer_sys::fuzz_target;

fuzz_target!(|data: (String, String)| {
    let (token, text) = data;
    let creds = Credentials::token(&token);
    let user = creds.username();
    if user.len() < 4
        || !user
            .bytes()
            .all(|b| b.is_ascii_lowercase() || b.is_ascii_digit())
    {
        return;
    }

    let redacted = creds.redact(&format!("{text} {user}"));
    assert!(!redacted.contains(user));
});
