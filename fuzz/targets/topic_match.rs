#![no_main]

use arbitrary::Arbitrary;
use indrajala::event::{has_wildcards, topic_matches};
use libfuzzer_sys::fuzz_target;

#[derive(Debug, Arbitrary)]
struct Input {
    published: String,
    pattern: String,
}

fuzz_target!(|input: Input| {
    let matched = topic_matches(&input.published, &input.pattern);
    if has_wildcards(&input.published) {
        assert!(!matched);
        return;
    }
    if !input.published.is_empty() {
        assert!(topic_matches(&input.published, "#"));
    }
    assert!(topic_matches(&input.published, &input.published));
});
