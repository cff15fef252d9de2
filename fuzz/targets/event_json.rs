#![no_main]

use indrajala::event::Event;
use libfuzzer_sys::fuzz_target;

// Любые байты: разбор не паникует, а разобранное событие сериализуется
// и читается обратно без изменений.
fuzz_target!(|data: &[u8]| {
    let Ok(text) = std::str::from_utf8(data) else {
        return;
    };
    let Ok(ev) = Event::from_json(text) else {
        return;
    };
    let json = ev.to_json().expect("serialize parsed event");
    let back = Event::from_json(&json).expect("parse serialized event");
    assert_eq!(back, ev);
});
