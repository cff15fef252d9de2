//! Property-based tests для конверта события и сопоставления топиков.

use indrajala::event::{topic_matches, Event};
use proptest::prelude::*;

const PROPTEST_CASES: u32 = 500;

fn segment() -> impl Strategy<Value = String> {
    "[a-z0-9_$]{1,8}"
}

fn topic() -> impl Strategy<Value = Vec<String>> {
    prop::collection::vec(segment(), 1..6)
}

fn event() -> impl Strategy<Value = Event> {
    (
        topic(),
        "[a-z/0-9]{0,16}",
        any::<f64>().prop_filter("finite", |f| f.is_finite()),
        prop::option::of(any::<f64>().prop_filter("finite", |f| f.is_finite())),
        "[a-z/]{0,12}",
        any::<String>(),
        prop::option::of("[a-f0-9]{8,32}"),
        prop::option::of(any::<i64>()),
    )
        .prop_map(|(segs, from, start, end, dt, data, auth, seq)| {
            let mut ev = Event::new(segs.join("/"))
                .from_id(from)
                .with_data(dt, data);
            ev.time_start = start;
            ev.time_end = end;
            ev.auth_hash = auth;
            ev.seq_no = seq;
            ev
        })
}

proptest! {
    #![proptest_config(ProptestConfig::with_cases(PROPTEST_CASES))]

    /// Конверт с конечными числами переживает JSON без потерь.
    #[test]
    fn prop_envelope_json_lossless(ev in event()) {
        let json = ev.to_json().unwrap();
        let back = Event::from_json(&json).unwrap();
        prop_assert_eq!(back, ev);
    }

    /// Топик совпадает сам с собой и с `#`.
    #[test]
    fn prop_topic_matches_itself(segs in topic()) {
        let t = segs.join("/");
        prop_assert!(topic_matches(&t, &t));
        prop_assert!(topic_matches(&t, "#"));
    }

    /// Замена любого сегмента на `+` сохраняет совпадение, усечение с `#`
    /// на конце тоже.
    #[test]
    fn prop_wildcards_generalise(segs in topic(), idx in any::<prop::sample::Index>()) {
        let t = segs.join("/");
        let i = idx.index(segs.len());

        let mut plus = segs.clone();
        plus[i] = "+".into();
        prop_assert!(topic_matches(&t, &plus.join("/")));

        let mut prefix = segs[..i].to_vec();
        prefix.push("#".into());
        prop_assert!(topic_matches(&t, &prefix.join("/")));
    }

    /// Шаблон без wildcard-ов длиннее топика не совпадает.
    #[test]
    fn prop_longer_pattern_never_matches(segs in topic(), extra in segment()) {
        let t = segs.join("/");
        let pattern = format!("{t}/{extra}");
        prop_assert!(!topic_matches(&t, &pattern));
    }
}
