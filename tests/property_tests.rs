//! Property-based tests for packet identifier allocation and topic matching.

use mqtt311_engine::mqtt_client::packet_id::PacketIdRegistry;
use mqtt311_engine::mqtt_client::topic::{is_valid_filter, is_valid_topic, matches};
use proptest::prelude::*;

/// Plain topic level: no wildcards, no separator, no leading `$`.
fn topic_level() -> impl Strategy<Value = String> {
    "[a-zA-Z0-9_\\-]{1,12}"
}

fn topic_levels() -> impl Strategy<Value = Vec<String>> {
    prop::collection::vec(topic_level(), 1..8)
}

proptest! {
    #![proptest_config(ProptestConfig::with_cases(16))]

    #[test]
    fn prop_released_ids_come_back_after_wraparound(
        released in prop::collection::btree_set(1u16..=u16::MAX, 1..64)
    ) {
        let mut ids = PacketIdRegistry::new();
        for expected in 1..=u16::MAX {
            prop_assert_eq!(ids.allocate(), Some(expected));
        }
        prop_assert_eq!(ids.allocate(), None);

        for id in &released {
            prop_assert!(ids.release(*id));
        }
        // the counter wraps past the maximum and skips every id still held
        let again: Vec<u16> = (0..released.len()).filter_map(|_| ids.allocate()).collect();
        prop_assert_eq!(again, released.iter().copied().collect::<Vec<_>>());
        prop_assert_eq!(ids.allocate(), None);
    }
}

proptest! {
    #[test]
    fn prop_allocated_ids_are_unique_and_non_zero(
        script in prop::collection::vec(any::<bool>(), 1..400)
    ) {
        let mut ids = PacketIdRegistry::new();
        let mut held: Vec<u16> = Vec::new();
        for allocate in script {
            if allocate || held.is_empty() {
                let id = ids.allocate().unwrap();
                prop_assert_ne!(id, 0);
                prop_assert!(!held.contains(&id));
                held.push(id);
            } else {
                let id = held.remove(0);
                prop_assert!(ids.release(id));
            }
            prop_assert_eq!(ids.in_use_count(), held.len());
        }
    }

    #[test]
    fn prop_topic_matches_itself_and_multi_level_wildcard(levels in topic_levels()) {
        let topic = levels.join("/");
        prop_assert!(is_valid_topic(&topic));
        prop_assert!(matches(&topic, &topic));
        prop_assert!(matches(&topic, "#"));
        for cut in 1..=levels.len() {
            // `prefix/#` matches the prefix itself and everything below it
            let filter = format!("{}/#", levels[..cut].join("/"));
            prop_assert!(is_valid_filter(&filter));
            prop_assert!(matches(&topic, &filter));
        }
    }

    #[test]
    fn prop_single_level_wildcard_replaces_any_level(levels in topic_levels(), idx in any::<prop::sample::Index>()) {
        let topic = levels.join("/");
        let at = idx.index(levels.len());
        let mut filter_levels = levels.clone();
        filter_levels[at] = "+".to_string();
        let filter = filter_levels.join("/");
        prop_assert!(is_valid_filter(&filter));
        prop_assert!(matches(&topic, &filter));

        // one level too many or too few never matches `+`
        let longer = format!("{topic}/extra");
        prop_assert!(!matches(&longer, &filter));
        if levels.len() > 1 {
            let shorter = levels[..levels.len() - 1].join("/");
            prop_assert!(!matches(&shorter, &filter));
        }
    }

    #[test]
    fn prop_dollar_topics_skip_leading_wildcards(levels in topic_levels()) {
        let topic = format!("${}", levels.join("/"));
        prop_assert!(!matches(&topic, "#"));
        let plus_filter = std::iter::once("+")
            .chain(levels.iter().skip(1).map(String::as_str))
            .collect::<Vec<_>>()
            .join("/");
        prop_assert!(!matches(&topic, &plus_filter));
        prop_assert!(matches(&topic, &topic));
        let hash_filter = format!("${}/#", levels[0]);
        prop_assert!(matches(&topic, &hash_filter));
    }

    #[test]
    fn prop_misplaced_wildcards_are_rejected(levels in topic_levels()) {
        let topic = levels.join("/");
        let leading_hash = format!("#/{topic}");
        let trailing_plus = format!("{topic}+");
        let topic_with_plus = format!("{topic}/+");
        prop_assert!(!is_valid_filter(&leading_hash));
        prop_assert!(!is_valid_filter(&trailing_plus));
        prop_assert!(!is_valid_topic(&topic_with_plus));
    }
}
