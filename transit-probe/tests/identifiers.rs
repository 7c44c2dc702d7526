//! Property tests for probe identifiers and markers.

use std::collections::HashSet;

use proptest::prelude::*;
use transit_probe::{
    CorrelationMarkers, new_test_id,
    correlation::{TEST_ID_LEN, domain_of},
};

proptest! {
    #[test]
    fn test_ids_are_unique_and_hex(count in 1usize..2000) {
        let ids: Vec<String> = (0..count).map(|_| new_test_id()).collect();
        let unique: HashSet<&String> = ids.iter().collect();

        prop_assert_eq!(unique.len(), count);
        for id in &ids {
            prop_assert_eq!(id.len(), TEST_ID_LEN);
            prop_assert!(id.chars().all(|c| matches!(c, '0'..='9' | 'a'..='f')));
        }
    }

    #[test]
    fn test_message_id_embeds_markers(
        send_epoch in 1_000_000_000.0f64..4_000_000_000.0,
        domain in "[a-z]{1,12}\\.(com|org|net)",
    ) {
        let test_id = new_test_id();
        let markers = CorrelationMarkers::new(&test_id, send_epoch, &domain);

        #[allow(clippy::cast_possible_truncation)]
        let floored = send_epoch.floor() as i64;
        prop_assert_eq!(markers.send_epoch, floored);

        let prefix = format!("<probe.{test_id}.{floored}.");
        let suffix = format!("@{domain}>");
        prop_assert!(markers.message_id.starts_with(&prefix));
        prop_assert!(markers.message_id.ends_with(&suffix));
        prop_assert_eq!(domain_of(&markers.message_id), Some(domain.as_str()));
    }

    #[test]
    fn test_same_inputs_never_share_a_message_id(send_epoch in 0i64..4_000_000_000) {
        #[allow(clippy::cast_precision_loss)]
        let epoch = send_epoch as f64;
        let first = CorrelationMarkers::new("abcd1234", epoch, "contoso.com");
        let second = CorrelationMarkers::new("abcd1234", epoch, "contoso.com");

        prop_assert_ne!(first.message_id, second.message_id);
    }
}
