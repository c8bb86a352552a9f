//! Property-based test generators using proptest.
//!
//! Provides strategies for generating identifiers that maintain the
//! naming invariants, and near-misses that violate them.

use proptest::prelude::*;

/// Strategy for generating one valid id segment or database name.
pub fn name_strategy() -> impl Strategy<Value = String> {
    prop::string::string_regex("[A-Za-z0-9_-]{1,16}").expect("Invalid regex")
}

/// Strategy for generating valid document ids of one to four segments.
pub fn document_id_strategy() -> impl Strategy<Value = String> {
    prop::collection::vec(name_strategy(), 1..=4).prop_map(|segments| segments.join("/"))
}

/// Strategy for generating ids with exactly one malformed segment.
pub fn invalid_document_id_strategy() -> impl Strategy<Value = String> {
    let bad_segment = prop_oneof![
        Just(String::new()),
        Just("..".to_string()),
        prop::string::string_regex("[a-z]{1,6}[. \\\\:*][a-z]{0,6}").expect("Invalid regex"),
    ];
    (prop::collection::vec(name_strategy(), 0..3), bad_segment).prop_map(|(mut segments, bad)| {
        segments.push(bad);
        segments.join("/")
    })
}

/// Strategy for generating document payload strings.
pub fn payload_strategy() -> impl Strategy<Value = String> {
    prop::string::string_regex("[ -~]{0,64}").expect("Invalid regex")
}

#[cfg(test)]
mod tests {
    use super::*;
    use jsondoc_storage::DocumentId;

    proptest! {
        #[test]
        fn valid_ids_parse(id in document_id_strategy()) {
            prop_assert!(DocumentId::parse(id).is_ok());
        }

        #[test]
        fn invalid_ids_are_rejected(id in invalid_document_id_strategy()) {
            prop_assert!(DocumentId::parse(id).is_err());
        }
    }
}
