use std::collections::BTreeMap;

use depcrawl_store::codec::{
    compress_level, compress_release_files, compress_versions, decompress_level,
    decompress_release_files, decompress_versions, recompress_level, ReleaseFiles, Slot,
    VersionMap,
};
use proptest::prelude::*;

const PROPTEST_CASES: u32 = 256;

// A tiny value space so identical siblings are common.
fn arb_value() -> impl Strategy<Value = String> {
    prop_oneof![Just("a".to_owned()), Just("b".to_owned()), "[a-c]{0,3}"]
}

fn arb_tag() -> impl Strategy<Value = String> {
    prop_oneof![
        Just("27".to_owned()),
        Just("36".to_owned()),
        Just("37".to_owned()),
        Just("38".to_owned()),
        Just("39".to_owned()),
        Just("310".to_owned()),
        Just("311".to_owned()),
    ]
}

fn arb_version() -> impl Strategy<Value = String> {
    "[0-9]{1,2}(\\.[0-9]{1,2}){0,2}"
}

fn arb_versions() -> impl Strategy<Value = VersionMap<String>> {
    prop::collection::btree_map(
        arb_version(),
        prop::collection::btree_map(arb_tag(), arb_value(), 0..6),
        0..6,
    )
}

fn arb_release_files() -> impl Strategy<Value = ReleaseFiles<String>> {
    prop::collection::btree_map(
        arb_version(),
        prop::collection::btree_map("[a-z]{1,4}-[0-9]\\.whl", arb_value(), 0..4),
        0..5,
    )
}

fn assert_one_hop<T>(slots: &BTreeMap<String, Slot<T>>) {
    for slot in slots.values() {
        if let Slot::Ref { target } = slot {
            assert!(
                matches!(slots.get(target), Some(Slot::Value(_))),
                "reference to {target:?} must point at an inline value"
            );
        }
    }
}

proptest! {
    #![proptest_config(ProptestConfig {
        cases: PROPTEST_CASES,
        .. ProptestConfig::default()
    })]

    #[test]
    fn level_roundtrip_is_lossless(values in prop::collection::btree_map(arb_tag(), arb_value(), 0..8)) {
        let compressed = compress_level(values.clone());
        assert_one_hop(&compressed);
        prop_assert_eq!(decompress_level(compressed.clone()).unwrap(), values);
        prop_assert_eq!(recompress_level(compressed.clone()).unwrap(), compressed);
    }

    #[test]
    fn version_roundtrip_is_lossless(versions in arb_versions()) {
        let compressed = compress_versions(versions.clone());
        assert_one_hop(&compressed);
        for slot in compressed.values() {
            if let Slot::Value(tags) = slot {
                assert_one_hop(tags);
            }
        }

        let expanded = decompress_versions(compressed.clone()).unwrap();
        prop_assert_eq!(&expanded, &versions);
        prop_assert_eq!(compress_versions(expanded), compressed);
    }

    #[test]
    fn release_file_roundtrip_is_lossless(files in arb_release_files()) {
        // Versions without files have nothing to persist.
        let files: ReleaseFiles<String> = files.into_iter().filter(|(_, f)| !f.is_empty()).collect();
        let compressed = compress_release_files(files.clone());

        let expanded = decompress_release_files(compressed.clone()).unwrap();
        prop_assert_eq!(&expanded, &files);
        prop_assert_eq!(compress_release_files(expanded), compressed);
    }
}
