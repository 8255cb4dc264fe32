use anchor_codec_rs::{
    Anchor, Bias, MAX_OFFSET, decode_anchor, decode_anchor_base64, encode_anchor,
    encode_anchor_base64, encode_legacy_json, encode_legacy_plain,
};
use proptest::prelude::*;

fn bias_strategy() -> impl Strategy<Value = Bias> {
    prop_oneof![Just(Bias::Before), Just(Bias::After)]
}

fn anchor_strategy() -> impl Strategy<Value = Anchor> {
    ("\\PC{1,24}", 0..=MAX_OFFSET, bias_strategy())
        .prop_map(|(block_id, offset, bias)| Anchor::new(block_id, offset, bias))
}

proptest! {
    #[test]
    fn binary_round_trip(anchor in anchor_strategy()) {
        let bytes = encode_anchor(&anchor).expect("encode");
        prop_assert_eq!(decode_anchor(&bytes), Some(anchor));
    }

    #[test]
    fn transport_round_trip(anchor in anchor_strategy()) {
        let encoded = encode_anchor_base64(&anchor).expect("encode");
        prop_assert_eq!(decode_anchor_base64(&encoded), Some(anchor));
    }

    #[test]
    fn any_single_byte_flip_is_rejected(
        anchor in anchor_strategy(),
        index in any::<prop::sample::Index>(),
        mask in 1u8..=255,
    ) {
        let mut bytes = encode_anchor(&anchor).expect("encode");
        let position = index.index(bytes.len());
        bytes[position] ^= mask;
        prop_assert_eq!(decode_anchor(&bytes), None);
    }

    #[test]
    fn any_truncation_is_rejected(anchor in anchor_strategy(), cut in any::<prop::sample::Index>()) {
        let bytes = encode_anchor(&anchor).expect("encode");
        let keep = cut.index(bytes.len());
        prop_assert_eq!(decode_anchor(&bytes[..keep]), None);
    }

    #[test]
    fn legacy_json_normalizes(anchor in anchor_strategy()) {
        prop_assert_eq!(decode_anchor_base64(&encode_legacy_json(&anchor)), Some(anchor));
    }
}

#[test]
fn legacy_plain_matches_binary_shape() {
    let anchor = Anchor::new("block-1", 5, Bias::After);
    assert_eq!(
        decode_anchor_base64(&encode_legacy_plain(&anchor)),
        decode_anchor_base64(&encode_anchor_base64(&anchor).expect("encode"))
    );
}
