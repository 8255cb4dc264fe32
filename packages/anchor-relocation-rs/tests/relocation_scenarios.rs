use anchor_codec_rs::{Anchor, Bias};
use anchor_relocation_rs::{
    DocumentSnapshot, RelocationConfig, RelocationMethod, RelocationRequest,
    compute_text_similarity, fuzzy_relocate_anchor,
};
use proptest::prelude::*;

#[test]
fn deleted_block_relocates_to_similar_neighbour() {
    let doc = DocumentSnapshot::from_pairs([
        ("block-1", "An unrelated opening paragraph"),
        ("block-2", "The quick brown fox jumps over"),
    ]);
    let anchor = Anchor::new("block-deleted", 4, Bias::After);
    let request = RelocationRequest::new(&anchor, "brown fox");

    let result = fuzzy_relocate_anchor(&request, &doc, &RelocationConfig::with_threshold(0.5));

    assert_eq!(result.method, RelocationMethod::FuzzyText);
    let relocated = result.anchor.expect("relocated anchor");
    assert_eq!(relocated.block_id, "block-2");
    assert_eq!(relocated.bias, Bias::After);
    assert!(result.confidence > 0.5);
    assert_eq!(result.debug.candidates_considered, 2);
}

#[test]
fn relocation_result_serializes_for_hosts() {
    let doc = DocumentSnapshot::from_pairs([("b1", "text")]);
    let anchor = Anchor::new("b1", 1, Bias::Before);
    let result = fuzzy_relocate_anchor(
        &RelocationRequest::new(&anchor, "ext"),
        &doc,
        &RelocationConfig::default(),
    );
    let json = serde_json::to_value(&result).expect("serialize");
    assert_eq!(json["method"], "integrity");
    assert_eq!(json["anchor"]["blockId"], "b1");
    assert_eq!(json["debug"]["candidatesConsidered"], 0);
}

proptest! {
    #[test]
    fn similarity_stays_in_unit_interval(a in "\\PC{0,16}", b in "\\PC{0,16}") {
        let score = compute_text_similarity(&a, &b);
        prop_assert!((0.0..=1.0).contains(&score));
    }

    #[test]
    fn similarity_of_identical_text_is_one(s in "\\PC{0,24}") {
        prop_assert_eq!(compute_text_similarity(&s, &s), 1.0);
    }

    #[test]
    fn similarity_with_empty_is_zero(s in "\\PC{1,24}") {
        prop_assert_eq!(compute_text_similarity(&s, ""), 0.0);
    }

    #[test]
    fn similarity_is_symmetric(a in "[a-z ]{0,12}", b in "[a-z ]{0,12}") {
        prop_assert_eq!(compute_text_similarity(&a, &b), compute_text_similarity(&b, &a));
    }
}
