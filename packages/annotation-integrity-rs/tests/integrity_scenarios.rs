use ai_context_hash_rs::ChainPolicyKind;
use anchor_relocation_rs::{BlockMapping, DocumentSnapshot, StructuralDelta, utf16_len};
use annotation_integrity_rs::{
    Annotation, AnnotationStore, Chain, DisplayState, FailureKind, Span, SpanStatus, StoreConfig,
};
use policy_manifest_rs::PolicyManifest;
use proptest::prelude::*;
use std::collections::HashSet;

const FOX: &str = "The quick brown fox jumps over";

fn store() -> AnnotationStore {
    AnnotationStore::new(StoreConfig::from(&PolicyManifest::default()), 0)
}

fn annotate(store: &mut AnnotationStore, document: &DocumentSnapshot, id: &str, block_id: &str, start: u32, end: u32) {
    let span_id = format!("{id}-s1");
    let span = Span::capture(document, id, &span_id, block_id, start, end).expect("capture");
    store.insert(Annotation::new(id, vec![span], None)).expect("insert");
}

fn state(store: &AnnotationStore, id: &str) -> DisplayState {
    store.display_state(id).expect("known annotation")
}

#[test]
fn edited_span_degrades_through_grace_to_orphan() {
    let doc = DocumentSnapshot::from_pairs([("b1", FOX)]);
    let mut store = store();
    annotate(&mut store, &doc, "a1", "b1", 4, 9);
    store.run_checkpoint(&doc, None, None, 0);
    assert_eq!(state(&store, "a1"), DisplayState::Active);

    let edited = DocumentSnapshot::from_pairs([("b1", "The quack brown fox jumps over")]);
    let changed = HashSet::from(["b1".to_string()]);
    let checkpoint = store.run_checkpoint(&edited, None, Some(&changed), 100);
    assert_eq!(checkpoint.spans_failed, 1);
    assert_eq!(checkpoint.failures[0].kind, FailureKind::ContextHashMismatch);
    assert_eq!(state(&store, "a1"), DisplayState::BrokenGrace);
    assert!(state(&store, "a1").blocks_edits());

    // no further edits, the grace window still runs out
    store.run_checkpoint(&edited, None, Some(&HashSet::new()), 5_000);
    assert_eq!(state(&store, "a1"), DisplayState::BrokenGrace);
    store.run_checkpoint(&edited, None, Some(&HashSet::new()), 10_100);
    assert_eq!(state(&store, "a1"), DisplayState::Orphan);
}

#[test]
fn undo_returns_orphan_to_active() {
    let doc = DocumentSnapshot::from_pairs([("b1", FOX)]);
    let mut store = store();
    annotate(&mut store, &doc, "a1", "b1", 4, 9);
    store.run_checkpoint(&doc, None, None, 0);

    let edited = DocumentSnapshot::from_pairs([("b1", "The quack brown fox jumps over")]);
    store.run_checkpoint(&edited, None, None, 10);
    store.run_checkpoint(&edited, None, None, 20_000);
    assert_eq!(state(&store, "a1"), DisplayState::Orphan);

    store.run_checkpoint(&doc, None, None, 20_100);
    assert_eq!(state(&store, "a1"), DisplayState::Active);
    assert_eq!(store.get("a1").and_then(Annotation::grace_started_at_ms), None);
}

#[test]
fn deleted_block_is_recovered_by_fuzzy_search_then_reverified() {
    let doc = DocumentSnapshot::from_pairs([("intro", "Preface"), ("block-deleted", FOX)]);
    let mut store = store();
    annotate(&mut store, &doc, "a1", "block-deleted", 10, 19);
    store.run_checkpoint(&doc, None, None, 0);

    let edited = DocumentSnapshot::from_pairs([("intro", "Preface"), ("block-2", "The quick brown fox jumped over")]);
    let mapping = BlockMapping::new(vec![StructuralDelta::DeleteBlock {
        block_id: "block-deleted".to_string(),
    }]);
    let changed = HashSet::from(["block-2".to_string()]);
    store.run_checkpoint(&edited, Some(&mapping), Some(&changed), 50);

    assert_eq!(state(&store, "a1"), DisplayState::ActiveUnverified);
    let location = store.span_location("a1", "a1-s1").expect("location");
    assert_eq!(location.block_id, "block-2");
    assert_eq!(location.text, "brown fox");

    store.run_checkpoint(&edited, None, None, 100);
    assert_eq!(state(&store, "a1"), DisplayState::Active);
}

#[test]
fn deleted_block_without_similar_content_orphans() {
    let doc = DocumentSnapshot::from_pairs([("b1", "alpha"), ("b2", FOX)]);
    let mut store = store();
    annotate(&mut store, &doc, "a1", "b2", 10, 19);
    store.run_checkpoint(&doc, None, None, 0);

    let edited = DocumentSnapshot::from_pairs([("b1", "alpha")]);
    let mapping = BlockMapping::new(vec![StructuralDelta::DeleteBlock {
        block_id: "b2".to_string(),
    }]);
    let checkpoint = store.run_checkpoint(&edited, Some(&mapping), Some(&HashSet::new()), 10);
    assert_eq!(checkpoint.failures[0].kind, FailureKind::BlockMissing);
    assert_eq!(state(&store, "a1"), DisplayState::Orphan);
    assert_eq!(store.span_status("a1", "a1-s1"), Some(SpanStatus::Unresolved));
}

#[test]
fn one_lost_span_leaves_the_annotation_partial() {
    let doc = DocumentSnapshot::from_pairs([("b1", "first block"), ("b2", "second block")]);
    let spans = vec![
        Span::capture(&doc, "a1", "s1", "b1", 0, 5).expect("capture"),
        Span::capture(&doc, "a1", "s2", "b2", 0, 6).expect("capture"),
    ];
    let mut store = store();
    store.insert(Annotation::new("a1", spans, None)).expect("insert");

    let edited = DocumentSnapshot::from_pairs([("b1", "first block")]);
    store.run_checkpoint(&edited, None, None, 0);
    assert_eq!(state(&store, "a1"), DisplayState::ActivePartial);
}

#[test]
fn join_carries_spans_into_the_left_block() {
    let doc = DocumentSnapshot::from_pairs([("b1", "The quick brown fox "), ("b2", "jumps over")]);
    let mut store = store();
    annotate(&mut store, &doc, "a1", "b2", 0, 5);
    store.run_checkpoint(&doc, None, None, 0);

    let edited = DocumentSnapshot::from_pairs([("b1", "The quick brown fox jumps over")]);
    let mapping = BlockMapping::new(vec![StructuralDelta::JoinBlocks {
        left_block_id: "b1".to_string(),
        right_block_id: "b2".to_string(),
        left_len: 20,
    }]);
    store.run_checkpoint(&edited, Some(&mapping), Some(&HashSet::new()), 10);

    assert_eq!(state(&store, "a1"), DisplayState::Active);
    let location = store.span_location("a1", "a1-s1").expect("location");
    assert_eq!((location.block_id.as_str(), location.start, location.end), ("b1", 20, 25));
    assert_eq!(store.annotations_for_block("b1").len(), 1);
    assert!(store.annotations_for_block("b2").is_empty());
}

#[test]
fn edit_in_joined_block_recovers_when_text_is_restored() {
    let doc = DocumentSnapshot::from_pairs([("b1", "Hello"), ("b2", "quick fox")]);
    let mut store = store();
    annotate(&mut store, &doc, "a1", "b2", 0, 5);
    store.run_checkpoint(&doc, None, None, 0);
    assert_eq!(state(&store, "a1"), DisplayState::Active);

    let joined = DocumentSnapshot::from_pairs([("b1", "Helloquack fox")]);
    let mapping = BlockMapping::new(vec![StructuralDelta::JoinBlocks {
        left_block_id: "b1".to_string(),
        right_block_id: "b2".to_string(),
        left_len: 5,
    }]);
    store.run_checkpoint(&joined, Some(&mapping), None, 10);
    assert_eq!(state(&store, "a1"), DisplayState::BrokenGrace);
    assert_eq!(store.span_status("a1", "a1-s1"), Some(SpanStatus::Failed));

    let restored = DocumentSnapshot::from_pairs([("b1", "Helloquick fox")]);
    store.run_checkpoint(&restored, None, None, 20);
    assert_eq!(state(&store, "a1"), DisplayState::Active);
    let location = store.span_location("a1", "a1-s1").expect("location");
    assert_eq!((location.block_id.as_str(), location.start, location.end), ("b1", 5, 10));
}

#[test]
fn chain_broken_by_inserted_block() {
    let doc = DocumentSnapshot::from_pairs([("b1", "first block"), ("b2", "second block")]);
    let spans = vec![
        Span::capture(&doc, "a1", "s1", "b1", 0, 5).expect("capture"),
        Span::capture(&doc, "a1", "s2", "b2", 0, 6).expect("capture"),
    ];
    let chain = Chain::new(
        vec!["b1".to_string(), "b2".to_string()],
        ChainPolicyKind::StrictAdjacency,
        0,
    );
    let mut store = store();
    store.insert(Annotation::new("a1", spans, Some(chain))).expect("insert");
    let checkpoint = store.run_checkpoint(&doc, None, None, 0);
    assert_eq!(checkpoint.chains_verified, 1);
    assert_eq!(state(&store, "a1"), DisplayState::Active);

    let edited = DocumentSnapshot::from_pairs([("b1", "first block"), ("x", "inserted"), ("b2", "second block")]);
    let checkpoint = store.run_checkpoint(&edited, None, None, 10);
    assert_eq!(checkpoint.chains_failed, 1);
    assert_eq!(checkpoint.failures[0].kind, FailureKind::ChainGapExceeded);
    assert_eq!(state(&store, "a1"), DisplayState::BrokenGrace);
}

#[test]
fn incremental_and_full_scans_agree() {
    let doc = DocumentSnapshot::from_pairs([("b1", FOX), ("b2", "lazy dog"), ("b3", "sleeps")]);
    let mut incremental = store();
    let mut full = store();
    for store in [&mut incremental, &mut full] {
        annotate(store, &doc, "a1", "b1", 4, 9);
        annotate(store, &doc, "a2", "b2", 0, 4);
        annotate(store, &doc, "a3", "b3", 0, 6);
        store.run_checkpoint(&doc, None, None, 0);
    }

    let edited = DocumentSnapshot::from_pairs([("b1", FOX), ("b2", "busy dog"), ("b3", "sleeps")]);
    let changed = HashSet::from(["b2".to_string()]);
    let partial = incremental.run_checkpoint(&edited, None, Some(&changed), 10);
    let complete = full.run_checkpoint(&edited, None, None, 10);

    assert_eq!(partial.annotations_checked, 1);
    assert_eq!(complete.annotations_checked, 3);
    assert_eq!(partial.failures, complete.failures);
    for id in ["a1", "a2", "a3"] {
        assert_eq!(state(&incremental, id), state(&full, id));
    }
}

#[test]
fn scheduler_triggers_after_operation_burst() {
    let doc = DocumentSnapshot::from_pairs([("b1", FOX)]);
    let mut store = store();
    annotate(&mut store, &doc, "a1", "b1", 4, 9);

    store.record_operations(50, 1_000);
    assert_eq!(store.next_deadline(), Some(1_200));
    assert!(!store.poll(1_100));
    assert!(store.poll(1_200));

    // operations arriving while the checkpoint is pending are only counted
    store.record_operations(3, 1_250);
    store.run_checkpoint(&doc, None, None, 1_300);
    assert_eq!(store.scheduler().ops_since_last(), 3);
    assert_eq!(state(&store, "a1"), DisplayState::Active);
}

proptest! {
    #[test]
    fn prefix_inserts_keep_the_span_verified(prefix in "[a-z ]{1,24}") {
        let doc = DocumentSnapshot::from_pairs([("b1", FOX)]);
        let mut store = store();
        annotate(&mut store, &doc, "a1", "b1", 4, 9);
        store.run_checkpoint(&doc, None, None, 0);

        let edited = DocumentSnapshot::from_pairs([("b1", format!("{prefix}{FOX}"))]);
        let mapping = BlockMapping::new(vec![StructuralDelta::InsertText {
            block_id: "b1".to_string(),
            offset: 0,
            len: utf16_len(&prefix) as u32,
        }]);
        store.run_checkpoint(&edited, Some(&mapping), Some(&HashSet::new()), 10);

        prop_assert_eq!(state(&store, "a1"), DisplayState::Active);
        let location = store.span_location("a1", "a1-s1").expect("location");
        prop_assert_eq!(location.text, "quick");
    }
}
