use ai_context_hash_rs::{ChainPolicyKind, compute_frontier_tag};
use ai_gateway_rs::{DocumentProvider, SpanRange};
use anchor_relocation_rs::{BlockInput, BlockMapping, DocumentSnapshot, StructuralDelta};
use annotation_integrity_rs::{
    Annotation, AnnotationStore, Chain, Checkpoint, DisplayState, IntegrityError, Span, StoreConfig,
};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashSet};
use std::mem;
use tracing::debug;

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SpanInput {
    pub span_id: String,
    pub block_id: String,
    pub start: u32,
    pub end: u32,
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ChainInput {
    pub policy_kind: ChainPolicyKind,
    #[serde(default)]
    pub max_intervening_blocks: u32,
}

/// A new annotation over the current document; spans are captured on insert.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AnnotationInput {
    pub id: String,
    pub spans: Vec<SpanInput>,
    pub chain: Option<ChainInput>,
}

/// One batch of edits from the document engine: the full block list after
/// the batch, the structural deltas that produced it and the new version
/// vector.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DocumentUpdate {
    pub blocks: Vec<BlockInput>,
    #[serde(default)]
    pub deltas: Vec<StructuralDelta>,
    pub version_vector: BTreeMap<String, u64>,
    /// Defaults to the number of deltas, at least one.
    pub op_count: Option<u64>,
}

/// Document state plus annotation integrity for one open document.
///
/// Blocks touched since the last checkpoint are dirty; spans in dirty blocks
/// are reported unverified to the gateway until the next checkpoint.
#[derive(Debug)]
pub struct DocumentSession {
    doc_id: String,
    document: DocumentSnapshot,
    version_vector: BTreeMap<String, u64>,
    store: AnnotationStore,
    pending_deltas: Vec<StructuralDelta>,
    dirty_blocks: HashSet<String>,
}

impl DocumentSession {
    pub fn new(
        doc_id: impl Into<String>,
        config: StoreConfig,
        document: DocumentSnapshot,
        version_vector: BTreeMap<String, u64>,
        now_ms: u64,
    ) -> Self {
        Self {
            doc_id: doc_id.into(),
            document,
            version_vector,
            store: AnnotationStore::new(config, now_ms),
            pending_deltas: Vec::new(),
            dirty_blocks: HashSet::new(),
        }
    }

    pub fn doc_id(&self) -> &str {
        &self.doc_id
    }

    pub fn document(&self) -> &DocumentSnapshot {
        &self.document
    }

    pub fn store(&self) -> &AnnotationStore {
        &self.store
    }

    pub fn current_frontier_tag(&self) -> String {
        compute_frontier_tag(&self.version_vector)
    }

    pub fn add_annotation(&mut self, input: AnnotationInput) -> Result<(), IntegrityError> {
        let spans = input
            .spans
            .iter()
            .map(|span| Span::capture(&self.document, &input.id, &span.span_id, &span.block_id, span.start, span.end))
            .collect::<Result<Vec<_>, _>>()?;

        let chain = input.chain.map(|chain| {
            let mut block_ids: Vec<String> = spans.iter().map(|span| span.block_id.clone()).collect();
            block_ids.dedup();
            Chain::new(block_ids, chain.policy_kind, chain.max_intervening_blocks)
        });

        let block_ids: Vec<String> = spans.iter().map(|span| span.block_id.clone()).collect();
        self.store.insert(Annotation::new(input.id, spans, chain))?;
        // the next checkpoint verifies the new annotation
        self.dirty_blocks.extend(block_ids);
        Ok(())
    }

    pub fn apply_update(&mut self, update: DocumentUpdate, now_ms: u64) {
        let next = DocumentSnapshot::new(update.blocks);
        for block in next.blocks() {
            if self.document.block_text(&block.block_id) != Some(block.content.as_str()) {
                self.dirty_blocks.insert(block.block_id.clone());
            }
        }
        for block in self.document.blocks() {
            if !next.contains(&block.block_id) {
                self.dirty_blocks.insert(block.block_id.clone());
            }
        }
        if !update.deltas.is_empty() {
            let touched = BlockMapping::new(update.deltas.clone()).touched_blocks();
            self.dirty_blocks.extend(touched);
        }

        let op_count = update
            .op_count
            .unwrap_or(update.deltas.len() as u64)
            .max(1);
        self.pending_deltas.extend(update.deltas);
        self.document = next;
        self.version_vector = update.version_vector;
        self.store.record_operations(op_count, now_ms);
        debug!(
            doc_id = %self.doc_id,
            op_count,
            dirty_blocks = self.dirty_blocks.len(),
            "document update applied"
        );
    }

    /// Runs a checkpoint when the scheduler says one is due.
    pub fn poll(&mut self, now_ms: u64) -> Option<Checkpoint> {
        if self.store.poll(now_ms) {
            Some(self.checkpoint(now_ms))
        } else {
            None
        }
    }

    /// Verifies annotations in blocks changed since the last checkpoint.
    pub fn checkpoint(&mut self, now_ms: u64) -> Checkpoint {
        let changed = mem::take(&mut self.dirty_blocks);
        let mapping = self.take_mapping();
        self.store
            .run_checkpoint(&self.document, mapping.as_ref(), Some(&changed), now_ms)
    }

    pub fn full_checkpoint(&mut self, now_ms: u64) -> Checkpoint {
        self.dirty_blocks.clear();
        let mapping = self.take_mapping();
        self.store.run_checkpoint(&self.document, mapping.as_ref(), None, now_ms)
    }

    fn take_mapping(&mut self) -> Option<BlockMapping> {
        if self.pending_deltas.is_empty() {
            return None;
        }
        Some(BlockMapping::new(mem::take(&mut self.pending_deltas)))
    }

    /// History restore: verify on the next poll.
    pub fn trigger_recovery(&mut self, now_ms: u64) {
        self.store.trigger_recovery(now_ms);
    }

    pub fn next_deadline(&self) -> Option<u64> {
        self.store.next_deadline()
    }

    pub fn display_state(&self, annotation_id: &str) -> Result<DisplayState, IntegrityError> {
        self.store.display_state(annotation_id)
    }

    pub fn dispose(&mut self) {
        self.store.dispose();
    }
}

impl DocumentProvider for DocumentSession {
    fn frontier_tag(&self, doc_id: &str) -> Option<String> {
        (doc_id == self.doc_id).then(|| self.current_frontier_tag())
    }

    fn span_context_hash(&self, doc_id: &str, annotation_id: &str, span_id: &str) -> Option<String> {
        if doc_id != self.doc_id {
            return None;
        }
        self.store.span_context_hash(annotation_id, span_id)
    }

    fn is_span_verified(&self, doc_id: &str, annotation_id: &str, span_id: &str) -> bool {
        if doc_id != self.doc_id || !self.store.is_span_verified(annotation_id, span_id) {
            return false;
        }
        self.store
            .span_location(annotation_id, span_id)
            .is_some_and(|location| !self.dirty_blocks.contains(&location.block_id))
    }

    fn span_range(&self, doc_id: &str, annotation_id: &str, span_id: &str) -> Option<SpanRange> {
        if doc_id != self.doc_id {
            return None;
        }
        let location = self.store.span_location(annotation_id, span_id)?;
        Some(SpanRange {
            block_id: location.block_id,
            start: location.start,
            end: location.end,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use policy_manifest_rs::PolicyManifest;

    fn session() -> DocumentSession {
        let document = DocumentSnapshot::from_pairs([("b1", "The quick brown fox"), ("b2", "jumps over")]);
        let mut session = DocumentSession::new(
            "doc-1",
            StoreConfig::from(&PolicyManifest::default()),
            document,
            BTreeMap::from([("peer-a".to_string(), 3)]),
            0,
        );
        session
            .add_annotation(AnnotationInput {
                id: "a1".to_string(),
                spans: vec![SpanInput {
                    span_id: "s1".to_string(),
                    block_id: "b1".to_string(),
                    start: 4,
                    end: 9,
                }],
                chain: None,
            })
            .expect("annotation");
        session
    }

    #[test]
    fn new_annotations_verify_on_the_next_checkpoint() {
        let mut session = session();
        assert!(!session.is_span_verified("doc-1", "a1", "s1"));
        let checkpoint = session.checkpoint(10);
        assert_eq!(checkpoint.spans_verified, 1);
        assert!(session.is_span_verified("doc-1", "a1", "s1"));
        assert_eq!(session.display_state("a1"), Ok(DisplayState::Active));
    }

    #[test]
    fn edited_blocks_are_unverified_until_checkpointed() {
        let mut session = session();
        session.checkpoint(10);
        let before = session.current_frontier_tag();

        session.apply_update(
            DocumentUpdate {
                blocks: vec![
                    BlockInput::new("b1", "A quick brown fox"),
                    BlockInput::new("b2", "jumps over"),
                ],
                deltas: vec![],
                version_vector: BTreeMap::from([("peer-a".to_string(), 4)]),
                op_count: None,
            },
            20,
        );
        assert_ne!(session.current_frontier_tag(), before);
        assert!(!session.is_span_verified("doc-1", "a1", "s1"));
        assert_eq!(session.store().scheduler().ops_since_last(), 1);

        // content moved left by two units, the span hash no longer matches
        let checkpoint = session.checkpoint(30);
        assert_eq!(checkpoint.spans_failed, 1);
        assert_eq!(session.display_state("a1"), Ok(DisplayState::BrokenGrace));
    }

    #[test]
    fn provider_ignores_other_documents() {
        let mut session = session();
        session.checkpoint(10);
        assert_eq!(DocumentProvider::frontier_tag(&session, "doc-2"), None);
        assert!(!session.is_span_verified("doc-2", "a1", "s1"));
        assert_eq!(session.span_range("doc-2", "a1", "s1"), None);
        assert_eq!(
            session.span_range("doc-1", "a1", "s1"),
            Some(SpanRange {
                block_id: "b1".to_string(),
                start: 4,
                end: 9,
            })
        );
    }

    #[test]
    fn unknown_block_is_rejected() {
        let mut session = session();
        let result = session.add_annotation(AnnotationInput {
            id: "a2".to_string(),
            spans: vec![SpanInput {
                span_id: "s1".to_string(),
                block_id: "missing".to_string(),
                start: 0,
                end: 1,
            }],
            chain: None,
        });
        assert_eq!(result, Err(IntegrityError::UnknownBlock("missing".to_string())));
    }
}
