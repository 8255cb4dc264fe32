use ai_context_hash_rs::compute_document_checksum;
use anchor_relocation_rs::{BlockMapping, DocumentSnapshot, RelocationConfig, RelocationMethod, capture_context_hash};
use policy_manifest_rs::PolicyManifest;
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet, HashMap, HashSet};
use tracing::{debug, info};

use crate::IntegrityError;
use crate::index::BlockIndex;
use crate::model::{Annotation, DisplayState, Span};
use crate::scheduler::{CheckpointPolicy, CheckpointScheduler, CheckpointTicket};
use crate::state::{GraceWindow, SpanStatus, derive_display_state};
use crate::verifier::{
    AnnotationCheck, CheckpointFailure, IntegritySettings, SpanLocation, VerificationContext, mapped_chain_blocks,
    verify_annotation,
};

#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StoreConfig {
    #[serde(default)]
    pub checkpoint: CheckpointPolicy,
    #[serde(default)]
    pub integrity: IntegritySettings,
    #[serde(default)]
    pub relocation: RelocationConfig,
}

impl From<&PolicyManifest> for StoreConfig {
    fn from(manifest: &PolicyManifest) -> Self {
        Self {
            checkpoint: CheckpointPolicy::from(manifest),
            integrity: IntegritySettings::from(manifest),
            relocation: RelocationConfig::from(manifest),
        }
    }
}

/// Result of one verification run.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Checkpoint {
    pub timestamp: u64,
    pub spans_verified: usize,
    pub spans_failed: usize,
    pub chains_verified: usize,
    pub chains_failed: usize,
    pub failures: Vec<CheckpointFailure>,
    pub annotations_checked: usize,
    pub full_scan: bool,
    pub document_checksum: Option<String>,
}

#[derive(Clone, Debug, PartialEq, Eq)]
struct SpanRecord {
    status: SpanStatus,
    observed_hash: Option<String>,
}

/// Per-document integrity context: annotations, their reverse block index,
/// the checkpoint scheduler and the outcome of the last pass.
#[derive(Debug)]
pub struct AnnotationStore {
    config: StoreConfig,
    annotations: BTreeMap<String, Annotation>,
    index: BlockIndex,
    scheduler: CheckpointScheduler,
    ticket: Option<CheckpointTicket>,
    spans: HashMap<(String, String), SpanRecord>,
    block_positions: HashMap<String, usize>,
    last_checkpoint: Option<Checkpoint>,
}

impl AnnotationStore {
    pub fn new(config: StoreConfig, now_ms: u64) -> Self {
        let scheduler = CheckpointScheduler::new(config.checkpoint.clone(), now_ms);
        Self {
            config,
            annotations: BTreeMap::new(),
            index: BlockIndex::new(),
            scheduler,
            ticket: None,
            spans: HashMap::new(),
            block_positions: HashMap::new(),
            last_checkpoint: None,
        }
    }

    pub fn config(&self) -> &StoreConfig {
        &self.config
    }

    pub fn scheduler(&self) -> &CheckpointScheduler {
        &self.scheduler
    }

    /// Starts as `active_unverified`; the next checkpoint decides the rest.
    pub fn insert(&mut self, annotation: Annotation) -> Result<(), IntegrityError> {
        annotation.validate()?;
        if self.annotations.contains_key(&annotation.id) {
            return Err(IntegrityError::DuplicateAnnotation(annotation.id));
        }
        self.index.upsert(&annotation);
        debug!(annotation_id = %annotation.id, spans = annotation.spans.len(), "annotation added");
        self.annotations.insert(annotation.id.clone(), annotation);
        Ok(())
    }

    pub fn get(&self, annotation_id: &str) -> Option<&Annotation> {
        self.annotations.get(annotation_id)
    }

    pub fn len(&self) -> usize {
        self.annotations.len()
    }

    pub fn is_empty(&self) -> bool {
        self.annotations.is_empty()
    }

    pub fn annotations(&self) -> impl Iterator<Item = &Annotation> {
        self.annotations.values()
    }

    pub fn annotations_for_block(&self, block_id: &str) -> Vec<&Annotation> {
        self.index
            .annotations_for_block(block_id)
            .filter_map(|id| self.annotations.get(id))
            .collect()
    }

    pub fn display_state(&self, annotation_id: &str) -> Result<DisplayState, IntegrityError> {
        self.annotations
            .get(annotation_id)
            .map(Annotation::display_state)
            .ok_or_else(|| IntegrityError::UnknownAnnotation(annotation_id.to_string()))
    }

    /// Hash of the span content as last observed, for gateway preconditions.
    pub fn span_context_hash(&self, annotation_id: &str, span_id: &str) -> Option<String> {
        let span = self.annotations.get(annotation_id)?.span(span_id)?;
        let observed = self
            .spans
            .get(&(annotation_id.to_string(), span_id.to_string()))
            .and_then(|record| record.observed_hash.clone());
        Some(observed.unwrap_or_else(|| span.current_hash()))
    }

    pub fn span_status(&self, annotation_id: &str, span_id: &str) -> Option<SpanStatus> {
        self.spans
            .get(&(annotation_id.to_string(), span_id.to_string()))
            .map(|record| record.status)
    }

    pub fn is_span_verified(&self, annotation_id: &str, span_id: &str) -> bool {
        self.span_status(annotation_id, span_id) == Some(SpanStatus::Verified)
    }

    pub fn span_location(&self, annotation_id: &str, span_id: &str) -> Option<SpanLocation> {
        let span = self.annotations.get(annotation_id)?.span(span_id)?;
        Some(SpanLocation {
            block_id: span.block_id.clone(),
            start: span.start,
            end: span.end,
            text: span.text.clone(),
        })
    }

    pub fn last_checkpoint(&self) -> Option<&Checkpoint> {
        self.last_checkpoint.as_ref()
    }

    pub fn record_operations(&mut self, count: u64, now_ms: u64) {
        self.scheduler.record_operations(count, now_ms);
    }

    /// History restore and similar events: run on the next poll.
    pub fn trigger_recovery(&mut self, now_ms: u64) {
        self.scheduler.trigger_high_priority(now_ms);
    }

    pub fn next_deadline(&self) -> Option<u64> {
        self.scheduler.next_deadline()
    }

    /// `true` when a checkpoint is due; the caller answers with
    /// `run_checkpoint`.
    pub fn poll(&mut self, now_ms: u64) -> bool {
        if self.ticket.is_some() {
            return true;
        }
        self.ticket = self.scheduler.poll(now_ms);
        self.ticket.is_some()
    }

    pub fn dispose(&mut self) {
        self.scheduler.dispose();
    }

    /// Verify the annotations touched by `changed` and `mapping`, or every
    /// annotation when `changed` is `None`, then recompute their display
    /// states.
    pub fn run_checkpoint(
        &mut self,
        document: &DocumentSnapshot,
        mapping: Option<&BlockMapping>,
        changed: Option<&HashSet<String>>,
        now_ms: u64,
    ) -> Checkpoint {
        let ticket = self.ticket.take().or_else(|| self.scheduler.begin_now(now_ms));
        let full_scan = changed.is_none();
        let targets = self.targets(mapping, changed);

        let checks: Vec<AnnotationCheck> = {
            let mut ctx = VerificationContext::new(document, &self.config.relocation, &self.config.integrity);
            ctx.mapping = mapping;
            if !self.block_positions.is_empty() {
                ctx.previous_positions = Some(&self.block_positions);
            }
            targets
                .iter()
                .filter_map(|id| self.annotations.get(id))
                .map(|annotation| verify_annotation(annotation, &ctx))
                .collect()
        };

        let mut checkpoint = Checkpoint {
            timestamp: now_ms,
            spans_verified: 0,
            spans_failed: 0,
            chains_verified: 0,
            chains_failed: 0,
            failures: Vec::new(),
            annotations_checked: checks.len(),
            full_scan,
            document_checksum: None,
        };

        for check in checks {
            for span in &check.spans {
                match span.status {
                    SpanStatus::Verified => checkpoint.spans_verified += 1,
                    SpanStatus::Failed | SpanStatus::Unresolved => checkpoint.spans_failed += 1,
                    SpanStatus::Unverified => {}
                }
            }
            match check.chain_intact {
                Some(true) => checkpoint.chains_verified += 1,
                Some(false) => checkpoint.chains_failed += 1,
                None => {}
            }
            self.apply_check(&check, document, mapping, now_ms);
            checkpoint.failures.extend(check.failures);
        }

        if self.config.integrity.document_checksum {
            checkpoint.document_checksum = Some(compute_document_checksum(
                document
                    .blocks()
                    .iter()
                    .map(|block| (block.block_id.as_str(), block.content.as_str())),
            ));
        }
        self.block_positions = document
            .blocks()
            .iter()
            .enumerate()
            .map(|(index, block)| (block.block_id.clone(), index))
            .collect();

        if let Some(ticket) = ticket {
            self.scheduler.complete(ticket, now_ms);
        }
        info!(
            annotations = checkpoint.annotations_checked,
            full_scan,
            spans_verified = checkpoint.spans_verified,
            spans_failed = checkpoint.spans_failed,
            chains_verified = checkpoint.chains_verified,
            chains_failed = checkpoint.chains_failed,
            "checkpoint finished"
        );
        self.last_checkpoint = Some(checkpoint.clone());
        checkpoint
    }

    fn targets(&self, mapping: Option<&BlockMapping>, changed: Option<&HashSet<String>>) -> BTreeSet<String> {
        let Some(changed) = changed else {
            return self.annotations.keys().cloned().collect();
        };
        let mut blocks: HashSet<String> = changed.clone();
        if let Some(mapping) = mapping {
            blocks.extend(mapping.touched_blocks());
        }
        let mut targets = self.index.affected(&blocks);
        // grace windows expire without any edit
        targets.extend(
            self.annotations
                .values()
                .filter(|annotation| annotation.display_state() == DisplayState::BrokenGrace)
                .map(|annotation| annotation.id.clone()),
        );
        targets
    }

    fn apply_check(
        &mut self,
        check: &AnnotationCheck,
        document: &DocumentSnapshot,
        mapping: Option<&BlockMapping>,
        now_ms: u64,
    ) {
        let Some(annotation) = self.annotations.get_mut(&check.annotation_id) else {
            return;
        };

        for span_check in &check.spans {
            self.spans.insert(
                (annotation.id.clone(), span_check.span_id.clone()),
                SpanRecord {
                    status: span_check.status,
                    observed_hash: span_check.observed_hash.clone(),
                },
            );
            let (Some(location), Some(span)) = (
                span_check.location.as_ref(),
                annotation.spans.iter_mut().find(|span| span.span_id == span_check.span_id),
            ) else {
                continue;
            };
            rebase_span(span, location, span_check.status, span_check.method, document);
        }

        if check.chain_intact == Some(true) {
            if let Some(chain) = annotation.chain.as_mut() {
                let mapped = mapped_chain_blocks(chain, mapping);
                if mapped != chain.block_ids {
                    chain.block_ids = mapped;
                    chain.expected_chain_hash = Some(chain.current_hash());
                }
            }
        }

        let derived = derive_display_state(
            &check.statuses(),
            check.chain_intact,
            GraceWindow {
                started_at_ms: annotation.grace_started_at_ms(),
                now_ms,
                grace_ms: self.config.checkpoint.grace_ms(),
            },
        );
        if derived.state != annotation.display_state() {
            debug!(
                annotation_id = %annotation.id,
                from = annotation.display_state().as_str(),
                to = derived.state.as_str(),
                "display state changed"
            );
        }
        annotation.set_derived(derived.state, derived.grace_started_at_ms);
        self.index.upsert(annotation);
    }
}

/// Move a span to where this pass found it. Failed spans only follow the
/// mapped offsets and keep their recorded text and hash, so restoring the
/// content verifies again.
fn rebase_span(
    span: &mut Span,
    location: &SpanLocation,
    status: SpanStatus,
    method: RelocationMethod,
    document: &DocumentSnapshot,
) {
    if status == SpanStatus::Failed && method != RelocationMethod::Integrity {
        return;
    }
    span.block_id = location.block_id.clone();
    span.start = location.start;
    span.end = location.end;
    if status == SpanStatus::Failed {
        // keep the recorded text, re-keyed to the block it now lives in
        if span.expected_context_hash.is_some() {
            span.expected_context_hash = Some(span.current_hash());
        }
        return;
    }

    span.text = location.text.clone();
    span.expected_context_hash = Some(span.current_hash());
    if let Some(content) = document.block_text(&location.block_id) {
        span.context_fingerprint = Some(capture_context_hash(content, location.start, location.end));
    }
}
