use ai_context_hash_rs::{ChainHashInput, ChainPolicyKind, compute_chain_hash, context_hash};
use anchor_codec_rs::{Anchor, Bias};
use anchor_relocation_rs::{
    BlockMapping, DocumentSnapshot, RelocationConfig, RelocationMethod, RelocationRequest,
    resolve_anchor, utf16_len, utf16_slice,
};
use policy_manifest_rs::PolicyManifest;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;

use crate::model::{Annotation, Chain, Span};
use crate::state::SpanStatus;

/// Which integrity checks the negotiated policy enables.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct IntegritySettings {
    pub context_hash: bool,
    pub chain_hash: bool,
    pub document_checksum: bool,
}

impl Default for IntegritySettings {
    fn default() -> Self {
        Self {
            context_hash: true,
            chain_hash: true,
            document_checksum: false,
        }
    }
}

impl From<&PolicyManifest> for IntegritySettings {
    fn from(manifest: &PolicyManifest) -> Self {
        let policy = &manifest.integrity_policy;
        Self {
            context_hash: policy.context_hash,
            chain_hash: policy.chain_hash,
            document_checksum: policy.document_checksum,
        }
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FailureKind {
    BlockMissing,
    RangeOutOfBounds,
    SpanSplit,
    ContextHashMismatch,
    ChainBlockMissing,
    ChainOrderViolation,
    ChainGapExceeded,
    ChainHashMismatch,
}

/// Recorded, never thrown.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CheckpointFailure {
    #[serde(rename = "annoId")]
    pub annotation_id: String,
    pub span_id: Option<String>,
    pub kind: FailureKind,
    pub detail: String,
}

/// Where a span lives after this pass.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SpanLocation {
    pub block_id: String,
    pub start: u32,
    pub end: u32,
    pub text: String,
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SpanCheck {
    pub span_id: String,
    pub status: SpanStatus,
    pub method: RelocationMethod,
    pub confidence: f64,
    pub location: Option<SpanLocation>,
    pub observed_hash: Option<String>,
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AnnotationCheck {
    pub annotation_id: String,
    pub spans: Vec<SpanCheck>,
    pub chain_intact: Option<bool>,
    pub failures: Vec<CheckpointFailure>,
}

impl AnnotationCheck {
    pub fn statuses(&self) -> Vec<SpanStatus> {
        self.spans.iter().map(|check| check.status).collect()
    }
}

/// Inputs of one verification pass. Borrowed, never mutated.
#[derive(Clone, Copy, Debug)]
pub struct VerificationContext<'a> {
    pub document: &'a DocumentSnapshot,
    pub mapping: Option<&'a BlockMapping>,
    /// Block positions from the previous pass, to bound the fuzzy search.
    pub previous_positions: Option<&'a HashMap<String, usize>>,
    pub relocation: &'a RelocationConfig,
    pub settings: &'a IntegritySettings,
}

impl<'a> VerificationContext<'a> {
    pub fn new(document: &'a DocumentSnapshot, relocation: &'a RelocationConfig, settings: &'a IntegritySettings) -> Self {
        Self {
            document,
            mapping: None,
            previous_positions: None,
            relocation,
            settings,
        }
    }

    pub fn with_mapping(mut self, mapping: &'a BlockMapping) -> Self {
        self.mapping = Some(mapping);
        self
    }
}

pub fn verify_annotation(annotation: &Annotation, ctx: &VerificationContext<'_>) -> AnnotationCheck {
    let mut failures = Vec::new();
    let spans = annotation
        .spans
        .iter()
        .map(|span| verify_span(span, ctx, &mut failures))
        .collect();
    let chain_intact = annotation
        .chain
        .as_ref()
        .map(|chain| verify_chain(&annotation.id, chain, ctx, &mut failures));

    AnnotationCheck {
        annotation_id: annotation.id.clone(),
        spans,
        chain_intact,
        failures,
    }
}

enum Located {
    At {
        block_id: String,
        start: u32,
        end: u32,
        method: RelocationMethod,
        confidence: f64,
    },
    Split {
        start_block: String,
        end_block: String,
    },
    Lost {
        candidates: usize,
    },
}

fn locate(span: &Span, ctx: &VerificationContext<'_>) -> Located {
    let start_anchor = Anchor::new(span.block_id.clone(), span.start, Bias::After);
    let end_anchor = Anchor::new(span.block_id.clone(), span.end, Bias::Before);

    let mapped = match ctx.mapping {
        Some(mapping) => mapping.map_anchor(&start_anchor).zip(mapping.map_anchor(&end_anchor)),
        None => Some((start_anchor.clone(), end_anchor)),
    };
    if let Some((start, end)) = mapped {
        if ctx.document.contains(&start.block_id) {
            if start.block_id != end.block_id {
                return Located::Split {
                    start_block: start.block_id,
                    end_block: end.block_id,
                };
            }
            return Located::At {
                block_id: start.block_id,
                start: start.offset,
                end: end.offset.max(start.offset),
                method: RelocationMethod::Integrity,
                confidence: 1.0,
            };
        }
    }

    let mut request = RelocationRequest::new(&start_anchor, &span.text);
    if let Some(index) = ctx
        .previous_positions
        .and_then(|positions| positions.get(&span.block_id))
    {
        request = request.near(*index);
    }
    if let Some(fingerprint) = span.context_fingerprint.as_deref() {
        request = request.context_hash(fingerprint);
    }

    let result = resolve_anchor(&request, ctx.mapping, ctx.document, ctx.relocation);
    let Some(anchor) = result.anchor else {
        return Located::Lost {
            candidates: result.debug.candidates_considered,
        };
    };
    let block_len = ctx.document.block_len(&anchor.block_id).unwrap_or(0);
    let end = anchor
        .offset
        .saturating_add(utf16_len(&span.text) as u32)
        .min(block_len);
    Located::At {
        block_id: anchor.block_id,
        start: anchor.offset,
        end,
        method: result.method,
        confidence: result.confidence,
    }
}

fn verify_span(span: &Span, ctx: &VerificationContext<'_>, failures: &mut Vec<CheckpointFailure>) -> SpanCheck {
    let mut fail = |kind: FailureKind, detail: String| {
        failures.push(CheckpointFailure {
            annotation_id: span.annotation_id.clone(),
            span_id: Some(span.span_id.clone()),
            kind,
            detail,
        });
    };

    let (block_id, start, end, method, confidence) = match locate(span, ctx) {
        Located::At {
            block_id,
            start,
            end,
            method,
            confidence,
        } => (block_id, start, end, method, confidence),
        Located::Split {
            start_block,
            end_block,
        } => {
            fail(
                FailureKind::SpanSplit,
                format!("span now starts in {start_block} and ends in {end_block}"),
            );
            return SpanCheck::failed(span, RelocationMethod::Integrity, SpanStatus::Failed);
        }
        Located::Lost { candidates } => {
            fail(
                FailureKind::BlockMissing,
                format!(
                    "block {} is gone and no candidate among {candidates} matched",
                    span.block_id
                ),
            );
            return SpanCheck::failed(span, RelocationMethod::Failed, SpanStatus::Unresolved);
        }
    };

    let content = ctx.document.block_text(&block_id).unwrap_or_default();
    let Some(text) = utf16_slice(content, start, end) else {
        fail(
            FailureKind::RangeOutOfBounds,
            format!("[{start}, {end}) is outside block {block_id}"),
        );
        return SpanCheck::failed(span, method, SpanStatus::Failed);
    };

    let observed = context_hash(&span.span_id, &block_id, &text);
    let status = if !ctx.settings.context_hash {
        SpanStatus::Verified
    } else {
        match (method, span.expected_context_hash.as_deref()) {
            (RelocationMethod::Integrity | RelocationMethod::ContextHash, Some(expected)) => {
                // compared under the recorded block id so joins and successor moves still match
                if context_hash(&span.span_id, &span.block_id, &text) == expected {
                    SpanStatus::Verified
                } else {
                    fail(
                        FailureKind::ContextHashMismatch,
                        format!("content of {block_id} [{start}, {end}) changed"),
                    );
                    SpanStatus::Failed
                }
            }
            _ => SpanStatus::Unverified,
        }
    };

    SpanCheck {
        span_id: span.span_id.clone(),
        status,
        method,
        confidence,
        location: Some(SpanLocation {
            block_id,
            start,
            end,
            text,
        }),
        observed_hash: Some(observed),
    }
}

impl SpanCheck {
    fn failed(span: &Span, method: RelocationMethod, status: SpanStatus) -> Self {
        Self {
            span_id: span.span_id.clone(),
            status,
            method,
            confidence: 0.0,
            location: None,
            observed_hash: None,
        }
    }
}

/// Block ids the chain refers to after `mapping` is applied.
pub fn mapped_chain_blocks(chain: &Chain, mapping: Option<&BlockMapping>) -> Vec<String> {
    chain
        .block_ids
        .iter()
        .map(|block_id| {
            mapping
                .and_then(|mapping| mapping.map_old_to_new(block_id, 0))
                .map(|mapped| mapped.new_block_id)
                .unwrap_or_else(|| block_id.clone())
        })
        .collect()
}

fn verify_chain(
    annotation_id: &str,
    chain: &Chain,
    ctx: &VerificationContext<'_>,
    failures: &mut Vec<CheckpointFailure>,
) -> bool {
    let before = failures.len();
    let mut fail = |kind: FailureKind, detail: String| {
        failures.push(CheckpointFailure {
            annotation_id: annotation_id.to_string(),
            span_id: None,
            kind,
            detail,
        });
    };

    let block_ids = mapped_chain_blocks(chain, ctx.mapping);
    let mut positions = Vec::with_capacity(block_ids.len());
    for block_id in &block_ids {
        match ctx.document.position(block_id) {
            Some(position) => positions.push((block_id, position)),
            None => fail(FailureKind::ChainBlockMissing, format!("chain block {block_id} is gone")),
        }
    }

    for pair in positions.windows(2) {
        let ((left, left_pos), (right, right_pos)) = (pair[0], pair[1]);
        if right_pos <= left_pos {
            fail(
                FailureKind::ChainOrderViolation,
                format!("{right} no longer follows {left}"),
            );
            continue;
        }
        let gap = right_pos - left_pos - 1;
        let allowed = match chain.policy_kind {
            ChainPolicyKind::StrictAdjacency => 0,
            ChainPolicyKind::BoundedGap => chain.max_intervening_blocks as usize,
            ChainPolicyKind::RequiredOrder => usize::MAX,
        };
        if gap > allowed {
            fail(
                FailureKind::ChainGapExceeded,
                format!("{gap} blocks between {left} and {right}, {allowed} allowed"),
            );
        }
    }

    if ctx.settings.chain_hash {
        if let Some(expected) = chain.expected_chain_hash.as_deref() {
            let observed = compute_chain_hash(&ChainHashInput {
                policy_kind: chain.policy_kind,
                max_intervening_blocks: chain.max_intervening_blocks,
                block_ids: block_ids.clone(),
            });
            if observed != expected {
                fail(
                    FailureKind::ChainHashMismatch,
                    "chain blocks or policy differ from the recorded chain".to_string(),
                );
            }
        }
    }

    failures.len() == before
}

#[cfg(test)]
mod tests {
    use super::*;
    use anchor_relocation_rs::StructuralDelta;

    fn document() -> DocumentSnapshot {
        DocumentSnapshot::from_pairs([
            ("b1", "The quick brown fox"),
            ("b2", "jumps over the lazy dog"),
            ("b3", "and runs away"),
        ])
    }

    fn annotation(document: &DocumentSnapshot, block_id: &str, start: u32, end: u32) -> Annotation {
        let span = Span::capture(document, "a1", "s1", block_id, start, end).expect("capture");
        Annotation::new("a1", vec![span], None)
    }

    fn check(annotation: &Annotation, document: &DocumentSnapshot, mapping: Option<&BlockMapping>) -> AnnotationCheck {
        let relocation = RelocationConfig::default();
        let settings = IntegritySettings::default();
        let mut ctx = VerificationContext::new(document, &relocation, &settings);
        ctx.mapping = mapping;
        verify_annotation(annotation, &ctx)
    }

    #[test]
    fn untouched_span_verifies() {
        let doc = document();
        let result = check(&annotation(&doc, "b1", 4, 9), &doc, None);
        assert_eq!(result.statuses(), vec![SpanStatus::Verified]);
        assert!(result.failures.is_empty());
    }

    #[test]
    fn edited_span_text_is_a_hash_mismatch() {
        let doc = document();
        let target = annotation(&doc, "b1", 4, 9);
        let edited = DocumentSnapshot::from_pairs([("b1", "The quack brown fox")]);
        let result = check(&target, &edited, None);
        assert_eq!(result.statuses(), vec![SpanStatus::Failed]);
        assert_eq!(result.failures[0].kind, FailureKind::ContextHashMismatch);
        assert_eq!(result.failures[0].span_id.as_deref(), Some("s1"));
    }

    #[test]
    fn mapped_insert_before_span_keeps_it_verified() {
        let doc = document();
        let target = annotation(&doc, "b1", 4, 9);
        let edited = DocumentSnapshot::from_pairs([("b1", "So, The quick brown fox")]);
        let mapping = BlockMapping::new(vec![StructuralDelta::InsertText {
            block_id: "b1".to_string(),
            offset: 0,
            len: 4,
        }]);
        let result = check(&target, &edited, Some(&mapping));
        assert_eq!(result.statuses(), vec![SpanStatus::Verified]);
        let location = result.spans[0].location.as_ref().expect("location");
        assert_eq!((location.start, location.end), (8, 13));
        assert_eq!(location.text, "quick");
    }

    #[test]
    fn split_through_span_fails() {
        let doc = document();
        let target = annotation(&doc, "b1", 4, 15);
        let edited = DocumentSnapshot::from_pairs([("b1", "The quick"), ("b1b", " brown fox")]);
        let mapping = BlockMapping::new(vec![StructuralDelta::SplitBlock {
            block_id: "b1".to_string(),
            at: 9,
            new_block_id: "b1b".to_string(),
        }]);
        let result = check(&target, &edited, Some(&mapping));
        assert_eq!(result.failures[0].kind, FailureKind::SpanSplit);
    }

    #[test]
    fn span_moved_into_successor_is_reverified() {
        let doc = document();
        let target = annotation(&doc, "b2", 6, 10);
        let edited = DocumentSnapshot::from_pairs([("b1", "The quick brown fox"), ("n1", "jumps over the lazy dog")]);
        let mapping = BlockMapping::new(vec![StructuralDelta::ReplaceBlock {
            block_id: "b2".to_string(),
            replacement_ids: vec!["n1".to_string()],
        }]);
        let result = check(&target, &edited, Some(&mapping));
        assert_eq!(result.spans[0].method, RelocationMethod::ContextHash);
        assert_eq!(result.statuses(), vec![SpanStatus::Verified]);
    }

    #[test]
    fn deleted_block_without_match_is_unresolved() {
        let doc = document();
        let target = annotation(&doc, "b2", 6, 10);
        let edited = DocumentSnapshot::from_pairs([("b1", "0000 1111 2222")]);
        let result = check(&target, &edited, None);
        assert_eq!(result.statuses(), vec![SpanStatus::Unresolved]);
        assert_eq!(result.failures[0].kind, FailureKind::BlockMissing);
    }

    #[test]
    fn chain_policies_are_enforced() {
        let doc = document();
        let span = Span::capture(&doc, "a1", "s1", "b1", 0, 3).expect("capture");
        let ids = vec!["b1".to_string(), "b3".to_string()];

        let strict = Annotation::new(
            "a1",
            vec![span.clone()],
            Some(Chain::new(ids.clone(), ChainPolicyKind::StrictAdjacency, 0)),
        );
        let result = check(&strict, &doc, None);
        assert_eq!(result.chain_intact, Some(false));
        assert_eq!(result.failures[0].kind, FailureKind::ChainGapExceeded);

        let bounded = Annotation::new(
            "a1",
            vec![span.clone()],
            Some(Chain::new(ids.clone(), ChainPolicyKind::BoundedGap, 1)),
        );
        assert_eq!(check(&bounded, &doc, None).chain_intact, Some(true));

        let reversed = Annotation::new(
            "a1",
            vec![span],
            Some(Chain::new(
                vec!["b3".to_string(), "b1".to_string()],
                ChainPolicyKind::RequiredOrder,
                0,
            )),
        );
        let result = check(&reversed, &doc, None);
        assert_eq!(result.failures[0].kind, FailureKind::ChainOrderViolation);
    }

    #[test]
    fn tampered_chain_hash_is_reported() {
        let doc = document();
        let span = Span::capture(&doc, "a1", "s1", "b1", 0, 3).expect("capture");
        let mut chain = Chain::new(
            vec!["b1".to_string(), "b2".to_string()],
            ChainPolicyKind::RequiredOrder,
            0,
        );
        chain.max_intervening_blocks = 5;
        let result = check(&Annotation::new("a1", vec![span], Some(chain)), &doc, None);
        assert_eq!(result.failures[0].kind, FailureKind::ChainHashMismatch);
    }

    #[test]
    fn failures_serialize_with_anno_id() {
        let failure = CheckpointFailure {
            annotation_id: "a1".to_string(),
            span_id: None,
            kind: FailureKind::ChainGapExceeded,
            detail: "gap".to_string(),
        };
        let json = serde_json::to_value(&failure).expect("serialize");
        assert_eq!(json["annoId"], "a1");
        assert_eq!(json["kind"], "chain_gap_exceeded");
    }
}
