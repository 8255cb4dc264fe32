use ai_context_hash_rs::ChainPolicyKind;
use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;
use std::fmt::Display;
use tracing::{debug, info};

use crate::hash::compute_policy_hash;
use crate::manifest::{PolicyManifest, validate_manifest};
use crate::NegotiationError;

/// One reduction applied to a participant's declared value.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DegradationStep {
    pub field: String,
    pub reason: String,
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct NegotiatedPolicy {
    pub manifest: PolicyManifest,
    pub policy_hash: String,
    pub degradations: Vec<DegradationStep>,
}

impl NegotiatedPolicy {
    pub fn is_degraded(&self) -> bool {
        !self.degradations.is_empty()
    }
}

type Flag = fn(&PolicyManifest) -> bool;

fn context_hash(m: &PolicyManifest) -> bool {
    m.integrity_policy.context_hash
}

fn chain_hash(m: &PolicyManifest) -> bool {
    m.integrity_policy.chain_hash
}

fn document_checksum(m: &PolicyManifest) -> bool {
    m.integrity_policy.document_checksum
}

fn checkpoint_enabled(m: &PolicyManifest) -> bool {
    m.integrity_policy.checkpoint.enabled
}

fn ai_gateway(m: &PolicyManifest) -> bool {
    m.capabilities.ai_gateway
}

fn ai_replace_spans(m: &PolicyManifest) -> bool {
    m.capabilities.ai_replace_spans
}

const INTEGRITY_FIELDS: [(&str, Flag); 4] = [
    ("integrityPolicy.contextHash", context_hash),
    ("integrityPolicy.chainHash", chain_hash),
    ("integrityPolicy.documentChecksum", document_checksum),
    ("integrityPolicy.checkpoint.enabled", checkpoint_enabled),
];

const AI_FIELDS: [(&str, Flag); 2] = [
    ("capabilities.aiGateway", ai_gateway),
    ("capabilities.aiReplaceSpans", ai_replace_spans),
];

/// Most restrictive feature set every participant supports.
///
/// Version, coordinate space, anchor encoding version and structure mode must
/// agree exactly; everything else is reduced and the reduction recorded.
pub fn negotiate(manifests: &[PolicyManifest]) -> Result<NegotiatedPolicy, NegotiationError> {
    let Some(first) = manifests.first() else {
        return Err(NegotiationError::NoParticipants);
    };

    let mut hashes = Vec::with_capacity(manifests.len());
    for (index, manifest) in manifests.iter().enumerate() {
        let hash = validate_manifest(manifest)
            .and_then(|_| compute_policy_hash(manifest))
            .map_err(|source| NegotiationError::InvalidManifest { index, source })?;
        hashes.push(hash);
    }

    if hashes.iter().all(|hash| *hash == hashes[0]) {
        debug!(participants = manifests.len(), "policy manifests identical");
        return Ok(NegotiatedPolicy {
            manifest: first.clone(),
            policy_hash: hashes[0].clone(),
            degradations: Vec::new(),
        });
    }

    require_same(manifests, "lfccVersion", |m| m.lfcc_version.clone())?;
    require_same(manifests, "coords", |m| m.coords.clone())?;
    require_same(manifests, "anchorEncoding.version", |m| m.anchor_encoding.version.clone())?;
    require_same(manifests, "structureMode", |m| m.structure_mode.clone())?;

    let mut reducer = Reducer::new(manifests);
    let mut out = first.clone();

    if manifests
        .iter()
        .any(|m| m.anchor_encoding.format != first.anchor_encoding.format)
    {
        out.anchor_encoding.format = "base64url".to_string();
        reducer.record(
            "anchorEncoding.format",
            "formats differ, using the base64url transport form".to_string(),
        );
    }

    out.integrity_policy.context_hash = reducer.all("integrityPolicy.contextHash", context_hash);
    out.integrity_policy.chain_hash = reducer.all("integrityPolicy.chainHash", chain_hash);
    out.integrity_policy.document_checksum =
        reducer.all("integrityPolicy.documentChecksum", document_checksum);
    out.integrity_policy.checkpoint.enabled =
        reducer.all("integrityPolicy.checkpoint.enabled", checkpoint_enabled);
    out.integrity_policy.checkpoint.every_ops =
        reducer.min("integrityPolicy.checkpoint.everyOps", |m| m.integrity_policy.checkpoint.every_ops);
    out.integrity_policy.checkpoint.every_ms =
        reducer.min("integrityPolicy.checkpoint.everyMs", |m| m.integrity_policy.checkpoint.every_ms);

    out.relocation_policy.enable_level2 =
        reducer.all("relocationPolicy.enableLevel2", |m| m.relocation_policy.enable_level2);
    out.relocation_policy.enable_level3 =
        reducer.all("relocationPolicy.enableLevel3", |m| m.relocation_policy.enable_level3);
    out.relocation_policy.level3_max_block_radius = reducer.min(
        "relocationPolicy.level3MaxBlockRadius",
        |m| m.relocation_policy.level3_max_block_radius,
    );
    out.relocation_policy.fuzzy_threshold = reducer.max_threshold();

    out.ai_sanitization_policy.allowed_block_types = reducer.intersect(
        "aiSanitizationPolicy.allowedBlockTypes",
        |m| &m.ai_sanitization_policy.allowed_block_types,
    );
    out.ai_sanitization_policy.allowed_marks =
        reducer.intersect("aiSanitizationPolicy.allowedMarks", |m| &m.ai_sanitization_policy.allowed_marks);
    out.ai_sanitization_policy.max_payload_bytes = reducer.min(
        "aiSanitizationPolicy.maxPayloadBytes",
        |m| m.ai_sanitization_policy.max_payload_bytes,
    );
    out.ai_sanitization_policy.reject_unknown_structure = reducer.any(
        "aiSanitizationPolicy.rejectUnknownStructure",
        |m| m.ai_sanitization_policy.reject_unknown_structure,
    );

    out.capabilities.cross_block_annotations =
        reducer.all("capabilities.crossBlockAnnotations", |m| m.capabilities.cross_block_annotations);
    out.capabilities.bounded_gap = reducer.all("capabilities.boundedGap", |m| m.capabilities.bounded_gap);
    out.capabilities.ai_replace_spans = reducer.all("capabilities.aiReplaceSpans", ai_replace_spans);
    out.capabilities.ai_gateway = reducer.all("capabilities.aiGateway", ai_gateway);
    out.capabilities.tables = reducer.all("capabilities.tables", |m| m.capabilities.tables);
    out.capabilities.reorder_blocks = reducer.all("capabilities.reorderBlocks", |m| m.capabilities.reorder_blocks);

    out.chain_policy.kind = reducer.strictest_chain_kind();
    out.chain_policy.max_intervening_blocks =
        reducer.min("chainPolicy.maxInterveningBlocks", |m| m.chain_policy.max_intervening_blocks);
    if out.chain_policy.kind == ChainPolicyKind::BoundedGap && !out.capabilities.bounded_gap {
        out.chain_policy.kind = ChainPolicyKind::RequiredOrder;
        reducer.record(
            "chainPolicy.kind",
            "bounded_gap capability disabled, using required_order".to_string(),
        );
    }

    out.degradation_tolerance.allow_integrity_downgrade = reducer.all(
        "degradationTolerance.allowIntegrityDowngrade",
        |m| m.degradation_tolerance.allow_integrity_downgrade,
    );
    out.degradation_tolerance.allow_ai_downgrade = reducer.all(
        "degradationTolerance.allowAiDowngrade",
        |m| m.degradation_tolerance.allow_ai_downgrade,
    );

    refuse_downgrades(manifests, &out, &INTEGRITY_FIELDS, |m| {
        m.degradation_tolerance.allow_integrity_downgrade
    })?;
    refuse_downgrades(manifests, &out, &AI_FIELDS, |m| m.degradation_tolerance.allow_ai_downgrade)?;

    let policy_hash = compute_policy_hash(&out)
        .map_err(|source| NegotiationError::InvalidManifest { index: 0, source })?;
    let degradations = reducer.finish();
    for step in &degradations {
        info!(field = %step.field, reason = %step.reason, "policy degraded");
    }

    Ok(NegotiatedPolicy {
        manifest: out,
        policy_hash,
        degradations,
    })
}

fn require_same(
    manifests: &[PolicyManifest],
    field: &'static str,
    get: impl Fn(&PolicyManifest) -> String,
) -> Result<(), NegotiationError> {
    let values: Vec<String> = manifests.iter().map(get).collect();
    if values.iter().all(|value| *value == values[0]) {
        return Ok(());
    }
    Err(NegotiationError::Incompatible { field, values })
}

fn refuse_downgrades(
    manifests: &[PolicyManifest],
    negotiated: &PolicyManifest,
    fields: &[(&str, Flag)],
    tolerates: Flag,
) -> Result<(), NegotiationError> {
    for (field, get) in fields {
        if get(negotiated) {
            continue;
        }
        let refusing = manifests
            .iter()
            .position(|manifest| get(manifest) && !tolerates(manifest));
        if let Some(participant) = refusing {
            return Err(NegotiationError::DowngradeRefused {
                field: field.to_string(),
                participant,
            });
        }
    }
    Ok(())
}

struct Reducer<'a> {
    manifests: &'a [PolicyManifest],
    steps: Vec<DegradationStep>,
}

impl<'a> Reducer<'a> {
    fn new(manifests: &'a [PolicyManifest]) -> Self {
        Self {
            manifests,
            steps: Vec::new(),
        }
    }

    fn record(&mut self, field: &str, reason: String) {
        self.steps.push(DegradationStep {
            field: field.to_string(),
            reason,
        });
    }

    fn finish(self) -> Vec<DegradationStep> {
        self.steps
    }

    fn participants_where(&self, predicate: impl Fn(&PolicyManifest) -> bool) -> String {
        self.manifests
            .iter()
            .enumerate()
            .filter(|(_, manifest)| predicate(manifest))
            .map(|(index, _)| index.to_string())
            .collect::<Vec<_>>()
            .join(", ")
    }

    fn all(&mut self, field: &str, get: Flag) -> bool {
        let result = self.manifests.iter().all(get);
        if !result && self.manifests.iter().any(get) {
            let missing = self.participants_where(|m| !get(m));
            self.record(field, format!("disabled, unsupported by participant(s) {missing}"));
        }
        result
    }

    fn any(&mut self, field: &str, get: Flag) -> bool {
        let result = self.manifests.iter().any(get);
        if result && !self.manifests.iter().all(get) {
            let requiring = self.participants_where(get);
            self.record(field, format!("enabled, required by participant(s) {requiring}"));
        }
        result
    }

    fn min<T>(&mut self, field: &str, get: impl Fn(&PolicyManifest) -> T) -> T
    where
        T: Ord + Copy + Display,
    {
        let values: Vec<T> = self.manifests.iter().map(&get).collect();
        let lowest = values.iter().copied().min().unwrap_or(values[0]);
        if values.iter().any(|value| *value != lowest) {
            self.record(field, format!("lowered to {lowest}, the smallest declared value"));
        }
        lowest
    }

    fn max_threshold(&mut self) -> f64 {
        let values: Vec<f64> = self
            .manifests
            .iter()
            .map(|m| m.relocation_policy.fuzzy_threshold)
            .collect();
        let highest = values.iter().copied().fold(values[0], f64::max);
        if values.iter().any(|value| *value != highest) {
            self.record(
                "relocationPolicy.fuzzyThreshold",
                format!("raised to {highest}, the strictest declared value"),
            );
        }
        highest
    }

    fn intersect(
        &mut self,
        field: &str,
        get: impl Fn(&PolicyManifest) -> &BTreeSet<String>,
    ) -> BTreeSet<String> {
        let mut shared = get(&self.manifests[0]).clone();
        for manifest in &self.manifests[1..] {
            let other = get(manifest);
            shared.retain(|value| other.contains(value));
        }

        let dropped: BTreeSet<&String> = self
            .manifests
            .iter()
            .flat_map(|manifest| get(manifest).iter())
            .filter(|value| !shared.contains(*value))
            .collect();
        if !dropped.is_empty() {
            let names: Vec<&str> = dropped.iter().map(|value| value.as_str()).collect();
            self.record(field, format!("removed {} not shared by all participants", names.join(", ")));
        }
        shared
    }

    fn strictest_chain_kind(&mut self) -> ChainPolicyKind {
        let kinds: Vec<ChainPolicyKind> = self.manifests.iter().map(|m| m.chain_policy.kind).collect();
        let strictest = kinds
            .iter()
            .copied()
            .max_by_key(|kind| kind.strictness())
            .unwrap_or(kinds[0]);
        if kinds.iter().any(|kind| *kind != strictest) {
            self.record("chainPolicy.kind", format!("tightened to {strictest}"));
        }
        strictest
    }
}
