use ai_context_hash_rs::sha256_hex;
use serde_json::Value;
use std::collections::{HashMap, HashSet};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use tracing::{debug, info, warn};

use crate::canonical::{CanonFragment, canonicalize_html};
use crate::config::GatewayConfig;
use crate::rate_limit::RateLimiter;
use crate::sanitize::{MarkdownBridge, detect_malicious, sanitize_html, text_to_html};
use crate::types::{
    AiRequestEnvelope, ApplyOperation, ApplyPlan, ConflictReason, Diagnostic, FailedPrecondition,
    GatewayAuditEvent, GatewayRateLimited, GatewayResult, GatewaySuccess, PayloadFormat, RejectionCode,
    SpanRange,
};
use crate::GatewayConfigError;

/// Read access to the live document a gateway request targets.
pub trait DocumentProvider {
    /// Current frontier tag, `None` when the document is unknown.
    fn frontier_tag(&self, doc_id: &str) -> Option<String>;

    /// Last verified context hash of a span, `None` when the span is unknown.
    fn span_context_hash(&self, doc_id: &str, annotation_id: &str, span_id: &str) -> Option<String>;

    fn is_span_verified(&self, doc_id: &str, annotation_id: &str, span_id: &str) -> bool;

    fn span_range(&self, doc_id: &str, annotation_id: &str, span_id: &str) -> Option<SpanRange>;
}

pub struct AiGateway {
    config: GatewayConfig,
    markdown: Option<Arc<dyn MarkdownBridge>>,
    state: Arc<Mutex<GatewayState>>,
}

#[derive(Default)]
struct GatewayState {
    results: HashMap<String, Arc<GatewayResult>>,
    limiter: RateLimiter,
    audit_events: Vec<GatewayAuditEvent>,
    next_sequence: u64,
}

struct Outcome {
    result: GatewayResult,
    cacheable: bool,
}

impl Outcome {
    fn cached(result: GatewayResult) -> Self {
        Self {
            result,
            cacheable: true,
        }
    }

    fn transient(result: GatewayResult) -> Self {
        Self {
            result,
            cacheable: false,
        }
    }
}

impl AiGateway {
    pub fn new(config: GatewayConfig) -> Result<Self, GatewayConfigError> {
        config.validate()?;
        Ok(Self {
            config,
            markdown: None,
            state: Arc::new(Mutex::new(GatewayState::default())),
        })
    }

    pub fn with_markdown_bridge(mut self, bridge: Arc<dyn MarkdownBridge>) -> Self {
        self.markdown = Some(bridge);
        self
    }

    pub fn config(&self) -> &GatewayConfig {
        &self.config
    }

    fn lock(&self) -> MutexGuard<'_, GatewayState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Entry point for untyped envelopes. A body that does not deserialize
    /// is rejected as `INVALID_REQUEST` and never cached.
    pub fn process_value(&self, provider: &dyn DocumentProvider, value: Value, now_ms: u64) -> Arc<GatewayResult> {
        let request_id = value
            .get("requestId")
            .and_then(Value::as_str)
            .map(str::to_string);
        let doc_id = value.get("docId").and_then(Value::as_str).map(str::to_string);
        match serde_json::from_value::<AiRequestEnvelope>(value) {
            Ok(envelope) => self.process_request(provider, &envelope, now_ms),
            Err(error) => {
                let result = GatewayResult::rejected(
                    request_id.clone(),
                    RejectionCode::InvalidRequest,
                    format!("malformed envelope: {error}"),
                );
                warn!(request_id = ?request_id, reason = "INVALID_REQUEST", "gateway request rejected");
                self.record_audit(request_id, doc_id, &result, None, now_ms);
                Arc::new(result)
            }
        }
    }

    /// Runs one request through validation, safety checks, idempotency,
    /// rate limiting, the frontier gate, span preconditions and payload
    /// canonicalization, in that order.
    pub fn process_request(
        &self,
        provider: &dyn DocumentProvider,
        envelope: &AiRequestEnvelope,
        now_ms: u64,
    ) -> Arc<GatewayResult> {
        if let Err(message) = validate_envelope(envelope) {
            return self.finish(envelope, Outcome::transient(invalid(envelope, message)), now_ms);
        }
        if let Some(outcome) = self.check_payload_safety(envelope) {
            return self.finish(envelope, outcome, now_ms);
        }

        let replay = self.lock().results.get(&envelope.request_id).cloned();
        if let Some(result) = replay {
            debug!(request_id = %envelope.request_id, status = result.status(), "replaying cached gateway result");
            return result;
        }

        if let Some(rate_limit) = &self.config.rate_limit {
            let allowed = self.lock().limiter.allow(&envelope.doc_id, rate_limit, now_ms);
            if let Err(retry_after_ms) = allowed {
                let result = GatewayResult::RateLimited(GatewayRateLimited {
                    status: 429,
                    request_id: envelope.request_id.clone(),
                    retry_after_ms,
                });
                return self.finish(envelope, Outcome::transient(result), now_ms);
            }
        }

        let outcome = Outcome::cached(self.evaluate(provider, envelope));
        self.finish(envelope, outcome, now_ms)
    }

    fn check_payload_safety(&self, envelope: &AiRequestEnvelope) -> Option<Outcome> {
        let payload = envelope.payload.as_deref()?;
        let size = payload.len() as u64;
        let limit = self.config.max_payload_bytes();
        if size > limit {
            let result = GatewayResult::rejected(
                Some(envelope.request_id.clone()),
                RejectionCode::PayloadTooLarge,
                format!("payload is {size} bytes, limit is {limit}"),
            );
            return Some(Outcome::transient(result));
        }
        // text payloads are escaped before parsing, markup in them is inert
        if envelope.format == PayloadFormat::Text {
            return None;
        }
        let detail = detect_malicious(payload)?;
        let result = GatewayResult::rejected(Some(envelope.request_id.clone()), RejectionCode::MaliciousPayload, detail);
        Some(Outcome::transient(result))
    }

    fn evaluate(&self, provider: &dyn DocumentProvider, envelope: &AiRequestEnvelope) -> GatewayResult {
        let request_id = envelope.request_id.as_str();
        let doc_id = envelope.doc_id.as_str();

        let frontier = match provider.frontier_tag(doc_id) {
            Some(tag) if tag == envelope.doc_frontier_tag => tag,
            current => return GatewayResult::conflict(request_id, ConflictReason::FrontierMismatch, current),
        };

        let mismatched: Vec<FailedPrecondition> = envelope
            .target_spans
            .iter()
            .filter_map(|target| {
                let actual = provider.span_context_hash(doc_id, &target.annotation_id, &target.span_id);
                if actual.as_deref() == Some(target.if_match_context_hash.as_str()) {
                    return None;
                }
                Some(FailedPrecondition {
                    annotation_id: target.annotation_id.clone(),
                    span_id: target.span_id.clone(),
                    expected: target.if_match_context_hash.clone(),
                    actual,
                })
            })
            .collect();
        if !mismatched.is_empty() {
            return with_preconditions(
                GatewayResult::conflict(request_id, ConflictReason::HashMismatch, Some(frontier)),
                mismatched,
            );
        }

        let unverified: Vec<FailedPrecondition> = envelope
            .target_spans
            .iter()
            .filter(|target| !provider.is_span_verified(doc_id, &target.annotation_id, &target.span_id))
            .map(|target| FailedPrecondition {
                annotation_id: target.annotation_id.clone(),
                span_id: target.span_id.clone(),
                expected: target.if_match_context_hash.clone(),
                actual: Some(target.if_match_context_hash.clone()),
            })
            .collect();
        if !unverified.is_empty() {
            return with_preconditions(
                GatewayResult::conflict(request_id, ConflictReason::UnverifiedTarget, Some(frontier)),
                unverified,
            );
        }

        let Some(payload) = envelope.payload.as_deref() else {
            return success(request_id, frontier, None, None, Vec::new());
        };

        let fragment = match self.canonicalize(payload, envelope.format) {
            Ok(fragment) => fragment,
            Err(diagnostics) => {
                return with_diagnostics(
                    GatewayResult::conflict(request_id, ConflictReason::SanitizationReject, Some(frontier)),
                    diagnostics,
                );
            }
        };
        let diagnostics = fragment.diagnostics.clone();
        let tree = envelope.wants_canonical_tree().then(|| fragment.clone());
        if envelope.is_dry_run() {
            return success(request_id, frontier, None, tree, diagnostics);
        }

        match build_apply_plan(provider, envelope, fragment) {
            Ok(plan) => success(request_id, frontier, Some(plan), tree, diagnostics),
            Err(missing) => with_preconditions(
                GatewayResult::conflict(request_id, ConflictReason::UnverifiedTarget, Some(frontier)),
                missing,
            ),
        }
    }

    /// Converts the payload to sanitized canonical blocks, or returns the
    /// diagnostics that make it unacceptable.
    fn canonicalize(&self, payload: &str, format: PayloadFormat) -> Result<CanonFragment, Vec<Diagnostic>> {
        let html = match format {
            PayloadFormat::Html => payload.to_string(),
            PayloadFormat::Text => text_to_html(payload),
            PayloadFormat::Markdown => {
                let converted = self.markdown.as_ref().and_then(|bridge| bridge.to_html(payload));
                converted.ok_or_else(|| {
                    vec![Diagnostic::new(
                        "unconverted_markdown",
                        "markdown payload could not be converted to HTML",
                    )]
                })?
            }
        };

        let sanitized = sanitize_html(&html, &self.config);
        if !sanitized.errors.is_empty() {
            let mut diagnostics = sanitized.errors;
            diagnostics.extend(sanitized.diagnostics);
            return Err(diagnostics);
        }

        let mut fragment = canonicalize_html(&sanitized.html, &self.config);
        if self.config.reject_unknown_structure() && !fragment.unknown_block_types.is_empty() {
            let mut diagnostics = sanitized.diagnostics;
            diagnostics.append(&mut fragment.diagnostics);
            return Err(diagnostics);
        }
        let mut diagnostics = sanitized.diagnostics;
        diagnostics.append(&mut fragment.diagnostics);
        fragment.diagnostics = diagnostics;
        Ok(fragment)
    }

    fn finish(&self, envelope: &AiRequestEnvelope, outcome: Outcome, now_ms: u64) -> Arc<GatewayResult> {
        let Outcome { result, cacheable } = outcome;
        let status = result.status();
        match result.reason() {
            Some(reason) => warn!(request_id = %envelope.request_id, doc_id = %envelope.doc_id, status, reason, "gateway request refused"),
            None => info!(request_id = %envelope.request_id, doc_id = %envelope.doc_id, status, "gateway request accepted"),
        }

        let payload_hash = envelope.payload.as_deref().map(sha256_hex);
        let result = Arc::new(result);
        let result = if cacheable {
            let mut state = self.lock();
            state
                .results
                .entry(envelope.request_id.clone())
                .or_insert(result)
                .clone()
        } else {
            result
        };
        self.record_audit(
            Some(envelope.request_id.clone()),
            Some(envelope.doc_id.clone()),
            &result,
            payload_hash,
            now_ms,
        );
        result
    }

    fn record_audit(
        &self,
        request_id: Option<String>,
        doc_id: Option<String>,
        result: &GatewayResult,
        payload_hash: Option<String>,
        now_ms: u64,
    ) {
        let mut state = self.lock();
        state.next_sequence += 1;
        let event = GatewayAuditEvent {
            sequence: state.next_sequence,
            request_id,
            doc_id,
            status: result.status(),
            reason: result.reason().map(str::to_string),
            payload_hash,
            at_ms: now_ms,
        };
        state.audit_events.push(event);
    }

    /// Removes and returns pending audit events. Events at or before `after`
    /// are treated as already delivered and discarded.
    pub fn drain_audit_events(&self, after: Option<u64>, limit: Option<usize>) -> Vec<GatewayAuditEvent> {
        let mut state = self.lock();
        if let Some(cursor) = after {
            state.audit_events.retain(|event| event.sequence > cursor);
        }
        let pending = state.audit_events.len();
        let count = limit.map_or(pending, |limit| limit.min(pending));
        state.audit_events.drain(..count).collect()
    }

    pub fn cached_result(&self, request_id: &str) -> Option<Arc<GatewayResult>> {
        self.lock().results.get(request_id).cloned()
    }

    /// Forgets a cached result so the request id can be processed again.
    pub fn evict(&self, request_id: &str) -> bool {
        self.lock().results.remove(request_id).is_some()
    }

    pub fn clear_cache(&self) {
        let mut state = self.lock();
        state.results.clear();
        state.limiter.reset();
    }
}

fn validate_envelope(envelope: &AiRequestEnvelope) -> Result<(), String> {
    for (label, value) in [
        ("docId", &envelope.doc_id),
        ("requestId", &envelope.request_id),
        ("docFrontierTag", &envelope.doc_frontier_tag),
    ] {
        if value.trim().is_empty() {
            return Err(format!("{label} is required"));
        }
    }

    let mut seen = HashSet::new();
    for target in &envelope.target_spans {
        if target.annotation_id.trim().is_empty() || target.span_id.trim().is_empty() {
            return Err("target span ids are required".to_string());
        }
        if target.if_match_context_hash.trim().is_empty() {
            return Err(format!("ifMatchContextHash is required for span {}", target.span_id));
        }
        if !seen.insert((target.annotation_id.as_str(), target.span_id.as_str())) {
            return Err(format!("span {} is targeted twice", target.span_id));
        }
    }
    if envelope.payload.is_some() && envelope.target_spans.is_empty() {
        return Err("a payload needs at least one target span".to_string());
    }
    Ok(())
}

fn invalid(envelope: &AiRequestEnvelope, message: String) -> GatewayResult {
    let request_id = Some(envelope.request_id.clone()).filter(|id| !id.trim().is_empty());
    GatewayResult::rejected(request_id, RejectionCode::InvalidRequest, message)
}

fn success(
    request_id: &str,
    frontier: String,
    apply_plan: Option<ApplyPlan>,
    canonical_tree: Option<CanonFragment>,
    diagnostics: Vec<Diagnostic>,
) -> GatewayResult {
    GatewayResult::Success(GatewaySuccess {
        status: 200,
        request_id: request_id.to_string(),
        server_frontier_tag: frontier,
        apply_plan,
        canonical_tree,
        diagnostics,
    })
}

fn with_preconditions(mut result: GatewayResult, failed: Vec<FailedPrecondition>) -> GatewayResult {
    if let GatewayResult::Conflict(conflict) = &mut result {
        conflict.failed_preconditions = failed;
    }
    result
}

fn with_diagnostics(mut result: GatewayResult, diagnostics: Vec<Diagnostic>) -> GatewayResult {
    if let GatewayResult::Conflict(conflict) = &mut result {
        conflict.diagnostics = diagnostics;
    }
    result
}

/// The first canonical block replaces the first target span, remaining
/// target spans are deleted, and remaining blocks follow the first span's
/// block in order. An empty fragment deletes every target span.
fn build_apply_plan(
    provider: &dyn DocumentProvider,
    envelope: &AiRequestEnvelope,
    fragment: CanonFragment,
) -> Result<ApplyPlan, Vec<FailedPrecondition>> {
    let mut ranges = Vec::with_capacity(envelope.target_spans.len());
    let mut missing = Vec::new();
    for target in &envelope.target_spans {
        match provider.span_range(&envelope.doc_id, &target.annotation_id, &target.span_id) {
            Some(range) => ranges.push((target, range)),
            None => missing.push(FailedPrecondition {
                annotation_id: target.annotation_id.clone(),
                span_id: target.span_id.clone(),
                expected: target.if_match_context_hash.clone(),
                actual: None,
            }),
        }
    }
    if !missing.is_empty() {
        return Err(missing);
    }

    let mut blocks = fragment.blocks.into_iter();
    let mut operations = Vec::new();
    let mut anchor_block = None;
    for (index, (target, range)) in ranges.into_iter().enumerate() {
        let replacement = if index == 0 { blocks.next() } else { None };
        if index == 0 {
            anchor_block = Some(range.block_id.clone());
        }
        let operation = match replacement {
            Some(block) => ApplyOperation::ReplaceSpan {
                annotation_id: target.annotation_id.clone(),
                span_id: target.span_id.clone(),
                range,
                block,
            },
            None => ApplyOperation::DeleteSpan {
                annotation_id: target.annotation_id.clone(),
                span_id: target.span_id.clone(),
                range,
            },
        };
        operations.push(operation);
    }

    // each inserted block follows the one inserted before it
    let mut after = anchor_block;
    for block in blocks {
        let Some(after_block_id) = after.take() else {
            break;
        };
        after = Some(block.id.clone());
        operations.push(ApplyOperation::InsertBlock { after_block_id, block });
    }
    Ok(ApplyPlan { operations })
}
