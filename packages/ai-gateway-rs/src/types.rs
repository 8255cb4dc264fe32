use serde::{Deserialize, Serialize};

use crate::canonical::{CanonBlock, CanonFragment};

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TargetSpan {
    pub annotation_id: String,
    pub span_id: String,
    pub if_match_context_hash: String,
}

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PayloadFormat {
    #[default]
    Html,
    Markdown,
    Text,
}

#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RequestOptions {
    pub return_canonical_tree: Option<bool>,
    pub dry_run: Option<bool>,
}

/// One agent edit request. `request_id` is the idempotency key and
/// `doc_frontier_tag` the frontier the agent last observed.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AiRequestEnvelope {
    pub doc_id: String,
    pub doc_frontier_tag: String,
    pub target_spans: Vec<TargetSpan>,
    #[serde(default)]
    pub instructions: String,
    #[serde(default)]
    pub format: PayloadFormat,
    pub request_id: String,
    pub payload: Option<String>,
    pub options: Option<RequestOptions>,
}

impl AiRequestEnvelope {
    pub fn wants_canonical_tree(&self) -> bool {
        self.options
            .as_ref()
            .and_then(|options| options.return_canonical_tree)
            .unwrap_or(false)
    }

    pub fn is_dry_run(&self) -> bool {
        self.options
            .as_ref()
            .and_then(|options| options.dry_run)
            .unwrap_or(false)
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum RejectionCode {
    InvalidRequest,
    PayloadTooLarge,
    MaliciousPayload,
}

impl RejectionCode {
    pub fn as_str(&self) -> &'static str {
        match self {
            RejectionCode::InvalidRequest => "INVALID_REQUEST",
            RejectionCode::PayloadTooLarge => "PAYLOAD_TOO_LARGE",
            RejectionCode::MaliciousPayload => "MALICIOUS_PAYLOAD",
        }
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ConflictReason {
    FrontierMismatch,
    HashMismatch,
    UnverifiedTarget,
    SanitizationReject,
}

impl ConflictReason {
    pub fn as_str(&self) -> &'static str {
        match self {
            ConflictReason::FrontierMismatch => "frontier_mismatch",
            ConflictReason::HashMismatch => "hash_mismatch",
            ConflictReason::UnverifiedTarget => "unverified_target",
            ConflictReason::SanitizationReject => "sanitization_reject",
        }
    }
}

/// Open set: clients treat unknown kinds as informational.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Diagnostic {
    pub kind: String,
    pub detail: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub severity: Option<String>,
}

impl Diagnostic {
    pub fn new(kind: &str, detail: impl Into<String>) -> Self {
        Self {
            kind: kind.to_string(),
            detail: detail.into(),
            severity: None,
        }
    }

    pub fn warning(kind: &str, detail: impl Into<String>) -> Self {
        Self {
            severity: Some("warning".to_string()),
            ..Self::new(kind, detail)
        }
    }
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FailedPrecondition {
    pub annotation_id: String,
    pub span_id: String,
    pub expected: String,
    /// `None` when the span is unknown to the provider.
    pub actual: Option<String>,
}

/// Current position of a targeted span, in UTF-16 offsets.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SpanRange {
    pub block_id: String,
    pub start: u32,
    pub end: u32,
}

#[derive(Clone, Debug, PartialEq, Serialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum ApplyOperation {
    #[serde(rename_all = "camelCase")]
    ReplaceSpan {
        annotation_id: String,
        span_id: String,
        range: SpanRange,
        block: CanonBlock,
    },
    #[serde(rename_all = "camelCase")]
    DeleteSpan {
        annotation_id: String,
        span_id: String,
        range: SpanRange,
    },
    #[serde(rename_all = "camelCase")]
    InsertBlock { after_block_id: String, block: CanonBlock },
}

#[derive(Clone, Debug, Default, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ApplyPlan {
    pub operations: Vec<ApplyOperation>,
}

#[derive(Clone, Debug, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct GatewaySuccess {
    pub status: u16,
    pub request_id: String,
    pub server_frontier_tag: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub apply_plan: Option<ApplyPlan>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub canonical_tree: Option<CanonFragment>,
    pub diagnostics: Vec<Diagnostic>,
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct GatewayRejection {
    pub status: u16,
    pub request_id: Option<String>,
    pub code: RejectionCode,
    pub message: String,
    pub diagnostics: Vec<Diagnostic>,
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct GatewayConflict {
    pub status: u16,
    pub request_id: String,
    pub reason: ConflictReason,
    pub server_frontier_tag: Option<String>,
    pub failed_preconditions: Vec<FailedPrecondition>,
    pub diagnostics: Vec<Diagnostic>,
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct GatewayRateLimited {
    pub status: u16,
    pub request_id: String,
    pub retry_after_ms: u64,
}

/// Outcome of `process_request`; `status` decides which fields exist.
#[derive(Clone, Debug, PartialEq, Serialize)]
#[serde(untagged)]
pub enum GatewayResult {
    Success(GatewaySuccess),
    Rejected(GatewayRejection),
    Conflict(GatewayConflict),
    RateLimited(GatewayRateLimited),
}

impl GatewayResult {
    pub fn status(&self) -> u16 {
        match self {
            GatewayResult::Success(result) => result.status,
            GatewayResult::Rejected(result) => result.status,
            GatewayResult::Conflict(result) => result.status,
            GatewayResult::RateLimited(result) => result.status,
        }
    }

    /// Stable reason string for logs and audit.
    pub fn reason(&self) -> Option<&'static str> {
        match self {
            GatewayResult::Success(_) => None,
            GatewayResult::Rejected(result) => Some(result.code.as_str()),
            GatewayResult::Conflict(result) => Some(result.reason.as_str()),
            GatewayResult::RateLimited(_) => Some("rate_limited"),
        }
    }

    pub fn is_success(&self) -> bool {
        matches!(self, GatewayResult::Success(_))
    }

    pub(crate) fn rejected(request_id: Option<String>, code: RejectionCode, message: impl Into<String>) -> Self {
        GatewayResult::Rejected(GatewayRejection {
            status: 400,
            request_id,
            code,
            message: message.into(),
            diagnostics: Vec::new(),
        })
    }

    pub(crate) fn conflict(request_id: &str, reason: ConflictReason, server_frontier_tag: Option<String>) -> Self {
        GatewayResult::Conflict(GatewayConflict {
            status: 409,
            request_id: request_id.to_string(),
            reason,
            server_frontier_tag,
            failed_preconditions: Vec::new(),
            diagnostics: Vec::new(),
        })
    }
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct GatewayAuditEvent {
    pub sequence: u64,
    pub request_id: Option<String>,
    pub doc_id: Option<String>,
    pub status: u16,
    pub reason: Option<String>,
    pub payload_hash: Option<String>,
    pub at_ms: u64,
}
