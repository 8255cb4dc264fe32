use ai_context_hash_rs::{ChainHashInput, ChainPolicyKind, compute_chain_hash, context_hash};
use anchor_relocation_rs::{DocumentSnapshot, capture_context_hash, utf16_slice};
use serde::{Deserialize, Serialize};

use crate::IntegrityError;

/// A contiguous UTF-16 range inside one block.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Span {
    pub span_id: String,
    pub annotation_id: String,
    pub block_id: String,
    pub start: u32,
    pub end: u32,
    /// Text at creation or last verification. Hashing normalizes line feeds.
    pub text: String,
    pub expected_context_hash: Option<String>,
    /// Fuzzy hash of the text around the span, checked before adopting an
    /// exact match in a successor block.
    #[serde(default)]
    pub context_fingerprint: Option<String>,
}

impl Span {
    /// Capture `[start, end)` of `block_id` together with its context hash.
    pub fn capture(
        document: &DocumentSnapshot,
        annotation_id: &str,
        span_id: &str,
        block_id: &str,
        start: u32,
        end: u32,
    ) -> Result<Self, IntegrityError> {
        let content = document
            .block_text(block_id)
            .ok_or_else(|| IntegrityError::UnknownBlock(block_id.to_string()))?;
        let text = utf16_slice(content, start, end).ok_or_else(|| IntegrityError::InvalidRange {
            span_id: span_id.to_string(),
            start,
            end,
        })?;
        let hash = context_hash(span_id, block_id, &text);
        let fingerprint = capture_context_hash(content, start, end);
        Ok(Self {
            span_id: span_id.to_string(),
            annotation_id: annotation_id.to_string(),
            block_id: block_id.to_string(),
            start,
            end,
            text,
            expected_context_hash: Some(hash),
            context_fingerprint: Some(fingerprint),
        })
    }

    pub fn current_hash(&self) -> String {
        context_hash(&self.span_id, &self.block_id, &self.text)
    }
}

/// Ordered blocks of a multi-block annotation and the adjacency contract
/// between them.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Chain {
    pub block_ids: Vec<String>,
    pub policy_kind: ChainPolicyKind,
    pub max_intervening_blocks: u32,
    pub expected_chain_hash: Option<String>,
}

impl Chain {
    pub fn new(block_ids: Vec<String>, policy_kind: ChainPolicyKind, max_intervening_blocks: u32) -> Self {
        let mut chain = Self {
            block_ids,
            policy_kind,
            max_intervening_blocks,
            expected_chain_hash: None,
        };
        chain.expected_chain_hash = Some(chain.current_hash());
        chain
    }

    pub fn current_hash(&self) -> String {
        compute_chain_hash(&ChainHashInput {
            policy_kind: self.policy_kind,
            max_intervening_blocks: self.max_intervening_blocks,
            block_ids: self.block_ids.clone(),
        })
    }
}

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DisplayState {
    Active,
    ActivePartial,
    #[default]
    ActiveUnverified,
    BrokenGrace,
    Orphan,
}

impl DisplayState {
    pub fn as_str(&self) -> &'static str {
        match self {
            DisplayState::Active => "active",
            DisplayState::ActivePartial => "active_partial",
            DisplayState::ActiveUnverified => "active_unverified",
            DisplayState::BrokenGrace => "broken_grace",
            DisplayState::Orphan => "orphan",
        }
    }

    /// Edits targeting the annotation wait for a re-check.
    pub fn blocks_edits(&self) -> bool {
        matches!(self, DisplayState::BrokenGrace)
    }
}

/// Owns its spans and optional chain. Display state and the verified flag
/// are outputs of verification passes only.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Annotation {
    pub id: String,
    pub spans: Vec<Span>,
    pub chain: Option<Chain>,
    #[serde(default)]
    display_state: DisplayState,
    #[serde(default)]
    verified: bool,
    #[serde(default)]
    grace_started_at_ms: Option<u64>,
}

impl Annotation {
    pub fn new(id: impl Into<String>, spans: Vec<Span>, chain: Option<Chain>) -> Self {
        Self {
            id: id.into(),
            spans,
            chain,
            display_state: DisplayState::ActiveUnverified,
            verified: false,
            grace_started_at_ms: None,
        }
    }

    pub fn display_state(&self) -> DisplayState {
        self.display_state
    }

    pub fn is_verified(&self) -> bool {
        self.verified
    }

    pub fn grace_started_at_ms(&self) -> Option<u64> {
        self.grace_started_at_ms
    }

    pub fn span(&self, span_id: &str) -> Option<&Span> {
        self.spans.iter().find(|span| span.span_id == span_id)
    }

    pub(crate) fn set_derived(&mut self, state: DisplayState, grace_started_at_ms: Option<u64>) {
        self.display_state = state;
        self.verified = state == DisplayState::Active;
        self.grace_started_at_ms = grace_started_at_ms;
    }

    /// Every block the annotation depends on.
    pub fn block_ids(&self) -> impl Iterator<Item = &str> {
        self.spans
            .iter()
            .map(|span| span.block_id.as_str())
            .chain(self.chain.iter().flat_map(|chain| chain.block_ids.iter().map(String::as_str)))
    }

    pub(crate) fn validate(&self) -> Result<(), IntegrityError> {
        if self.id.is_empty() {
            return Err(IntegrityError::EmptyId("annotation"));
        }
        if self.spans.is_empty() {
            return Err(IntegrityError::NoSpans(self.id.clone()));
        }
        for (index, span) in self.spans.iter().enumerate() {
            if span.span_id.is_empty() {
                return Err(IntegrityError::EmptyId("span"));
            }
            if span.annotation_id != self.id {
                return Err(IntegrityError::SpanOwnerMismatch {
                    span_id: span.span_id.clone(),
                    annotation_id: self.id.clone(),
                });
            }
            if span.start > span.end {
                return Err(IntegrityError::InvalidRange {
                    span_id: span.span_id.clone(),
                    start: span.start,
                    end: span.end,
                });
            }
            if self.spans[..index].iter().any(|other| other.span_id == span.span_id) {
                return Err(IntegrityError::DuplicateSpan(span.span_id.clone()));
            }
        }
        if let Some(chain) = &self.chain {
            if chain.block_ids.is_empty() {
                return Err(IntegrityError::EmptyChain(self.id.clone()));
            }
        }
        Ok(())
    }
}
