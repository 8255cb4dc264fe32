use anchor_codec_rs::Anchor;
use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::document::{DocumentSnapshot, to_utf16};
use crate::mapping::BlockMapping;
use crate::similarity::{
    compute_fuzzy_context_hash, find_exact_utf16, find_substring_matches_utf16, text_similarity,
};

const DEFAULT_THRESHOLD: f64 = 0.7;
const DEFAULT_BLOCK_RADIUS: usize = 3;
const DEFAULT_MIN_NEEDLE_LEN: usize = 3;
/// UTF-16 units captured on each side of a span for its context hash.
pub const CONTEXT_WINDOW: usize = 32;

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RelocationConfig {
    pub threshold: Option<f64>,
    pub block_radius: Option<usize>,
    pub min_needle_len: Option<usize>,
    /// Tier 2 (hash-checked text in successor blocks) switch.
    pub enable_successor_search: Option<bool>,
    /// Tier 3 (fuzzy text) switch; the negotiated policy may disable it.
    pub enable_fuzzy: Option<bool>,
}

impl Default for RelocationConfig {
    fn default() -> Self {
        Self {
            threshold: Some(DEFAULT_THRESHOLD),
            block_radius: Some(DEFAULT_BLOCK_RADIUS),
            min_needle_len: Some(DEFAULT_MIN_NEEDLE_LEN),
            enable_successor_search: Some(true),
            enable_fuzzy: Some(true),
        }
    }
}

impl RelocationConfig {
    pub fn with_threshold(threshold: f64) -> Self {
        Self {
            threshold: Some(threshold),
            ..Self::default()
        }
    }

    fn threshold(&self) -> f64 {
        self.threshold.unwrap_or(DEFAULT_THRESHOLD).clamp(0.0, 1.0)
    }

    fn block_radius(&self) -> usize {
        self.block_radius.unwrap_or(DEFAULT_BLOCK_RADIUS)
    }

    fn min_needle_len(&self) -> usize {
        self.min_needle_len.unwrap_or(DEFAULT_MIN_NEEDLE_LEN)
    }

    fn successor_search_enabled(&self) -> bool {
        self.enable_successor_search.unwrap_or(true)
    }

    fn fuzzy_enabled(&self) -> bool {
        self.enable_fuzzy.unwrap_or(true)
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RelocationMethod {
    Integrity,
    ContextHash,
    FuzzyText,
    Failed,
}

#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RelocationDebug {
    pub candidates_considered: usize,
    pub best_score: Option<f64>,
    pub matched_block_id: Option<String>,
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RelocationResult {
    pub anchor: Option<Anchor>,
    pub method: RelocationMethod,
    pub confidence: f64,
    pub debug: RelocationDebug,
}

impl RelocationResult {
    fn integrity(anchor: Anchor) -> Self {
        Self {
            anchor: Some(anchor),
            method: RelocationMethod::Integrity,
            confidence: 1.0,
            debug: RelocationDebug::default(),
        }
    }

    fn failed(debug: RelocationDebug) -> Self {
        Self {
            anchor: None,
            method: RelocationMethod::Failed,
            confidence: 0.0,
            debug,
        }
    }

    pub fn is_resolved(&self) -> bool {
        self.anchor.is_some()
    }
}

/// What is known about an anchor whose block may have moved or vanished.
#[derive(Clone, Debug)]
pub struct RelocationRequest<'a> {
    pub anchor: &'a Anchor,
    /// Text captured at the anchor when it was last verified.
    pub original_text: &'a str,
    /// Index the anchor's block had in the previous snapshot, if known.
    pub former_index: Option<usize>,
    /// Anchor position relative to the start of `original_text`.
    pub offset_in_text: u32,
    /// `compute_fuzzy_context_hash` of the text surrounding the span.
    pub context_hash: Option<&'a str>,
}

impl<'a> RelocationRequest<'a> {
    pub fn new(anchor: &'a Anchor, original_text: &'a str) -> Self {
        Self {
            anchor,
            original_text,
            former_index: None,
            offset_in_text: 0,
            context_hash: None,
        }
    }

    pub fn near(mut self, former_index: usize) -> Self {
        self.former_index = Some(former_index);
        self
    }

    pub fn offset_in_text(mut self, offset: u32) -> Self {
        self.offset_in_text = offset;
        self
    }

    pub fn context_hash(mut self, hash: &'a str) -> Self {
        self.context_hash = Some(hash);
        self
    }
}

/// Context hash for the span `[start, end)` of `block_text`.
pub fn capture_context_hash(block_text: &str, start: u32, end: u32) -> String {
    let units = to_utf16(block_text);
    let start = (start as usize).min(units.len());
    let end = (end as usize).clamp(start, units.len());
    context_hash_around(&units, start, end)
}

fn context_hash_around(units: &[u16], start: usize, end: usize) -> String {
    let prefix_start = start.saturating_sub(CONTEXT_WINDOW);
    let suffix_end = (end + CONTEXT_WINDOW).min(units.len());
    let prefix = String::from_utf16_lossy(&units[prefix_start..start]);
    let suffix = String::from_utf16_lossy(&units[end..suffix_end]);
    compute_fuzzy_context_hash(&prefix, &suffix)
}

/// Exact when the anchor's block survives; otherwise a bounded fuzzy search
/// over neighbouring blocks. Never reports a match below the threshold.
pub fn fuzzy_relocate_anchor(
    request: &RelocationRequest<'_>,
    document: &DocumentSnapshot,
    config: &RelocationConfig,
) -> RelocationResult {
    if let Some(len) = document.block_len(&request.anchor.block_id) {
        let offset = request.anchor.offset.min(len);
        let anchor = request.anchor.with_position(request.anchor.block_id.clone(), offset);
        return RelocationResult::integrity(anchor);
    }

    let result = fuzzy_search(request, document, config);
    debug!(
        anchor = %request.anchor,
        method = ?result.method,
        confidence = result.confidence,
        candidates_considered = result.debug.candidates_considered,
        "fuzzy relocation finished"
    );
    result
}

fn fuzzy_search(
    request: &RelocationRequest<'_>,
    document: &DocumentSnapshot,
    config: &RelocationConfig,
) -> RelocationResult {
    let needle = to_utf16(request.original_text);
    let candidates = candidate_indices(document, request.former_index, config.block_radius());
    let mut debug = RelocationDebug {
        candidates_considered: candidates.len(),
        ..RelocationDebug::default()
    };

    if needle.len() < config.min_needle_len() {
        return RelocationResult::failed(debug);
    }

    let threshold = config.threshold();
    let mut best: Option<(usize, u32, u32, f64)> = None;

    for index in candidates {
        let Some(block) = document.block_at(index) else {
            continue;
        };
        let haystack = to_utf16(&block.content);
        let Some((start, end, score)) = best_window(&needle, &haystack) else {
            continue;
        };
        let improves = best.is_none_or(|(_, _, _, current)| score > current);
        if improves {
            best = Some((index, start, end, score));
        }
    }

    debug.best_score = best.map(|(_, _, _, score)| score);

    match best {
        Some((index, start, end, score)) if score >= threshold => {
            let Some(block) = document.block_at(index) else {
                return RelocationResult::failed(debug);
            };
            let offset = start + request.offset_in_text.min(end - start);
            debug.matched_block_id = Some(block.block_id.clone());
            RelocationResult {
                anchor: Some(request.anchor.with_position(block.block_id.clone(), offset)),
                method: RelocationMethod::FuzzyText,
                confidence: score,
                debug,
            }
        }
        _ => RelocationResult::failed(debug),
    }
}

/// Best window of one block: verbatim hit, substring window, or the whole
/// block when the lengths are comparable.
fn best_window(needle: &[u16], haystack: &[u16]) -> Option<(u32, u32, f64)> {
    if let Some(start) = find_exact_utf16(needle, haystack).first() {
        return Some((*start as u32, (*start + needle.len()) as u32, 1.0));
    }

    let mut best: Option<(u32, u32, f64)> = None;
    for candidate in find_substring_matches_utf16(needle, haystack) {
        if best.is_none_or(|(_, _, score)| candidate.score > score) {
            best = Some((candidate.start, candidate.end, candidate.score));
        }
    }

    let length_gap = needle.len().abs_diff(haystack.len());
    if (length_gap as f64) < needle.len() as f64 * 0.5 {
        let whole = text_similarity(needle, haystack);
        if best.is_none_or(|(_, _, score)| whole > score) {
            best = Some((0, haystack.len() as u32, whole));
        }
    }

    best
}

/// Blocks ordered by distance from the former position; the whole document
/// when the former position is unknown.
fn candidate_indices(document: &DocumentSnapshot, former_index: Option<usize>, radius: usize) -> Vec<usize> {
    let Some(center) = former_index else {
        return (0..document.len()).collect();
    };
    if document.is_empty() {
        return Vec::new();
    }

    let center = center.min(document.len() - 1);
    let mut indices = vec![center];
    for distance in 1..=radius {
        if let Some(before) = center.checked_sub(distance) {
            indices.push(before);
        }
        if center + distance < document.len() {
            indices.push(center + distance);
        }
    }
    indices
}

/// Three-tier recovery: structural mapping, then hash-checked exact text in
/// successor blocks, then fuzzy text search.
pub fn resolve_anchor(
    request: &RelocationRequest<'_>,
    mapping: Option<&BlockMapping>,
    document: &DocumentSnapshot,
    config: &RelocationConfig,
) -> RelocationResult {
    let mapped = match mapping {
        Some(mapping) => mapping.map_anchor(request.anchor),
        None => Some(request.anchor.clone()),
    };
    if let Some(mapped) = mapped {
        if let Some(len) = document.block_len(&mapped.block_id) {
            let offset = mapped.offset.min(len);
            return RelocationResult::integrity(mapped.with_position(mapped.block_id.clone(), offset));
        }
    }

    if let Some(mapping) = mapping.filter(|_| config.successor_search_enabled()) {
        if let Some(result) = relocate_into_successors(request, mapping, document) {
            return result;
        }
    }

    if !config.fuzzy_enabled() {
        return RelocationResult::failed(RelocationDebug::default());
    }
    fuzzy_relocate_anchor(request, document, config)
}

fn relocate_into_successors(
    request: &RelocationRequest<'_>,
    mapping: &BlockMapping,
    document: &DocumentSnapshot,
) -> Option<RelocationResult> {
    let needle = to_utf16(request.original_text);
    if needle.is_empty() {
        return None;
    }

    let successors = mapping.derived_blocks_from(&request.anchor.block_id);
    let mut hits: Vec<(String, usize)> = Vec::new();
    for block_id in &successors {
        let Some(text) = document.block_text(block_id) else {
            continue;
        };
        let haystack = to_utf16(text);
        for start in find_exact_utf16(&needle, &haystack) {
            let verified = match request.context_hash {
                Some(expected) => context_hash_around(&haystack, start, start + needle.len()) == expected,
                None => true,
            };
            if verified {
                hits.push((block_id.clone(), start));
            }
        }
    }

    // without a hash only an unambiguous hit counts
    let chosen = match (request.context_hash, hits.as_slice()) {
        (Some(_), [first, ..]) => first.clone(),
        (None, [only]) => only.clone(),
        _ => return None,
    };

    let (block_id, start) = chosen;
    let offset = start as u32 + request.offset_in_text.min(needle.len() as u32);
    Some(RelocationResult {
        anchor: Some(request.anchor.with_position(block_id.clone(), offset)),
        method: RelocationMethod::ContextHash,
        confidence: 1.0,
        debug: RelocationDebug {
            candidates_considered: successors.len(),
            best_score: Some(1.0),
            matched_block_id: Some(block_id),
        },
    })
}
