use anchor_codec_rs::Anchor;
use anchor_relocation_rs::{
    BlockInput, BlockMapping, DocumentSnapshot, RelocationConfig, RelocationRequest, StructuralDelta,
    compute_ngram_similarity, compute_text_similarity, find_substring_matches, resolve_anchor,
};
use napi::bindgen_prelude::Result as NapiResult;
use napi_derive::napi;
use serde::Deserialize;
use serde_json::Value;

use crate::{parse_input, to_output};

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct RelocateInput {
    anchor: Anchor,
    original_text: String,
    blocks: Vec<BlockInput>,
    #[serde(default)]
    deltas: Vec<StructuralDelta>,
    former_index: Option<usize>,
    offset_in_text: Option<u32>,
    context_hash: Option<String>,
    config: Option<RelocationConfig>,
}

#[napi(js_name = "computeTextSimilarity")]
pub fn compute_text_similarity_binding(a: String, b: String) -> f64 {
    compute_text_similarity(&a, &b)
}

#[napi(js_name = "computeNgramSimilarity")]
pub fn compute_ngram_similarity_binding(a: String, b: String, n: Option<u32>) -> f64 {
    compute_ngram_similarity(&a, &b, n.map(|value| value as usize))
}

#[napi(js_name = "findSubstringMatches")]
pub fn find_substring_matches_binding(needle: String, haystack: String) -> NapiResult<Value> {
    to_output(&find_substring_matches(&needle, &haystack))
}

#[napi(js_name = "mapAnchor")]
pub fn map_anchor_binding(deltas: Value, anchor: Value) -> NapiResult<Option<Value>> {
    let deltas = parse_input::<Vec<StructuralDelta>>(deltas, "deltas")?;
    let anchor = parse_input::<Anchor>(anchor, "anchor")?;
    let mapping = BlockMapping::new(deltas);
    mapping.map_anchor(&anchor).as_ref().map(to_output).transpose()
}

/// Runs the recovery ladder for one anchor against a block snapshot.
#[napi(js_name = "relocateAnchor")]
pub fn relocate_anchor_binding(input: Value) -> NapiResult<Value> {
    let input = parse_input::<RelocateInput>(input, "relocation input")?;
    let document = DocumentSnapshot::new(input.blocks);
    let mapping = (!input.deltas.is_empty()).then(|| BlockMapping::new(input.deltas));
    let config = input.config.unwrap_or_default();

    let mut request = RelocationRequest::new(&input.anchor, &input.original_text)
        .offset_in_text(input.offset_in_text.unwrap_or(0));
    if let Some(former_index) = input.former_index {
        request = request.near(former_index);
    }
    if let Some(hash) = input.context_hash.as_deref() {
        request = request.context_hash(hash);
    }
    to_output(&resolve_anchor(&request, mapping.as_ref(), &document, &config))
}
