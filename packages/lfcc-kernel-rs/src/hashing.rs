use ai_context_hash_rs::{
    ChainHashInput, SpanHashInput, compute_chain_hash, compute_context_hash, compute_document_checksum,
    compute_frontier_tag,
};
use anchor_relocation_rs::BlockInput;
use napi::bindgen_prelude::Result as NapiResult;
use napi_derive::napi;
use serde_json::Value;
use std::collections::BTreeMap;

use crate::parse_input;

#[napi(js_name = "computeContextHash")]
pub fn compute_context_hash_binding(input: Value) -> NapiResult<String> {
    let input = parse_input::<SpanHashInput>(input, "span hash input")?;
    Ok(compute_context_hash(&input))
}

#[napi(js_name = "computeChainHash")]
pub fn compute_chain_hash_binding(input: Value) -> NapiResult<String> {
    let input = parse_input::<ChainHashInput>(input, "chain hash input")?;
    Ok(compute_chain_hash(&input))
}

#[napi(js_name = "computeFrontierTag")]
pub fn compute_frontier_tag_binding(version_vector: Value) -> NapiResult<String> {
    let version_vector = parse_input::<BTreeMap<String, u64>>(version_vector, "version vector")?;
    Ok(compute_frontier_tag(&version_vector))
}

#[napi(js_name = "computeDocumentChecksum")]
pub fn compute_document_checksum_binding(blocks: Value) -> NapiResult<String> {
    let blocks = parse_input::<Vec<BlockInput>>(blocks, "blocks")?;
    Ok(compute_document_checksum(
        blocks
            .iter()
            .map(|block| (block.block_id.as_str(), block.content.as_str())),
    ))
}
