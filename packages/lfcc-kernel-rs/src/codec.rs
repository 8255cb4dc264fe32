use anchor_codec_rs::{
    Anchor, adler32_hex, decode_anchor, decode_anchor_base64, decode_anchor_keyed, decode_anchor_keyed_base64,
    encode_anchor, encode_anchor_base64, encode_anchor_keyed, encode_anchor_keyed_base64, hmac_sha256,
    verify_crc32,
};
use napi::bindgen_prelude::{Buffer, Result as NapiResult};
use napi_derive::napi;
use serde_json::Value;

use crate::{parse_input, to_napi_error, to_output};

fn decoded(anchor: Option<Anchor>) -> NapiResult<Option<Value>> {
    anchor.as_ref().map(to_output).transpose()
}

#[napi(js_name = "encodeAnchor")]
pub fn encode_anchor_binding(anchor: Value) -> NapiResult<Buffer> {
    let anchor = parse_input::<Anchor>(anchor, "anchor")?;
    let bytes = encode_anchor(&anchor).map_err(to_napi_error)?;
    Ok(Buffer::from(bytes))
}

#[napi(js_name = "decodeAnchor")]
pub fn decode_anchor_binding(bytes: Buffer) -> NapiResult<Option<Value>> {
    decoded(decode_anchor(&bytes))
}

#[napi(js_name = "encodeAnchorBase64")]
pub fn encode_anchor_base64_binding(anchor: Value) -> NapiResult<String> {
    let anchor = parse_input::<Anchor>(anchor, "anchor")?;
    encode_anchor_base64(&anchor).map_err(to_napi_error)
}

/// Accepts the current format and both legacy string formats.
#[napi(js_name = "decodeAnchorBase64")]
pub fn decode_anchor_base64_binding(encoded: String) -> NapiResult<Option<Value>> {
    decoded(decode_anchor_base64(&encoded))
}

#[napi(js_name = "encodeAnchorKeyed")]
pub fn encode_anchor_keyed_binding(anchor: Value, key: Buffer) -> NapiResult<Buffer> {
    let anchor = parse_input::<Anchor>(anchor, "anchor")?;
    let bytes = encode_anchor_keyed(&anchor, &key).map_err(to_napi_error)?;
    Ok(Buffer::from(bytes))
}

#[napi(js_name = "decodeAnchorKeyed")]
pub fn decode_anchor_keyed_binding(bytes: Buffer, key: Buffer) -> NapiResult<Option<Value>> {
    decoded(decode_anchor_keyed(&bytes, &key))
}

#[napi(js_name = "encodeAnchorKeyedBase64")]
pub fn encode_anchor_keyed_base64_binding(anchor: Value, key: Buffer) -> NapiResult<String> {
    let anchor = parse_input::<Anchor>(anchor, "anchor")?;
    encode_anchor_keyed_base64(&anchor, &key).map_err(to_napi_error)
}

#[napi(js_name = "decodeAnchorKeyedBase64")]
pub fn decode_anchor_keyed_base64_binding(encoded: String, key: Buffer) -> NapiResult<Option<Value>> {
    decoded(decode_anchor_keyed_base64(&encoded, &key))
}

#[napi(js_name = "crc32")]
pub fn crc32_binding(data: Buffer) -> u32 {
    anchor_codec_rs::crc32(&data)
}

#[napi(js_name = "verifyCrc32")]
pub fn verify_crc32_binding(data: Buffer, expected: Buffer) -> bool {
    verify_crc32(&data, &expected)
}

#[napi(js_name = "adler32")]
pub fn adler32_binding(input: String) -> String {
    adler32_hex(&input)
}

#[napi(js_name = "hmacSha256")]
pub fn hmac_sha256_binding(key: Buffer, message: Buffer) -> NapiResult<Buffer> {
    let tag = hmac_sha256(&key, &message).map_err(to_napi_error)?;
    Ok(Buffer::from(tag.to_vec()))
}
