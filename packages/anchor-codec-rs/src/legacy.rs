//! Pre-binary anchor encodings still found in stored documents.
//!
//! Two shapes exist in the wild:
//! - base64 JSON `{"blockId","offset","bias","checksum"}` where `checksum` is
//!   the lowercase hex Adler-32 of `"{blockId}:{offset}:{bias}"`;
//! - base64 `blockId:offset`, which predates bias and decodes with `after`.

use base64::{Engine as _, engine::general_purpose};
use serde::{Deserialize, Serialize};

use crate::anchor::{Anchor, Bias, MAX_BLOCK_ID_BYTES, MAX_OFFSET};
use crate::checksum::adler32_hex;

#[derive(Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
struct LegacyJsonAnchor {
    block_id: String,
    offset: u64,
    bias: Option<String>,
    checksum: String,
}

fn checksum_input(block_id: &str, offset: u64, bias: Bias) -> String {
    format!("{block_id}:{offset}:{bias}")
}

pub fn encode_legacy_json(anchor: &Anchor) -> String {
    let offset = u64::from(anchor.offset);
    let payload = LegacyJsonAnchor {
        block_id: anchor.block_id.clone(),
        offset,
        bias: Some(anchor.bias.as_str().to_string()),
        checksum: adler32_hex(&checksum_input(&anchor.block_id, offset, anchor.bias)),
    };
    let json = serde_json::to_string(&payload).unwrap_or_default();
    general_purpose::STANDARD.encode(json)
}

pub fn encode_legacy_plain(anchor: &Anchor) -> String {
    general_purpose::STANDARD.encode(format!("{}:{}", anchor.block_id, anchor.offset))
}

pub(crate) fn decode_legacy_json(bytes: &[u8]) -> Option<Anchor> {
    let parsed: LegacyJsonAnchor = serde_json::from_slice(bytes).ok()?;
    if !is_valid_block_id(&parsed.block_id) || parsed.offset > u64::from(MAX_OFFSET) {
        return None;
    }
    let bias = match parsed.bias.as_deref() {
        Some(value) => Bias::parse(value)?,
        None => Bias::After,
    };

    let expected = adler32_hex(&checksum_input(&parsed.block_id, parsed.offset, bias));
    if !parsed.checksum.eq_ignore_ascii_case(&expected) {
        return None;
    }

    Some(Anchor::new(parsed.block_id, parsed.offset as u32, bias))
}

pub(crate) fn decode_legacy_plain(bytes: &[u8]) -> Option<Anchor> {
    let text = std::str::from_utf8(bytes).ok()?;
    let (block_id, offset) = text.rsplit_once(':')?;
    if !is_valid_block_id(block_id) {
        return None;
    }
    if offset.is_empty() || !offset.bytes().all(|byte| byte.is_ascii_digit()) {
        return None;
    }
    let offset: u32 = offset.parse().ok()?;
    if offset > MAX_OFFSET {
        return None;
    }
    Some(Anchor::new(block_id, offset, Bias::After))
}

fn is_valid_block_id(block_id: &str) -> bool {
    !block_id.is_empty()
        && block_id.len() <= MAX_BLOCK_ID_BYTES
        && !block_id.chars().any(char::is_control)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::codec::decode_anchor_base64;

    #[test]
    fn legacy_json_normalizes_to_anchor() {
        let anchor = Anchor::new("block-7", 42, Bias::Before);
        let encoded = encode_legacy_json(&anchor);
        assert_eq!(decode_anchor_base64(&encoded), Some(anchor));
    }

    #[test]
    fn legacy_json_without_bias_defaults_to_after() {
        let checksum = adler32_hex("b2:3:after");
        let json = format!(r#"{{"blockId":"b2","offset":3,"checksum":"{checksum}"}}"#);
        let encoded = general_purpose::STANDARD.encode(json);
        assert_eq!(
            decode_anchor_base64(&encoded),
            Some(Anchor::new("b2", 3, Bias::After))
        );
    }

    #[test]
    fn legacy_json_with_bad_checksum_is_rejected() {
        let json = r#"{"blockId":"b2","offset":3,"bias":"after","checksum":"deadbeef"}"#;
        let encoded = general_purpose::STANDARD.encode(json);
        assert_eq!(decode_anchor_base64(&encoded), None);
    }

    #[test]
    fn legacy_json_rejects_negative_offsets() {
        let json = r#"{"blockId":"b2","offset":-1,"bias":"after","checksum":"0"}"#;
        let encoded = general_purpose::STANDARD.encode(json);
        assert_eq!(decode_anchor_base64(&encoded), None);
    }

    #[test]
    fn legacy_plain_uses_last_separator() {
        let encoded = general_purpose::STANDARD.encode("ns:block:12");
        assert_eq!(
            decode_anchor_base64(&encoded),
            Some(Anchor::new("ns:block", 12, Bias::After))
        );
        let url_safe = general_purpose::URL_SAFE_NO_PAD.encode("ns:block:12");
        assert_eq!(
            decode_anchor_base64(&url_safe),
            Some(Anchor::new("ns:block", 12, Bias::After))
        );
    }

    #[test]
    fn legacy_plain_rejects_malformed_offsets() {
        for raw in ["b1:", "b1:+5", "b1:-5", ":5", "b1", "b1:99999999999"] {
            let encoded = general_purpose::STANDARD.encode(raw);
            assert_eq!(decode_anchor_base64(&encoded), None, "{raw}");
        }
    }

    #[test]
    fn legacy_plain_round_trip() {
        let anchor = Anchor::new("p-1", 0, Bias::After);
        assert_eq!(decode_anchor_base64(&encode_legacy_plain(&anchor)), Some(anchor));
    }
}
