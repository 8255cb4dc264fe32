use base64::{Engine as _, engine::general_purpose};

use crate::anchor::Anchor;
use crate::checksum::{KEYED_TAG_LEN, keyed_tag, verify_keyed_tag};
use crate::codec::{ANCHOR_VERSION_KEYED, decode_lenient_base64, read_payload, validate_anchor, write_payload};
use crate::AnchorCodecError;

/// Seal an anchor with a session key: `[0x02][payload][hmac-sha256[..16]]`.
pub fn encode_anchor_keyed(anchor: &Anchor, key: &[u8]) -> Result<Vec<u8>, AnchorCodecError> {
    validate_anchor(anchor)?;
    let mut out = Vec::with_capacity(anchor.block_id.len() + 16 + KEYED_TAG_LEN);
    out.push(ANCHOR_VERSION_KEYED);
    write_payload(&mut out, anchor);
    let tag = keyed_tag(key, &out)?;
    out.extend_from_slice(&tag);
    Ok(out)
}

pub fn decode_anchor_keyed(bytes: &[u8], key: &[u8]) -> Option<Anchor> {
    let (&version, _) = bytes.split_first()?;
    if version != ANCHOR_VERSION_KEYED || bytes.len() <= 1 + KEYED_TAG_LEN {
        return None;
    }
    let (body, tag) = bytes.split_at(bytes.len() - KEYED_TAG_LEN);
    if !verify_keyed_tag(key, body, tag) {
        return None;
    }
    read_payload(&body[1..])
}

pub fn encode_anchor_keyed_base64(anchor: &Anchor, key: &[u8]) -> Result<String, AnchorCodecError> {
    let bytes = encode_anchor_keyed(anchor, key)?;
    Ok(general_purpose::URL_SAFE_NO_PAD.encode(bytes))
}

pub fn decode_anchor_keyed_base64(encoded: &str, key: &[u8]) -> Option<Anchor> {
    let bytes = decode_lenient_base64(encoded.trim())?;
    decode_anchor_keyed(&bytes, key)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::anchor::Bias;
    use crate::codec::decode_anchor_base64;

    const KEY: &[u8] = b"replica-session-key";

    #[test]
    fn keyed_round_trip() {
        let anchor = Anchor::new("b9", 77, Bias::Before);
        let encoded = encode_anchor_keyed_base64(&anchor, KEY).expect("encode");
        assert_eq!(decode_anchor_keyed_base64(&encoded, KEY), Some(anchor));
    }

    #[test]
    fn keyed_anchor_needs_the_same_key() {
        let anchor = Anchor::new("b9", 77, Bias::Before);
        let bytes = encode_anchor_keyed(&anchor, KEY).expect("encode");
        assert_eq!(decode_anchor_keyed(&bytes, b"wrong"), None);
    }

    #[test]
    fn unkeyed_decoder_refuses_keyed_buffers() {
        let anchor = Anchor::new("b9", 77, Bias::Before);
        let encoded = encode_anchor_keyed_base64(&anchor, KEY).expect("encode");
        assert_eq!(decode_anchor_base64(&encoded), None);
    }

    #[test]
    fn tampered_payload_is_rejected() {
        let anchor = Anchor::new("b9", 77, Bias::Before);
        let mut bytes = encode_anchor_keyed(&anchor, KEY).expect("encode");
        bytes[4] ^= 0x01;
        assert_eq!(decode_anchor_keyed(&bytes, KEY), None);
    }
}
