use base64::{Engine as _, engine::general_purpose};
use tracing::debug;

use crate::anchor::{Anchor, Bias, MAX_BLOCK_ID_BYTES, MAX_OFFSET};
use crate::checksum::{CRC32_LEN, crc32_le_bytes, verify_crc32};
use crate::legacy;
use crate::AnchorCodecError;

pub const ANCHOR_VERSION_V1: u8 = 0x01;
pub const ANCHOR_VERSION_KEYED: u8 = 0x02;

const MAX_VARINT_BYTES: usize = 5;
// version + id len + 1-byte id + offset + bias + crc
const MIN_V1_LEN: usize = 1 + 1 + 1 + 1 + 1 + CRC32_LEN;

/// Encode into the v1 binary layout:
/// `[version][varint id len][id utf-8][varint offset][bias][crc32 le]`.
pub fn encode_anchor(anchor: &Anchor) -> Result<Vec<u8>, AnchorCodecError> {
    validate_anchor(anchor)?;
    let mut out = Vec::with_capacity(anchor.block_id.len() + 16);
    out.push(ANCHOR_VERSION_V1);
    write_payload(&mut out, anchor);
    let checksum = crc32_le_bytes(&out);
    out.extend_from_slice(&checksum);
    Ok(out)
}

/// Decode a v1 binary anchor. Any corruption yields `None`.
pub fn decode_anchor(bytes: &[u8]) -> Option<Anchor> {
    let (&version, _) = bytes.split_first()?;
    if version != ANCHOR_VERSION_V1 {
        return None;
    }
    if bytes.len() < MIN_V1_LEN {
        return None;
    }

    let (body, checksum) = bytes.split_at(bytes.len() - CRC32_LEN);
    if !verify_crc32(body, checksum) {
        return None;
    }
    read_payload(&body[1..])
}

pub fn encode_anchor_base64(anchor: &Anchor) -> Result<String, AnchorCodecError> {
    let bytes = encode_anchor(anchor)?;
    Ok(general_purpose::URL_SAFE_NO_PAD.encode(bytes))
}

/// Decode any transport form: v1 base64url, legacy JSON + Adler-32, or the
/// legacy `blockId:offset` form. All normalize to the same `Anchor`.
pub fn decode_anchor_base64(encoded: &str) -> Option<Anchor> {
    let bytes = decode_lenient_base64(encoded.trim())?;
    match *bytes.first()? {
        ANCHOR_VERSION_V1 => decode_anchor(&bytes),
        ANCHOR_VERSION_KEYED => {
            debug!("keyed anchor passed to unkeyed decoder");
            None
        }
        b'{' => legacy::decode_legacy_json(&bytes),
        _ => legacy::decode_legacy_plain(&bytes),
    }
}

pub(crate) fn decode_lenient_base64(encoded: &str) -> Option<Vec<u8>> {
    if encoded.is_empty() {
        return None;
    }
    general_purpose::URL_SAFE_NO_PAD
        .decode(encoded)
        .or_else(|_| general_purpose::URL_SAFE.decode(encoded))
        .or_else(|_| general_purpose::STANDARD.decode(encoded))
        .or_else(|_| general_purpose::STANDARD_NO_PAD.decode(encoded))
        .ok()
}

pub(crate) fn validate_anchor(anchor: &Anchor) -> Result<(), AnchorCodecError> {
    if anchor.block_id.is_empty() {
        return Err(AnchorCodecError::EmptyBlockId);
    }
    if anchor.block_id.len() > MAX_BLOCK_ID_BYTES {
        return Err(AnchorCodecError::BlockIdTooLong {
            len: anchor.block_id.len(),
            max: MAX_BLOCK_ID_BYTES,
        });
    }
    if anchor.offset > MAX_OFFSET {
        return Err(AnchorCodecError::OffsetOutOfRange(anchor.offset));
    }
    Ok(())
}

pub(crate) fn write_payload(out: &mut Vec<u8>, anchor: &Anchor) {
    write_varint(out, anchor.block_id.len() as u32);
    out.extend_from_slice(anchor.block_id.as_bytes());
    write_varint(out, anchor.offset);
    out.push(anchor.bias.to_byte());
}

/// Parse a payload that must span `bytes` exactly.
pub(crate) fn read_payload(bytes: &[u8]) -> Option<Anchor> {
    let mut cursor = 0usize;
    let id_len = read_varint(bytes, &mut cursor)? as usize;
    if id_len == 0 || id_len > MAX_BLOCK_ID_BYTES {
        return None;
    }
    let id_end = cursor.checked_add(id_len)?;
    let block_id = std::str::from_utf8(bytes.get(cursor..id_end)?).ok()?;
    cursor = id_end;

    let offset = read_varint(bytes, &mut cursor)?;
    if offset > MAX_OFFSET {
        return None;
    }

    let bias = Bias::from_byte(*bytes.get(cursor)?)?;
    cursor += 1;
    if cursor != bytes.len() {
        return None;
    }

    Some(Anchor::new(block_id, offset, bias))
}

fn write_varint(out: &mut Vec<u8>, mut value: u32) {
    loop {
        let byte = (value & 0x7f) as u8;
        value >>= 7;
        if value == 0 {
            out.push(byte);
            return;
        }
        out.push(byte | 0x80);
    }
}

fn read_varint(bytes: &[u8], cursor: &mut usize) -> Option<u32> {
    let mut value: u64 = 0;
    for index in 0..MAX_VARINT_BYTES {
        let byte = *bytes.get(*cursor)?;
        *cursor += 1;
        value |= u64::from(byte & 0x7f) << (7 * index);
        if byte & 0x80 == 0 {
            // overlong encodings end in a zero continuation group
            if index > 0 && byte == 0 {
                return None;
            }
            return u32::try_from(value).ok();
        }
    }
    None
}
