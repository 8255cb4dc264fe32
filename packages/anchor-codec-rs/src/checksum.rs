use hmac::{Hmac, Mac};
use sha2::Sha256;

use crate::AnchorCodecError;

type HmacSha256 = Hmac<Sha256>;

const CRC32_POLY: u32 = 0xedb88320;
const ADLER_MOD: u32 = 65521;

pub const CRC32_LEN: usize = 4;
pub const KEYED_TAG_LEN: usize = 16;

/// IEEE CRC-32 (reflected polynomial), as used by zlib and PNG.
pub fn crc32(data: &[u8]) -> u32 {
    let mut crc: u32 = 0xffffffff;
    for byte in data {
        crc ^= u32::from(*byte);
        for _ in 0..8 {
            if crc & 1 == 1 {
                crc = (crc >> 1) ^ CRC32_POLY;
            } else {
                crc >>= 1;
            }
        }
    }
    crc ^ 0xffffffff
}

pub fn crc32_le_bytes(data: &[u8]) -> [u8; CRC32_LEN] {
    crc32(data).to_le_bytes()
}

pub fn verify_crc32(data: &[u8], expected: &[u8]) -> bool {
    if expected.len() != CRC32_LEN {
        return false;
    }
    crc32_le_bytes(data).as_slice() == expected
}

/// Adler-32 over UTF-16 code units. Legacy anchors were checksummed in the
/// editor host, which only ever saw JS strings.
pub fn adler32_utf16(input: &str) -> u32 {
    let mut a: u32 = 1;
    let mut b: u32 = 0;
    for code_unit in input.encode_utf16() {
        a = (a + u32::from(code_unit)) % ADLER_MOD;
        b = (b + a) % ADLER_MOD;
    }
    (b << 16) | a
}

pub fn adler32_hex(input: &str) -> String {
    format!("{:x}", adler32_utf16(input))
}

pub fn hmac_sha256(key: &[u8], message: &[u8]) -> Result<[u8; 32], AnchorCodecError> {
    let mut mac = HmacSha256::new_from_slice(key).map_err(|_| AnchorCodecError::InvalidKey)?;
    mac.update(message);
    let digest = mac.finalize().into_bytes();
    let mut out = [0u8; 32];
    out.copy_from_slice(&digest);
    Ok(out)
}

pub fn keyed_tag(key: &[u8], message: &[u8]) -> Result<[u8; KEYED_TAG_LEN], AnchorCodecError> {
    let full = hmac_sha256(key, message)?;
    let mut tag = [0u8; KEYED_TAG_LEN];
    tag.copy_from_slice(&full[..KEYED_TAG_LEN]);
    Ok(tag)
}

pub fn verify_keyed_tag(key: &[u8], message: &[u8], tag: &[u8]) -> bool {
    if tag.len() != KEYED_TAG_LEN {
        return false;
    }
    let Ok(mut mac) = HmacSha256::new_from_slice(key) else {
        return false;
    };
    mac.update(message);
    mac.verify_truncated_left(tag).is_ok()
}
