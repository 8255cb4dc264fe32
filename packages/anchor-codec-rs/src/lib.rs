mod anchor;
mod checksum;
mod codec;
mod keyed;
mod legacy;

pub use anchor::{Anchor, Bias, MAX_BLOCK_ID_BYTES, MAX_OFFSET};
pub use checksum::{adler32_hex, adler32_utf16, crc32, hmac_sha256, verify_crc32};
pub use codec::{
    ANCHOR_VERSION_KEYED, ANCHOR_VERSION_V1, decode_anchor, decode_anchor_base64, encode_anchor,
    encode_anchor_base64,
};
pub use keyed::{
    decode_anchor_keyed, decode_anchor_keyed_base64, encode_anchor_keyed,
    encode_anchor_keyed_base64,
};
pub use legacy::{encode_legacy_json, encode_legacy_plain};

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum AnchorCodecError {
    #[error("anchor blockId must not be empty")]
    EmptyBlockId,
    #[error("anchor blockId is {len} bytes, limit is {max}")]
    BlockIdTooLong { len: usize, max: usize },
    #[error("anchor offset {0} exceeds the i32 range")]
    OffsetOutOfRange(u32),
    #[error("invalid anchor key")]
    InvalidKey,
}
