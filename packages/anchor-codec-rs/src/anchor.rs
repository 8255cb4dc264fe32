use serde::{Deserialize, Serialize};
use std::fmt;

/// Largest offset representable on the wire (JS hosts treat offsets as i32).
pub const MAX_OFFSET: u32 = i32::MAX as u32;
pub const MAX_BLOCK_ID_BYTES: usize = 1024;

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Bias {
    Before,
    #[default]
    After,
}

impl Bias {
    pub fn as_str(&self) -> &'static str {
        match self {
            Bias::Before => "before",
            Bias::After => "after",
        }
    }

    pub(crate) fn to_byte(self) -> u8 {
        match self {
            Bias::Before => 0,
            Bias::After => 1,
        }
    }

    pub(crate) fn from_byte(byte: u8) -> Option<Self> {
        match byte {
            0 => Some(Bias::Before),
            1 => Some(Bias::After),
            _ => None,
        }
    }

    pub fn parse(value: &str) -> Option<Self> {
        match value {
            "before" => Some(Bias::Before),
            "after" => Some(Bias::After),
            _ => None,
        }
    }
}

impl fmt::Display for Bias {
    fn fmt(&self, formatter: &mut fmt::Formatter<'_>) -> fmt::Result {
        formatter.write_str(self.as_str())
    }
}

/// A position relative to a block's content, in UTF-16 code units.
///
/// Anchors are never mutated after creation; structural changes produce a
/// new anchor through the block mapper.
#[derive(Clone, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Anchor {
    pub block_id: String,
    pub offset: u32,
    #[serde(default)]
    pub bias: Bias,
}

impl Anchor {
    pub fn new(block_id: impl Into<String>, offset: u32, bias: Bias) -> Self {
        Self {
            block_id: block_id.into(),
            offset,
            bias,
        }
    }

    pub fn with_position(&self, block_id: impl Into<String>, offset: u32) -> Self {
        Self {
            block_id: block_id.into(),
            offset,
            bias: self.bias,
        }
    }
}

impl fmt::Display for Anchor {
    fn fmt(&self, formatter: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(formatter, "{}@{}:{}", self.block_id, self.offset, self.bias)
    }
}
