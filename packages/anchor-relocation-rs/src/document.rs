use serde::{Deserialize, Serialize};
use std::collections::HashMap;

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct BlockInput {
    pub block_id: String,
    pub content: String,
}

impl BlockInput {
    pub fn new(block_id: impl Into<String>, content: impl Into<String>) -> Self {
        Self {
            block_id: block_id.into(),
            content: content.into(),
        }
    }
}

/// Read-only view of the blocks of one document, in document order.
///
/// Supplied by the editor/session layer for every verification pass; the
/// kernel never mutates it.
#[derive(Clone, Debug, Default)]
pub struct DocumentSnapshot {
    blocks: Vec<BlockInput>,
    positions: HashMap<String, usize>,
}

impl DocumentSnapshot {
    pub fn new(blocks: Vec<BlockInput>) -> Self {
        let mut positions = HashMap::with_capacity(blocks.len());
        for (index, block) in blocks.iter().enumerate() {
            // first occurrence wins if an id repeats
            positions.entry(block.block_id.clone()).or_insert(index);
        }
        Self { blocks, positions }
    }

    pub fn from_pairs<I, K, V>(pairs: I) -> Self
    where
        I: IntoIterator<Item = (K, V)>,
        K: Into<String>,
        V: Into<String>,
    {
        Self::new(
            pairs
                .into_iter()
                .map(|(id, content)| BlockInput::new(id, content))
                .collect(),
        )
    }

    pub fn blocks(&self) -> &[BlockInput] {
        &self.blocks
    }

    pub fn len(&self) -> usize {
        self.blocks.len()
    }

    pub fn is_empty(&self) -> bool {
        self.blocks.is_empty()
    }

    pub fn contains(&self, block_id: &str) -> bool {
        self.positions.contains_key(block_id)
    }

    pub fn position(&self, block_id: &str) -> Option<usize> {
        self.positions.get(block_id).copied()
    }

    pub fn block_text(&self, block_id: &str) -> Option<&str> {
        self.position(block_id)
            .map(|index| self.blocks[index].content.as_str())
    }

    pub fn block_at(&self, index: usize) -> Option<&BlockInput> {
        self.blocks.get(index)
    }

    /// UTF-16 length of a block's content.
    pub fn block_len(&self, block_id: &str) -> Option<u32> {
        self.block_text(block_id).map(|text| utf16_len(text) as u32)
    }
}

pub fn to_utf16(value: &str) -> Vec<u16> {
    value.encode_utf16().collect()
}

pub fn utf16_len(value: &str) -> usize {
    value.encode_utf16().count()
}

/// Slice `[start, end)` in UTF-16 units. `None` when out of range or when a
/// boundary would split a surrogate pair.
pub fn utf16_slice(value: &str, start: u32, end: u32) -> Option<String> {
    let units = to_utf16(value);
    let (start, end) = (start as usize, end as usize);
    if start > end || end > units.len() {
        return None;
    }
    String::from_utf16(&units[start..end]).ok()
}
