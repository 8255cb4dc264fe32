use anchor_codec_rs::{Anchor, Bias};
use serde::{Deserialize, Serialize};
use std::collections::{HashMap, HashSet, VecDeque};

/// One structural change reported by the document engine. Offsets are UTF-16.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum StructuralDelta {
    #[serde(rename_all = "camelCase")]
    InsertText {
        block_id: String,
        offset: u32,
        len: u32,
    },
    #[serde(rename_all = "camelCase")]
    DeleteText {
        block_id: String,
        offset: u32,
        len: u32,
    },
    #[serde(rename_all = "camelCase")]
    SplitBlock {
        block_id: String,
        at: u32,
        new_block_id: String,
    },
    #[serde(rename_all = "camelCase")]
    JoinBlocks {
        left_block_id: String,
        right_block_id: String,
        left_len: u32,
    },
    #[serde(rename_all = "camelCase")]
    DeleteBlock { block_id: String },
    #[serde(rename_all = "camelCase")]
    ReplaceBlock {
        block_id: String,
        replacement_ids: Vec<String>,
    },
    #[serde(rename_all = "camelCase")]
    MoveBlock { block_id: String },
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MappedPosition {
    pub new_block_id: String,
    pub new_offset: u32,
}

/// Position mapping derived from one batch of structural deltas.
///
/// Pure and ephemeral: build one per verification pass, never persist it.
#[derive(Clone, Debug, Default)]
pub struct BlockMapping {
    deltas: Vec<StructuralDelta>,
    successors: HashMap<String, Vec<String>>,
    removed: HashSet<String>,
}

impl BlockMapping {
    pub fn new(deltas: Vec<StructuralDelta>) -> Self {
        let mut successors: HashMap<String, Vec<String>> = HashMap::new();
        let mut removed = HashSet::new();

        for delta in &deltas {
            match delta {
                StructuralDelta::SplitBlock {
                    block_id,
                    new_block_id,
                    ..
                } => {
                    successors
                        .entry(block_id.clone())
                        .or_default()
                        .push(new_block_id.clone());
                    removed.remove(new_block_id);
                }
                StructuralDelta::JoinBlocks {
                    left_block_id,
                    right_block_id,
                    ..
                } => {
                    successors
                        .entry(right_block_id.clone())
                        .or_default()
                        .push(left_block_id.clone());
                    removed.insert(right_block_id.clone());
                }
                StructuralDelta::DeleteBlock { block_id } => {
                    removed.insert(block_id.clone());
                }
                StructuralDelta::ReplaceBlock {
                    block_id,
                    replacement_ids,
                } => {
                    successors
                        .entry(block_id.clone())
                        .or_default()
                        .extend(replacement_ids.iter().cloned());
                    removed.insert(block_id.clone());
                    for id in replacement_ids {
                        removed.remove(id);
                    }
                }
                StructuralDelta::InsertText { .. }
                | StructuralDelta::DeleteText { .. }
                | StructuralDelta::MoveBlock { .. } => {}
            }
        }

        Self {
            deltas,
            successors,
            removed,
        }
    }

    pub fn deltas(&self) -> &[StructuralDelta] {
        &self.deltas
    }

    pub fn is_empty(&self) -> bool {
        self.deltas.is_empty()
    }

    /// Map with the default `after` bias.
    pub fn map_old_to_new(&self, block_id: &str, offset: u32) -> Option<MappedPosition> {
        self.map_position(block_id, offset, Bias::After)
    }

    pub fn map_anchor(&self, anchor: &Anchor) -> Option<Anchor> {
        self.map_position(&anchor.block_id, anchor.offset, anchor.bias)
            .map(|mapped| anchor.with_position(mapped.new_block_id, mapped.new_offset))
    }

    pub fn map_position(&self, block_id: &str, offset: u32, bias: Bias) -> Option<MappedPosition> {
        let mut current_block = block_id.to_string();
        let mut current_offset = offset;

        for delta in &self.deltas {
            match delta {
                StructuralDelta::InsertText {
                    block_id,
                    offset: at,
                    len,
                } if *block_id == current_block => {
                    let moves = current_offset > *at || (current_offset == *at && bias == Bias::After);
                    if moves {
                        current_offset = current_offset.saturating_add(*len);
                    }
                }
                StructuralDelta::DeleteText {
                    block_id,
                    offset: at,
                    len,
                } if *block_id == current_block => {
                    let end = at.saturating_add(*len);
                    if current_offset >= end {
                        current_offset -= len;
                    } else if current_offset > *at {
                        current_offset = *at;
                    }
                }
                StructuralDelta::SplitBlock {
                    block_id,
                    at,
                    new_block_id,
                } if *block_id == current_block => {
                    let moves = current_offset > *at || (current_offset == *at && bias == Bias::After);
                    if moves {
                        current_block = new_block_id.clone();
                        current_offset -= at;
                    }
                }
                StructuralDelta::JoinBlocks {
                    left_block_id,
                    right_block_id,
                    left_len,
                } if *right_block_id == current_block => {
                    current_block = left_block_id.clone();
                    current_offset = current_offset.saturating_add(*left_len);
                }
                StructuralDelta::DeleteBlock { block_id }
                | StructuralDelta::ReplaceBlock { block_id, .. }
                    if *block_id == current_block =>
                {
                    return None;
                }
                _ => {}
            }
        }

        Some(MappedPosition {
            new_block_id: current_block,
            new_offset: current_offset,
        })
    }

    /// Transitive successors of `block_id` in creation order, excluding itself.
    pub fn derived_blocks_from(&self, block_id: &str) -> Vec<String> {
        let mut ordered = Vec::new();
        let mut seen: HashSet<&str> = HashSet::from([block_id]);
        let mut queue: VecDeque<&str> = VecDeque::from([block_id]);

        while let Some(current) = queue.pop_front() {
            let Some(next) = self.successors.get(current) else {
                continue;
            };
            for successor in next {
                if seen.insert(successor.as_str()) {
                    ordered.push(successor.clone());
                    queue.push_back(successor.as_str());
                }
            }
        }

        ordered
    }

    pub fn is_removed(&self, block_id: &str) -> bool {
        self.removed.contains(block_id)
    }

    /// Blocks touched by the batch, used to scope incremental verification.
    pub fn touched_blocks(&self) -> HashSet<String> {
        let mut touched = HashSet::new();
        for delta in &self.deltas {
            match delta {
                StructuralDelta::InsertText { block_id, .. }
                | StructuralDelta::DeleteText { block_id, .. }
                | StructuralDelta::DeleteBlock { block_id }
                | StructuralDelta::MoveBlock { block_id } => {
                    touched.insert(block_id.clone());
                }
                StructuralDelta::SplitBlock {
                    block_id,
                    new_block_id,
                    ..
                } => {
                    touched.insert(block_id.clone());
                    touched.insert(new_block_id.clone());
                }
                StructuralDelta::JoinBlocks {
                    left_block_id,
                    right_block_id,
                    ..
                } => {
                    touched.insert(left_block_id.clone());
                    touched.insert(right_block_id.clone());
                }
                StructuralDelta::ReplaceBlock {
                    block_id,
                    replacement_ids,
                } => {
                    touched.insert(block_id.clone());
                    touched.extend(replacement_ids.iter().cloned());
                }
            }
        }
        touched
    }
}
