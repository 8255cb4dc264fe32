use std::collections::{BTreeSet, HashMap};

use crate::model::Annotation;

/// Reverse index from block id to the annotations depending on it.
#[derive(Clone, Debug, Default)]
pub struct BlockIndex {
    by_block: HashMap<String, BTreeSet<String>>,
    by_annotation: HashMap<String, BTreeSet<String>>,
}

impl BlockIndex {
    pub fn new() -> Self {
        Self::default()
    }

    /// Index `annotation`, replacing whatever was recorded for it before.
    pub fn upsert(&mut self, annotation: &Annotation) {
        self.remove(&annotation.id);
        let blocks: BTreeSet<String> = annotation.block_ids().map(str::to_string).collect();
        for block_id in &blocks {
            self.by_block
                .entry(block_id.clone())
                .or_default()
                .insert(annotation.id.clone());
        }
        self.by_annotation.insert(annotation.id.clone(), blocks);
    }

    pub fn remove(&mut self, annotation_id: &str) {
        let Some(blocks) = self.by_annotation.remove(annotation_id) else {
            return;
        };
        for block_id in blocks {
            if let Some(ids) = self.by_block.get_mut(&block_id) {
                ids.remove(annotation_id);
                if ids.is_empty() {
                    self.by_block.remove(&block_id);
                }
            }
        }
    }

    pub fn annotations_for_block(&self, block_id: &str) -> impl Iterator<Item = &str> {
        self.by_block
            .get(block_id)
            .into_iter()
            .flat_map(|ids| ids.iter().map(String::as_str))
    }

    /// Sorted, deduplicated annotation ids touching any of `changed`.
    pub fn affected<'a, I>(&self, changed: I) -> BTreeSet<String>
    where
        I: IntoIterator<Item = &'a String>,
    {
        let mut affected = BTreeSet::new();
        for block_id in changed {
            if let Some(ids) = self.by_block.get(block_id) {
                affected.extend(ids.iter().cloned());
            }
        }
        affected
    }

    pub fn block_count(&self) -> usize {
        self.by_block.len()
    }
}
