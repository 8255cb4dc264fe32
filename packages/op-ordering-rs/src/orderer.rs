use anchor_relocation_rs::StructuralDelta;
use std::collections::BTreeMap;
use tracing::debug;

use crate::OrderingError;
use crate::resolve::resolve_pair;
use crate::types::{OpId, OrderedBatch, Resolution, StructuralOp, StructuralOpKind};

/// Sort, dedupe and resolve a set of concurrent structural operations.
///
/// Any permutation of the same input yields the same batch.
pub fn order_operations(ops: Vec<StructuralOp>) -> Result<OrderedBatch, OrderingError> {
    let mut orderer = OperationOrderer::new();
    for op in ops {
        orderer.ingest(op)?;
    }
    Ok(orderer.resolve())
}

/// Buffers remote operations until the caller asks for a resolved batch.
#[derive(Debug, Default)]
pub struct OperationOrderer {
    pending: BTreeMap<OpId, StructuralOp>,
    duplicates: usize,
}

impl OperationOrderer {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.pending.len()
    }

    pub fn is_empty(&self) -> bool {
        self.pending.is_empty()
    }

    /// Returns `false` when the same operation was already buffered.
    pub fn ingest(&mut self, op: StructuralOp) -> Result<bool, OrderingError> {
        validate_op(&op)?;
        if let Some(existing) = self.pending.get(&op.id) {
            if *existing != op {
                return Err(OrderingError::ConflictingDuplicate(op.id));
            }
            self.duplicates += 1;
            return Ok(false);
        }
        self.pending.insert(op.id.clone(), op);
        Ok(true)
    }

    /// Drain the buffer into a resolved batch.
    pub fn resolve(&mut self) -> OrderedBatch {
        let mut ops: Vec<StructuralOp> = std::mem::take(&mut self.pending).into_values().collect();
        ops.sort_by(|a, b| a.compare(b));

        let mut batch = OrderedBatch {
            duplicates: std::mem::take(&mut self.duplicates),
            ..OrderedBatch::default()
        };

        for op in ops {
            admit(&mut batch, op);
        }
        batch
    }
}

fn validate_op(op: &StructuralOp) -> Result<(), OrderingError> {
    if op.id.peer.is_empty() {
        return Err(OrderingError::EmptyPeer);
    }
    let blank = match &op.op {
        StructuralOpKind::Split {
            block_id,
            new_block_id,
            ..
        } => block_id.is_empty() || new_block_id.is_empty() || block_id == new_block_id,
        StructuralOpKind::Join {
            left_block_id,
            right_block_id,
            ..
        } => left_block_id.is_empty() || right_block_id.is_empty() || left_block_id == right_block_id,
        StructuralOpKind::Reparent {
            block_id,
            new_parent_id,
            ..
        } => block_id.is_empty() || new_parent_id.as_deref() == Some(block_id.as_str()),
    };
    if blank {
        return Err(OrderingError::InvalidOperation(op.id.clone()));
    }
    Ok(())
}

/// Greedy acceptance in sorted order: the candidate is checked against every
/// operation already applied.
fn admit(batch: &mut OrderedBatch, candidate: StructuralOp) {
    let mut beaten = false;
    let mut losers: Vec<usize> = Vec::new();
    let mut dropped_with: Vec<usize> = Vec::new();

    for (index, applied) in batch.applied.iter().enumerate() {
        let Some(decision) = resolve_pair(applied, &candidate) else {
            continue;
        };
        match decision.resolution {
            Resolution::AWins => beaten = true,
            Resolution::BWins => losers.push(index),
            Resolution::Dropped => {
                beaten = true;
                dropped_with.push(index);
            }
        }
        debug!(
            a = %decision.a,
            b = %decision.b,
            resolution = ?decision.resolution,
            reason = %decision.reason,
            "structural conflict resolved"
        );
        batch.decisions.push(decision);
    }

    let removed = if beaten { dropped_with } else { losers };
    for index in removed.into_iter().rev() {
        let op = batch.applied.remove(index);
        batch.rejected.push(op.id);
    }

    if beaten {
        batch.rejected.push(candidate.id);
    } else {
        batch.applied.push(candidate);
    }
}

impl OrderedBatch {
    /// Deltas for the block mapper, in application order.
    pub fn to_structural_deltas(&self) -> Vec<StructuralDelta> {
        self.applied
            .iter()
            .map(|op| match &op.op {
                StructuralOpKind::Split {
                    block_id,
                    offset,
                    new_block_id,
                } => StructuralDelta::SplitBlock {
                    block_id: block_id.clone(),
                    at: *offset,
                    new_block_id: new_block_id.clone(),
                },
                StructuralOpKind::Join {
                    left_block_id,
                    right_block_id,
                    left_len,
                } => StructuralDelta::JoinBlocks {
                    left_block_id: left_block_id.clone(),
                    right_block_id: right_block_id.clone(),
                    left_len: *left_len,
                },
                StructuralOpKind::Reparent { block_id, .. } => StructuralDelta::MoveBlock {
                    block_id: block_id.clone(),
                },
            })
            .collect()
    }
}
