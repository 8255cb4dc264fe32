use serde::{Deserialize, Serialize};
use std::cmp::Ordering;
use std::fmt;

/// Operation identity: the issuing replica and its local counter.
#[derive(Clone, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct OpId {
    pub peer: String,
    pub counter: u64,
}

impl OpId {
    pub fn new(peer: impl Into<String>, counter: u64) -> Self {
        Self {
            peer: peer.into(),
            counter,
        }
    }
}

impl fmt::Display for OpId {
    fn fmt(&self, formatter: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(formatter, "{}@{}", self.counter, self.peer)
    }
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum StructuralOpKind {
    #[serde(rename_all = "camelCase")]
    Split {
        block_id: String,
        offset: u32,
        new_block_id: String,
    },
    #[serde(rename_all = "camelCase")]
    Join {
        left_block_id: String,
        right_block_id: String,
        left_len: u32,
    },
    #[serde(rename_all = "camelCase")]
    Reparent {
        block_id: String,
        new_parent_id: Option<String>,
        index: u32,
    },
}

impl StructuralOpKind {
    pub fn name(&self) -> &'static str {
        match self {
            StructuralOpKind::Split { .. } => "split",
            StructuralOpKind::Join { .. } => "join",
            StructuralOpKind::Reparent { .. } => "reparent",
        }
    }
}

/// A structural operation as delivered by the transport, in any order.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StructuralOp {
    pub id: OpId,
    /// Causal clock from the document engine.
    pub lamport: u64,
    pub op: StructuralOpKind,
}

impl StructuralOp {
    pub fn new(id: OpId, lamport: u64, op: StructuralOpKind) -> Self {
        Self { id, lamport, op }
    }

    pub fn split(id: OpId, lamport: u64, block_id: &str, offset: u32, new_block_id: &str) -> Self {
        Self::new(
            id,
            lamport,
            StructuralOpKind::Split {
                block_id: block_id.to_string(),
                offset,
                new_block_id: new_block_id.to_string(),
            },
        )
    }

    pub fn join(id: OpId, lamport: u64, left: &str, right: &str, left_len: u32) -> Self {
        Self::new(
            id,
            lamport,
            StructuralOpKind::Join {
                left_block_id: left.to_string(),
                right_block_id: right.to_string(),
                left_len,
            },
        )
    }

    pub fn reparent(id: OpId, lamport: u64, block_id: &str, new_parent_id: Option<&str>, index: u32) -> Self {
        Self::new(
            id,
            lamport,
            StructuralOpKind::Reparent {
                block_id: block_id.to_string(),
                new_parent_id: new_parent_id.map(str::to_string),
                index,
            },
        )
    }

    /// Lamport clock, then peer, then counter. Independent of arrival order.
    pub fn compare(&self, other: &Self) -> Ordering {
        self.lamport
            .cmp(&other.lamport)
            .then_with(|| self.id.peer.cmp(&other.id.peer))
            .then_with(|| self.id.counter.cmp(&other.id.counter))
    }

    pub fn precedes(&self, other: &Self) -> bool {
        self.compare(other) == Ordering::Less
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Resolution {
    AWins,
    BWins,
    Dropped,
}

/// Audit record of one pairwise conflict.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ConflictDecision {
    pub a: OpId,
    pub b: OpId,
    pub resolution: Resolution,
    pub reason: String,
}

#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct OrderedBatch {
    pub applied: Vec<StructuralOp>,
    pub rejected: Vec<OpId>,
    pub decisions: Vec<ConflictDecision>,
    pub duplicates: usize,
}
