mod orderer;
mod resolve;
mod types;

pub use orderer::{OperationOrderer, order_operations};
pub use resolve::resolve_pair;
pub use types::{ConflictDecision, OpId, OrderedBatch, Resolution, StructuralOp, StructuralOpKind};

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum OrderingError {
    #[error("operation peer id must not be empty")]
    EmptyPeer,
    #[error("operation {0} references missing or identical blocks")]
    InvalidOperation(OpId),
    #[error("operation id {0} was reused with different content")]
    ConflictingDuplicate(OpId),
}
