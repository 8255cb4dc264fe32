mod index;
mod model;
mod scheduler;
mod state;
mod store;
mod verifier;

pub use index::BlockIndex;
pub use model::{Annotation, Chain, DisplayState, Span};
pub use scheduler::{CheckpointPolicy, CheckpointScheduler, CheckpointTicket};
pub use state::{DerivedState, GraceWindow, SpanStatus, derive_display_state};
pub use store::{AnnotationStore, Checkpoint, StoreConfig};
pub use verifier::{
    AnnotationCheck, CheckpointFailure, FailureKind, IntegritySettings, SpanCheck, SpanLocation,
    VerificationContext, mapped_chain_blocks, verify_annotation,
};

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum IntegrityError {
    #[error("{0} id must not be empty")]
    EmptyId(&'static str),
    #[error("annotation {0} has no spans")]
    NoSpans(String),
    #[error("span {span_id} does not belong to annotation {annotation_id}")]
    SpanOwnerMismatch { span_id: String, annotation_id: String },
    #[error("span {span_id} has invalid range [{start}, {end})")]
    InvalidRange { span_id: String, start: u32, end: u32 },
    #[error("span {0} appears twice")]
    DuplicateSpan(String),
    #[error("annotation {0} declares an empty chain")]
    EmptyChain(String),
    #[error("block {0} is not in the document")]
    UnknownBlock(String),
    #[error("annotation {0} already exists")]
    DuplicateAnnotation(String),
    #[error("annotation {0} is not known")]
    UnknownAnnotation(String),
}
