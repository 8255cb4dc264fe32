mod hash;
mod manifest;
mod negotiate;

pub use hash::compute_policy_hash;
pub use manifest::{
    ANCHOR_FORMATS, AiSanitizationPolicy, AnchorEncoding, COORDS_UTF16, Capabilities, ChainPolicy,
    CheckpointSettings, DegradationTolerance, IntegrityPolicy, LFCC_VERSION, PolicyManifest,
    RelocationPolicy, validate_manifest,
};
pub use negotiate::{DegradationStep, NegotiatedPolicy, negotiate};

pub use ai_context_hash_rs::ChainPolicyKind;

#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum ManifestError {
    #[error("manifest field {0} must not be empty")]
    EmptyField(&'static str),
    #[error("unsupported coordinate space: {0}")]
    UnsupportedCoords(String),
    #[error("unknown anchor encoding format: {0}")]
    UnknownAnchorFormat(String),
    #[error("checkpoint {0} must be greater than zero")]
    InvalidCheckpoint(&'static str),
    #[error("fuzzy threshold {0} is outside [0, 1]")]
    InvalidThreshold(f64),
    #[error("failed to serialize manifest: {0}")]
    Serialize(String),
}

#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum NegotiationError {
    #[error("no manifests to negotiate")]
    NoParticipants,
    #[error("participant {index} sent an invalid manifest: {source}")]
    InvalidManifest {
        index: usize,
        #[source]
        source: ManifestError,
    },
    #[error("incompatible {field}: {values:?}")]
    Incompatible {
        field: &'static str,
        values: Vec<String>,
    },
    #[error("participant {participant} refuses to downgrade {field}")]
    DowngradeRefused { field: String, participant: usize },
}
