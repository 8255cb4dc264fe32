mod document;
mod mapping;
mod relocate;
mod similarity;

pub use document::{BlockInput, DocumentSnapshot, to_utf16, utf16_len, utf16_slice};
pub use mapping::{BlockMapping, MappedPosition, StructuralDelta};
pub use relocate::{
    CONTEXT_WINDOW, RelocationConfig, RelocationDebug, RelocationMethod, RelocationRequest,
    RelocationResult, capture_context_hash, fuzzy_relocate_anchor, resolve_anchor,
};
pub use similarity::{
    SubstringMatch, compute_fuzzy_context_hash, compute_ngram_similarity, compute_text_similarity,
    find_substring_matches,
};
