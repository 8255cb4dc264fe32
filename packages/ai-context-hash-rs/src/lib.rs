use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use std::collections::BTreeMap;
use std::fmt;

const SPAN_DOMAIN: &str = "LFCC_SPAN_V1";
const CHAIN_DOMAIN: &str = "LFCC_CHAIN_V1";
const FRONTIER_DOMAIN: &str = "LFCC_FRONTIER_V1";
const DOCUMENT_DOMAIN: &str = "LFCC_DOC_V1";

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ChainPolicyKind {
    StrictAdjacency,
    RequiredOrder,
    BoundedGap,
}

impl ChainPolicyKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            ChainPolicyKind::StrictAdjacency => "strict_adjacency",
            ChainPolicyKind::RequiredOrder => "required_order",
            ChainPolicyKind::BoundedGap => "bounded_gap",
        }
    }

    /// Higher is stricter: strict adjacency implies required order, which
    /// implies any bounded gap.
    pub fn strictness(&self) -> u8 {
        match self {
            ChainPolicyKind::StrictAdjacency => 2,
            ChainPolicyKind::RequiredOrder => 1,
            ChainPolicyKind::BoundedGap => 0,
        }
    }
}

impl fmt::Display for ChainPolicyKind {
    fn fmt(&self, formatter: &mut fmt::Formatter<'_>) -> fmt::Result {
        formatter.write_str(self.as_str())
    }
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SpanHashInput {
    pub span_id: String,
    pub block_id: String,
    pub text: String,
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ChainHashInput {
    pub policy_kind: ChainPolicyKind,
    pub max_intervening_blocks: u32,
    pub block_ids: Vec<String>,
}

pub fn sha256_hex(input: &str) -> String {
    let mut hasher = Sha256::new();
    hasher.update(input.as_bytes());
    hex::encode(hasher.finalize())
}

/// CRLF and lone CR become LF so hashes agree across platforms.
pub fn normalize_line_feeds(text: &str) -> String {
    if !text.contains('\r') {
        return text.to_string();
    }
    text.replace("\r\n", "\n").replace('\r', "\n")
}

pub fn compute_context_hash(input: &SpanHashInput) -> String {
    context_hash(&input.span_id, &input.block_id, &input.text)
}

pub fn context_hash(span_id: &str, block_id: &str, text: &str) -> String {
    let canonical = format!(
        "{SPAN_DOMAIN}\nspan_id={}\nblock_id={}\ntext={}",
        span_id,
        block_id,
        normalize_line_feeds(text)
    );
    sha256_hex(&canonical)
}

pub fn compute_chain_hash(input: &ChainHashInput) -> String {
    // JSON keeps ids containing separators unambiguous
    let block_ids = serde_json::to_string(&input.block_ids).unwrap_or_default();
    let canonical = format!(
        "{CHAIN_DOMAIN}\npolicy_kind={}\nmax_intervening_blocks={}\nblock_ids={}",
        input.policy_kind, input.max_intervening_blocks, block_ids
    );
    sha256_hex(&canonical)
}

/// Digest of a version vector, used as the optimistic-concurrency token.
pub fn compute_frontier_tag(version_vector: &BTreeMap<String, u64>) -> String {
    let mut canonical = String::from(FRONTIER_DOMAIN);
    for (peer, counter) in version_vector {
        canonical.push('\n');
        canonical.push_str(peer);
        canonical.push(':');
        canonical.push_str(&counter.to_string());
    }
    sha256_hex(&canonical)
}

/// Whole-document checksum over per-block digests, in document order.
pub fn compute_document_checksum<'a, I>(blocks: I) -> String
where
    I: IntoIterator<Item = (&'a str, &'a str)>,
{
    let mut canonical = String::from(DOCUMENT_DOMAIN);
    for (block_id, text) in blocks {
        canonical.push('\n');
        canonical.push_str(&sha256_hex(block_id));
        canonical.push(':');
        canonical.push_str(&sha256_hex(&normalize_line_feeds(text)));
    }
    sha256_hex(&canonical)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn span(text: &str) -> SpanHashInput {
        SpanHashInput {
            span_id: "s1".to_string(),
            block_id: "b1".to_string(),
            text: text.to_string(),
        }
    }

    #[test]
    fn sha256_matches_reference_vector() {
        assert_eq!(
            sha256_hex("abc"),
            "ba7816bf8f01cfea414140de5dae2223b00361a396177a9cb410ff61f20015ad"
        );
    }

    #[test]
    fn context_hash_is_deterministic_and_line_feed_normalized() {
        let hash = compute_context_hash(&span("line one\nline two"));
        assert_eq!(hash.len(), 64);
        assert_eq!(hash, compute_context_hash(&span("line one\r\nline two")));
        assert_eq!(hash, compute_context_hash(&span("line one\rline two")));
        assert_ne!(hash, compute_context_hash(&span("line one line two")));
    }

    #[test]
    fn context_hash_binds_identity() {
        let base = compute_context_hash(&span("text"));
        let mut moved = span("text");
        moved.block_id = "b2".to_string();
        assert_ne!(base, compute_context_hash(&moved));
    }

    #[test]
    fn chain_hash_depends_on_order_and_policy() {
        let input = ChainHashInput {
            policy_kind: ChainPolicyKind::StrictAdjacency,
            max_intervening_blocks: 0,
            block_ids: vec!["a".to_string(), "b".to_string()],
        };
        let base = compute_chain_hash(&input);

        let mut reordered = input.clone();
        reordered.block_ids.reverse();
        assert_ne!(base, compute_chain_hash(&reordered));

        let mut relaxed = input.clone();
        relaxed.policy_kind = ChainPolicyKind::BoundedGap;
        assert_ne!(base, compute_chain_hash(&relaxed));

        let mut split_ids = input;
        split_ids.block_ids = vec!["a,b".to_string()];
        assert_ne!(base, compute_chain_hash(&split_ids));
    }

    #[test]
    fn frontier_tag_ignores_insertion_order() {
        let mut a = BTreeMap::new();
        a.insert("peer-b".to_string(), 3);
        a.insert("peer-a".to_string(), 7);
        let mut b = BTreeMap::new();
        b.insert("peer-a".to_string(), 7);
        b.insert("peer-b".to_string(), 3);
        assert_eq!(compute_frontier_tag(&a), compute_frontier_tag(&b));

        b.insert("peer-b".to_string(), 4);
        assert_ne!(compute_frontier_tag(&a), compute_frontier_tag(&b));
    }

    #[test]
    fn document_checksum_tracks_block_order() {
        let forward = compute_document_checksum([("a", "one"), ("b", "two")]);
        let backward = compute_document_checksum([("b", "two"), ("a", "one")]);
        assert_ne!(forward, backward);
        assert_eq!(forward, compute_document_checksum([("a", "one"), ("b", "two")]));
    }

    #[test]
    fn chain_policy_strictness_orders_kinds() {
        assert!(ChainPolicyKind::StrictAdjacency.strictness() > ChainPolicyKind::RequiredOrder.strictness());
        assert!(ChainPolicyKind::RequiredOrder.strictness() > ChainPolicyKind::BoundedGap.strictness());
    }
}
