use policy_manifest_rs::PolicyManifest;
use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;

use crate::GatewayConfigError;

const DEFAULT_MAX_PAYLOAD_BYTES: u64 = 1024 * 1024;
const DEFAULT_MAX_NESTING_DEPTH: usize = 100;
const DEFAULT_MAX_ATTRIBUTE_COUNT: usize = 1000;
const DEFAULT_RATE_LIMIT_REQUESTS: usize = 60;
const DEFAULT_RATE_LIMIT_WINDOW_MS: u64 = 60_000;
const DEFAULT_URL_PROTOCOLS: [&str; 3] = ["https:", "http:", "mailto:"];
const DEFAULT_BLOCK_TYPES: [&str; 6] = ["paragraph", "heading", "list", "list_item", "quote", "code_block"];
const DEFAULT_MARKS: [&str; 6] = ["bold", "italic", "underline", "strike", "code", "link"];

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RateLimitConfig {
    pub max_requests: usize,
    pub window_ms: u64,
}

impl Default for RateLimitConfig {
    fn default() -> Self {
        Self {
            max_requests: DEFAULT_RATE_LIMIT_REQUESTS,
            window_ms: DEFAULT_RATE_LIMIT_WINDOW_MS,
        }
    }
}

#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct GatewayConfig {
    pub max_payload_bytes: Option<u64>,
    pub max_nesting_depth: Option<usize>,
    pub max_attribute_count: Option<usize>,
    pub allowed_url_protocols: Option<Vec<String>>,
    pub allowed_block_types: Option<BTreeSet<String>>,
    pub allowed_marks: Option<BTreeSet<String>>,
    /// Reject payloads with block types outside `allowed_block_types`
    /// instead of dropping them.
    pub reject_unknown_structure: Option<bool>,
    /// `None` disables rate limiting.
    pub rate_limit: Option<RateLimitConfig>,
}

impl GatewayConfig {
    pub fn validate(&self) -> Result<(), GatewayConfigError> {
        if self.max_payload_bytes == Some(0) {
            return Err(GatewayConfigError::ZeroLimit("maxPayloadBytes"));
        }
        if self.max_nesting_depth == Some(0) {
            return Err(GatewayConfigError::ZeroLimit("maxNestingDepth"));
        }
        if let Some(rate_limit) = &self.rate_limit {
            if rate_limit.max_requests == 0 {
                return Err(GatewayConfigError::ZeroLimit("rateLimit.maxRequests"));
            }
            if rate_limit.window_ms == 0 {
                return Err(GatewayConfigError::ZeroLimit("rateLimit.windowMs"));
            }
        }
        if let Some(protocols) = &self.allowed_url_protocols {
            if let Some(bad) = protocols.iter().find(|proto| !proto.trim().ends_with(':')) {
                return Err(GatewayConfigError::InvalidProtocol(bad.clone()));
            }
        }
        Ok(())
    }

    pub fn max_payload_bytes(&self) -> u64 {
        self.max_payload_bytes.unwrap_or(DEFAULT_MAX_PAYLOAD_BYTES)
    }

    pub fn max_nesting_depth(&self) -> usize {
        self.max_nesting_depth.unwrap_or(DEFAULT_MAX_NESTING_DEPTH)
    }

    pub fn max_attribute_count(&self) -> usize {
        self.max_attribute_count.unwrap_or(DEFAULT_MAX_ATTRIBUTE_COUNT)
    }

    pub fn allowed_url_protocols(&self) -> Vec<String> {
        match &self.allowed_url_protocols {
            Some(protocols) => protocols.iter().map(|proto| proto.trim().to_lowercase()).collect(),
            None => DEFAULT_URL_PROTOCOLS.iter().map(|proto| proto.to_string()).collect(),
        }
    }

    pub fn allows_block_type(&self, block_type: &str) -> bool {
        match &self.allowed_block_types {
            Some(types) => types.contains(block_type),
            None => DEFAULT_BLOCK_TYPES.contains(&block_type),
        }
    }

    pub fn allows_mark(&self, mark: &str) -> bool {
        match &self.allowed_marks {
            Some(marks) => marks.contains(mark),
            None => DEFAULT_MARKS.contains(&mark),
        }
    }

    pub fn reject_unknown_structure(&self) -> bool {
        self.reject_unknown_structure.unwrap_or(true)
    }
}

impl From<&PolicyManifest> for GatewayConfig {
    fn from(manifest: &PolicyManifest) -> Self {
        let policy = &manifest.ai_sanitization_policy;
        let mut block_types = policy.allowed_block_types.clone();
        // list items need their container
        if block_types.contains("list_item") {
            block_types.insert("list".to_string());
        }
        if manifest.capabilities.tables {
            block_types.extend(["table", "table_row", "table_cell"].map(str::to_string));
        }
        Self {
            max_payload_bytes: Some(policy.max_payload_bytes),
            allowed_block_types: Some(block_types),
            allowed_marks: Some(policy.allowed_marks.clone()),
            reject_unknown_structure: Some(policy.reject_unknown_structure),
            rate_limit: Some(RateLimitConfig::default()),
            ..Self::default()
        }
    }
}
