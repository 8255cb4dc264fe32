mod canonical;
mod config;
mod engine;
mod rate_limit;
mod sanitize;
mod types;

pub use canonical::{CanonBlock, CanonFragment, CanonMark, CanonNode, CanonText, canonicalize_html};
pub use config::{GatewayConfig, RateLimitConfig};
pub use engine::{AiGateway, DocumentProvider};
pub use rate_limit::RateLimiter;
pub use sanitize::{MarkdownBridge, SanitizedHtml, detect_malicious, escape_html, sanitize_html, text_to_html};
pub use types::*;

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum GatewayConfigError {
    #[error("{0} must be greater than zero")]
    ZeroLimit(&'static str),
    #[error("URL protocol {0:?} must end with ':'")]
    InvalidProtocol(String),
}
