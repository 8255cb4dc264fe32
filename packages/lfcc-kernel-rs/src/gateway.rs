use ai_gateway_rs::{AiGateway, GatewayConfig};
use napi::bindgen_prelude::Result as NapiResult;
use napi_derive::napi;
use policy_manifest_rs::PolicyManifest;
use serde_json::Value;

use crate::session_binding::AnnotationSessionBinding;
use crate::{parse_input, to_ms, to_napi_error, to_output};

#[napi(js_name = "AiGateway")]
pub struct AiGatewayBinding {
    gateway: AiGateway,
}

#[napi]
impl AiGatewayBinding {
    #[napi(constructor)]
    pub fn new(config: Option<Value>) -> napi::Result<Self> {
        let config = match config {
            Some(value) => parse_input::<GatewayConfig>(value, "gateway config")?,
            None => GatewayConfig::default(),
        };
        let gateway = AiGateway::new(config).map_err(to_napi_error)?;
        Ok(Self { gateway })
    }

    #[napi(factory, js_name = "fromManifest")]
    pub fn from_manifest(manifest: Value) -> napi::Result<Self> {
        let manifest = parse_input::<PolicyManifest>(manifest, "policy manifest")?;
        let gateway = AiGateway::new(GatewayConfig::from(&manifest)).map_err(to_napi_error)?;
        Ok(Self { gateway })
    }

    /// Malformed envelopes come back as a 400 result, not an exception.
    #[napi(js_name = "processRequest")]
    pub fn process_request(&self, session: &AnnotationSessionBinding, request: Value, now_ms: i64) -> NapiResult<Value> {
        let session = session.lock();
        let result = self.gateway.process_value(&*session, request, to_ms(now_ms));
        to_output(result.as_ref())
    }

    #[napi(js_name = "drainAuditEvents")]
    pub fn drain_audit_events(&self, after: Option<i64>, limit: Option<u32>) -> NapiResult<Value> {
        let after = after.and_then(|value| if value >= 0 { Some(value as u64) } else { None });
        let events = self.gateway.drain_audit_events(after, limit.map(|value| value as usize));
        to_output(&events)
    }

    #[napi]
    pub fn evict(&self, request_id: String) -> bool {
        self.gateway.evict(&request_id)
    }

    #[napi(js_name = "clearCache")]
    pub fn clear_cache(&self) {
        self.gateway.clear_cache();
    }
}
