use napi::bindgen_prelude::Result as NapiResult;
use napi_derive::napi;
use policy_manifest_rs::{PolicyManifest, compute_policy_hash, negotiate, validate_manifest};
use serde_json::Value;

use crate::{parse_input, to_napi_error, to_output};

#[napi(js_name = "defaultPolicyManifest")]
pub fn default_policy_manifest() -> NapiResult<Value> {
    to_output(&PolicyManifest::default())
}

#[napi(js_name = "validatePolicyManifest")]
pub fn validate_policy_manifest(manifest: Value) -> NapiResult<()> {
    let manifest = parse_input::<PolicyManifest>(manifest, "policy manifest")?;
    validate_manifest(&manifest).map_err(to_napi_error)
}

#[napi(js_name = "computePolicyHash")]
pub fn compute_policy_hash_binding(manifest: Value) -> NapiResult<String> {
    let manifest = parse_input::<PolicyManifest>(manifest, "policy manifest")?;
    compute_policy_hash(&manifest).map_err(to_napi_error)
}

#[napi(js_name = "negotiatePolicy")]
pub fn negotiate_policy(manifests: Value) -> NapiResult<Value> {
    let manifests = parse_input::<Vec<PolicyManifest>>(manifests, "policy manifests")?;
    let negotiated = negotiate(&manifests).map_err(to_napi_error)?;
    to_output(&negotiated)
}
