mod codec;
mod gateway;
mod hashing;
mod ordering;
mod policy;
mod relocation;
mod session;
mod session_binding;

use napi::bindgen_prelude::Result as NapiResult;
use serde::Serialize;
use serde::de::DeserializeOwned;
use serde_json::Value;

pub use session::{AnnotationInput, ChainInput, DocumentSession, DocumentUpdate, SpanInput};

fn to_napi_error(error: impl std::fmt::Display) -> napi::Error {
    napi::Error::from_reason(error.to_string())
}

fn parse_input<T: DeserializeOwned>(value: Value, label: &str) -> NapiResult<T> {
    serde_json::from_value(value).map_err(|error| to_napi_error(format!("Invalid {label}: {error}")))
}

fn to_output<T: Serialize>(value: &T) -> NapiResult<Value> {
    serde_json::to_value(value).map_err(to_napi_error)
}

/// JS numbers arrive as i64; negative times clamp to zero.
fn to_ms(value: i64) -> u64 {
    value.max(0) as u64
}
