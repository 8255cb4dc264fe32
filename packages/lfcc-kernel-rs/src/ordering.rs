use napi::bindgen_prelude::Result as NapiResult;
use napi_derive::napi;
use op_ordering_rs::{StructuralOp, order_operations, resolve_pair};
use serde_json::{Value, json};

use crate::{parse_input, to_napi_error, to_output};

/// Resolved batch plus the block-mapper deltas of its applied operations.
#[napi(js_name = "orderOperations")]
pub fn order_operations_binding(ops: Value) -> NapiResult<Value> {
    let ops = parse_input::<Vec<StructuralOp>>(ops, "structural operations")?;
    let batch = order_operations(ops).map_err(to_napi_error)?;
    let deltas = batch.to_structural_deltas();
    Ok(json!({
        "batch": to_output(&batch)?,
        "deltas": to_output(&deltas)?,
    }))
}

#[napi(js_name = "resolveConflict")]
pub fn resolve_conflict_binding(a: Value, b: Value) -> NapiResult<Option<Value>> {
    let a = parse_input::<StructuralOp>(a, "operation a")?;
    let b = parse_input::<StructuralOp>(b, "operation b")?;
    resolve_pair(&a, &b).as_ref().map(to_output).transpose()
}
