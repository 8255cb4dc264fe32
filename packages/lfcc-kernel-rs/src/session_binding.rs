use anchor_relocation_rs::{BlockInput, DocumentSnapshot};
use annotation_integrity_rs::StoreConfig;
use napi::bindgen_prelude::Result as NapiResult;
use napi_derive::napi;
use policy_manifest_rs::PolicyManifest;
use serde_json::Value;
use std::collections::BTreeMap;
use std::sync::{Mutex, MutexGuard, PoisonError};

use crate::session::{AnnotationInput, DocumentSession, DocumentUpdate};
use crate::{parse_input, to_ms, to_napi_error, to_output};

#[napi(js_name = "AnnotationSession")]
pub struct AnnotationSessionBinding {
    session: Mutex<DocumentSession>,
}

impl AnnotationSessionBinding {
    pub(crate) fn lock(&self) -> MutexGuard<'_, DocumentSession> {
        self.session.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

#[napi]
impl AnnotationSessionBinding {
    /// `manifest` is the negotiated policy; defaults apply when omitted.
    #[napi(constructor)]
    pub fn new(
        doc_id: String,
        blocks: Value,
        version_vector: Value,
        manifest: Option<Value>,
        now_ms: i64,
    ) -> napi::Result<Self> {
        let blocks = parse_input::<Vec<BlockInput>>(blocks, "blocks")?;
        let version_vector = parse_input::<BTreeMap<String, u64>>(version_vector, "version vector")?;
        let manifest = match manifest {
            Some(value) => parse_input::<PolicyManifest>(value, "policy manifest")?,
            None => PolicyManifest::default(),
        };
        let session = DocumentSession::new(
            doc_id,
            StoreConfig::from(&manifest),
            DocumentSnapshot::new(blocks),
            version_vector,
            to_ms(now_ms),
        );
        Ok(Self {
            session: Mutex::new(session),
        })
    }

    #[napi(js_name = "addAnnotation")]
    pub fn add_annotation(&self, input: Value) -> NapiResult<()> {
        let input = parse_input::<AnnotationInput>(input, "annotation")?;
        self.lock().add_annotation(input).map_err(to_napi_error)
    }

    #[napi(js_name = "applyUpdate")]
    pub fn apply_update(&self, update: Value, now_ms: i64) -> NapiResult<()> {
        let update = parse_input::<DocumentUpdate>(update, "document update")?;
        self.lock().apply_update(update, to_ms(now_ms));
        Ok(())
    }

    /// Checkpoint result when one was due, otherwise `null`.
    #[napi]
    pub fn poll(&self, now_ms: i64) -> NapiResult<Option<Value>> {
        let checkpoint = self.lock().poll(to_ms(now_ms));
        checkpoint.as_ref().map(to_output).transpose()
    }

    #[napi]
    pub fn checkpoint(&self, now_ms: i64, full: Option<bool>) -> NapiResult<Value> {
        let mut session = self.lock();
        let checkpoint = if full.unwrap_or(false) {
            session.full_checkpoint(to_ms(now_ms))
        } else {
            session.checkpoint(to_ms(now_ms))
        };
        to_output(&checkpoint)
    }

    #[napi(js_name = "displayState")]
    pub fn display_state(&self, annotation_id: String) -> NapiResult<String> {
        let state = self.lock().display_state(&annotation_id).map_err(to_napi_error)?;
        Ok(state.as_str().to_string())
    }

    #[napi(js_name = "spanContextHash")]
    pub fn span_context_hash(&self, annotation_id: String, span_id: String) -> Option<String> {
        self.lock().store().span_context_hash(&annotation_id, &span_id)
    }

    #[napi(js_name = "frontierTag")]
    pub fn frontier_tag(&self) -> String {
        self.lock().current_frontier_tag()
    }

    #[napi(js_name = "nextDeadline")]
    pub fn next_deadline(&self) -> Option<i64> {
        self.lock().next_deadline().map(|deadline| deadline as i64)
    }

    #[napi(js_name = "triggerRecovery")]
    pub fn trigger_recovery(&self, now_ms: i64) {
        self.lock().trigger_recovery(to_ms(now_ms));
    }

    #[napi]
    pub fn dispose(&self) {
        self.lock().dispose();
    }
}
