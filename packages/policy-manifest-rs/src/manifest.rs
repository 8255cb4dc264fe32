use ai_context_hash_rs::ChainPolicyKind;
use anchor_relocation_rs::RelocationConfig;
use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;

use crate::ManifestError;

pub const LFCC_VERSION: &str = "1.0";
pub const COORDS_UTF16: &str = "utf16";
pub const ANCHOR_FORMATS: [&str; 2] = ["base64url", "bytes"];

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PolicyManifest {
    pub lfcc_version: String,
    pub coords: String,
    pub anchor_encoding: AnchorEncoding,
    pub structure_mode: String,
    pub chain_policy: ChainPolicy,
    pub integrity_policy: IntegrityPolicy,
    pub relocation_policy: RelocationPolicy,
    pub ai_sanitization_policy: AiSanitizationPolicy,
    pub capabilities: Capabilities,
    pub degradation_tolerance: DegradationTolerance,
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AnchorEncoding {
    pub version: String,
    pub format: String,
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ChainPolicy {
    pub kind: ChainPolicyKind,
    pub max_intervening_blocks: u32,
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct IntegrityPolicy {
    pub context_hash: bool,
    pub chain_hash: bool,
    pub document_checksum: bool,
    pub checkpoint: CheckpointSettings,
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CheckpointSettings {
    pub enabled: bool,
    pub every_ops: u32,
    pub every_ms: u64,
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RelocationPolicy {
    pub enable_level2: bool,
    pub enable_level3: bool,
    pub level3_max_block_radius: u32,
    pub fuzzy_threshold: f64,
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AiSanitizationPolicy {
    pub allowed_block_types: BTreeSet<String>,
    pub allowed_marks: BTreeSet<String>,
    pub max_payload_bytes: u64,
    pub reject_unknown_structure: bool,
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Capabilities {
    pub cross_block_annotations: bool,
    pub bounded_gap: bool,
    pub ai_replace_spans: bool,
    pub ai_gateway: bool,
    pub tables: bool,
    pub reorder_blocks: bool,
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DegradationTolerance {
    pub allow_integrity_downgrade: bool,
    pub allow_ai_downgrade: bool,
}

fn string_set(values: &[&str]) -> BTreeSet<String> {
    values.iter().map(|value| value.to_string()).collect()
}

impl Default for PolicyManifest {
    fn default() -> Self {
        Self {
            lfcc_version: LFCC_VERSION.to_string(),
            coords: COORDS_UTF16.to_string(),
            anchor_encoding: AnchorEncoding {
                version: "v1".to_string(),
                format: "base64url".to_string(),
            },
            structure_mode: "A".to_string(),
            chain_policy: ChainPolicy {
                kind: ChainPolicyKind::RequiredOrder,
                max_intervening_blocks: 0,
            },
            integrity_policy: IntegrityPolicy {
                context_hash: true,
                chain_hash: true,
                document_checksum: false,
                checkpoint: CheckpointSettings {
                    enabled: true,
                    every_ops: 50,
                    every_ms: 5000,
                },
            },
            relocation_policy: RelocationPolicy {
                enable_level2: true,
                enable_level3: true,
                level3_max_block_radius: 3,
                fuzzy_threshold: 0.7,
            },
            ai_sanitization_policy: AiSanitizationPolicy {
                allowed_block_types: string_set(&[
                    "paragraph",
                    "heading",
                    "list_item",
                    "quote",
                    "code_block",
                ]),
                allowed_marks: string_set(&["bold", "italic", "underline", "strike", "code", "link"]),
                max_payload_bytes: 1024 * 1024,
                reject_unknown_structure: true,
            },
            capabilities: Capabilities {
                cross_block_annotations: true,
                bounded_gap: true,
                ai_replace_spans: true,
                ai_gateway: true,
                tables: false,
                reorder_blocks: true,
            },
            degradation_tolerance: DegradationTolerance {
                allow_integrity_downgrade: true,
                allow_ai_downgrade: true,
            },
        }
    }
}

pub fn validate_manifest(manifest: &PolicyManifest) -> Result<(), ManifestError> {
    if manifest.lfcc_version.trim().is_empty() {
        return Err(ManifestError::EmptyField("lfccVersion"));
    }
    if manifest.coords != COORDS_UTF16 {
        return Err(ManifestError::UnsupportedCoords(manifest.coords.clone()));
    }
    if manifest.anchor_encoding.version.trim().is_empty() {
        return Err(ManifestError::EmptyField("anchorEncoding.version"));
    }
    if !ANCHOR_FORMATS.contains(&manifest.anchor_encoding.format.as_str()) {
        return Err(ManifestError::UnknownAnchorFormat(
            manifest.anchor_encoding.format.clone(),
        ));
    }
    if manifest.structure_mode.trim().is_empty() {
        return Err(ManifestError::EmptyField("structureMode"));
    }

    let checkpoint = &manifest.integrity_policy.checkpoint;
    if checkpoint.enabled && checkpoint.every_ops == 0 {
        return Err(ManifestError::InvalidCheckpoint("everyOps"));
    }
    if checkpoint.enabled && checkpoint.every_ms == 0 {
        return Err(ManifestError::InvalidCheckpoint("everyMs"));
    }

    let threshold = manifest.relocation_policy.fuzzy_threshold;
    if !(0.0..=1.0).contains(&threshold) {
        return Err(ManifestError::InvalidThreshold(threshold));
    }
    if manifest.ai_sanitization_policy.max_payload_bytes == 0 {
        return Err(ManifestError::EmptyField("aiSanitizationPolicy.maxPayloadBytes"));
    }
    Ok(())
}

impl From<&PolicyManifest> for RelocationConfig {
    fn from(manifest: &PolicyManifest) -> Self {
        let policy = &manifest.relocation_policy;
        Self {
            threshold: Some(policy.fuzzy_threshold),
            block_radius: Some(policy.level3_max_block_radius as usize),
            min_needle_len: None,
            enable_successor_search: Some(policy.enable_level2),
            enable_fuzzy: Some(policy.enable_level3),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_manifest_is_valid() {
        assert_eq!(validate_manifest(&PolicyManifest::default()), Ok(()));
    }

    #[test]
    fn rejects_foreign_coordinates_and_formats() {
        let mut manifest = PolicyManifest::default();
        manifest.coords = "utf8".to_string();
        assert_eq!(
            validate_manifest(&manifest),
            Err(ManifestError::UnsupportedCoords("utf8".to_string()))
        );

        let mut manifest = PolicyManifest::default();
        manifest.anchor_encoding.format = "hex".to_string();
        assert!(matches!(
            validate_manifest(&manifest),
            Err(ManifestError::UnknownAnchorFormat(_))
        ));
    }

    #[test]
    fn rejects_zero_checkpoint_thresholds_only_when_enabled() {
        let mut manifest = PolicyManifest::default();
        manifest.integrity_policy.checkpoint.every_ops = 0;
        assert_eq!(
            validate_manifest(&manifest),
            Err(ManifestError::InvalidCheckpoint("everyOps"))
        );
        manifest.integrity_policy.checkpoint.enabled = false;
        assert_eq!(validate_manifest(&manifest), Ok(()));
    }

    #[test]
    fn rejects_out_of_range_threshold() {
        let mut manifest = PolicyManifest::default();
        manifest.relocation_policy.fuzzy_threshold = 1.5;
        assert_eq!(
            validate_manifest(&manifest),
            Err(ManifestError::InvalidThreshold(1.5))
        );
    }

    #[test]
    fn parses_camel_case_json() {
        let json = serde_json::to_value(PolicyManifest::default()).expect("serialize");
        assert_eq!(json["lfccVersion"], "1.0");
        assert_eq!(json["chainPolicy"]["kind"], "required_order");
        assert_eq!(json["integrityPolicy"]["checkpoint"]["everyOps"], 50);
        let parsed: PolicyManifest = serde_json::from_value(json).expect("parse");
        assert_eq!(parsed, PolicyManifest::default());
    }

    #[test]
    fn relocation_config_follows_policy() {
        let mut manifest = PolicyManifest::default();
        manifest.relocation_policy.enable_level3 = false;
        manifest.relocation_policy.fuzzy_threshold = 0.85;
        let config = RelocationConfig::from(&manifest);
        assert_eq!(config.threshold, Some(0.85));
        assert_eq!(config.block_radius, Some(3));
        assert_eq!(config.enable_fuzzy, Some(false));
    }
}
