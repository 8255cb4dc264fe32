use policy_manifest_rs::{
    ChainPolicyKind, NegotiationError, PolicyManifest, compute_policy_hash, negotiate,
};
use proptest::prelude::*;

fn manifest_with(every_ops: u32, tables: bool, chain: ChainPolicyKind) -> PolicyManifest {
    let mut manifest = PolicyManifest::default();
    manifest.integrity_policy.checkpoint.every_ops = every_ops;
    manifest.capabilities.tables = tables;
    manifest.chain_policy.kind = chain;
    manifest
}

fn chain_kind() -> impl Strategy<Value = ChainPolicyKind> {
    prop_oneof![
        Just(ChainPolicyKind::StrictAdjacency),
        Just(ChainPolicyKind::RequiredOrder),
        Just(ChainPolicyKind::BoundedGap),
    ]
}

#[test]
fn three_way_negotiation_records_each_reduction_once() {
    let mut editor = PolicyManifest::default();
    editor.capabilities.tables = true;
    let mut agent = PolicyManifest::default();
    agent.integrity_policy.document_checksum = true;
    agent.capabilities.tables = true;
    let mut mobile = PolicyManifest::default();
    mobile.relocation_policy.enable_level3 = false;

    let policy = negotiate(&[editor, agent, mobile]).expect("negotiate");
    let fields: Vec<&str> = policy.degradations.iter().map(|step| step.field.as_str()).collect();
    assert_eq!(
        fields,
        vec![
            "integrityPolicy.documentChecksum",
            "relocationPolicy.enableLevel3",
            "capabilities.tables",
        ]
    );
    assert_eq!(
        policy.policy_hash,
        compute_policy_hash(&policy.manifest).expect("hash")
    );
}

#[test]
fn negotiated_manifest_serializes_with_degradations() {
    let mut other = PolicyManifest::default();
    other.capabilities.ai_gateway = false;
    let policy = negotiate(&[PolicyManifest::default(), other]).expect("negotiate");
    let json = serde_json::to_value(&policy).expect("serialize");
    assert_eq!(json["manifest"]["capabilities"]["aiGateway"], false);
    assert_eq!(json["degradations"][0]["field"], "capabilities.aiGateway");
}

#[test]
fn ai_downgrade_refusal_names_the_participant() {
    let mut keeps_ai = PolicyManifest::default();
    keeps_ai.degradation_tolerance.allow_ai_downgrade = false;
    let mut no_ai = PolicyManifest::default();
    no_ai.capabilities.ai_gateway = false;
    let error = negotiate(&[no_ai, keeps_ai]).expect_err("refused");
    assert_eq!(
        error,
        NegotiationError::DowngradeRefused {
            field: "capabilities.aiGateway".to_string(),
            participant: 1,
        }
    );
}

proptest! {
    #[test]
    fn negotiation_is_commutative(
        ops_a in 1u32..200,
        ops_b in 1u32..200,
        tables_a in any::<bool>(),
        tables_b in any::<bool>(),
        chain_a in chain_kind(),
        chain_b in chain_kind(),
    ) {
        let a = manifest_with(ops_a, tables_a, chain_a);
        let b = manifest_with(ops_b, tables_b, chain_b);
        let forward = negotiate(&[a.clone(), b.clone()]).expect("negotiate");
        let backward = negotiate(&[b, a]).expect("negotiate");
        prop_assert_eq!(&forward.manifest, &backward.manifest);
        prop_assert_eq!(forward.manifest.integrity_policy.checkpoint.every_ops, ops_a.min(ops_b));
        prop_assert_eq!(forward.manifest.capabilities.tables, tables_a && tables_b);
    }

    #[test]
    fn negotiating_with_self_never_degrades(ops in 1u32..500, tables in any::<bool>()) {
        let manifest = manifest_with(ops, tables, ChainPolicyKind::RequiredOrder);
        let policy = negotiate(&[manifest.clone(), manifest.clone()]).expect("negotiate");
        prop_assert!(policy.degradations.is_empty());
        prop_assert_eq!(policy.manifest, manifest);
    }
}
