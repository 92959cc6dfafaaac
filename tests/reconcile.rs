// Copyright 2022 VMware, Inc.
// SPDX-License-Identifier: MIT
mod common;

use common::*;
use namespace_class_controller::common::{
    annotation, CREATED_BY_CLASS_ANNOTATION, LEDGER_ANNOTATION, NAMESPACE_FINALIZER, RESOURCE_HASH_ANNOTATION,
};
use namespace_class_controller::reconciler::registry::read_ledger;
use namespace_class_controller::reconciler::status::{RESOURCES_APPLIED, TEMPLATES_VALID};
use namespace_class_controller::reconciler::ReconcileOutcome;
use namespace_class_controller::store::{MemoryStore, ResourceRef};
use namespace_class_controller::Error;
use proptest::prelude::*;
use std::collections::{BTreeMap, BTreeSet};
use std::sync::Arc;
use std::time::Duration;

fn quota_ref(name: &str) -> ResourceRef {
    ResourceRef::new("v1", "ResourceQuota", name)
}

#[tokio::test]
async fn converged_group_is_left_alone() {
    let store = Arc::new(MemoryStore::new());
    store.insert_class(class("standard", vec![config_map("settings"), quota("limits", "10")]));
    store.insert_group(namespace("team-a", Some("standard")));
    let engine = engine(&store);
    assert_eq!(converge(&engine, "team-a").await, ReconcileOutcome::NoOp);

    store.reset_calls();
    assert_eq!(engine.reconcile("team-a").await.unwrap(), ReconcileOutcome::NoOp);
    let calls = store.calls();
    assert_eq!(calls.resource_writes(), 0);
    assert_eq!(calls.group_updates, 0);
    assert_eq!(calls.status_updates, 0);
}

#[tokio::test]
async fn ledger_lists_exactly_the_live_resources() {
    let store = Arc::new(MemoryStore::new());
    store.insert_class(class("standard", vec![config_map("settings"), quota("limits", "10")]));
    store.insert_group(namespace("team-a", Some("standard")));
    converge(&engine(&store), "team-a").await;

    let ns = store.group("team-a").unwrap();
    assert_eq!(ns.metadata.finalizers.clone().unwrap(), vec![NAMESPACE_FINALIZER.to_string()]);
    let ledger = read_ledger(&ns).unwrap();
    let ledgered: BTreeSet<ResourceRef> = ledger.entries().iter().map(|d| d.resource_ref()).collect();
    assert_eq!(ledgered, store.resource_keys("team-a"));
    assert_eq!(ledgered, BTreeSet::from([cm("settings"), quota_ref("limits")]));
    for descriptor in ledger.entries() {
        let live = store.resource("team-a", &descriptor.resource_ref()).unwrap();
        assert_eq!(
            annotation(&live.metadata.annotations, RESOURCE_HASH_ANNOTATION),
            Some(descriptor.hash.as_str())
        );
    }
}

#[tokio::test]
async fn switching_class_replaces_the_resource_set() {
    let store = Arc::new(MemoryStore::new());
    store.insert_class(class("a", vec![config_map("x")]));
    store.insert_class(class("b", vec![config_map("y")]));
    store.insert_group(namespace("team-a", Some("a")));
    let engine = engine(&store);
    converge(&engine, "team-a").await;
    assert_eq!(names(&store, "team-a"), BTreeSet::from(["x".to_string()]));

    relabel(&store, "team-a", Some("b")).await;
    assert_eq!(converge(&engine, "team-a").await, ReconcileOutcome::NoOp);
    assert_eq!(names(&store, "team-a"), BTreeSet::from(["y".to_string()]));
    let ledger = read_ledger(&store.group("team-a").unwrap()).unwrap();
    assert_eq!(ledger.len(), 1);
    assert_eq!(ledger.entries()[0].name, "y");
}

#[tokio::test]
async fn switching_to_a_class_with_identical_templates_retags_resources() {
    let store = Arc::new(MemoryStore::new());
    store.insert_class(class("a", vec![quota("limits", "10")]));
    store.insert_class(class("b", vec![quota("limits", "10")]));
    store.insert_group(namespace("team-a", Some("a")));
    let engine = engine(&store);
    converge(&engine, "team-a").await;

    relabel(&store, "team-a", Some("b")).await;
    store.reset_calls();
    assert_eq!(converge(&engine, "team-a").await, ReconcileOutcome::NoOp);
    let calls = store.calls();
    assert_eq!((calls.creates, calls.updates, calls.deletes), (0, 1, 0));
    let live = store.resource("team-a", &quota_ref("limits")).unwrap();
    assert_eq!(annotation(&live.metadata.annotations, CREATED_BY_CLASS_ANNOTATION), Some("b"));

    store.reset_calls();
    assert_eq!(engine.reconcile("team-a").await.unwrap(), ReconcileOutcome::NoOp);
    assert_eq!(store.calls().resource_writes(), 0);
}

#[tokio::test]
async fn updates_are_conditional_on_the_live_version() {
    let store = Arc::new(MemoryStore::new());
    store.insert_class(class("standard", vec![quota("limits", "10")]));
    store.insert_group(namespace("team-a", Some("standard")));
    let engine = engine(&store);
    converge(&engine, "team-a").await;

    // Someone edits the live object by hand, moving its version on.
    let mut edited = store.resource("team-a", &quota_ref("limits")).unwrap();
    edited.data["spec"]["hard"]["pods"] = serde_json::json!("99");
    let edited = store.insert_resource("team-a", edited).unwrap();

    store.insert_class(class("standard", vec![quota("limits", "20")]));
    assert_eq!(engine.reconcile("team-a").await.unwrap(), ReconcileOutcome::NoOp);
    let after = store.resource("team-a", &quota_ref("limits")).unwrap();
    assert_eq!(after.data["spec"]["hard"]["pods"], "20");
    assert_ne!(after.metadata.resource_version, edited.metadata.resource_version);
}

#[tokio::test]
async fn spec_drift_updates_in_place() {
    let store = Arc::new(MemoryStore::new());
    store.insert_class(class("standard", vec![quota("limits", "10")]));
    store.insert_group(namespace("team-a", Some("standard")));
    let engine = engine(&store);
    converge(&engine, "team-a").await;
    let before = store.resource("team-a", &quota_ref("limits")).unwrap();

    store.insert_class(class("standard", vec![quota("limits", "20")]));
    store.reset_calls();
    engine.reconcile("team-a").await.unwrap();
    let calls = store.calls();
    assert_eq!((calls.creates, calls.updates, calls.deletes), (0, 1, 0));

    let after = store.resource("team-a", &quota_ref("limits")).unwrap();
    assert_eq!(after.data["spec"]["hard"]["pods"], "20");
    assert_eq!(after.metadata.uid, before.metadata.uid);
    assert_ne!(
        annotation(&after.metadata.annotations, RESOURCE_HASH_ANNOTATION),
        annotation(&before.metadata.annotations, RESOURCE_HASH_ANNOTATION)
    );
}

#[tokio::test]
async fn metadata_only_template_changes_are_not_drift() {
    let store = Arc::new(MemoryStore::new());
    store.insert_class(class("standard", vec![quota("limits", "10")]));
    store.insert_group(namespace("team-a", Some("standard")));
    let engine = engine(&store);
    converge(&engine, "team-a").await;

    let mut relabelled = quota("limits", "10");
    relabelled["metadata"]["labels"] = serde_json::json!({"tier": "gold"});
    store.insert_class(class("standard", vec![relabelled]));
    store.reset_calls();
    engine.reconcile("team-a").await.unwrap();
    assert_eq!(store.calls().resource_writes(), 0);
}

#[tokio::test]
async fn renamed_template_with_identical_spec_keeps_its_hash() {
    let store = Arc::new(MemoryStore::new());
    store.insert_class(class("standard", vec![quota("old", "10")]));
    store.insert_group(namespace("team-a", Some("standard")));
    let engine = engine(&store);
    converge(&engine, "team-a").await;
    let old_hash = read_ledger(&store.group("team-a").unwrap()).unwrap().entries()[0].hash.clone();

    store.insert_class(class("standard", vec![quota("new", "10")]));
    engine.reconcile("team-a").await.unwrap();
    assert_eq!(store.resource_keys("team-a"), BTreeSet::from([quota_ref("new")]));
    let ledger = read_ledger(&store.group("team-a").unwrap()).unwrap();
    assert_eq!(ledger.entries()[0].hash, old_hash);
}

#[tokio::test]
async fn invalid_template_applies_nothing() {
    let store = Arc::new(MemoryStore::new());
    let broken = serde_json::json!({"apiVersion": "v1", "kind": "Secret", "metadata": {}});
    store.insert_class(class("standard", vec![config_map("settings"), broken]));
    store.insert_group(namespace("team-a", Some("standard")));
    let engine = engine(&store);
    assert_eq!(engine.reconcile("team-a").await.unwrap(), ReconcileOutcome::Requeue);

    let err = engine.reconcile("team-a").await.unwrap_err();
    assert!(matches!(err, Error::InvalidTemplate { ref class, .. } if class == "standard"));
    assert_eq!(store.calls().creates, 0);
    assert!(store.resource_keys("team-a").is_empty());

    let status = store.class("standard").unwrap().status.unwrap();
    let condition = status.conditions.iter().find(|c| c.type_ == TEMPLATES_VALID).unwrap();
    assert_eq!(condition.status, "False");
    assert_eq!(condition.reason, "InvalidTemplate");
    assert!(status.managed_namespaces.is_empty());
}

#[tokio::test]
async fn corrupt_ledger_stops_the_pass() {
    let store = Arc::new(MemoryStore::new());
    store.insert_class(class("standard", vec![config_map("settings")]));
    let mut ns = namespace("team-a", Some("standard"));
    ns.metadata.finalizers = Some(vec![NAMESPACE_FINALIZER.to_string()]);
    ns.metadata.annotations = Some(BTreeMap::from([(LEDGER_ANNOTATION.to_string(), "{oops".to_string())]));
    store.insert_group(ns);

    let err = engine(&store).reconcile("team-a").await.unwrap_err();
    assert!(matches!(err, Error::LedgerCorrupted { ref group, .. } if group == "team-a"));
    assert_eq!(store.calls().resource_writes(), 0);
    assert_eq!(store.calls().group_updates, 0);
}

#[tokio::test]
async fn missing_class_waits_a_minute() {
    let store = Arc::new(MemoryStore::new());
    store.insert_group(namespace("team-a", Some("later")));
    let engine = engine(&store);
    assert_eq!(
        converge(&engine, "team-a").await,
        ReconcileOutcome::RequeueAfter(Duration::from_secs(60))
    );
    assert_eq!(store.calls().resource_writes(), 0);

    store.insert_class(class("later", vec![config_map("settings")]));
    assert_eq!(converge(&engine, "team-a").await, ReconcileOutcome::NoOp);
    assert_eq!(names(&store, "team-a"), BTreeSet::from(["settings".to_string()]));
}

#[tokio::test]
async fn class_status_accumulates_bound_groups() {
    let store = Arc::new(MemoryStore::new());
    store.insert_class(class("standard", vec![config_map("settings")]));
    store.insert_group(namespace("team-a", Some("standard")));
    store.insert_group(namespace("team-b", Some("standard")));
    let engine = engine(&store);
    store.inject_status_conflicts(2);
    converge(&engine, "team-a").await;
    converge(&engine, "team-b").await;
    converge(&engine, "team-a").await;

    let status = store.class("standard").unwrap().status.unwrap();
    assert_eq!(status.managed_namespaces, vec!["team-a", "team-b"]);
    assert!(status.last_update_time.is_some());
    let applied = status.conditions.iter().find(|c| c.type_ == RESOURCES_APPLIED).unwrap();
    assert_eq!(applied.status, "True");
}

#[tokio::test]
async fn exhausted_conflict_retries_surface_as_errors() {
    let store = Arc::new(MemoryStore::new());
    store.insert_class(class("standard", vec![config_map("settings")]));
    store.insert_group(namespace("team-a", Some("standard")));
    store.inject_group_conflicts(100);

    let err = engine(&store).reconcile("team-a").await.unwrap_err();
    assert!(matches!(err, Error::ConflictRetriesExhausted { attempts: 5, .. }));
    assert!(err.is_transient());
}

#[tokio::test]
async fn failed_apply_keeps_the_previous_ledger() {
    let store = Arc::new(MemoryStore::new());
    store.insert_class(class("standard", vec![config_map("a")]));
    store.insert_group(namespace("team-a", Some("standard")));
    let engine = engine(&store);
    converge(&engine, "team-a").await;

    // A dropped resource whose delete fails leaves the old ledger in place.
    store.insert_class(class("standard", vec![config_map("b")]));
    store.fail_deletes(
        "team-a",
        &cm("a"),
        1,
        namespace_class_controller::store::StoreError::Forbidden("ConfigMap/a".to_string()),
    );
    assert!(engine.reconcile("team-a").await.is_err());
    let ledger = read_ledger(&store.group("team-a").unwrap()).unwrap();
    assert_eq!(ledger.entries()[0].name, "a");
    let status = store.class("standard").unwrap().status.unwrap();
    let applied = status.conditions.iter().find(|c| c.type_ == RESOURCES_APPLIED).unwrap();
    assert_eq!(applied.reason, "ApplyFailed");

    engine.reconcile("team-a").await.unwrap();
    assert_eq!(names(&store, "team-a"), BTreeSet::from(["b".to_string()]));
}

fn name_set() -> impl Strategy<Value = BTreeSet<String>> {
    prop::collection::btree_set("[a-z]{1,6}", 0..6)
}

proptest! {
    #![proptest_config(ProptestConfig::with_cases(32))]

    #[test]
    fn any_binding_converges_to_its_class(before in name_set(), after in name_set()) {
        let runtime = tokio::runtime::Builder::new_current_thread().enable_all().build().unwrap();
        runtime.block_on(async {
            let store = Arc::new(MemoryStore::new());
            store.insert_class(class("first", before.iter().map(|n| config_map(n)).collect()));
            store.insert_class(class("second", after.iter().map(|n| config_map(n)).collect()));
            store.insert_group(namespace("team-a", Some("first")));
            let engine = engine(&store);
            converge(&engine, "team-a").await;
            prop_assert_eq!(names(&store, "team-a"), before.clone());

            relabel(&store, "team-a", Some("second")).await;
            converge(&engine, "team-a").await;
            prop_assert_eq!(names(&store, "team-a"), after.clone());
            let ledgered: BTreeSet<String> = read_ledger(&store.group("team-a").unwrap())
                .unwrap()
                .entries()
                .iter()
                .map(|d| d.name.clone())
                .collect();
            prop_assert_eq!(ledgered, after.clone());
            Ok(())
        })?;
    }
}
