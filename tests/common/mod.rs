// Copyright 2022 VMware, Inc.
// SPDX-License-Identifier: MIT
#![allow(dead_code)]
use k8s_openapi::api::core::v1::Namespace;
use k8s_openapi::apimachinery::pkg::apis::meta::v1::ObjectMeta;
use namespace_class_controller::common::CLASS_LABEL;
use namespace_class_controller::namespaceclass_types::{NamespaceClass, NamespaceClassSpec};
use namespace_class_controller::reconciler::{EngineConfig, ReconcileOutcome, ReconciliationEngine, RetryPolicy};
use namespace_class_controller::store::{MemoryStore, ObjectStore, ResourceRef};
use serde_json::{json, Value};
use std::collections::{BTreeMap, BTreeSet};
use std::sync::Arc;
use std::time::Duration;

pub fn config_map(name: &str) -> Value {
    json!({
        "apiVersion": "v1",
        "kind": "ConfigMap",
        "metadata": {"name": name},
        "data": {"owner": "platform"}
    })
}

pub fn quota(name: &str, pods: &str) -> Value {
    json!({
        "apiVersion": "v1",
        "kind": "ResourceQuota",
        "metadata": {"name": name},
        "spec": {"hard": {"pods": pods}}
    })
}

pub fn class(name: &str, resources: Vec<Value>) -> NamespaceClass {
    NamespaceClass::new(name, NamespaceClassSpec { resources })
}

pub fn namespace(name: &str, class: Option<&str>) -> Namespace {
    Namespace {
        metadata: ObjectMeta {
            name: Some(name.to_string()),
            labels: class.map(|c| BTreeMap::from([(CLASS_LABEL.to_string(), c.to_string())])),
            ..ObjectMeta::default()
        },
        ..Namespace::default()
    }
}

pub fn fast_retry() -> RetryPolicy {
    RetryPolicy {
        attempts: 5,
        initial_backoff: Duration::from_millis(1),
        max_backoff: Duration::from_millis(4),
    }
}

pub fn engine(store: &Arc<MemoryStore>) -> ReconciliationEngine<MemoryStore> {
    ReconciliationEngine::new(
        store.clone(),
        EngineConfig {
            retry: fast_retry(),
            ..EngineConfig::default()
        },
    )
}

/// Reconciles until the engine stops asking for an immediate rerun.
pub async fn converge(engine: &ReconciliationEngine<MemoryStore>, group: &str) -> ReconcileOutcome {
    for _ in 0..5 {
        let outcome = engine.reconcile(group).await.unwrap();
        if outcome != ReconcileOutcome::Requeue {
            return outcome;
        }
    }
    panic!("namespace {} kept requeueing", group);
}

/// Changes the class label the way a user would with `kubectl label`.
pub async fn relabel(store: &MemoryStore, group: &str, class: Option<&str>) {
    let mut ns = store.group(group).unwrap();
    let labels = ns.metadata.labels.get_or_insert_with(BTreeMap::new);
    match class {
        Some(class) => labels.insert(CLASS_LABEL.to_string(), class.to_string()),
        None => labels.remove(CLASS_LABEL),
    };
    store.update_group(&ns).await.unwrap();
}

pub fn names(store: &MemoryStore, group: &str) -> BTreeSet<String> {
    store.resource_keys(group).into_iter().map(|k| k.name).collect()
}

pub fn cm(name: &str) -> ResourceRef {
    ResourceRef::new("v1", "ConfigMap", name)
}
