// Copyright 2022 VMware, Inc.
// SPDX-License-Identifier: MIT
use super::{ObjectStore, ResourceRef, StoreError};
use crate::namespaceclass_types::NamespaceClass;
use async_trait::async_trait;
use k8s_openapi::api::core::v1::Namespace;
use k8s_openapi::apimachinery::pkg::apis::meta::v1::{ObjectMeta, Time};
use kube::api::DynamicObject;
use std::collections::{BTreeMap, BTreeSet, HashMap};
use std::sync::{Mutex, MutexGuard, PoisonError};

/// Number of write requests the store has served, per request type.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct CallCounts {
    pub creates: usize,
    pub updates: usize,
    pub deletes: usize,
    pub group_updates: usize,
    pub status_updates: usize,
}

impl CallCounts {
    /// Create, update and delete calls against managed resources.
    pub fn resource_writes(&self) -> usize {
        self.creates + self.updates + self.deletes
    }
}

#[derive(Default)]
struct State {
    groups: BTreeMap<String, Namespace>,
    classes: BTreeMap<String, NamespaceClass>,
    resources: BTreeMap<(String, ResourceRef), DynamicObject>,
    resource_version_counter: u64,
    uid_counter: u64,
    calls: CallCounts,
    // Remaining injected failures per resource, consumed one per delete call.
    delete_failures: HashMap<(String, ResourceRef), (usize, StoreError)>,
    group_update_conflicts: usize,
    status_update_conflicts: usize,
}

impl State {
    fn next_resource_version(&mut self) -> String {
        self.resource_version_counter += 1;
        self.resource_version_counter.to_string()
    }

    fn next_uid(&mut self) -> String {
        self.uid_counter += 1;
        format!("uid-{}", self.uid_counter)
    }

    fn stamp_new(&mut self, meta: &mut ObjectMeta) {
        meta.resource_version = Some(self.next_resource_version());
        meta.uid = Some(self.next_uid());
        meta.deletion_timestamp = None;
    }
}

/// In-process model of the API server: every object carries a resource version,
/// conditional writes conflict when the version is stale, and deleting an object
/// that still has finalizers only marks it for deletion. The object disappears once
/// an update leaves it marked with no finalizers.
#[derive(Default)]
pub struct MemoryStore {
    state: Mutex<State>,
}

fn version_mismatch(current: &ObjectMeta, incoming: &ObjectMeta) -> bool {
    incoming.resource_version.is_some() && incoming.resource_version != current.resource_version
}

impl MemoryStore {
    pub fn new() -> Self {
        MemoryStore::default()
    }

    fn state(&self) -> MutexGuard<'_, State> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Creates a namespace, replacing any existing one of the same name.
    pub fn insert_group(&self, mut ns: Namespace) -> Namespace {
        let mut s = self.state();
        s.stamp_new(&mut ns.metadata);
        let name = ns.metadata.name.clone().unwrap_or_default();
        s.groups.insert(name, ns.clone());
        ns
    }

    /// Creates or replaces a class, keeping its status if it already existed.
    pub fn insert_class(&self, mut class: NamespaceClass) -> NamespaceClass {
        let mut s = self.state();
        let name = class.metadata.name.clone().unwrap_or_default();
        let existing = s.classes.get(&name).cloned();
        match existing {
            Some(existing) => {
                let generation = existing.metadata.generation.unwrap_or(1);
                class.metadata.uid = existing.metadata.uid.clone();
                class.metadata.resource_version = Some(s.next_resource_version());
                class.metadata.generation = Some(if class.spec == existing.spec {
                    generation
                } else {
                    generation + 1
                });
                class.status = existing.status;
            }
            None => {
                s.stamp_new(&mut class.metadata);
                class.metadata.generation = Some(1);
            }
        }
        s.classes.insert(name, class.clone());
        class
    }

    /// Mirrors `kubectl delete namespace`: marks the namespace while finalizers remain,
    /// removes it otherwise. Returns whether the namespace existed.
    pub fn request_group_deletion(&self, name: &str) -> bool {
        let mut s = self.state();
        let Some(mut ns) = s.groups.get(name).cloned() else {
            return false;
        };
        if ns.metadata.finalizers.as_ref().map_or(false, |f| !f.is_empty()) {
            if ns.metadata.deletion_timestamp.is_none() {
                ns.metadata.deletion_timestamp = Some(Time(chrono::Utc::now()));
                ns.metadata.resource_version = Some(s.next_resource_version());
                s.groups.insert(name.to_string(), ns);
            }
        } else {
            s.groups.remove(name);
            s.resources.retain(|(group, _), _| group != name);
        }
        true
    }

    pub fn group(&self, name: &str) -> Option<Namespace> {
        self.state().groups.get(name).cloned()
    }

    pub fn class(&self, name: &str) -> Option<NamespaceClass> {
        self.state().classes.get(name).cloned()
    }

    /// Places an object directly into a namespace, bypassing admission.
    pub fn insert_resource(&self, group: &str, mut obj: DynamicObject) -> Option<DynamicObject> {
        let key = ResourceRef::of(&obj)?;
        let mut s = self.state();
        obj.metadata.namespace = Some(group.to_string());
        s.stamp_new(&mut obj.metadata);
        s.resources.insert((group.to_string(), key), obj.clone());
        Some(obj)
    }

    pub fn resource(&self, group: &str, key: &ResourceRef) -> Option<DynamicObject> {
        self.state().resources.get(&(group.to_string(), key.clone())).cloned()
    }

    pub fn resource_keys(&self, group: &str) -> BTreeSet<ResourceRef> {
        self.state()
            .resources
            .keys()
            .filter(|(g, _)| g == group)
            .map(|(_, key)| key.clone())
            .collect()
    }

    pub fn calls(&self) -> CallCounts {
        self.state().calls
    }

    pub fn reset_calls(&self) {
        self.state().calls = CallCounts::default();
    }

    /// The next `times` deletes of `key` in `group` fail with `error`.
    pub fn fail_deletes(&self, group: &str, key: &ResourceRef, times: usize, error: StoreError) {
        self.state()
            .delete_failures
            .insert((group.to_string(), key.clone()), (times, error));
    }

    /// The next `times` namespace updates fail with a conflict.
    pub fn inject_group_conflicts(&self, times: usize) {
        self.state().group_update_conflicts = times;
    }

    /// The next `times` class status updates fail with a conflict.
    pub fn inject_status_conflicts(&self, times: usize) {
        self.state().status_update_conflicts = times;
    }
}

#[async_trait]
impl ObjectStore for MemoryStore {
    async fn get_group(&self, name: &str) -> Result<Option<Namespace>, StoreError> {
        Ok(self.group(name))
    }

    async fn update_group(&self, group: &Namespace) -> Result<Namespace, StoreError> {
        let mut s = self.state();
        s.calls.group_updates += 1;
        let name = group
            .metadata
            .name
            .clone()
            .ok_or_else(|| StoreError::Other("namespace has no metadata.name".to_string()))?;
        let key = format!("Namespace/{}", name);
        if s.group_update_conflicts > 0 {
            s.group_update_conflicts -= 1;
            return Err(StoreError::Conflict(key));
        }
        let current = s
            .groups
            .get(&name)
            .cloned()
            .ok_or_else(|| StoreError::NotFound(key.clone()))?;
        if version_mismatch(&current.metadata, &group.metadata) {
            return Err(StoreError::Conflict(key));
        }
        let finalizers: BTreeSet<&String> = group.metadata.finalizers.iter().flatten().collect();
        let old_finalizers: BTreeSet<&String> = current.metadata.finalizers.iter().flatten().collect();
        if current.metadata.deletion_timestamp.is_some() && !finalizers.is_subset(&old_finalizers) {
            return Err(StoreError::Forbidden(key));
        }

        let mut updated = group.clone();
        updated.metadata.uid = current.metadata.uid.clone();
        updated.metadata.deletion_timestamp = current.metadata.deletion_timestamp.clone();
        updated.status = current.status.clone();
        if updated == current {
            return Ok(current);
        }
        updated.metadata.resource_version = Some(s.next_resource_version());
        if updated.metadata.deletion_timestamp.is_some() && finalizers.is_empty() {
            s.groups.remove(&name);
            s.resources.retain(|(g, _), _| g != &name);
        } else {
            s.groups.insert(name, updated.clone());
        }
        Ok(updated)
    }

    async fn get_class(&self, name: &str) -> Result<Option<NamespaceClass>, StoreError> {
        Ok(self.class(name))
    }

    async fn update_class_status(&self, class: &NamespaceClass) -> Result<NamespaceClass, StoreError> {
        let mut s = self.state();
        s.calls.status_updates += 1;
        let name = class
            .metadata
            .name
            .clone()
            .ok_or_else(|| StoreError::Other("namespaceclass has no metadata.name".to_string()))?;
        let key = format!("NamespaceClass/{}", name);
        if s.status_update_conflicts > 0 {
            s.status_update_conflicts -= 1;
            return Err(StoreError::Conflict(key));
        }
        let mut current = s
            .classes
            .get(&name)
            .cloned()
            .ok_or_else(|| StoreError::NotFound(key.clone()))?;
        if version_mismatch(&current.metadata, &class.metadata) {
            return Err(StoreError::Conflict(key));
        }
        if current.status == class.status {
            return Ok(current);
        }
        current.status = class.status.clone();
        current.metadata.resource_version = Some(s.next_resource_version());
        s.classes.insert(name, current.clone());
        Ok(current)
    }

    async fn get_resource(&self, group: &str, resource: &ResourceRef) -> Result<Option<DynamicObject>, StoreError> {
        Ok(self.resource(group, resource))
    }

    async fn create_resource(&self, group: &str, obj: &DynamicObject) -> Result<DynamicObject, StoreError> {
        let mut s = self.state();
        s.calls.creates += 1;
        let key = ResourceRef::of(obj)
            .ok_or_else(|| StoreError::Other("object is missing apiVersion, kind or name".to_string()))?;
        if !s.groups.contains_key(group) {
            return Err(StoreError::NotFound(format!("Namespace/{}", group)));
        }
        let store_key = (group.to_string(), key);
        if s.resources.contains_key(&store_key) {
            return Err(StoreError::AlreadyExists(store_key.1.to_string()));
        }
        let mut created = obj.clone();
        created.metadata.namespace = Some(group.to_string());
        s.stamp_new(&mut created.metadata);
        s.resources.insert(store_key, created.clone());
        Ok(created)
    }

    async fn update_resource(&self, group: &str, obj: &DynamicObject) -> Result<DynamicObject, StoreError> {
        let mut s = self.state();
        s.calls.updates += 1;
        let key = ResourceRef::of(obj)
            .ok_or_else(|| StoreError::Other("object is missing apiVersion, kind or name".to_string()))?;
        let store_key = (group.to_string(), key);
        let current = s
            .resources
            .get(&store_key)
            .cloned()
            .ok_or_else(|| StoreError::NotFound(store_key.1.to_string()))?;
        if obj.metadata.resource_version.is_none() {
            return Err(StoreError::Other(format!(
                "{}: metadata.resourceVersion must be specified for an update",
                store_key.1
            )));
        }
        if version_mismatch(&current.metadata, &obj.metadata) {
            return Err(StoreError::Conflict(store_key.1.to_string()));
        }
        let mut updated = obj.clone();
        updated.metadata.namespace = Some(group.to_string());
        updated.metadata.uid = current.metadata.uid.clone();
        updated.metadata.resource_version = Some(s.next_resource_version());
        s.resources.insert(store_key, updated.clone());
        Ok(updated)
    }

    async fn delete_resource(&self, group: &str, resource: &ResourceRef) -> Result<(), StoreError> {
        let mut s = self.state();
        s.calls.deletes += 1;
        let store_key = (group.to_string(), resource.clone());
        if let Some((remaining, error)) = s.delete_failures.get_mut(&store_key) {
            if *remaining > 0 {
                *remaining -= 1;
                return Err(error.clone());
            }
        }
        match s.resources.remove(&store_key) {
            Some(_) => Ok(()),
            None => Err(StoreError::NotFound(resource.to_string())),
        }
    }
}
