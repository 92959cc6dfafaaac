// Copyright 2022 VMware, Inc.
// SPDX-License-Identifier: MIT
use super::{ObjectStore, ResourceRef, StoreError, TransientKind};
use crate::namespaceclass_types::NamespaceClass;
use async_trait::async_trait;
use k8s_openapi::api::core::v1::Namespace;
use kube::{
    api::{Api, DeleteParams, DynamicObject, PostParams},
    core::gvk::GroupVersion,
    discovery::{self, ApiCapabilities, ApiResource, Scope},
    Client,
};
use kube_core::ErrorResponse;
use std::collections::HashMap;
use tokio::sync::RwLock;
use tracing::*;

/// ObjectStore backed by the Kubernetes API server.
pub struct KubeStore {
    client: Client,
    // Discovery results per (apiVersion, kind); resource types rarely change while we run.
    resolved: RwLock<HashMap<(String, String), (ApiResource, ApiCapabilities)>>,
}

impl KubeStore {
    pub fn new(client: Client) -> Self {
        KubeStore {
            client,
            resolved: RwLock::new(HashMap::new()),
        }
    }

    fn namespaces(&self) -> Api<Namespace> {
        Api::all(self.client.clone())
    }

    fn classes(&self) -> Api<NamespaceClass> {
        Api::all(self.client.clone())
    }

    async fn resolve(&self, api_version: &str, kind: &str) -> Result<(ApiResource, ApiCapabilities), StoreError> {
        let cache_key = (api_version.to_string(), kind.to_string());
        if let Some(found) = self.resolved.read().await.get(&cache_key) {
            return Ok(found.clone());
        }
        let gv: GroupVersion = api_version
            .parse()
            .map_err(|e| StoreError::Other(format!("invalid apiVersion {}: {}", api_version, e)))?;
        let gvk = gv.with_kind(kind);
        let resolved = discovery::pinned_kind(&self.client, &gvk).await.map_err(|e| {
            match classify(e) {
                // An unknown kind surfaces from discovery as a 404.
                StoreError::NotFound(_) => StoreError::Other(format!("unknown resource type {}/{}", api_version, kind)),
                other => other,
            }
        })?;
        debug!("Resolved {}/{} to plural {}", api_version, kind, resolved.0.plural);
        self.resolved.write().await.insert(cache_key, resolved.clone());
        Ok(resolved)
    }

    async fn dynamic_api(&self, group: &str, api_version: &str, kind: &str) -> Result<Api<DynamicObject>, StoreError> {
        let (ar, caps) = self.resolve(api_version, kind).await?;
        namespaced_only(api_version, kind, &caps)?;
        Ok(Api::namespaced_with(self.client.clone(), group, &ar))
    }
}

// Class resources are stamped into each namespace; a cluster-scoped kind has no
// per-namespace copy.
fn namespaced_only(api_version: &str, kind: &str, caps: &ApiCapabilities) -> Result<(), StoreError> {
    if caps.scope == Scope::Cluster {
        return Err(StoreError::Other(format!(
            "{}/{} is cluster-scoped; NamespaceClass resources must be namespaced",
            api_version, kind
        )));
    }
    Ok(())
}

fn type_of(obj: &DynamicObject) -> Result<(&str, &str), StoreError> {
    let types = obj
        .types
        .as_ref()
        .ok_or_else(|| StoreError::Other("object has no apiVersion/kind".to_string()))?;
    Ok((types.api_version.as_str(), types.kind.as_str()))
}

fn name_of(obj: &DynamicObject) -> Result<&str, StoreError> {
    obj.metadata
        .name
        .as_deref()
        .ok_or_else(|| StoreError::Other("object has no metadata.name".to_string()))
}

#[async_trait]
impl ObjectStore for KubeStore {
    async fn get_group(&self, name: &str) -> Result<Option<Namespace>, StoreError> {
        self.namespaces().get_opt(name).await.map_err(classify)
    }

    async fn update_group(&self, group: &Namespace) -> Result<Namespace, StoreError> {
        let name = group
            .metadata
            .name
            .as_deref()
            .ok_or_else(|| StoreError::Other("namespace has no metadata.name".to_string()))?;
        self.namespaces()
            .replace(name, &PostParams::default(), group)
            .await
            .map_err(classify)
    }

    async fn get_class(&self, name: &str) -> Result<Option<NamespaceClass>, StoreError> {
        self.classes().get_opt(name).await.map_err(classify)
    }

    async fn update_class_status(&self, class: &NamespaceClass) -> Result<NamespaceClass, StoreError> {
        let name = class
            .metadata
            .name
            .as_deref()
            .ok_or_else(|| StoreError::Other("namespaceclass has no metadata.name".to_string()))?;
        let data = serde_json::to_vec(class).map_err(|e| StoreError::Other(e.to_string()))?;
        self.classes()
            .replace_status(name, &PostParams::default(), data)
            .await
            .map_err(classify)
    }

    async fn get_resource(&self, group: &str, resource: &ResourceRef) -> Result<Option<DynamicObject>, StoreError> {
        let api = self.dynamic_api(group, &resource.api_version, &resource.kind).await?;
        api.get_opt(&resource.name).await.map_err(classify)
    }

    async fn create_resource(&self, group: &str, obj: &DynamicObject) -> Result<DynamicObject, StoreError> {
        let (api_version, kind) = type_of(obj)?;
        let api = self.dynamic_api(group, api_version, kind).await?;
        api.create(&PostParams::default(), obj).await.map_err(classify)
    }

    async fn update_resource(&self, group: &str, obj: &DynamicObject) -> Result<DynamicObject, StoreError> {
        let (api_version, kind) = type_of(obj)?;
        let name = name_of(obj)?;
        let api = self.dynamic_api(group, api_version, kind).await?;
        api.replace(name, &PostParams::default(), obj).await.map_err(classify)
    }

    async fn delete_resource(&self, group: &str, resource: &ResourceRef) -> Result<(), StoreError> {
        let api = self.dynamic_api(group, &resource.api_version, &resource.kind).await?;
        api.delete(&resource.name, &DeleteParams::default())
            .await
            .map(|_| ())
            .map_err(classify)
    }
}

/// Translates a kube-rs error into the store taxonomy the reconciler acts on.
pub fn classify(error: kube::Error) -> StoreError {
    match error {
        kube::Error::Api(ErrorResponse {
            reason, code, message, ..
        }) => match (reason.as_str(), code) {
            ("NotFound", _) | (_, 404) => StoreError::NotFound(message),
            ("AlreadyExists", _) => StoreError::AlreadyExists(message),
            ("Conflict", _) | (_, 409) => StoreError::Conflict(message),
            ("Forbidden", _) | (_, 403) => StoreError::Forbidden(message),
            ("Timeout", _) | ("ServerTimeout", _) | (_, 504) => StoreError::Transient {
                kind: TransientKind::Timeout,
                message,
            },
            ("TooManyRequests", _) | (_, 429) => StoreError::Transient {
                kind: TransientKind::TooManyRequests,
                message,
            },
            ("ServiceUnavailable", _) | (_, 503) => StoreError::Transient {
                kind: TransientKind::ServiceUnavailable,
                message,
            },
            _ => StoreError::Other(format!("{}: {}", reason, message)),
        },
        other => classify_message(other.to_string()),
    }
}

// Transport failures carry no API reason; fall back to the error text.
fn classify_message(message: String) -> StoreError {
    let lower = message.to_lowercase();
    let kind = if lower.contains("timed out") || lower.contains("timeout") {
        Some(TransientKind::Timeout)
    } else if lower.contains("connection refused")
        || lower.contains("connection reset")
        || lower.contains("broken pipe")
        || lower.contains("eof")
    {
        Some(TransientKind::ConnectionReset)
    } else {
        None
    };
    match kind {
        Some(kind) => StoreError::Transient { kind, message },
        None => StoreError::Other(message),
    }
}
