// Copyright 2022 VMware, Inc.
// SPDX-License-Identifier: MIT
pub mod kube_store;
pub mod memory;

use crate::namespaceclass_types::NamespaceClass;
use async_trait::async_trait;
use k8s_openapi::api::core::v1::Namespace;
use kube::api::DynamicObject;
use std::fmt;
use thiserror::Error;

pub use kube_store::KubeStore;
pub use memory::MemoryStore;

/// Identifies one namespaced resource instance by type and name.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ResourceRef {
    pub api_version: String,
    pub kind: String,
    pub name: String,
}

impl ResourceRef {
    pub fn new(api_version: &str, kind: &str, name: &str) -> Self {
        ResourceRef {
            api_version: api_version.to_string(),
            kind: kind.to_string(),
            name: name.to_string(),
        }
    }

    /// The reference of a typed dynamic object; `None` when type or name is missing.
    pub fn of(obj: &DynamicObject) -> Option<Self> {
        let types = obj.types.as_ref()?;
        let name = obj.metadata.name.as_deref()?;
        Some(ResourceRef::new(&types.api_version, &types.kind, name))
    }
}

impl fmt::Display for ResourceRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}/{}", self.api_version, self.kind, self.name)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TransientKind {
    Timeout,
    TooManyRequests,
    ServiceUnavailable,
    ConnectionReset,
}

impl fmt::Display for TransientKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            TransientKind::Timeout => "timeout",
            TransientKind::TooManyRequests => "too many requests",
            TransientKind::ServiceUnavailable => "service unavailable",
            TransientKind::ConnectionReset => "connection reset",
        };
        f.write_str(s)
    }
}

#[derive(Debug, Clone, Error)]
pub enum StoreError {
    #[error("{0} not found")]
    NotFound(String),
    #[error("conflict writing {0}: the object has been modified")]
    Conflict(String),
    #[error("{0} already exists")]
    AlreadyExists(String),
    #[error("request on {0} is forbidden")]
    Forbidden(String),
    #[error("transient store error ({kind}): {message}")]
    Transient { kind: TransientKind, message: String },
    #[error("store request failed: {0}")]
    Other(String),
}

impl StoreError {
    pub fn is_not_found(&self) -> bool {
        matches!(self, StoreError::NotFound(_))
    }

    pub fn is_conflict(&self) -> bool {
        matches!(self, StoreError::Conflict(_))
    }

    pub fn is_transient(&self) -> bool {
        matches!(self, StoreError::Transient { .. })
    }
}

/// The operations the reconciler needs from the cluster. Every write that carries
/// a resource version is conditional on it and fails with `StoreError::Conflict`
/// when the stored object has moved on.
#[async_trait]
pub trait ObjectStore: Send + Sync {
    async fn get_group(&self, name: &str) -> Result<Option<Namespace>, StoreError>;

    async fn update_group(&self, group: &Namespace) -> Result<Namespace, StoreError>;

    async fn get_class(&self, name: &str) -> Result<Option<NamespaceClass>, StoreError>;

    /// Writes only the status of `class`; spec and metadata edits are ignored.
    async fn update_class_status(&self, class: &NamespaceClass) -> Result<NamespaceClass, StoreError>;

    async fn get_resource(
        &self,
        group: &str,
        resource: &ResourceRef,
    ) -> Result<Option<DynamicObject>, StoreError>;

    async fn create_resource(&self, group: &str, obj: &DynamicObject) -> Result<DynamicObject, StoreError>;

    async fn update_resource(&self, group: &str, obj: &DynamicObject) -> Result<DynamicObject, StoreError>;

    async fn delete_resource(&self, group: &str, resource: &ResourceRef) -> Result<(), StoreError>;
}
