// Copyright 2022 VMware, Inc.
// SPDX-License-Identifier: MIT
use k8s_openapi::api::core::v1::Namespace;
use std::collections::BTreeMap;

/// Label on a Namespace that selects the NamespaceClass it is bound to.
pub const CLASS_LABEL: &str = "namespaceclass.akuity.io/name";

/// Annotation on a Namespace holding the serialized managed-resource ledger.
pub const LEDGER_ANNOTATION: &str = "namespaceclass.akuity.io/managed-resources";

/// Annotation stamped on every resource the controller creates.
pub const MANAGED_BY_ANNOTATION: &str = "namespaceclass.akuity.io/managed-by";

/// Annotation naming the class a resource was created for.
pub const CREATED_BY_CLASS_ANNOTATION: &str = "namespaceclass.akuity.io/created-by-class";

/// Annotation carrying the content hash of the template a resource was built from.
pub const RESOURCE_HASH_ANNOTATION: &str = "namespaceclass.akuity.io/resource-hash";

/// Finalizer that blocks Namespace deletion until teardown completes.
pub const NAMESPACE_FINALIZER: &str = "namespaceclass.akuity.io/finalizer";

pub const MANAGED_BY_VALUE: &str = "namespaceclass-controller";

pub fn group_name(ns: &Namespace) -> Option<&str> {
    ns.metadata.name.as_deref()
}

/// The class id a Namespace is bound to, if any.
pub fn bound_class(ns: &Namespace) -> Option<&str> {
    ns.metadata
        .labels
        .as_ref()
        .and_then(|labels| labels.get(CLASS_LABEL))
        .map(String::as_str)
}

pub fn has_finalizer(ns: &Namespace) -> bool {
    ns.metadata
        .finalizers
        .as_ref()
        .map(|f| f.iter().any(|x| x == NAMESPACE_FINALIZER))
        .unwrap_or(false)
}

pub fn deletion_requested(ns: &Namespace) -> bool {
    ns.metadata.deletion_timestamp.is_some()
}

pub fn annotation<'a>(annotations: &'a Option<BTreeMap<String, String>>, key: &str) -> Option<&'a str> {
    annotations
        .as_ref()
        .and_then(|a| a.get(key))
        .map(String::as_str)
}
