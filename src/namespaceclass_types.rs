// Copyright 2022 VMware, Inc.
// SPDX-License-Identifier: MIT
use k8s_openapi::apimachinery::pkg::apis::meta::v1::{Condition, Time};
use kube::CustomResource;
use schemars::schema::{ArrayValidation, InstanceType, Schema, SchemaObject};
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};

// A NamespaceClass is a cluster-scoped template set: every Namespace labelled with
// the class name gets exactly the resources listed in spec.resources.
#[derive(CustomResource, Debug, Clone, Default, PartialEq, Deserialize, Serialize, JsonSchema)]
#[kube(group = "namespaceclass.akuity.io", version = "v1", kind = "NamespaceClass")]
#[kube(shortname = "nsc", status = "NamespaceClassStatus")]
#[serde(rename_all = "camelCase")]
pub struct NamespaceClassSpec {
    /// Raw manifests applied to every bound namespace, in order.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    #[schemars(schema_with = "raw_resources_schema")]
    pub resources: Vec<serde_json::Value>,
}

#[derive(Debug, Clone, Default, PartialEq, Deserialize, Serialize, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct NamespaceClassStatus {
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub conditions: Vec<Condition>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub last_update_time: Option<Time>,
    /// Namespaces that have converged onto this class at least once.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub managed_namespaces: Vec<String>,
}

// The manifests are schema-less; the apiserver must keep every field it is given.
fn raw_resources_schema(_: &mut schemars::gen::SchemaGenerator) -> Schema {
    let item = SchemaObject {
        instance_type: Some(InstanceType::Object.into()),
        extensions: [(
            "x-kubernetes-preserve-unknown-fields".to_string(),
            serde_json::Value::Bool(true),
        )]
        .into_iter()
        .collect(),
        ..SchemaObject::default()
    };
    Schema::Object(SchemaObject {
        instance_type: Some(InstanceType::Array.into()),
        array: Some(Box::new(ArrayValidation {
            items: Some(Schema::Object(item).into()),
            ..ArrayValidation::default()
        })),
        ..SchemaObject::default()
    })
}
