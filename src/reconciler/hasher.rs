// Copyright 2022 VMware, Inc.
// SPDX-License-Identifier: MIT
use crate::store::ResourceRef;
use k8s_openapi::apimachinery::pkg::apis::meta::v1::ObjectMeta;
use kube::api::DynamicObject;
use serde_json::Value;
use sha2::{Digest, Sha256};

/// A manifest from a class that passed minimal shape validation: apiVersion, kind
/// and metadata.name are present and non-empty. Nothing else is checked.
#[derive(Debug, Clone)]
pub struct ResourceTemplate {
    pub api_version: String,
    pub kind: String,
    pub name: String,
    pub object: DynamicObject,
}

impl ResourceTemplate {
    pub fn parse(raw: &Value) -> Result<ResourceTemplate, String> {
        if !raw.is_object() {
            return Err("resource is not an object".to_string());
        }
        let field = |pointer: &str| {
            raw.pointer(pointer)
                .and_then(Value::as_str)
                .filter(|s| !s.is_empty())
                .map(str::to_string)
        };
        let api_version = field("/apiVersion").ok_or_else(|| "resource is missing apiVersion".to_string())?;
        let kind = field("/kind").ok_or_else(|| "resource is missing kind".to_string())?;
        let name = field("/metadata/name").ok_or_else(|| "resource is missing name".to_string())?;
        let object: DynamicObject = serde_json::from_value(raw.clone())
            .map_err(|e| format!("resource {}/{} is malformed: {}", kind, name, e))?;
        Ok(ResourceTemplate {
            api_version,
            kind,
            name,
            object,
        })
    }

    pub fn resource_ref(&self) -> ResourceRef {
        ResourceRef::new(&self.api_version, &self.kind, &self.name)
    }

    pub fn content_hash(&self) -> String {
        hash(&canonicalize(&self.object))
    }
}

/// The part of an object that participates in drift detection.
#[derive(Debug, Clone, PartialEq)]
pub struct CanonicalSpec(Value);

/// Metadata fields the apiserver rewrites on its own; they never take part in hashing
/// and must not be sent back from a template.
pub fn strip_volatile_metadata(meta: &mut ObjectMeta) {
    meta.resource_version = None;
    meta.generation = None;
    meta.creation_timestamp = None;
    meta.annotations = None;
}

/// Reduces an object to its `spec` sub-document. Kind and name are not
/// part of the result, so two templates that differ only in name hash identically.
pub fn canonicalize(obj: &DynamicObject) -> CanonicalSpec {
    let mut stripped = obj.clone();
    strip_volatile_metadata(&mut stripped.metadata);
    CanonicalSpec(stripped.data.get("spec").cloned().unwrap_or(Value::Null))
}

/// Lowercase hex SHA-256 over the canonical JSON encoding of `canonical`.
pub fn hash(canonical: &CanonicalSpec) -> String {
    let mut encoded = String::new();
    write_canonical(&canonical.0, &mut encoded);
    hex::encode(Sha256::digest(encoded.as_bytes()))
}

// Compact JSON with object keys sorted at every level, whatever the map's iteration order.
fn write_canonical(value: &Value, out: &mut String) {
    match value {
        Value::Object(map) => {
            let mut keys: Vec<&String> = map.keys().collect();
            keys.sort();
            out.push('{');
            for (i, key) in keys.into_iter().enumerate() {
                if i > 0 {
                    out.push(',');
                }
                write_canonical(&Value::String(key.clone()), out);
                out.push(':');
                if let Some(v) = map.get(key) {
                    write_canonical(v, out);
                }
            }
            out.push('}');
        }
        Value::Array(items) => {
            out.push('[');
            for (i, item) in items.iter().enumerate() {
                if i > 0 {
                    out.push(',');
                }
                write_canonical(item, out);
            }
            out.push(']');
        }
        scalar => out.push_str(&scalar.to_string()),
    }
}
