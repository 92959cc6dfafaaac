// Copyright 2022 VMware, Inc.
// SPDX-License-Identifier: MIT
use crate::store::ResourceRef;
use serde::{Deserialize, Serialize};

/// One resource the controller created on behalf of a namespace's class.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ManagedResourceDescriptor {
    pub api_version: String,
    pub kind: String,
    pub name: String,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub hash: String,
}

impl ManagedResourceDescriptor {
    pub fn resource_ref(&self) -> ResourceRef {
        ResourceRef::new(&self.api_version, &self.kind, &self.name)
    }
}

/// The ordered list of descriptors a namespace owns. This is an in-memory value;
/// it is only turned into text at the annotation boundary, where an empty ledger
/// is represented by the annotation being absent.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Ledger {
    entries: Vec<ManagedResourceDescriptor>,
}

impl Ledger {
    pub fn new(entries: Vec<ManagedResourceDescriptor>) -> Self {
        Ledger { entries }
    }

    pub fn entries(&self) -> &[ManagedResourceDescriptor] {
        &self.entries
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// Entries whose (apiVersion, kind, name) is not among `keep`.
    pub fn without<'a>(&'a self, keep: &'a [ResourceRef]) -> impl Iterator<Item = &'a ManagedResourceDescriptor> + 'a {
        self.entries.iter().filter(move |d| !keep.contains(&d.resource_ref()))
    }

    /// Reads the annotation value. An absent or empty value is an empty ledger;
    /// anything else must parse.
    pub fn decode(annotation: Option<&str>) -> Result<Ledger, serde_json::Error> {
        match annotation {
            None | Some("") => Ok(Ledger::default()),
            Some(text) => Ok(Ledger::new(serde_json::from_str(text)?)),
        }
    }

    /// The annotation value to store, or `None` when the key must be removed.
    pub fn encode(&self) -> Result<Option<String>, serde_json::Error> {
        if self.entries.is_empty() {
            return Ok(None);
        }
        serde_json::to_string(&self.entries).map(Some)
    }
}
