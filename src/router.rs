// Copyright 2022 VMware, Inc.
// SPDX-License-Identifier: MIT
use crate::common::{bound_class, deletion_requested};
use crate::namespaceclass_types::NamespaceClass;
use futures::{future, Stream, TryStreamExt};
use k8s_openapi::api::core::v1::Namespace;
use kube::runtime::{
    reflector::{self, ObjectRef, Store},
    watcher, WatchStreamExt,
};
use std::collections::{hash_map::DefaultHasher, BTreeSet, HashMap};
use std::hash::{Hash, Hasher};
use tracing::*;

/// The parts of a namespace whose change requires a reconcile.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct GroupFingerprint {
    class: Option<String>,
    finalizers: BTreeSet<String>,
    deleting: bool,
}

/// Predicate for namespace triggers: an update only reaches the controller when
/// the class label, the finalizer set or the deletion marker moved.
pub fn group_fingerprint(ns: &Namespace) -> Option<GroupFingerprint> {
    Some(GroupFingerprint {
        class: bound_class(ns).map(str::to_string),
        finalizers: ns.metadata.finalizers.iter().flatten().cloned().collect(),
        deleting: deletion_requested(ns),
    })
}

/// Namespace watch events into controller triggers. Every event still reaches
/// `writer`, so the cache behind `bound_groups` sees the full picture. Deletion
/// events never trigger; teardown happens behind the finalizer before them.
pub fn group_triggers<S>(
    events: S,
    writer: reflector::store::Writer<Namespace>,
) -> impl Stream<Item = Result<Namespace, watcher::Error>>
where
    S: Stream<Item = Result<watcher::Event<Namespace>, watcher::Error>>,
{
    events
        .reflect(writer)
        .applied_objects()
        .predicate_filter(|ns: &Namespace| {
            group_fingerprint(ns).map(|fp| {
                let mut hasher = DefaultHasher::new();
                fp.hash(&mut hasher);
                hasher.finish()
            })
        })
}

/// Remembers the last generation seen per class. Status writes leave the
/// generation alone, so the engine's own status updates never fan out.
#[derive(Debug, Default)]
pub struct ClassChanges {
    generations: HashMap<String, Option<i64>>,
}

impl ClassChanges {
    /// Returns the class when its bound namespaces need a reconcile.
    pub fn observe(&mut self, event: watcher::Event<NamespaceClass>) -> Option<NamespaceClass> {
        match event {
            watcher::Event::InitApply(class) => {
                let name = class.metadata.name.clone()?;
                self.generations.insert(name, class.metadata.generation);
                Some(class)
            }
            watcher::Event::Apply(class) => {
                let name = class.metadata.name.clone()?;
                let generation = class.metadata.generation;
                if self.generations.insert(name.clone(), generation) == Some(generation) {
                    trace!("NamespaceClass {} generation unchanged, skipping fan-out", name);
                    return None;
                }
                Some(class)
            }
            watcher::Event::Delete(class) => {
                self.generations.remove(class.metadata.name.as_deref()?);
                Some(class)
            }
            watcher::Event::Init | watcher::Event::InitDone => None,
        }
    }
}

/// Class watch events into fan-out triggers.
pub fn class_triggers<S>(events: S) -> impl Stream<Item = Result<NamespaceClass, watcher::Error>>
where
    S: Stream<Item = Result<watcher::Event<NamespaceClass>, watcher::Error>>,
{
    let mut changes = ClassChanges::default();
    events.try_filter_map(move |event| future::ready(Ok(changes.observe(event))))
}

/// Every cached namespace labelled with `class`.
pub fn bound_groups(groups: &Store<Namespace>, class: &NamespaceClass) -> Vec<ObjectRef<Namespace>> {
    let Some(name) = class.metadata.name.as_deref() else {
        return Vec::new();
    };
    let refs: Vec<ObjectRef<Namespace>> = groups
        .state()
        .iter()
        .filter(|ns| bound_class(ns) == Some(name))
        .map(|ns| ObjectRef::from_obj(&**ns))
        .collect();
    debug!("NamespaceClass {} changed, queued {} namespace(s)", name, refs.len());
    refs
}
