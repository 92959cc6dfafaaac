// Copyright 2022 VMware, Inc.
// SPDX-License-Identifier: MIT
use crate::common::{bound_class, deletion_requested, has_finalizer, NAMESPACE_FINALIZER};
use crate::error::Error;
use crate::reconciler::retry::{retry_on_conflict, RetryPolicy};
use crate::store::ObjectStore;
use k8s_openapi::api::core::v1::Namespace;
use tracing::*;

/// Where a namespace stands in its binding lifecycle:
///
/// ```text
/// Unbound -> Binding -> Bound -> Deleting -> Deleted
///              Bound -> Unbinding -> Unbound
/// ```
///
/// `Binding` is transient: the finalizer is recorded before any resource is created.
/// `Deleting` holds until every ledgered resource is gone; only then is the finalizer
/// released and the store allowed to finish the deletion.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum GroupPhase {
    /// No class label and no finalizer.
    Unbound,
    /// Class label removed; teardown still owes the finalizer removal.
    Unbinding,
    /// Class label set, finalizer not yet recorded.
    Binding,
    Bound,
    /// Deletion requested while the finalizer is held.
    Deleting,
    /// Deletion requested and nothing of ours blocks it.
    Deleted,
}

impl GroupPhase {
    pub fn of(ns: &Namespace) -> GroupPhase {
        let finalized = has_finalizer(ns);
        if deletion_requested(ns) {
            return if finalized {
                GroupPhase::Deleting
            } else {
                GroupPhase::Deleted
            };
        }
        match (bound_class(ns).is_some(), finalized) {
            (true, true) => GroupPhase::Bound,
            (true, false) => GroupPhase::Binding,
            (false, true) => GroupPhase::Unbinding,
            (false, false) => GroupPhase::Unbound,
        }
    }
}

/// Records the finalizer on `group`. Returns false when it was already present.
pub async fn add_finalizer<S: ObjectStore + ?Sized>(store: &S, policy: &RetryPolicy, group: &str) -> Result<bool, Error> {
    let what = format!("finalizer of namespace {}", group);
    retry_on_conflict(policy, &what, || try_add_finalizer(store, group)).await
}

async fn try_add_finalizer<S: ObjectStore + ?Sized>(store: &S, group: &str) -> Result<bool, Error> {
    let Some(mut ns) = store.get_group(group).await? else {
        return Ok(false);
    };
    if has_finalizer(&ns) || deletion_requested(&ns) {
        return Ok(false);
    }
    ns.metadata
        .finalizers
        .get_or_insert_with(Vec::new)
        .push(NAMESPACE_FINALIZER.to_string());
    store.update_group(&ns).await?;
    info!("Added finalizer to namespace {}", group);
    Ok(true)
}

/// Removes the finalizer from `group`, leaving any other finalizers in place.
/// A namespace that is already gone counts as released.
pub async fn remove_finalizer<S: ObjectStore + ?Sized>(store: &S, policy: &RetryPolicy, group: &str) -> Result<(), Error> {
    let what = format!("finalizer of namespace {}", group);
    retry_on_conflict(policy, &what, || try_remove_finalizer(store, group)).await
}

async fn try_remove_finalizer<S: ObjectStore + ?Sized>(store: &S, group: &str) -> Result<(), Error> {
    let Some(mut ns) = store.get_group(group).await? else {
        return Ok(());
    };
    if !has_finalizer(&ns) {
        return Ok(());
    }
    if let Some(finalizers) = ns.metadata.finalizers.as_mut() {
        finalizers.retain(|f| f != NAMESPACE_FINALIZER);
    }
    match store.update_group(&ns).await {
        Ok(_) => {}
        // Dropping the last finalizer may complete the deletion before the reply.
        Err(e) if e.is_not_found() => {}
        Err(e) => return Err(e.into()),
    }
    info!("Removed finalizer from namespace {}", group);
    Ok(())
}
