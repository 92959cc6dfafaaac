// Copyright 2022 VMware, Inc.
// SPDX-License-Identifier: MIT
use crate::common::{annotation, LEDGER_ANNOTATION};
use crate::error::Error;
use crate::reconciler::ledger::Ledger;
use crate::reconciler::retry::{retry_on_conflict, RetryPolicy};
use crate::store::ObjectStore;
use k8s_openapi::api::core::v1::Namespace;
use tracing::*;

/// Reads the ledger a namespace carries. A value that does not parse is reported
/// as corruption rather than treated as empty, which would orphan whatever it lists.
pub fn read_ledger(ns: &Namespace) -> Result<Ledger, Error> {
    Ledger::decode(annotation(&ns.metadata.annotations, LEDGER_ANNOTATION)).map_err(|source| {
        Error::LedgerCorrupted {
            group: ns.metadata.name.clone().unwrap_or_default(),
            source,
        }
    })
}

/// Persists `ledger` on namespace `group`. Each attempt re-reads the namespace so
/// concurrent label, finalizer and deletion changes are preserved; an empty ledger
/// removes the annotation key. Nothing is written when the stored value already
/// matches. A namespace that no longer exists has nothing left to record.
pub async fn write_ledger<S: ObjectStore + ?Sized>(
    store: &S,
    policy: &RetryPolicy,
    group: &str,
    ledger: &Ledger,
) -> Result<(), Error> {
    let encoded = ledger.encode()?;
    let encoded = encoded.as_deref();
    let what = format!("ledger of namespace {}", group);
    retry_on_conflict(policy, &what, || try_write_ledger(store, group, encoded)).await
}

async fn try_write_ledger<S: ObjectStore + ?Sized>(store: &S, group: &str, encoded: Option<&str>) -> Result<(), Error> {
    let Some(mut ns) = store.get_group(group).await? else {
        debug!("Namespace {} is gone, skipping ledger write", group);
        return Ok(());
    };
    if annotation(&ns.metadata.annotations, LEDGER_ANNOTATION) == encoded {
        return Ok(());
    }
    match encoded {
        Some(value) => {
            ns.metadata
                .annotations
                .get_or_insert_with(Default::default)
                .insert(LEDGER_ANNOTATION.to_string(), value.to_string());
        }
        None => {
            if let Some(annotations) = ns.metadata.annotations.as_mut() {
                annotations.remove(LEDGER_ANNOTATION);
            }
        }
    }
    store.update_group(&ns).await?;
    debug!("Updated ledger of namespace {}", group);
    Ok(())
}
