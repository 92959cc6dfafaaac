// Copyright 2022 VMware, Inc.
// SPDX-License-Identifier: MIT
use crate::error::Error;
use crate::namespaceclass_types::NamespaceClassStatus;
use crate::reconciler::retry::{retry_on_conflict, RetryPolicy};
use crate::store::ObjectStore;
use k8s_openapi::apimachinery::pkg::apis::meta::v1::{Condition, Time};
use tracing::*;

pub const TEMPLATES_VALID: &str = "TemplatesValid";
pub const RESOURCES_APPLIED: &str = "ResourcesApplied";

/// A condition to be recorded on a class.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ConditionUpdate {
    pub type_: &'static str,
    pub status: bool,
    pub reason: &'static str,
    pub message: String,
}

impl ConditionUpdate {
    pub fn templates_valid(count: usize) -> Self {
        ConditionUpdate {
            type_: TEMPLATES_VALID,
            status: true,
            reason: "TemplatesParsed",
            message: format!("{} resource template(s) are valid", count),
        }
    }

    pub fn templates_invalid(reason: &str) -> Self {
        ConditionUpdate {
            type_: TEMPLATES_VALID,
            status: false,
            reason: "InvalidTemplate",
            message: reason.to_string(),
        }
    }

    pub fn applied() -> Self {
        ConditionUpdate {
            type_: RESOURCES_APPLIED,
            status: true,
            reason: "Reconciled",
            message: "resources are applied to bound namespaces".to_string(),
        }
    }

    pub fn apply_failed(group: &str, error: &Error) -> Self {
        ConditionUpdate {
            type_: RESOURCES_APPLIED,
            status: false,
            reason: "ApplyFailed",
            message: format!("namespace {}: {}", group, error),
        }
    }
}

/// Upserts a condition; the transition time only moves when the status flips.
/// Returns whether anything changed.
pub fn set_condition(conditions: &mut Vec<Condition>, update: &ConditionUpdate, now: &Time) -> bool {
    let status = if update.status { "True" } else { "False" };
    match conditions.iter_mut().find(|c| c.type_ == update.type_) {
        Some(existing) => {
            if existing.status == status && existing.reason == update.reason && existing.message == update.message {
                return false;
            }
            if existing.status != status {
                existing.last_transition_time = now.clone();
            }
            existing.status = status.to_string();
            existing.reason = update.reason.to_string();
            existing.message = update.message.clone();
            true
        }
        None => {
            conditions.push(Condition {
                type_: update.type_.to_string(),
                status: status.to_string(),
                reason: update.reason.to_string(),
                message: update.message.clone(),
                last_transition_time: now.clone(),
                observed_generation: None,
            });
            true
        }
    }
}

/// Adds `group` to the managed namespaces once. Returns whether it was added.
pub fn add_managed_namespace(status: &mut NamespaceClassStatus, group: &str, now: &Time) -> bool {
    if status.managed_namespaces.iter().any(|g| g == group) {
        return false;
    }
    status.managed_namespaces.push(group.to_string());
    status.last_update_time = Some(now.clone());
    true
}

/// Read-modify-write of a class status. `bound_group` is recorded as managed when
/// set. A class that has disappeared is left alone.
pub async fn update_status<S: ObjectStore + ?Sized>(
    store: &S,
    policy: &RetryPolicy,
    class: &str,
    bound_group: Option<&str>,
    conditions: &[ConditionUpdate],
) -> Result<(), Error> {
    let what = format!("status of namespaceclass {}", class);
    retry_on_conflict(policy, &what, || try_update_status(store, class, bound_group, conditions)).await
}

async fn try_update_status<S: ObjectStore + ?Sized>(
    store: &S,
    class: &str,
    bound_group: Option<&str>,
    conditions: &[ConditionUpdate],
) -> Result<(), Error> {
    let Some(mut current) = store.get_class(class).await? else {
        debug!("NamespaceClass {} is gone, skipping status update", class);
        return Ok(());
    };
    let now = Time(chrono::Utc::now());
    let status = current.status.get_or_insert_with(NamespaceClassStatus::default);
    let mut changed = false;
    if let Some(group) = bound_group {
        changed |= add_managed_namespace(status, group, &now);
    }
    for update in conditions {
        changed |= set_condition(&mut status.conditions, update, &now);
    }
    if changed {
        store.update_class_status(&current).await?;
        debug!("Updated status of NamespaceClass {}", class);
    }
    Ok(())
}
