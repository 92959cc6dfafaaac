// Copyright 2022 VMware, Inc.
// SPDX-License-Identifier: MIT
use crate::common::{
    annotation, bound_class, group_name, CREATED_BY_CLASS_ANNOTATION, LEDGER_ANNOTATION, MANAGED_BY_ANNOTATION,
    MANAGED_BY_VALUE, RESOURCE_HASH_ANNOTATION,
};
use crate::error::Error;
use crate::namespaceclass_types::NamespaceClass;
use crate::reconciler::finalizer::{add_finalizer, remove_finalizer, GroupPhase};
use crate::reconciler::hasher::{strip_volatile_metadata, ResourceTemplate};
use crate::reconciler::ledger::{Ledger, ManagedResourceDescriptor};
use crate::reconciler::registry::{read_ledger, write_ledger};
use crate::reconciler::retry::RetryPolicy;
use crate::reconciler::status::{update_status, ConditionUpdate};
use crate::store::{ObjectStore, ResourceRef, StoreError};
use k8s_openapi::api::core::v1::Namespace;
use kube::api::DynamicObject;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tracing::*;

/// What the controller should do with a group after a successful pass.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReconcileOutcome {
    NoOp,
    /// Run again right away.
    Requeue,
    RequeueAfter(Duration),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct EngineConfig {
    /// Delay before retrying a group whose class does not exist yet.
    pub missing_class_requeue: Duration,
    /// Delay before retrying a deletion whose teardown was incomplete.
    pub teardown_retry: Duration,
    pub retry: RetryPolicy,
}

impl Default for EngineConfig {
    fn default() -> Self {
        EngineConfig {
            missing_class_requeue: Duration::from_secs(60),
            teardown_retry: Duration::from_secs(10),
            retry: RetryPolicy::default(),
        }
    }
}

/// Converges one namespace onto the class it is labelled with.
///
/// The engine holds no locks: callers must never run two passes for the same
/// namespace at once. Within a pass the ledger is written only after every desired
/// resource has been applied and every dropped one deleted, so a pass that is cut
/// short leaves the previous ledger in place and the next pass derives the same plan.
pub struct ReconciliationEngine<S: ObjectStore + ?Sized> {
    store: Arc<S>,
    config: EngineConfig,
}

impl<S: ObjectStore + ?Sized> ReconciliationEngine<S> {
    pub fn new(store: Arc<S>, config: EngineConfig) -> Self {
        ReconciliationEngine { store, config }
    }

    pub fn store(&self) -> &Arc<S> {
        &self.store
    }

    pub fn config(&self) -> &EngineConfig {
        &self.config
    }

    #[instrument(skip(self, group), fields(namespace = %group))]
    pub async fn reconcile(&self, group: &str) -> Result<ReconcileOutcome, Error> {
        let started = Instant::now();
        info!("Reconciling namespace");
        let result = self.reconcile_group(group).await;
        match &result {
            Ok(outcome) => info!(?outcome, elapsed = ?started.elapsed(), "Reconcile finished"),
            Err(e) => warn!(error = %e, elapsed = ?started.elapsed(), "Reconcile failed"),
        }
        result
    }

    async fn reconcile_group(&self, group: &str) -> Result<ReconcileOutcome, Error> {
        let Some(ns) = self.store.get_group(group).await? else {
            debug!("Namespace is gone, nothing to do");
            return Ok(ReconcileOutcome::NoOp);
        };
        match GroupPhase::of(&ns) {
            GroupPhase::Deleted => {
                debug!("Namespace is being deleted without our finalizer, nothing to do");
                Ok(ReconcileOutcome::NoOp)
            }
            GroupPhase::Deleting => self.tear_down(&ns).await,
            GroupPhase::Unbound | GroupPhase::Unbinding => self.unbind(&ns).await,
            GroupPhase::Binding => {
                add_finalizer(self.store.as_ref(), &self.config.retry, group).await?;
                Ok(ReconcileOutcome::Requeue)
            }
            GroupPhase::Bound => {
                let class = bound_class(&ns).ok_or(Error::MissingObjectKey(".metadata.labels"))?;
                self.apply_class(&ns, class).await
            }
        }
    }

    /// Deletion path: every ledgered resource must be gone before the finalizer is
    /// released. Any failure keeps the finalizer and schedules a retry.
    async fn tear_down(&self, ns: &Namespace) -> Result<ReconcileOutcome, Error> {
        let group = group_name(ns).ok_or(Error::MissingObjectKey(".metadata.name"))?;
        let ledger = read_ledger(ns)?;
        info!("Namespace is being deleted, removing {} managed resource(s)", ledger.len());
        let mut failures = 0;
        for descriptor in ledger.entries() {
            let key = descriptor.resource_ref();
            if let Err(e) = self.delete_owned(group, &key).await {
                error!(resource = %key, error = %e, "Failed to delete managed resource");
                failures += 1;
            }
        }
        if failures > 0 {
            warn!(
                "{} managed resource(s) could not be deleted, retrying in {:?}",
                failures, self.config.teardown_retry
            );
            return Ok(ReconcileOutcome::RequeueAfter(self.config.teardown_retry));
        }
        remove_finalizer(self.store.as_ref(), &self.config.retry, group).await?;
        Ok(ReconcileOutcome::NoOp)
    }

    /// The class label is gone: remove everything the ledger lists, clear the ledger
    /// and release the finalizer. The ledger is only cleared once every delete
    /// succeeded.
    async fn unbind(&self, ns: &Namespace) -> Result<ReconcileOutcome, Error> {
        let group = group_name(ns).ok_or(Error::MissingObjectKey(".metadata.name"))?;
        let ledger = read_ledger(ns)?;
        let has_annotation = annotation(&ns.metadata.annotations, LEDGER_ANNOTATION).is_some();
        if ledger.is_empty() && !has_annotation && GroupPhase::of(ns) == GroupPhase::Unbound {
            debug!("Namespace is not bound to a class, nothing to do");
            return Ok(ReconcileOutcome::NoOp);
        }
        info!("Namespace left its class, removing {} managed resource(s)", ledger.len());
        for descriptor in ledger.entries() {
            self.delete_owned(group, &descriptor.resource_ref()).await?;
        }
        if has_annotation {
            write_ledger(self.store.as_ref(), &self.config.retry, group, &Ledger::default()).await?;
        }
        remove_finalizer(self.store.as_ref(), &self.config.retry, group).await?;
        Ok(ReconcileOutcome::NoOp)
    }

    async fn apply_class(&self, ns: &Namespace, class_name: &str) -> Result<ReconcileOutcome, Error> {
        let group = group_name(ns).ok_or(Error::MissingObjectKey(".metadata.name"))?;
        let Some(class) = self.store.get_class(class_name).await? else {
            info!(
                "NamespaceClass {} not found, retrying in {:?}",
                class_name, self.config.missing_class_requeue
            );
            return Ok(ReconcileOutcome::RequeueAfter(self.config.missing_class_requeue));
        };
        let templates = match parse_templates(&class) {
            Ok(templates) => templates,
            Err(reason) => {
                self.report(class_name, &[ConditionUpdate::templates_invalid(&reason)])
                    .await;
                return Err(Error::InvalidTemplate {
                    class: class_name.to_string(),
                    reason,
                });
            }
        };
        let previous = read_ledger(ns)?;
        if let Err(e) = self.converge(group, class_name, &templates, &previous).await {
            let conditions = [
                ConditionUpdate::templates_valid(templates.len()),
                ConditionUpdate::apply_failed(group, &e),
            ];
            self.report(class_name, &conditions).await;
            return Err(e);
        }
        let conditions = [ConditionUpdate::templates_valid(templates.len()), ConditionUpdate::applied()];
        update_status(
            self.store.as_ref(),
            &self.config.retry,
            class_name,
            Some(group),
            &conditions,
        )
        .await?;
        Ok(ReconcileOutcome::NoOp)
    }

    // Apply every template in order, delete what the class no longer declares, then
    // record the new ledger.
    async fn converge(
        &self,
        group: &str,
        class_name: &str,
        templates: &[ResourceTemplate],
        previous: &Ledger,
    ) -> Result<(), Error> {
        let mut desired = Vec::with_capacity(templates.len());
        for template in templates {
            desired.push(self.apply_template(group, class_name, template).await?);
        }

        let keep: Vec<ResourceRef> = desired.iter().map(ManagedResourceDescriptor::resource_ref).collect();
        let removed: Vec<ResourceRef> = previous.without(&keep).map(ManagedResourceDescriptor::resource_ref).collect();
        for key in &removed {
            self.delete_owned(group, key).await?;
        }

        write_ledger(self.store.as_ref(), &self.config.retry, group, &Ledger::new(desired)).await
    }

    /// Creates the resource, updates it when its recorded hash or class tag differs
    /// from the template's, or leaves it alone.
    async fn apply_template(
        &self,
        group: &str,
        class_name: &str,
        template: &ResourceTemplate,
    ) -> Result<ManagedResourceDescriptor, Error> {
        let key = template.resource_ref();
        let hash = template.content_hash();

        let mut desired = template.object.clone();
        let annotations = desired.metadata.annotations.take();
        strip_volatile_metadata(&mut desired.metadata);
        desired.metadata.uid = None;
        desired.metadata.namespace = Some(group.to_string());
        let annotations = desired.metadata.annotations.insert(annotations.unwrap_or_default());
        annotations.insert(MANAGED_BY_ANNOTATION.to_string(), MANAGED_BY_VALUE.to_string());
        annotations.insert(CREATED_BY_CLASS_ANNOTATION.to_string(), class_name.to_string());
        annotations.insert(RESOURCE_HASH_ANNOTATION.to_string(), hash.clone());

        match self.store.get_resource(group, &key).await? {
            None => {
                self.store.create_resource(group, &desired).await?;
                info!(resource = %key, "Created managed resource");
            }
            Some(existing) if is_current(&existing, class_name, &hash) => {
                debug!(resource = %key, "Managed resource is up to date");
            }
            Some(existing) => {
                desired.metadata.resource_version = existing.metadata.resource_version.clone();
                self.store.update_resource(group, &desired).await?;
                info!(resource = %key, "Updated managed resource");
            }
        }

        Ok(ManagedResourceDescriptor {
            api_version: template.api_version.clone(),
            kind: template.kind.clone(),
            name: template.name.clone(),
            hash,
        })
    }

    /// Deletes one owned resource. A resource that is already gone counts as deleted.
    async fn delete_owned(&self, group: &str, key: &ResourceRef) -> Result<(), StoreError> {
        match self.store.delete_resource(group, key).await {
            Ok(()) => {
                info!(resource = %key, "Deleted managed resource");
                Ok(())
            }
            Err(e) if e.is_not_found() => {
                debug!(resource = %key, "Managed resource already gone");
                Ok(())
            }
            Err(e) => Err(e),
        }
    }

    // Status writes on failure paths must not mask the error being reported.
    async fn report(&self, class_name: &str, conditions: &[ConditionUpdate]) {
        if let Err(e) = update_status(self.store.as_ref(), &self.config.retry, class_name, None, conditions).await {
            warn!(error = %e, "Failed to record conditions on NamespaceClass {}", class_name);
        }
    }
}

// Same content and tagged as created by this class.
fn is_current(existing: &DynamicObject, class_name: &str, hash: &str) -> bool {
    let tags = &existing.metadata.annotations;
    annotation(tags, RESOURCE_HASH_ANNOTATION) == Some(hash)
        && annotation(tags, CREATED_BY_CLASS_ANNOTATION) == Some(class_name)
        && annotation(tags, MANAGED_BY_ANNOTATION) == Some(MANAGED_BY_VALUE)
}

/// Validates every template of `class` up front, so that a bad entry anywhere
/// rejects the whole class before anything is applied.
pub fn parse_templates(class: &NamespaceClass) -> Result<Vec<ResourceTemplate>, String> {
    class
        .spec
        .resources
        .iter()
        .enumerate()
        .map(|(i, raw)| ResourceTemplate::parse(raw).map_err(|reason| format!("resources[{}]: {}", i, reason)))
        .collect()
}
