// Copyright 2022 VMware, Inc.
// SPDX-License-Identifier: MIT
use crate::common::group_name;
use crate::error::Error;
use crate::namespaceclass_types::NamespaceClass;
use crate::reconciler::{EngineConfig, ReconcileOutcome, ReconciliationEngine};
use crate::router::{bound_groups, class_triggers, group_triggers};
use crate::store::{KubeStore, ObjectStore};
use anyhow::Result;
use futures::{Future, StreamExt};
use k8s_openapi::api::core::v1::Namespace;
use kube::{
    api::Api,
    runtime::{
        controller::{self, Action, Controller},
        reflector, watcher, WatchStreamExt,
    },
    Client,
};
use std::sync::Arc;
use std::time::Duration;
use tracing::*;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RuntimeConfig {
    /// Upper bound on namespaces reconciled at the same time.
    pub concurrency: u16,
    /// Deadline for a single pass.
    pub reconcile_timeout: Duration,
    /// Delay before retrying a pass that failed.
    pub error_requeue: Duration,
}

impl Default for RuntimeConfig {
    fn default() -> Self {
        RuntimeConfig {
            concurrency: 5,
            reconcile_timeout: Duration::from_secs(30),
            error_requeue: Duration::from_secs(10),
        }
    }
}

// Data we want access to in reconcile and error_policy calls
pub struct Data<S: ObjectStore + ?Sized> {
    engine: ReconciliationEngine<S>,
    config: RuntimeConfig,
}

impl<S: ObjectStore + ?Sized> Data<S> {
    pub fn new(engine: ReconciliationEngine<S>, config: RuntimeConfig) -> Self {
        Data { engine, config }
    }
}

// run_controller prepares and runs the controller.
// Namespaces are the primary resource: their watch feeds a reflector cache and,
// through the fingerprint predicate, the controller's triggers. NamespaceClass
// edits fan out to every cached namespace labelled with the class. The kube-rs
// Controller never runs two passes for one namespace at once, folds repeated
// triggers and keeps only the earliest pending requeue per namespace.
pub async fn run_controller(engine_config: EngineConfig, runtime_config: RuntimeConfig) -> Result<()> {
    let client = Client::try_default().await?;
    let store = Arc::new(KubeStore::new(client.clone()));
    let data = Arc::new(Data::new(ReconciliationEngine::new(store, engine_config), runtime_config));

    let (groups, writer) = reflector::store();
    let namespaces = watcher(Api::<Namespace>::all(client.clone()), watcher::Config::default()).default_backoff();
    let classes = watcher(Api::<NamespaceClass>::all(client), watcher::Config::default()).default_backoff();
    let cache = groups.clone();

    info!("starting controller");
    Controller::for_stream(group_triggers(namespaces, writer), groups)
        .watches_stream(class_triggers(classes), move |class| bound_groups(&cache, &class))
        .with_config(controller::Config::default().concurrency(runtime_config.concurrency))
        .shutdown_on_signal()
        .run(reconcile::<KubeStore>, error_policy::<KubeStore>, data)
        .for_each(|res| async move {
            match res {
                Ok(o) => debug!("reconciled {:?}", o),
                Err(e) => warn!("reconcile failed: {}", e),
            }
        })
        .await;
    info!("controller terminated");
    Ok(())
}

/// One controller pass for a namespace, bounded by the configured deadline.
pub async fn reconcile<S>(ns: Arc<Namespace>, ctx: Arc<Data<S>>) -> Result<Action, Error>
where
    S: ObjectStore + ?Sized + 'static,
{
    let group = group_name(&ns).ok_or(Error::MissingObjectKey(".metadata.name"))?;
    let outcome = within_deadline(group, ctx.config.reconcile_timeout, ctx.engine.reconcile(group)).await?;
    Ok(action_for(outcome))
}

pub fn error_policy<S>(ns: Arc<Namespace>, error: &Error, ctx: Arc<Data<S>>) -> Action
where
    S: ObjectStore + ?Sized,
{
    warn!(
        namespace = group_name(&ns).unwrap_or_default(),
        transient = error.is_transient(),
        "Reconcile failed due to error: {}",
        error
    );
    Action::requeue(ctx.config.error_requeue)
}

pub fn action_for(outcome: ReconcileOutcome) -> Action {
    match outcome {
        ReconcileOutcome::NoOp => Action::await_change(),
        ReconcileOutcome::Requeue => Action::requeue(Duration::ZERO),
        ReconcileOutcome::RequeueAfter(delay) => Action::requeue(delay),
    }
}

async fn within_deadline<F>(group: &str, deadline: Duration, pass: F) -> Result<ReconcileOutcome, Error>
where
    F: Future<Output = Result<ReconcileOutcome, Error>>,
{
    tokio::time::timeout(deadline, pass).await.unwrap_or_else(|_| {
        Err(Error::DeadlineExceeded {
            group: group.to_string(),
        })
    })
}
