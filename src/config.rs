// Copyright 2022 VMware, Inc.
// SPDX-License-Identifier: MIT
use crate::reconciler::{EngineConfig, RetryPolicy};
use crate::shim_layer::RuntimeConfig;
use clap::{Args, Parser, Subcommand};
use std::time::Duration;

#[derive(Debug, Parser)]
#[command(name = "namespace-class-controller", version, about = "Keeps namespaces in sync with their NamespaceClass")]
pub struct Cli {
    /// Emit logs as JSON lines.
    #[arg(long, global = true, env = "NSC_LOG_JSON")]
    pub log_json: bool,

    #[command(subcommand)]
    pub command: Command,
}

#[derive(Debug, Subcommand)]
pub enum Command {
    /// Print the NamespaceClass custom resource definition.
    Export,
    /// Run the controller against the current kubeconfig context.
    Run(RunArgs),
}

#[derive(Debug, Clone, Args)]
pub struct RunArgs {
    /// Namespaces reconciled in parallel.
    #[arg(
        long,
        env = "NSC_CONCURRENCY",
        default_value_t = 5,
        value_parser = clap::value_parser!(u16).range(1..)
    )]
    pub concurrency: u16,

    #[arg(long, env = "NSC_RECONCILE_TIMEOUT_SECS", default_value_t = 30)]
    pub reconcile_timeout_secs: u64,

    /// Retry delay for namespaces whose class does not exist yet.
    #[arg(long, env = "NSC_MISSING_CLASS_REQUEUE_SECS", default_value_t = 60)]
    pub missing_class_requeue_secs: u64,

    /// Retry delay for namespace deletions whose cleanup failed.
    #[arg(long, env = "NSC_TEARDOWN_RETRY_SECS", default_value_t = 10)]
    pub teardown_retry_secs: u64,

    #[arg(long, env = "NSC_ERROR_REQUEUE_SECS", default_value_t = 10)]
    pub error_requeue_secs: u64,

    /// Attempts per write before an optimistic-concurrency conflict is reported.
    #[arg(long, env = "NSC_CONFLICT_RETRY_ATTEMPTS", default_value_t = 5)]
    pub conflict_retry_attempts: u32,
}

impl RunArgs {
    pub fn engine_config(&self) -> EngineConfig {
        EngineConfig {
            missing_class_requeue: Duration::from_secs(self.missing_class_requeue_secs),
            teardown_retry: Duration::from_secs(self.teardown_retry_secs),
            retry: RetryPolicy {
                attempts: self.conflict_retry_attempts,
                ..RetryPolicy::default()
            },
        }
    }

    pub fn runtime_config(&self) -> RuntimeConfig {
        RuntimeConfig {
            concurrency: self.concurrency,
            reconcile_timeout: Duration::from_secs(self.reconcile_timeout_secs),
            error_requeue: Duration::from_secs(self.error_requeue_secs),
        }
    }
}
