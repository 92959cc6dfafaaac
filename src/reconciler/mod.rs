// Copyright 2022 VMware, Inc.
// SPDX-License-Identifier: MIT
pub mod engine;
pub mod finalizer;
pub mod hasher;
pub mod ledger;
pub mod registry;
pub mod retry;
pub mod status;

pub use engine::{EngineConfig, ReconcileOutcome, ReconciliationEngine};
pub use retry::RetryPolicy;
