// Copyright 2022 VMware, Inc.
// SPDX-License-Identifier: MIT
pub mod common;
pub mod config;
pub mod error;
pub mod namespaceclass_types;
pub mod reconciler;
pub mod router;
pub mod shim_layer;
pub mod store;

pub use error::Error;
