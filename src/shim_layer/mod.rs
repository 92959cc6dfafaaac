// Copyright 2022 VMware, Inc.
// SPDX-License-Identifier: MIT
pub mod controller_runtime;

pub use controller_runtime::{run_controller, RuntimeConfig};
