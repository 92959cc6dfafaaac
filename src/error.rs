// Copyright 2022 VMware, Inc.
// SPDX-License-Identifier: MIT
use crate::store::StoreError;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum Error {
    #[error("MissingObjectKey: {0}")]
    MissingObjectKey(&'static str),

    #[error(transparent)]
    Store(#[from] StoreError),

    #[error("invalid resource in class {class}: {reason}")]
    InvalidTemplate { class: String, reason: String },

    #[error("managed resource ledger of namespace {group} is corrupted: {source}")]
    LedgerCorrupted {
        group: String,
        #[source]
        source: serde_json::Error,
    },

    #[error("gave up writing {what} after {attempts} conflicting attempts")]
    ConflictRetriesExhausted { what: String, attempts: u32 },

    #[error("reconcile of namespace {group} exceeded its deadline")]
    DeadlineExceeded { group: String },

    #[error("failed to serialize: {0}")]
    Serialization(#[from] serde_json::Error),
}

impl Error {
    pub fn is_conflict(&self) -> bool {
        matches!(self, Error::Store(e) if e.is_conflict())
    }

    /// Errors a plain requeue is expected to clear on its own.
    pub fn is_transient(&self) -> bool {
        match self {
            Error::Store(e) => e.is_transient() || e.is_conflict(),
            Error::ConflictRetriesExhausted { .. } | Error::DeadlineExceeded { .. } => true,
            _ => false,
        }
    }
}
