//! In-flight operation registry
//!
//! Holds the keys of operations that currently have a submission attempt
//! running, one set per lane. Acquire is a single atomic insert so two
//! launches for the same claimable balance can never both win.

use dashmap::DashSet;

use crate::OperationKind;

#[derive(Debug, Default)]
pub struct OperationTracker {
    claiming: DashSet<String>,
    transferring: DashSet<String>,
}

impl OperationTracker {
    pub fn new() -> Self {
        Self::default()
    }

    fn set(&self, kind: OperationKind) -> &DashSet<String> {
        match kind {
            OperationKind::Claim => &self.claiming,
            OperationKind::Transfer => &self.transferring,
        }
    }

    /// Register `key` as in flight. Returns false if it already was.
    pub fn try_acquire(&self, kind: OperationKind, key: &str) -> bool {
        self.set(kind).insert(key.to_string())
    }

    /// Forget `key`. Releasing an unknown key is a no-op.
    pub fn release(&self, kind: OperationKind, key: &str) {
        self.set(kind).remove(key);
    }

    pub fn contains(&self, kind: OperationKind, key: &str) -> bool {
        self.set(kind).contains(key)
    }

    /// Number of operations in flight for `kind`
    pub fn in_flight(&self, kind: OperationKind) -> usize {
        self.set(kind).len()
    }
}
