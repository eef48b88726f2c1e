// Copyright (C) 2025 SyncMyOrders Sp. z o.o.
// SPDX-License-Identifier: AGPL-3.0-or-later
//! Live status snapshots.

use tokio::sync::watch;

/// Latest status of a running workflow.
///
/// The control flow publishes into the board; readers take snapshots
/// without ever waiting on the control flow.
#[derive(Debug, Clone)]
pub struct StatusBoard<S> {
    tx: watch::Sender<S>,
}

impl<S: Clone> StatusBoard<S> {
    /// Create a board holding `initial`.
    pub fn new(initial: S) -> Self {
        let (tx, _) = watch::channel(initial);
        Self { tx }
    }

    /// Replace the snapshot.
    pub fn publish(&self, status: S) {
        self.tx.send_replace(status);
    }

    /// Modify the snapshot in place.
    pub fn update(&self, f: impl FnOnce(&mut S)) {
        self.tx.send_modify(f);
    }

    /// Current snapshot.
    pub fn snapshot(&self) -> S {
        self.tx.borrow().clone()
    }

    /// Receiver notified on every change.
    pub fn subscribe(&self) -> watch::Receiver<S> {
        self.tx.subscribe()
    }
}

impl<S: Clone + Default> Default for StatusBoard<S> {
    fn default() -> Self {
        Self::new(S::default())
    }
}
