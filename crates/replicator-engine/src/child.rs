// Copyright (C) 2025 SyncMyOrders Sp. z o.o.
// SPDX-License-Identifier: AGPL-3.0-or-later
//! Independently scheduled child tasks.
//!
//! A child outlives the execution that launched it: later executions of the
//! same run find it again by key and either peek at its terminal value or
//! wait for it. Spawning is exactly-once per key.

use std::collections::HashMap;
use std::future::Future;
use std::sync::Arc;

use tokio::sync::{Mutex, watch};
use tracing::{debug, warn};

/// Handle to a child's terminal value. `None` until the child finished.
pub type ChildHandle<T> = watch::Receiver<Option<T>>;

/// Keyed registry of child tasks.
pub struct ChildRegistry<T> {
    children: Arc<Mutex<HashMap<String, ChildHandle<T>>>>,
}

impl<T> Default for ChildRegistry<T> {
    fn default() -> Self {
        Self {
            children: Arc::new(Mutex::new(HashMap::new())),
        }
    }
}

impl<T> ChildRegistry<T>
where
    T: Clone + Send + Sync + 'static,
{
    /// Create an empty registry.
    pub fn new() -> Self {
        Self::default()
    }

    /// Spawn `fut` under `key` unless a child with that key already exists.
    ///
    /// Returns the child's handle and whether this call spawned it.
    pub async fn spawn<F>(&self, key: &str, fut: F) -> (ChildHandle<T>, bool)
    where
        F: Future<Output = T> + Send + 'static,
    {
        let mut children = self.children.lock().await;
        if let Some(existing) = children.get(key) {
            debug!(key, "Child already running");
            return (existing.clone(), false);
        }

        let (tx, rx) = watch::channel(None);
        let child_key = key.to_string();
        tokio::spawn(async move {
            let value = fut.await;
            tx.send_replace(Some(value));
            debug!(key = %child_key, "Child finished");
        });
        children.insert(key.to_string(), rx.clone());
        (rx, true)
    }

    /// Handle of the child registered under `key`.
    pub async fn get(&self, key: &str) -> Option<ChildHandle<T>> {
        self.children.lock().await.get(key).cloned()
    }

    /// Terminal value of the child under `key`, without waiting.
    pub async fn peek(&self, key: &str) -> Option<T> {
        let children = self.children.lock().await;
        children.get(key).and_then(|rx| rx.borrow().clone())
    }

    /// Forget the child under `key`. A running child keeps running.
    pub async fn remove(&self, key: &str) -> Option<ChildHandle<T>> {
        self.children.lock().await.remove(key)
    }

    /// Forget the child under `key` once it has finished.
    ///
    /// A finished child is removed at once; a running one is removed when
    /// it finishes, unless the key was reused in the meantime.
    pub async fn release(&self, key: &str) {
        let mut children = self.children.lock().await;
        let Some(handle) = children.get(key).cloned() else {
            return;
        };
        if handle.borrow().is_some() {
            children.remove(key);
            return;
        }
        drop(children);

        let registry = self.children.clone();
        let key = key.to_string();
        tokio::spawn(async move {
            let _ = Self::wait(handle.clone()).await;
            let mut children = registry.lock().await;
            if children.get(&key).is_some_and(|rx| rx.same_channel(&handle)) {
                children.remove(&key);
                debug!(key = %key, "Released finished child");
            }
        });
    }

    /// Wait for a child's terminal value.
    ///
    /// Returns `None` if the child task died without producing a value.
    pub async fn wait(mut handle: ChildHandle<T>) -> Option<T> {
        loop {
            if let Some(value) = handle.borrow_and_update().clone() {
                return Some(value);
            }
            if handle.changed().await.is_err() {
                let value = handle.borrow().clone();
                if value.is_none() {
                    warn!("Child task ended without a result");
                }
                return value;
            }
        }
    }
}
