//! In-memory QueueService.
//!
//! One `tokio::sync::Mutex` guards every channel and every owner cell, so
//! `compare_and_swap` is trivially atomic. Each channel has its own `Notify`.
//! A pop registers as a waiter (`Notified::enable`) before it looks at the
//! channel, so every `notify_one` from a later push lands on a distinct
//! registered waiter and none of them sleeps past an item.
//!
//! `set_available(false)` makes every call fail with `QueueUnavailable`,
//! which is how tests exercise the backoff paths.

use std::collections::{HashMap, VecDeque};
use std::pin::pin;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

use async_trait::async_trait;
use tokio::sync::{Mutex, Notify};
use tokio::time::Instant;

use crate::domain::errors::SwarmError;
use crate::domain::ids::OwnerId;
use crate::ports::{QueueService, VersionedState};

#[derive(Default)]
struct OwnerCell {
    version: u64,
    state: Option<Vec<u8>>,
}

#[derive(Default)]
struct QueueState {
    channels: HashMap<String, VecDeque<Vec<u8>>>,
    notifiers: HashMap<String, Arc<Notify>>,
    owners: HashMap<OwnerId, OwnerCell>,
}

impl QueueState {
    fn notifier(&mut self, channel: &str) -> Arc<Notify> {
        Arc::clone(self.notifiers.entry(channel.to_string()).or_default())
    }
}

pub struct InMemoryQueueService {
    state: Mutex<QueueState>,
    available: AtomicBool,
}

impl InMemoryQueueService {
    pub fn new() -> Self {
        Self {
            state: Mutex::new(QueueState::default()),
            available: AtomicBool::new(true),
        }
    }

    /// Simulate a transport outage (`false`) or recovery (`true`).
    pub fn set_available(&self, available: bool) {
        self.available.store(available, Ordering::SeqCst);
    }

    fn ensure_available(&self) -> Result<(), SwarmError> {
        if self.available.load(Ordering::SeqCst) {
            Ok(())
        } else {
            Err(SwarmError::QueueUnavailable(
                "in-memory queue marked unavailable".to_string(),
            ))
        }
    }
}

impl Default for InMemoryQueueService {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl QueueService for InMemoryQueueService {
    async fn push(&self, channel: &str, item: Vec<u8>) -> Result<(), SwarmError> {
        self.ensure_available()?;
        let notify = {
            let mut state = self.state.lock().await;
            state
                .channels
                .entry(channel.to_string())
                .or_default()
                .push_back(item);
            state.notifier(channel)
        };
        notify.notify_one();
        Ok(())
    }

    async fn pop(&self, channel: &str, timeout: Duration) -> Result<Option<Vec<u8>>, SwarmError> {
        let deadline = Instant::now() + timeout;
        loop {
            self.ensure_available()?;
            let notify = self.state.lock().await.notifier(channel);
            let mut notified = pin!(notify.notified());
            notified.as_mut().enable();

            {
                let mut state = self.state.lock().await;
                if let Some(queue) = state.channels.get_mut(channel)
                    && let Some(item) = queue.pop_front()
                {
                    return Ok(Some(item));
                }
            }

            if tokio::time::timeout_at(deadline, notified).await.is_err() {
                return Ok(None);
            }
        }
    }

    async fn len(&self, channel: &str) -> Result<usize, SwarmError> {
        self.ensure_available()?;
        let state = self.state.lock().await;
        Ok(state.channels.get(channel).map_or(0, VecDeque::len))
    }

    async fn get_version(&self, owner: &OwnerId) -> Result<u64, SwarmError> {
        self.ensure_available()?;
        let state = self.state.lock().await;
        Ok(state.owners.get(owner).map_or(0, |cell| cell.version))
    }

    async fn increment_version(&self, owner: &OwnerId) -> Result<u64, SwarmError> {
        self.ensure_available()?;
        let mut state = self.state.lock().await;
        let cell = state.owners.entry(owner.clone()).or_default();
        cell.version += 1;
        Ok(cell.version)
    }

    async fn read_state(&self, owner: &OwnerId) -> Result<VersionedState, SwarmError> {
        self.ensure_available()?;
        let state = self.state.lock().await;
        Ok(match state.owners.get(owner) {
            Some(cell) => VersionedState {
                version: cell.version,
                state: cell.state.clone(),
            },
            None => VersionedState {
                version: 0,
                state: None,
            },
        })
    }

    async fn compare_and_swap(
        &self,
        owner: &OwnerId,
        expected: u64,
        new_state: Vec<u8>,
    ) -> Result<u64, SwarmError> {
        self.ensure_available()?;
        let mut state = self.state.lock().await;
        let cell = state.owners.entry(owner.clone()).or_default();
        if cell.version != expected {
            return Err(SwarmError::StateConflict {
                owner: owner.clone(),
                expected,
                actual: cell.version,
            });
        }
        cell.version += 1;
        cell.state = Some(new_state);
        Ok(cell.version)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ports::QueueExt;

    #[tokio::test]
    async fn push_pop_is_fifo_per_channel() {
        let queue = InMemoryQueueService::new();
        queue.push("a", b"1".to_vec()).await.unwrap();
        queue.push("a", b"2".to_vec()).await.unwrap();
        queue.push("b", b"x".to_vec()).await.unwrap();

        assert_eq!(queue.len("a").await.unwrap(), 2);
        let t = Duration::from_millis(50);
        assert_eq!(queue.pop("a", t).await.unwrap(), Some(b"1".to_vec()));
        assert_eq!(queue.pop("a", t).await.unwrap(), Some(b"2".to_vec()));
        assert_eq!(queue.pop("b", t).await.unwrap(), Some(b"x".to_vec()));
        assert_eq!(queue.len("a").await.unwrap(), 0);
    }

    #[tokio::test]
    async fn pop_times_out_with_none() {
        let queue = InMemoryQueueService::new();
        let start = Instant::now();
        let popped = queue.pop("empty", Duration::from_millis(100)).await.unwrap();
        assert_eq!(popped, None);
        assert!(start.elapsed() >= Duration::from_millis(100));
    }

    #[tokio::test]
    async fn push_wakes_blocked_pop() {
        let queue = Arc::new(InMemoryQueueService::new());
        let waiter = tokio::spawn({
            let queue = Arc::clone(&queue);
            async move { queue.pop("c", Duration::from_secs(5)).await.unwrap() }
        });

        tokio::time::sleep(Duration::from_millis(50)).await;
        queue.push("c", b"hello".to_vec()).await.unwrap();

        assert_eq!(waiter.await.unwrap(), Some(b"hello".to_vec()));
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn back_to_back_pushes_wake_every_waiter() {
        let queue = Arc::new(InMemoryQueueService::new());
        for round in 0..20 {
            let channel = format!("burst-{round}");
            let waiters: Vec<_> = (0..2)
                .map(|_| {
                    let queue = Arc::clone(&queue);
                    let channel = channel.clone();
                    tokio::spawn(async move { queue.pop(&channel, Duration::from_secs(5)).await.unwrap() })
                })
                .collect();
            queue.push(&channel, b"a".to_vec()).await.unwrap();
            queue.push(&channel, b"b".to_vec()).await.unwrap();

            for w in waiters {
                let popped = tokio::time::timeout(Duration::from_secs(1), w)
                    .await
                    .expect("waiter slept past a queued item")
                    .unwrap();
                assert!(popped.is_some());
            }
        }
    }

    #[tokio::test]
    async fn json_helpers_roundtrip_through_bytes() {
        let queue = InMemoryQueueService::new();
        queue.push_json("j", &vec![1u32, 2, 3]).await.unwrap();
        let v: Option<Vec<u32>> = queue.pop_json("j", Duration::from_millis(10)).await.unwrap();
        assert_eq!(v, Some(vec![1, 2, 3]));
    }

    #[tokio::test]
    async fn compare_and_swap_succeeds_once_per_version() {
        let queue = InMemoryQueueService::new();
        let owner = OwnerId::new("o");

        let seen = queue.read_state(&owner).await.unwrap();
        assert_eq!(seen.version, 0);

        let v1 = queue
            .compare_and_swap(&owner, seen.version, b"first".to_vec())
            .await
            .unwrap();
        assert_eq!(v1, 1);

        let err = queue
            .compare_and_swap(&owner, seen.version, b"second".to_vec())
            .await
            .unwrap_err();
        assert!(matches!(
            err,
            SwarmError::StateConflict { expected: 0, actual: 1, .. }
        ));

        let now = queue.read_state(&owner).await.unwrap();
        assert_eq!(now.state, Some(b"first".to_vec()));
        assert_eq!(queue.increment_version(&owner).await.unwrap(), 2);
        assert_eq!(queue.get_version(&owner).await.unwrap(), 2);
    }

    #[tokio::test]
    async fn outage_surfaces_queue_unavailable() {
        let queue = InMemoryQueueService::new();
        queue.set_available(false);
        let err = queue.push("a", vec![]).await.unwrap_err();
        assert!(err.is_operator_visible());

        queue.set_available(true);
        assert!(queue.push("a", vec![]).await.is_ok());
    }
}
