//! In-memory queue store for tests/dev.

use std::collections::{HashMap, VecDeque};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;

use async_trait::async_trait;
use tokio::sync::Notify;
use tokio::time::Instant;

use super::{QueueError, QueueStore};

/// In-memory list store with the same ordering semantics as the Redis one.
///
/// Index 0 of each deque is the head (newest push), the back is the tail.
#[derive(Debug, Default)]
pub struct InMemoryQueueStore {
    lists: Mutex<HashMap<String, VecDeque<String>>>,
    pushed: Notify,
    unavailable: AtomicBool,
    closed: AtomicBool,
}

impl InMemoryQueueStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn arc() -> Arc<Self> {
        Arc::new(Self::new())
    }

    /// Simulate the store going away (every call fails) or coming back.
    pub fn set_available(&self, available: bool) {
        self.unavailable.store(!available, Ordering::SeqCst);
    }

    /// Snapshot of `queue` from head to tail.
    pub fn items(&self, queue: &str) -> Vec<String> {
        self.lists()
            .get(queue)
            .map(|list| list.iter().cloned().collect())
            .unwrap_or_default()
    }

    fn lists(&self) -> MutexGuard<'_, HashMap<String, VecDeque<String>>> {
        self.lists.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn check_available(&self) -> Result<(), QueueError> {
        if self.closed.load(Ordering::SeqCst) {
            return Err(QueueError::Closed);
        }
        if self.unavailable.load(Ordering::SeqCst) {
            return Err(QueueError::Command("store unavailable".to_string()));
        }
        Ok(())
    }

    fn try_pop(&self, queues: &[String]) -> Option<(String, String)> {
        let mut lists = self.lists();
        queues.iter().find_map(|name| {
            lists
                .get_mut(name)
                .and_then(|list| list.pop_back())
                .map(|item| (name.clone(), item))
        })
    }
}

#[async_trait]
impl QueueStore for InMemoryQueueStore {
    async fn push_head(&self, queue: &str, item: &str) -> Result<(), QueueError> {
        self.check_available()?;
        self.lists()
            .entry(queue.to_string())
            .or_default()
            .push_front(item.to_string());
        self.pushed.notify_waiters();
        Ok(())
    }

    async fn blocking_pop_tail(
        &self,
        queues: &[String],
        timeout: Duration,
    ) -> Result<Option<(String, String)>, QueueError> {
        self.check_available()?;
        let deadline = Instant::now() + timeout;

        loop {
            // Register for wakeups before looking, so a push between the
            // check and the await is not missed.
            let notified = self.pushed.notified();
            tokio::pin!(notified);
            notified.as_mut().enable();

            if let Some(hit) = self.try_pop(queues) {
                return Ok(Some(hit));
            }

            if tokio::time::timeout_at(deadline, notified).await.is_err() {
                return Ok(None);
            }
            self.check_available()?;
        }
    }

    async fn length(&self, queue: &str) -> Result<u64, QueueError> {
        self.check_available()?;
        Ok(self.lists().get(queue).map_or(0, |list| list.len() as u64))
    }

    async fn ping(&self) -> Result<(), QueueError> {
        self.check_available()
    }

    fn close(&self) {
        self.closed.store(true, Ordering::SeqCst);
        self.pushed.notify_waiters();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn names(list: &[&str]) -> Vec<String> {
        list.iter().map(|s| s.to_string()).collect()
    }

    #[tokio::test]
    async fn pops_oldest_item_first() {
        let store = InMemoryQueueStore::new();
        store.push_head("q", "first").await.unwrap();
        store.push_head("q", "second").await.unwrap();

        let popped = store
            .blocking_pop_tail(&names(&["q"]), Duration::from_millis(10))
            .await
            .unwrap();
        assert_eq!(popped, Some(("q".to_string(), "first".to_string())));
        assert_eq!(store.items("q"), vec!["second".to_string()]);
    }

    #[tokio::test]
    async fn serves_first_non_empty_queue_in_order() {
        let store = InMemoryQueueStore::new();
        store.push_head("low", "l1").await.unwrap();
        store.push_head("high", "h1").await.unwrap();

        let order = names(&["high", "low"]);
        let first = store
            .blocking_pop_tail(&order, Duration::from_millis(10))
            .await
            .unwrap();
        let second = store
            .blocking_pop_tail(&order, Duration::from_millis(10))
            .await
            .unwrap();

        assert_eq!(first.unwrap().0, "high");
        assert_eq!(second.unwrap().0, "low");
    }

    #[tokio::test(start_paused = true)]
    async fn times_out_when_empty() {
        let store = InMemoryQueueStore::new();
        let popped = store
            .blocking_pop_tail(&names(&["q"]), Duration::from_secs(5))
            .await
            .unwrap();
        assert!(popped.is_none());
    }

    #[tokio::test]
    async fn wakes_blocked_pop_on_push() {
        let store = InMemoryQueueStore::arc();
        let waiter = {
            let store = store.clone();
            tokio::spawn(async move {
                store
                    .blocking_pop_tail(&names(&["q"]), Duration::from_secs(5))
                    .await
            })
        };

        tokio::time::sleep(Duration::from_millis(20)).await;
        store.push_head("q", "job").await.unwrap();

        let popped = waiter.await.unwrap().unwrap();
        assert_eq!(popped, Some(("q".to_string(), "job".to_string())));
    }

    #[tokio::test]
    async fn each_item_is_popped_once_across_concurrent_callers() {
        let store = InMemoryQueueStore::arc();
        for i in 0..50 {
            store.push_head("q", &i.to_string()).await.unwrap();
        }

        let mut tasks = Vec::new();
        for _ in 0..5 {
            let store = store.clone();
            tasks.push(tokio::spawn(async move {
                let mut got = Vec::new();
                while let Some((_, item)) = store
                    .blocking_pop_tail(&names(&["q"]), Duration::from_millis(20))
                    .await
                    .unwrap()
                {
                    got.push(item);
                }
                got
            }));
        }

        let mut all = Vec::new();
        for task in tasks {
            all.extend(task.await.unwrap());
        }
        all.sort_by_key(|s| s.parse::<u32>().unwrap());
        assert_eq!(all, (0..50).map(|i| i.to_string()).collect::<Vec<_>>());
    }

    #[tokio::test]
    async fn unavailable_store_fails_every_call() {
        let store = InMemoryQueueStore::new();
        store.set_available(false);

        assert!(store.ping().await.is_err());
        assert!(store.push_head("q", "x").await.is_err());
        assert!(store.length("q").await.is_err());

        store.set_available(true);
        assert!(store.ping().await.is_ok());
        assert_eq!(store.length("q").await.unwrap(), 0);
    }

    #[tokio::test]
    async fn closed_store_rejects_calls() {
        let store = InMemoryQueueStore::new();
        store.close();
        assert!(matches!(store.ping().await, Err(QueueError::Closed)));
    }
}
