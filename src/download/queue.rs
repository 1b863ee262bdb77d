use std::collections::VecDeque;

use tokio::sync::Mutex;

/// FIFO of segment indices awaiting download.
///
/// An index is in exactly one place at any instant: queued here, in flight
/// inside a worker, or complete in the store. Workers `pop` to claim an
/// index and `push` it back only when their attempt failed, so nothing is
/// lost or duplicated under concurrent access. An empty queue does not mean
/// the download is finished — indices may still be in flight.
#[derive(Default)]
pub struct WorkQueue {
    slots: Mutex<VecDeque<u32>>,
}

impl WorkQueue {
    pub fn new() -> Self {
        Self::default()
    }

    /// Populates the queue with the given indices, in order. Called once at
    /// download start with every segment not yet complete.
    pub async fn build(&self, indices: impl IntoIterator<Item = u32>) {
        let mut slots = self.slots.lock().await;
        slots.clear();
        slots.extend(indices);
    }

    /// Claims the next pending index. `None` means no work is queued right
    /// now, not that the download is done.
    pub async fn pop(&self) -> Option<u32> {
        self.slots.lock().await.pop_front()
    }

    /// Returns a failed index to the queue for another worker to retry.
    pub async fn push(&self, index: u32) {
        self.slots.lock().await.push_back(index);
    }

    pub async fn is_empty(&self) -> bool {
        self.slots.lock().await.is_empty()
    }

    pub async fn len(&self) -> usize {
        self.slots.lock().await.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashSet;
    use std::sync::Arc;

    #[tokio::test]
    async fn test_build_preserves_order() {
        let queue = WorkQueue::new();
        queue.build([3, 1, 4, 1]).await;
        assert_eq!(queue.len().await, 4);
        assert_eq!(queue.pop().await, Some(3));
        assert_eq!(queue.pop().await, Some(1));
        assert_eq!(queue.pop().await, Some(4));
        assert_eq!(queue.pop().await, Some(1));
        assert_eq!(queue.pop().await, None);
    }

    #[tokio::test]
    async fn test_pushed_index_is_popped_again() {
        let queue = WorkQueue::new();
        queue.build([0, 1]).await;
        assert_eq!(queue.pop().await, Some(0));
        queue.push(0).await;
        assert_eq!(queue.pop().await, Some(1));
        assert_eq!(queue.pop().await, Some(0));
        assert!(queue.is_empty().await);
    }

    /// Every index from the initial build ends up claimed exactly once,
    /// even with many workers popping concurrently and each index failing
    /// (and being requeued) once.
    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn test_conservation_under_concurrent_access() {
        let queue = Arc::new(WorkQueue::new());
        let initial: Vec<u32> = (0..200).collect();
        queue.build(initial.iter().copied()).await;

        let failed_once = Arc::new(Mutex::new(HashSet::new()));
        let completed = Arc::new(Mutex::new(Vec::new()));

        let mut handles = Vec::new();
        for _ in 0..8 {
            let queue = Arc::clone(&queue);
            let failed_once = Arc::clone(&failed_once);
            let completed = Arc::clone(&completed);
            handles.push(tokio::spawn(async move {
                while let Some(index) = queue.pop().await {
                    if failed_once.lock().await.insert(index) {
                        // simulate one failed attempt per index
                        queue.push(index).await;
                    } else {
                        completed.lock().await.push(index);
                    }
                }
            }));
        }
        for handle in handles {
            handle.await.unwrap();
        }

        // a worker may exit between another worker's pop and its push-back;
        // drain whatever that race left behind
        while let Some(index) = queue.pop().await {
            completed.lock().await.push(index);
        }

        let mut completed = completed.lock().await.clone();
        completed.sort_unstable();
        assert_eq!(completed, initial, "every index claimed exactly once");
    }
}
