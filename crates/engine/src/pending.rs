// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! "Join an in-flight operation" pattern (spec §9 design notes): the first
//! caller starts the operation, concurrent followers join the same
//! in-flight attempt instead of duplicating it, and all observe the same
//! result. Built on `tokio::sync::OnceCell`, which already gives exactly
//! this join semantics for a single round; the slot adds the ability to
//! start a *fresh* round once the previous one has completed.

use parking_lot::Mutex;
use std::future::Future;
use std::sync::Arc;
use tokio::sync::OnceCell;

pub struct PendingOp<T: Clone, E> {
    slot: Mutex<Option<Arc<OnceCell<T>>>>,
}

impl<T: Clone, E> Default for PendingOp<T, E> {
    fn default() -> Self {
        Self { slot: Mutex::new(None) }
    }
}

impl<T: Clone, E> PendingOp<T, E> {
    pub fn new() -> Self {
        Self::default()
    }

    /// Run `start` if no operation is in flight, otherwise join the pending
    /// one. Exactly one `start` future actually runs per round; everyone
    /// who joins before it completes observes its result.
    pub async fn join_or_run<F, Fut>(&self, start: F) -> Result<T, E>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = Result<T, E>>,
    {
        let cell = {
            let mut guard = self.slot.lock();
            match guard.as_ref() {
                Some(existing) => existing.clone(),
                None => {
                    let cell = Arc::new(OnceCell::new());
                    *guard = Some(cell.clone());
                    cell
                }
            }
        };

        let result: Result<T, E> = cell.get_or_try_init(start).await.map(|v| v.clone());

        // Clear the slot so the next caller starts a fresh round, but only
        // if nobody has already replaced it with a newer one.
        let mut guard = self.slot.lock();
        if let Some(current) = guard.as_ref() {
            if Arc::ptr_eq(current, &cell) {
                *guard = None;
            }
        }
        result
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicU32, Ordering};
    use std::time::Duration;

    #[tokio::test]
    async fn concurrent_joiners_share_one_run() {
        let pending = Arc::new(PendingOp::<u32, String>::new());
        let starts = Arc::new(AtomicU32::new(0));

        let mut handles = Vec::new();
        for _ in 0..5 {
            let pending = pending.clone();
            let starts = starts.clone();
            handles.push(tokio::spawn(async move {
                pending
                    .join_or_run(|| async move {
                        starts.fetch_add(1, Ordering::SeqCst);
                        tokio::time::sleep(Duration::from_millis(20)).await;
                        Ok::<u32, String>(7)
                    })
                    .await
            }));
        }

        for handle in handles {
            assert_eq!(handle.await.unwrap(), Ok(7));
        }
        assert_eq!(starts.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn a_fresh_round_runs_again_after_completion() {
        let pending = PendingOp::<u32, String>::new();
        let first = pending.join_or_run(|| async { Ok::<u32, String>(1) }).await;
        let second = pending.join_or_run(|| async { Ok::<u32, String>(2) }).await;
        assert_eq!(first, Ok(1));
        assert_eq!(second, Ok(2));
    }

    #[tokio::test]
    async fn errors_propagate_to_all_joiners() {
        let pending = Arc::new(PendingOp::<u32, String>::new());
        let result = pending.join_or_run(|| async { Err::<u32, String>("setup failed".into()) }).await;
        assert_eq!(result, Err("setup failed".to_string()));
    }
}
