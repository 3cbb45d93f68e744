//! Parallel symbolization of one object file
//!
//! A [`ResolutionPool`] runs W [`WorkerChannel`]s against the same object.
//! Workers pull offsets from one shared [`OffsetCursor`] instead of fixed
//! slices, so a slow symbolizer simply ends up with fewer offsets.
//!
//! The batch is all or nothing: the first worker failure cancels the others,
//! kills their subprocesses and fails the whole batch.

use std::collections::{BTreeSet, HashMap};
use std::num::NonZeroUsize;
use std::path::Path;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

use log::{debug, info, warn};
use tokio::sync::watch;
use tokio::task::JoinSet;

use super::tool::SymbolizerTool;
use super::worker_channel::{Resolution, WorkerChannel};
use crate::domain::{ChannelError, PoolError, WorkerId};

/// Shared "take next" cursor over a fixed list of offsets
///
/// Every offset is handed out exactly once, to whichever worker asks first.
#[derive(Debug)]
pub struct OffsetCursor {
    offsets: Vec<u64>,
    next: AtomicUsize,
}

impl OffsetCursor {
    #[must_use]
    pub fn new(offsets: Vec<u64>) -> Self {
        Self { offsets, next: AtomicUsize::new(0) }
    }

    /// Claim the next unclaimed offset.
    pub fn take(&self) -> Option<u64> {
        let idx = self.next.fetch_add(1, Ordering::Relaxed);
        self.offsets.get(idx).copied()
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.offsets.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.offsets.is_empty()
    }
}

/// Resolves batches of file offsets with a fixed number of symbolizer processes
#[derive(Debug, Clone)]
pub struct ResolutionPool {
    tool: Arc<SymbolizerTool>,
    workers: usize,
}

impl ResolutionPool {
    /// Create a pool running `workers` symbolizers per object (0 = one per CPU).
    #[must_use]
    pub fn new(tool: SymbolizerTool, workers: usize) -> Self {
        let workers = if workers == 0 {
            std::thread::available_parallelism().map_or(1, NonZeroUsize::get)
        } else {
            workers
        };
        Self { tool: Arc::new(tool), workers }
    }

    #[must_use]
    pub fn workers(&self) -> usize {
        self.workers
    }

    #[must_use]
    pub fn tool(&self) -> &SymbolizerTool {
        &self.tool
    }

    /// Resolve every offset of `object`.
    ///
    /// Duplicate offsets are resolved once. Never spawns more workers than
    /// there are offsets, and none for an empty batch.
    ///
    /// # Errors
    /// Returns a [`PoolError`] describing the first worker failure; no
    /// partial results are returned.
    pub async fn resolve<I>(
        &self,
        object: &Path,
        offsets: I,
    ) -> Result<HashMap<u64, Resolution>, PoolError>
    where
        I: IntoIterator<Item = u64>,
    {
        let offsets: Vec<u64> = offsets.into_iter().collect::<BTreeSet<_>>().into_iter().collect();
        if offsets.is_empty() {
            return Ok(HashMap::new());
        }

        let workers = self.workers.min(offsets.len());
        info!(
            "{}: resolving {} offsets with {workers} {} process(es)",
            object.display(),
            offsets.len(),
            self.tool.command()
        );

        let cursor = Arc::new(OffsetCursor::new(offsets));
        let (cancel_tx, cancel_rx) = watch::channel(false);
        let mut tasks = JoinSet::new();
        for idx in 0..workers {
            let worker = WorkerId(idx);
            let tool = Arc::clone(&self.tool);
            let object = object.to_path_buf();
            let cursor = Arc::clone(&cursor);
            let cancel = cancel_rx.clone();
            tasks.spawn(async move {
                let outcome = run_worker(worker, &tool, &object, &cursor, cancel).await;
                (worker, outcome)
            });
        }

        let mut results = HashMap::with_capacity(cursor.len());
        let mut first_failure: Option<(WorkerId, ChannelError)> = None;
        while let Some(joined) = tasks.join_next().await {
            let (worker, outcome) = match joined {
                Ok(joined) => joined,
                Err(join_err) if join_err.is_panic() => {
                    std::panic::resume_unwind(join_err.into_panic())
                }
                Err(_) => continue,
            };
            match outcome {
                Ok(batch) => {
                    debug!("{worker} finished with {} offsets", batch.len());
                    results.extend(batch.into_iter().map(|resolution| (resolution.offset, resolution)));
                }
                Err(ChannelError::Cancelled) => debug!("{worker} cancelled"),
                Err(err) => {
                    if first_failure.is_none() {
                        warn!("{worker} failed on {}: {err}; cancelling siblings", object.display());
                        cancel_tx.send_replace(true);
                        first_failure = Some((worker, err));
                    } else {
                        debug!("{worker} also failed: {err}");
                    }
                }
            }
        }

        if let Some((worker, source)) = first_failure {
            return Err(PoolError { object: object.to_path_buf(), worker, source });
        }
        Ok(results)
    }
}

/// Feed one channel from the cursor until it runs dry or the pool cancels.
async fn run_worker(
    worker: WorkerId,
    tool: &SymbolizerTool,
    object: &Path,
    cursor: &OffsetCursor,
    mut cancel: watch::Receiver<bool>,
) -> Result<Vec<Resolution>, ChannelError> {
    let mut channel = WorkerChannel::open(tool, object)?;
    debug!("{worker} started");

    while let Some(offset) = cursor.take() {
        let cancelled = tokio::select! {
            biased;
            () = cancel_requested(&mut cancel) => true,
            submitted = channel.submit(offset) => {
                submitted?;
                false
            }
        };
        if cancelled {
            channel.abort().await;
            return Err(ChannelError::Cancelled);
        }
    }

    let closed = tokio::select! {
        biased;
        () = cancel_requested(&mut cancel) => None,
        closed = channel.finish() => Some(closed),
    };
    match closed {
        Some(closed) => closed,
        None => {
            channel.abort().await;
            Err(ChannelError::Cancelled)
        }
    }
}

/// Resolves once the pool raises the cancel flag; never if the pool is gone.
async fn cancel_requested(cancel: &mut watch::Receiver<bool>) {
    loop {
        let raised = *cancel.borrow_and_update();
        if raised {
            return;
        }
        if cancel.changed().await.is_err() {
            std::future::pending::<()>().await;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_cursor_hands_out_each_offset_once() {
        let cursor = Arc::new(OffsetCursor::new((0..1000).collect()));
        let handles: Vec<_> = (0..4)
            .map(|_| {
                let cursor = Arc::clone(&cursor);
                std::thread::spawn(move || {
                    let mut taken = Vec::new();
                    while let Some(offset) = cursor.take() {
                        taken.push(offset);
                    }
                    taken
                })
            })
            .collect();

        let mut all: Vec<u64> = handles.into_iter().flat_map(|h| h.join().unwrap()).collect();
        all.sort_unstable();
        assert_eq!(all, (0..1000).collect::<Vec<_>>());
        assert_eq!(cursor.take(), None);
    }

    #[test]
    fn test_zero_workers_uses_available_parallelism() {
        let tool = SymbolizerTool::locate("sh").unwrap();
        let pool = ResolutionPool::new(tool, 0);
        assert!(pool.workers() >= 1);
    }

    #[tokio::test]
    async fn test_empty_batch_spawns_nothing() {
        let tool = SymbolizerTool::locate("sh").unwrap();
        let pool = ResolutionPool::new(tool, 4);
        let results = pool.resolve(Path::new("/nonexistent"), Vec::new()).await.unwrap();
        assert!(results.is_empty());
    }
}
