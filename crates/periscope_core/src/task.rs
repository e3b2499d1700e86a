//! # Task Graph
//!
//! CPU work partitioning with a single join barrier.
//!
//! ```text
//! items: [0 ........................................ N)
//!         │ range 0 │ range 1 │ range 2 │ ... │ range k │
//!            task       task      task            task
//!              └─────────┴─────────┴───── join ─────┘
//! ```
//!
//! Each task receives exclusive access to its own contiguous range, so no
//! task can observe another's output before the barrier.

use std::ops::Range;
use std::sync::Arc;

use crate::error::{CoreError, CoreResult};

/// How finely a slice is split into tasks.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TaskGranularity {
    /// Lower bound on items per task.
    pub min_items_per_task: usize,
    /// Upper bound on the number of tasks.
    pub max_tasks: usize,
}

impl Default for TaskGranularity {
    fn default() -> Self {
        Self {
            min_items_per_task: 1024,
            max_tasks: 64,
        }
    }
}

impl TaskGranularity {
    /// Items per task for a slice of `len` items:
    /// `max(min_items_per_task, ceil(len / max_tasks))`, never zero.
    #[must_use]
    pub fn chunk_size(&self, len: usize) -> usize {
        let max_tasks = self.max_tasks.max(1);
        len.div_ceil(max_tasks).max(self.min_items_per_task).max(1)
    }

    /// Contiguous task ranges covering `0..len`.
    pub fn ranges(&self, len: usize) -> impl Iterator<Item = Range<usize>> {
        let chunk = self.chunk_size(len);
        (0..len)
            .step_by(chunk)
            .map(move |start| start..(start + chunk).min(len))
    }
}


/// Scheduler for fork/join CPU work.
pub trait TaskGraph: Send + Sync {
    /// Runs `f(offset, chunk)` over disjoint contiguous chunks of `items`
    /// and returns the number of tasks once every chunk is done.
    fn for_each_range<T, F>(&self, items: &mut [T], granularity: TaskGranularity, f: F) -> usize
    where
        T: Send,
        F: Fn(usize, &mut [T]) + Sync;

    /// Runs `a` and `b`, possibly in parallel, and returns both results.
    fn join<A, B, RA, RB>(&self, a: A, b: B) -> (RA, RB)
    where
        A: FnOnce() -> RA + Send,
        B: FnOnce() -> RB + Send,
        RA: Send,
        RB: Send;

    /// Number of worker threads available.
    fn worker_count(&self) -> usize;
}

/// Task graph on rayon, either the global pool or a dedicated one.
#[derive(Debug, Clone, Default)]
pub struct RayonTaskGraph {
    pool: Option<Arc<rayon::ThreadPool>>,
}

impl RayonTaskGraph {
    /// Uses rayon's global pool.
    #[must_use]
    pub fn global() -> Self {
        Self { pool: None }
    }

    /// Builds a dedicated pool with `threads` workers.
    ///
    /// # Errors
    ///
    /// [`CoreError::InvalidConfig`] if rayon cannot spawn the pool.
    pub fn with_threads(threads: usize) -> CoreResult<Self> {
        let pool = rayon::ThreadPoolBuilder::new()
            .num_threads(threads)
            .thread_name(|i| format!("periscope-worker-{i}"))
            .build()
            .map_err(|e| CoreError::InvalidConfig(e.to_string()))?;
        tracing::debug!(threads, "dedicated task graph pool started");
        Ok(Self {
            pool: Some(Arc::new(pool)),
        })
    }
}

impl TaskGraph for RayonTaskGraph {
    fn for_each_range<T, F>(&self, items: &mut [T], granularity: TaskGranularity, f: F) -> usize
    where
        T: Send,
        F: Fn(usize, &mut [T]) + Sync,
    {
        if items.is_empty() {
            return 0;
        }
        let f = &f;
        match &self.pool {
            Some(pool) => pool.scope(|s| spawn_ranges(s, items, granularity, f)),
            None => rayon::scope(|s| spawn_ranges(s, items, granularity, f)),
        }
    }

    fn join<A, B, RA, RB>(&self, a: A, b: B) -> (RA, RB)
    where
        A: FnOnce() -> RA + Send,
        B: FnOnce() -> RB + Send,
        RA: Send,
        RB: Send,
    {
        match &self.pool {
            Some(pool) => pool.join(a, b),
            None => rayon::join(a, b),
        }
    }

    fn worker_count(&self) -> usize {
        match &self.pool {
            Some(pool) => pool.current_num_threads(),
            None => rayon::current_num_threads(),
        }
    }
}

fn spawn_ranges<'s, T, F>(
    scope: &rayon::Scope<'s>,
    mut items: &'s mut [T],
    granularity: TaskGranularity,
    f: &'s F,
) -> usize
where
    T: Send,
    F: Fn(usize, &mut [T]) + Sync,
{
    let mut tasks = 0;
    for range in granularity.ranges(items.len()) {
        let (head, tail) = std::mem::take(&mut items).split_at_mut(range.len());
        items = tail;
        scope.spawn(move |_| f(range.start, head));
        tasks += 1;
    }
    tasks
}

/// Runs everything on the calling thread, in order.
#[derive(Debug, Clone, Copy, Default)]
pub struct InlineTaskGraph;

impl TaskGraph for InlineTaskGraph {
    fn for_each_range<T, F>(&self, mut items: &mut [T], granularity: TaskGranularity, f: F) -> usize
    where
        T: Send,
        F: Fn(usize, &mut [T]) + Sync,
    {
        let mut tasks = 0;
        for range in granularity.ranges(items.len()) {
            let (head, tail) = std::mem::take(&mut items).split_at_mut(range.len());
            items = tail;
            f(range.start, head);
            tasks += 1;
        }
        tasks
    }

    fn join<A, B, RA, RB>(&self, a: A, b: B) -> (RA, RB)
    where
        A: FnOnce() -> RA + Send,
        B: FnOnce() -> RB + Send,
        RA: Send,
        RB: Send,
    {
        let ra = a();
        (ra, b())
    }

    fn worker_count(&self) -> usize {
        1
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn granularity(max_tasks: usize, min_items_per_task: usize) -> TaskGranularity {
        TaskGranularity {
            min_items_per_task,
            max_tasks,
        }
    }

    #[test]
    fn test_task_ranges_cover_input() {
        let ranges: Vec<_> = granularity(8, 1024).ranges(10_000).collect();
        assert_eq!(ranges.first().map(|r| r.start), Some(0));
        assert_eq!(ranges.last().map(|r| r.end), Some(10_000));
        for pair in ranges.windows(2) {
            assert_eq!(pair[0].end, pair[1].start);
        }
        // ceil(10000 / 8) = 1250 > 1024
        assert_eq!(ranges[0].len(), 1250);
    }

    #[test]
    fn test_task_ranges_respect_min_granularity() {
        assert_eq!(granularity(64, 1024).ranges(3000).count(), 3);
        assert_eq!(granularity(4, 16).ranges(0).count(), 0);
    }

    #[test]
    fn test_rayon_each_slot_written_once() {
        let graph = RayonTaskGraph::with_threads(4).unwrap();
        assert_eq!(graph.worker_count(), 4);
        assert_eq!(InlineTaskGraph.worker_count(), 1);
        let mut items = vec![0_usize; 5000];
        let tasks = graph.for_each_range(
            &mut items,
            TaskGranularity {
                min_items_per_task: 100,
                max_tasks: 16,
            },
            |offset, chunk| {
                for (i, slot) in chunk.iter_mut().enumerate() {
                    *slot += offset + i;
                }
            },
        );
        assert!(items.iter().enumerate().all(|(i, v)| *v == i));
        // ceil(5000 / 16) = 313 per task
        assert_eq!(tasks, 16);
    }

    #[test]
    fn test_inline_counts_tasks_in_order() {
        let seen = std::sync::Mutex::new(Vec::new());
        let mut items = vec![0_u8; 10];
        let tasks = InlineTaskGraph.for_each_range(&mut items, granularity(4, 2), |offset, chunk| {
            seen.lock().unwrap().push((offset, chunk.len()));
        });
        assert_eq!(tasks, 4);
        assert_eq!(seen.into_inner().unwrap(), vec![(0, 3), (3, 3), (6, 3), (9, 1)]);
        assert_eq!(InlineTaskGraph.for_each_range(&mut [0_u8; 0], granularity(4, 2), |_, _| {}), 0);
    }

    #[test]
    fn test_join_returns_both() {
        let graph = RayonTaskGraph::global();
        let (a, b) = graph.join(|| 1 + 1, || "b");
        assert_eq!((a, b), (2, "b"));

        let (a, b) = InlineTaskGraph.join(|| 3, || 4);
        assert_eq!((a, b), (3, 4));
    }
}
