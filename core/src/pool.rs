//! Fixed-size worker pool over a static partition of work items.
//!
//! Items are split round-robin across scoped threads; each worker produces a
//! private partial result and the caller reduces the returned parts after the
//! join barrier. Workers share nothing mutable, so reduction must be
//! commutative for the result to be independent of completion order.

use std::thread;

/// Runs `work(worker_id, partition)` on up to `workers` threads and returns
/// every partial result. `workers <= 1` (or a single item) degrades to
/// strictly sequential execution on the calling thread.
pub fn map_partitioned<I, T, F>(items: Vec<I>, workers: usize, work: F) -> Vec<T>
where
    I: Send,
    T: Send,
    F: Fn(usize, Vec<I>) -> T + Sync,
{
    if items.is_empty() {
        return Vec::new();
    }
    let workers = workers.clamp(1, items.len());
    if workers == 1 {
        return vec![work(0, items)];
    }

    let mut partitions: Vec<Vec<I>> = (0..workers).map(|_| Vec::new()).collect();
    for (idx, item) in items.into_iter().enumerate() {
        partitions[idx % workers].push(item);
    }

    let work = &work;
    thread::scope(|scope| {
        let handles: Vec<_> = partitions
            .into_iter()
            .enumerate()
            .map(|(worker_id, partition)| scope.spawn(move || work(worker_id, partition)))
            .collect();
        handles
            .into_iter()
            .map(|handle| handle.join().expect("worker thread panicked"))
            .collect()
    })
}
