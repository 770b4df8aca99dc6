use std::ops::Range;
use std::panic::{self, AssertUnwindSafe};
use std::sync::{Arc, Mutex, OnceLock, PoisonError};

use rustc_hash::FxHashMap;
use tracing::debug;

use crate::error::{ConvertError, ConvertResult};

/// Number of workers available to a conversion capped at `max_workers`.
#[inline]
pub(crate) fn conversion_workers(max_workers: usize) -> usize {
    static WORKERS: OnceLock<usize> = OnceLock::new();
    (*WORKERS.get_or_init(|| {
        std::thread::available_parallelism()
            .map(|n| n.get())
            .unwrap_or(1)
    }))
    .min(max_workers.max(1))
}

/// Split `0..height` into `workers` contiguous row ranges of equal size,
/// the last one absorbing the remainder. When the image has fewer rows than
/// workers, every row becomes its own range.
pub(crate) fn row_ranges(height: usize, workers: usize) -> Vec<Range<usize>> {
    let mut workers = workers.max(1);
    let mut chunk_rows = height / workers;
    if chunk_rows == 0 {
        workers = height;
        chunk_rows = 1;
    }
    (0..workers)
        .map(|i| {
            let start = i * chunk_rows;
            let end = if i + 1 == workers {
                height
            } else {
                start + chunk_rows
            };
            start..end
        })
        .collect()
}

/// Pre-build the conversion pool so the first conversion doesn't pay for
/// thread creation.
pub(crate) fn warmup_pool(max_workers: usize) -> ConvertResult<()> {
    install_conversion_pool(max_workers, || {})
}

/// Pool with exactly `workers` threads, built on first use and kept for the
/// life of the process. Sizes are bounded by available parallelism.
fn conversion_pool(workers: usize) -> ConvertResult<Arc<rayon::ThreadPool>> {
    static POOLS: OnceLock<Mutex<FxHashMap<usize, Arc<rayon::ThreadPool>>>> = OnceLock::new();
    let mut pools = POOLS
        .get_or_init(Default::default)
        .lock()
        .unwrap_or_else(PoisonError::into_inner);
    if let Some(pool) = pools.get(&workers) {
        return Ok(Arc::clone(pool));
    }
    let pool = rayon::ThreadPoolBuilder::new()
        .num_threads(workers)
        .thread_name(move |i| format!("pq-convert-{workers}-{i}"))
        .build()
        .map(Arc::new)
        .map_err(|err| ConvertError::WorkerCreation(err.to_string()))?;
    debug!(workers, "built conversion pool");
    pools.insert(workers, Arc::clone(&pool));
    Ok(pool)
}

/// Run `job` inside a conversion pool of `conversion_workers(max_workers)`
/// threads, so parallel iterators inside it never exceed the cap.
///
/// A panic inside the job (or any task it spawns) is reported as
/// `WorkerAbnormalTermination`; no partial result escapes.
pub(crate) fn install_conversion_pool<F, R>(max_workers: usize, job: F) -> ConvertResult<R>
where
    F: FnOnce() -> R + Send,
    R: Send,
{
    let pool = conversion_pool(conversion_workers(max_workers))?;
    panic::catch_unwind(AssertUnwindSafe(|| pool.install(job))).map_err(|payload| {
        ConvertError::WorkerAbnormalTermination(panic_message(payload.as_ref()))
    })
}

fn panic_message(payload: &(dyn std::any::Any + Send)) -> String {
    if let Some(s) = payload.downcast_ref::<&str>() {
        (*s).to_owned()
    } else if let Some(s) = payload.downcast_ref::<String>() {
        s.clone()
    } else {
        "worker panicked".to_owned()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rayon::prelude::*;

    fn assert_partition(height: usize, ranges: &[Range<usize>]) {
        let mut next = 0;
        for range in ranges {
            assert_eq!(range.start, next, "gap or overlap in {ranges:?}");
            assert!(range.end > range.start, "empty range in {ranges:?}");
            next = range.end;
        }
        assert_eq!(next, height);
    }

    #[test]
    fn last_chunk_absorbs_remainder() {
        let ranges = row_ranges(10, 3);
        assert_eq!(ranges, vec![0..3, 3..6, 6..10]);
    }

    #[test]
    fn short_images_get_one_row_per_worker() {
        let ranges = row_ranges(3, 8);
        assert_eq!(ranges, vec![0..1, 1..2, 2..3]);
    }

    #[test]
    fn ranges_cover_every_row_exactly_once() {
        for height in 1..64 {
            for workers in 1..12 {
                assert_partition(height, &row_ranges(height, workers));
            }
        }
    }

    #[test]
    fn worker_count_respects_cap() {
        assert_eq!(conversion_workers(1), 1);
        assert!(conversion_workers(4) <= 4);
        assert_eq!(conversion_workers(0), 1);
    }

    #[test]
    fn panics_become_errors() {
        let err = install_conversion_pool(4, || -> u32 { panic!("row 7 exploded") }).unwrap_err();
        match err {
            ConvertError::WorkerAbnormalTermination(message) => {
                assert!(message.contains("row 7 exploded"), "{message}")
            }
            other => panic!("unexpected error {other:?}"),
        }
    }

    #[test]
    fn pool_never_exceeds_the_cap() {
        for cap in [1, 2, 3, 1] {
            let threads = install_conversion_pool(cap, rayon::current_num_threads).unwrap();
            assert!(threads <= cap, "{threads} threads with cap {cap}");
            assert_eq!(threads, conversion_workers(cap));
        }
    }

    #[test]
    fn single_worker_still_runs_in_a_bounded_pool() {
        let seen = install_conversion_pool(1, || {
            (0..64)
                .into_par_iter()
                .map(|_| rayon::current_thread_index())
                .collect::<Vec<_>>()
        })
        .unwrap();
        assert!(seen.iter().all(|index| *index == Some(0)), "{seen:?}");
    }

    #[test]
    fn job_result_is_returned() {
        assert_eq!(install_conversion_pool(4, || 41 + 1).unwrap(), 42);
    }
}
