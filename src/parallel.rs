//! Run independent work items on a bounded thread pool.
use rayon::{
    ThreadPoolBuilder,
    iter::{IntoParallelIterator, ParallelIterator},
};

use crate::{Error, Result};

/// Apply `f` to every item, with at most `max_concurrency` items in flight.
///
/// `None` uses one thread per core. Results keep the order of `items`; if any
/// item fails, one of the errors is returned.
pub fn run_all<I, T, F>(items: Vec<I>, max_concurrency: Option<usize>, f: F) -> Result<Vec<T>>
where
    I: Send,
    T: Send,
    F: Fn(I) -> Result<T> + Send + Sync,
{
    if max_concurrency == Some(0) {
        return Err(Error::general("max concurrency must be at least 1"));
    }
    let pool = ThreadPoolBuilder::new()
        .num_threads(max_concurrency.unwrap_or(0))
        .build()
        .map_err(Error::wrap)?;
    pool.install(|| items.into_par_iter().map(f).collect())
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};

    #[test]
    fn keeps_order() {
        let out = run_all((0..20).collect(), Some(3), |i: u32| Ok(i * 2))
            .unwrap();
        assert_eq!(out, (0..20).map(|i| i * 2).collect::<Vec<_>>());
    }

    #[test]
    fn bounded() {
        let active = AtomicUsize::new(0);
        let peak = AtomicUsize::new(0);
        run_all((0..16).collect(), Some(2), |_: u32| {
            let now = active.fetch_add(1, Ordering::SeqCst) + 1;
            peak.fetch_max(now, Ordering::SeqCst);
            std::thread::sleep(std::time::Duration::from_millis(5));
            active.fetch_sub(1, Ordering::SeqCst);
            Ok(())
        })
        .unwrap();
        assert!(peak.load(Ordering::SeqCst) <= 2);
    }

    #[test]
    fn propagates_errors() {
        let out = run_all(vec![1, 2, 3], None, |i: u32| {
            if i == 2 {
                Err(Error::general("two"))
            } else {
                Ok(i)
            }
        });
        assert!(out.is_err());
        assert!(run_all(vec![1u32], Some(0), Ok).is_err());
    }
}
