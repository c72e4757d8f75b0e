//! Parallel executor used by the inference and training loops.
//!
//! Units of work are independent and indexed by `0..n`; results are returned in index order,
//! so the outcome does not depend on the number of threads.

use std::sync::Arc;

use rayon::prelude::*;

#[derive(Clone, Debug, Default)]
pub enum Executor {
    /// Run every unit of work on the calling thread.
    #[default]
    Sequential,
    /// Dispatch units of work to a rayon thread pool and wait for all of them.
    Pool(Arc<rayon::ThreadPool>),
}

impl Executor {
    /// Create an executor backed by a new pool of `num_threads` threads.
    /// A single thread gives the sequential executor.
    pub fn with_threads(num_threads: usize) -> Result<Self, rayon::ThreadPoolBuildError> {
        if num_threads <= 1 {
            return Ok(Self::Sequential);
        }
        Ok(Self::Pool(Arc::new(
            rayon::ThreadPoolBuilder::new()
                .num_threads(num_threads)
                .build()?,
        )))
    }

    pub fn threads(&self) -> usize {
        match self {
            Self::Sequential => 1,
            Self::Pool(pool) => pool.current_num_threads(),
        }
    }

    /// Evaluate `f` on every index of `0..n`.
    pub fn map<T, F>(&self, n: usize, f: F) -> Vec<T>
    where
        F: Fn(usize) -> T + Sync + Send,
        T: Send,
    {
        match self {
            Self::Sequential => (0..n).map(f).collect(),
            Self::Pool(pool) => pool.install(|| (0..n).into_par_iter().map(f).collect()),
        }
    }

    /// Sum of `f` over `0..n`, without collecting the terms.
    ///
    /// With a pool the summation order depends on the scheduling, so the result may differ
    /// from the sequential one by rounding.
    pub fn sum<F>(&self, n: usize, f: F) -> f64
    where
        F: Fn(usize) -> f64 + Sync + Send,
    {
        match self {
            Self::Sequential => (0..n).map(f).sum(),
            Self::Pool(pool) => pool.install(|| (0..n).into_par_iter().map(f).sum()),
        }
    }

    /// Evaluate `f` on every index of `0..n`, stopping at the first error.
    pub fn try_map<T, E, F>(&self, n: usize, f: F) -> Result<Vec<T>, E>
    where
        F: Fn(usize) -> Result<T, E> + Sync + Send,
        T: Send,
        E: Send,
    {
        match self {
            Self::Sequential => (0..n).map(f).collect(),
            Self::Pool(pool) => pool.install(|| (0..n).into_par_iter().map(f).collect()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn pool_preserves_order() {
        let seq = Executor::Sequential.map(100, |i| i * i);
        let par = Executor::with_threads(4).unwrap().map(100, |i| i * i);
        assert_eq!(seq, par);
    }

    #[test]
    fn sum_matches_sequential() {
        let f = |i: usize| (i % 7) as f64 * 0.5;
        let seq = Executor::Sequential.sum(1000, f);
        let par = Executor::with_threads(4).unwrap().sum(1000, f);
        assert_eq!(seq, 1498.5);
        assert!((seq - par).abs() < 1e-9);
        assert_eq!(Executor::Sequential.sum(0, f), 0.0);
    }

    #[test]
    fn try_map_reports_error() {
        let res: Result<Vec<usize>, usize> = Executor::with_threads(2)
            .unwrap()
            .try_map(10, |i| if i == 7 { Err(i) } else { Ok(i) });
        assert_eq!(res, Err(7));
    }
}
