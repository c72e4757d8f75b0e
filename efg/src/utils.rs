use hytra::TrAdder;
use indicatif::{ProgressBar, ProgressFinish, ProgressStyle};
use std::thread;
use std::time::Duration;

/// Run `f`, displaying a progress bar of `n_iter` steps if it takes longer than
/// `config.progress_min_time`. `f` reports progress by incrementing the counter.
pub(crate) fn with_progress<F, T>(
    f: F,
    n_iter: u64,
    pb_msg: &'static str,
    config: &crate::Config,
) -> T
where
    F: FnOnce(&TrAdder<u64>) -> T + Send,
    T: Send,
{
    let it_cnt: TrAdder<u64> = TrAdder::new();
    let finished = std::sync::atomic::AtomicBool::new(false);
    thread::scope(|s| {
        let finished_ref = &finished;
        let it_cnt_ref = &it_cnt;
        let pb_thread_handle = config.show_progress.then(|| {
            s.spawn(move || {
                // Wait for config.progress_min_time, unless finished is set in the meantime.
                let start_init_wait = std::time::Instant::now();
                loop {
                    let elapsed = start_init_wait.elapsed();
                    if elapsed >= config.progress_min_time {
                        break;
                    }
                    thread::park_timeout(config.progress_min_time - elapsed);
                    if finished_ref.load(std::sync::atomic::Ordering::Acquire) {
                        return;
                    }
                }
                let pb = ProgressBar::new(n_iter)
                    .with_style(
                        ProgressStyle::default_spinner()
                            .template("{msg} [{elapsed_precise}] [{bar:40.cyan/blue}] (ETA {eta})")
                            .unwrap(),
                    )
                    .with_finish(ProgressFinish::AndClear)
                    .with_message(pb_msg)
                    .with_position(it_cnt_ref.get());
                while !finished_ref.load(std::sync::atomic::Ordering::Acquire) {
                    pb.set_position(it_cnt_ref.get());
                    thread::park_timeout(Duration::from_millis(50));
                }
                pb.finish_and_clear();
            })
        });

        let res = f(it_cnt_ref);
        finished_ref.store(true, std::sync::atomic::Ordering::Release);
        // park always consumes the token and unpark always produces it, so the
        // progress thread cannot miss this wake-up.
        if let Some(handle) = pb_thread_handle {
            handle.thread().unpark();
        }
        res
    })
}

/// Normalize `values` in place to sum to one. Returns false (and leaves `values`
/// untouched) when the total mass is zero or not finite.
pub(crate) fn normalize_in_place(values: &mut [f64]) -> bool {
    let total: f64 = values.iter().sum();
    if !(total.is_finite() && total > 0.0) {
        return false;
    }
    values.iter_mut().for_each(|v| *v /= total);
    true
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn normalize_rejects_zero_mass() {
        let mut v = vec![0.0, 0.0];
        assert!(!normalize_in_place(&mut v));
        assert_eq!(v, vec![0.0, 0.0]);
        let mut v = vec![1.0, 3.0];
        assert!(normalize_in_place(&mut v));
        assert_eq!(v, vec![0.25, 0.75]);
    }

    #[test]
    fn progress_returns_closure_result() {
        let res = with_progress(
            |it_cnt| {
                for _ in 0..10 {
                    it_cnt.inc(1);
                }
                it_cnt.get()
            },
            10,
            "test",
            &crate::Config::no_progress(),
        );
        assert_eq!(res, 10);
    }
}
