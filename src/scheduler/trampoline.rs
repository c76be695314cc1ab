use std::cell::RefCell;
use std::collections::VecDeque;

use super::{run_job, Job};

thread_local! {
    // `Some` while this thread is draining its trampoline.
    static QUEUE: RefCell<Option<VecDeque<Job>>> = const { RefCell::new(None) };
}

/// Runs `job` on this thread once whatever trampoline job is already running
/// here has returned, or right away if there is none.
pub(crate) fn run(job: Job) {
    let first = QUEUE.with(|queue| {
        let mut queue = queue.borrow_mut();
        match queue.as_mut() {
            Some(pending) => {
                pending.push_back(job);
                None
            }
            None => {
                *queue = Some(VecDeque::new());
                Some(job)
            }
        }
    });
    let Some(first) = first else {
        return;
    };

    run_job(first);
    while let Some(next) = QUEUE.with(|queue| queue.borrow_mut().as_mut().and_then(VecDeque::pop_front)) {
        run_job(next);
    }
    QUEUE.with(|queue| *queue.borrow_mut() = None);
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;

    use parking_lot::Mutex;

    #[test]
    fn test_nested_jobs_run_after_current() {
        let order = Arc::new(Mutex::new(Vec::new()));
        let outer = order.clone();
        run(Box::new(move || {
            let inner = outer.clone();
            run(Box::new(move || inner.lock().push("inner")));
            outer.lock().push("outer");
        }));
        assert_eq!(*order.lock(), vec!["outer", "inner"]);
    }

    #[test]
    fn test_deep_recursion_is_flattened() {
        fn countdown(n: usize, hits: Arc<Mutex<usize>>) {
            run(Box::new(move || {
                *hits.lock() += 1;
                if n > 0 {
                    countdown(n - 1, hits);
                }
            }));
        }
        let hits = Arc::new(Mutex::new(0));
        countdown(100_000, hits.clone());
        assert_eq!(*hits.lock(), 100_001);
    }
}
