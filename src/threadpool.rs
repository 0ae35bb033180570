//! Fixed-size worker pool consuming a shared task queue, grounded on
//! `examples/original_source/code/pool/threadpool.h`. Workers are spawned
//! detached and keep the shared `Pool` alive via `Arc` the way the
//! reference keeps it alive via `shared_ptr` captured by each worker
//! closure, so the owning handle's `Drop` can signal shutdown without
//! having to join threads it no longer has handles to.

use std::collections::VecDeque;
use std::sync::{Arc, Condvar, Mutex};

type Task = Box<dyn FnOnce() + Send + 'static>;

struct Shared {
    mtx: Mutex<State>,
    cond: Condvar,
}

struct State {
    tasks: VecDeque<Task>,
    closed: bool,
}

pub struct ThreadPool {
    shared: Arc<Shared>,
}

impl ThreadPool {
    pub fn new(thread_count: usize) -> Self {
        assert!(thread_count > 0);

        let shared = Arc::new(Shared {
            mtx: Mutex::new(State {
                tasks: VecDeque::new(),
                closed: false,
            }),
            cond: Condvar::new(),
        });

        for idx in 0..thread_count {
            let shared = shared.clone();
            std::thread::Builder::new()
                .name(format!("reactor-httpd-worker-{idx}"))
                .spawn(move || worker_loop(shared))
                .expect("failed to spawn worker thread");
        }

        Self { shared }
    }

    pub fn add_task<F>(&self, task: F)
    where
        F: FnOnce() + Send + 'static,
    {
        let mut state = self.shared.mtx.lock().unwrap();
        state.tasks.push_back(Box::new(task));
        self.shared.cond.notify_one();
    }
}

fn worker_loop(shared: Arc<Shared>) {
    loop {
        let mut state = shared.mtx.lock().unwrap();
        loop {
            if let Some(task) = state.tasks.pop_front() {
                drop(state);
                // A panicking task must not take the whole worker thread
                // (and thus the pool's capacity) down with it.
                if std::panic::catch_unwind(std::panic::AssertUnwindSafe(task)).is_err() {
                    tracing::error!("worker task panicked; worker thread continues");
                }
                break;
            } else if state.closed {
                return;
            } else {
                state = shared.cond.wait(state).unwrap();
            }
        }
    }
}

impl Drop for ThreadPool {
    fn drop(&mut self) {
        let mut state = self.shared.mtx.lock().unwrap();
        state.closed = true;
        drop(state);
        self.shared.cond.notify_all();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::time::Duration;

    #[test]
    fn every_task_runs() {
        let pool = ThreadPool::new(4);
        let counter = Arc::new(AtomicUsize::new(0));
        for _ in 0..100 {
            let counter = counter.clone();
            pool.add_task(move || {
                counter.fetch_add(1, Ordering::SeqCst);
            });
        }
        // give workers a chance to drain; a real test harness would use a
        // barrier, kept simple here since work is near-instant.
        std::thread::sleep(Duration::from_millis(200));
        assert_eq!(counter.load(Ordering::SeqCst), 100);
    }
}
