//! Bounded blocking queue with push/pop condvars and close semantics,
//! grounded on `examples/original_source/code/log/blockqueue.h`. Used by the
//! async logger (§4.3) as the producer/drain channel.

use std::collections::VecDeque;
use std::sync::{Condvar, Mutex};
use std::time::{Duration, Instant};

struct Inner<T> {
    deque: VecDeque<T>,
    closed: bool,
}

pub struct BlockingQueue<T> {
    state: Mutex<Inner<T>>,
    not_empty: Condvar,
    not_full: Condvar,
    capacity: usize,
}

impl<T> BlockingQueue<T> {
    pub fn new(capacity: usize) -> Self {
        assert!(capacity > 0);
        Self {
            state: Mutex::new(Inner {
                deque: VecDeque::new(),
                closed: false,
            }),
            not_empty: Condvar::new(),
            not_full: Condvar::new(),
            capacity,
        }
    }

    pub fn push_back(&self, item: T) {
        let mut state = self.state.lock().unwrap();
        while state.deque.len() >= self.capacity && !state.closed {
            state = self.not_full.wait(state).unwrap();
        }
        state.deque.push_back(item);
        self.not_empty.notify_one();
    }

    pub fn push_front(&self, item: T) {
        let mut state = self.state.lock().unwrap();
        while state.deque.len() >= self.capacity && !state.closed {
            state = self.not_full.wait(state).unwrap();
        }
        state.deque.push_front(item);
        self.not_empty.notify_one();
    }

    /// Non-blocking variant used by the logger's "push if not full, else
    /// write synchronously" fallback path.
    pub fn try_push_back(&self, item: T) -> Result<(), T> {
        let mut state = self.state.lock().unwrap();
        if state.deque.len() >= self.capacity {
            return Err(item);
        }
        state.deque.push_back(item);
        self.not_empty.notify_one();
        Ok(())
    }

    /// Blocks while empty; returns `None` once the queue is closed and
    /// drained (never blocks again after that).
    pub fn pop(&self) -> Option<T> {
        let mut state = self.state.lock().unwrap();
        loop {
            if let Some(item) = state.deque.pop_front() {
                self.not_full.notify_one();
                return Some(item);
            }
            if state.closed {
                return None;
            }
            state = self.not_empty.wait(state).unwrap();
        }
    }

    pub fn pop_timeout(&self, timeout: Duration) -> Option<T> {
        let mut state = self.state.lock().unwrap();
        let deadline = Instant::now() + timeout;
        loop {
            if let Some(item) = state.deque.pop_front() {
                self.not_full.notify_one();
                return Some(item);
            }
            if state.closed {
                return None;
            }
            let now = Instant::now();
            if now >= deadline {
                return None;
            }
            let (guard, result) = self.not_empty.wait_timeout(state, deadline - now).unwrap();
            state = guard;
            if result.timed_out() {
                continue;
            }
        }
    }

    pub fn clear(&self) {
        let mut state = self.state.lock().unwrap();
        state.deque.clear();
        self.not_full.notify_all();
    }

    pub fn flush(&self) {
        self.not_empty.notify_one();
    }

    pub fn close(&self) {
        let mut state = self.state.lock().unwrap();
        state.deque.clear();
        state.closed = true;
        drop(state);
        self.not_empty.notify_all();
        self.not_full.notify_all();
    }

    pub fn is_empty(&self) -> bool {
        self.state.lock().unwrap().deque.is_empty()
    }

    pub fn is_full(&self) -> bool {
        self.state.lock().unwrap().deque.len() >= self.capacity
    }

    pub fn len(&self) -> usize {
        self.state.lock().unwrap().deque.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;
    use std::thread;

    #[test]
    fn pop_after_close_returns_none() {
        let q: BlockingQueue<i32> = BlockingQueue::new(4);
        q.close();
        assert_eq!(q.pop(), None);
    }

    #[test]
    fn pops_never_exceed_pushes() {
        let q = Arc::new(BlockingQueue::new(2));
        for i in 0..10 {
            q.push_back(i);
        }
        let mut popped = Vec::new();
        while let Some(v) = q.pop_timeout(Duration::from_millis(10)) {
            popped.push(v);
        }
        assert_eq!(popped, (0..10).collect::<Vec<_>>());
    }

    #[test]
    fn blocked_consumer_wakes_on_close() {
        let q = Arc::new(BlockingQueue::<i32>::new(4));
        let q2 = q.clone();
        let handle = thread::spawn(move || q2.pop());
        thread::sleep(Duration::from_millis(20));
        q.close();
        assert_eq!(handle.join().unwrap(), None);
    }

    #[test]
    fn timed_pop_returns_none_on_timeout() {
        let q: BlockingQueue<i32> = BlockingQueue::new(1);
        assert_eq!(q.pop_timeout(Duration::from_millis(5)), None);
    }
}
