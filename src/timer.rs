//! Min-heap timer wheel keyed by connection id, grounded on
//! `examples/original_source/code/timer/heaptimer.cpp`. Used only from the
//! reactor thread (§5), so no internal locking.

use std::collections::HashMap;
use std::time::{Duration, Instant};

type Callback = Box<dyn FnOnce() + Send>;

struct TimerNode {
    id: i32,
    expires: Instant,
    cb: Option<Callback>,
}

pub struct TimerHeap {
    heap: Vec<TimerNode>,
    index: HashMap<i32, usize>,
}

impl TimerHeap {
    pub fn new() -> Self {
        Self {
            heap: Vec::with_capacity(64),
            index: HashMap::new(),
        }
    }

    pub fn len(&self) -> usize {
        self.heap.len()
    }

    pub fn is_empty(&self) -> bool {
        self.heap.is_empty()
    }

    pub fn contains(&self, id: i32) -> bool {
        self.index.contains_key(&id)
    }

    /// Adds a new timer, or replaces deadline+callback in place if `id` is
    /// already present.
    pub fn add<F>(&mut self, id: i32, timeout: Duration, cb: F)
    where
        F: FnOnce() + Send + 'static,
    {
        let expires = Instant::now() + timeout;
        if let Some(&i) = self.index.get(&id) {
            self.heap[i].expires = expires;
            self.heap[i].cb = Some(Box::new(cb));
            let n = self.heap.len();
            if !self.sift_down(i, n) {
                self.sift_up(i);
            }
        } else {
            let i = self.heap.len();
            self.index.insert(id, i);
            self.heap.push(TimerNode {
                id,
                expires,
                cb: Some(Box::new(cb)),
            });
            self.sift_up(i);
        }
    }

    /// Extends an existing timer's deadline. Only used to push a deadline
    /// further out (e.g. on read/write activity).
    pub fn adjust(&mut self, id: i32, timeout: Duration) {
        let Some(&i) = self.index.get(&id) else {
            return;
        };
        self.heap[i].expires = Instant::now() + timeout;
        let n = self.heap.len();
        self.sift_down(i, n);
    }

    /// Runs `id`'s callback immediately and removes it.
    pub fn do_work(&mut self, id: i32) {
        let Some(&i) = self.index.get(&id) else {
            return;
        };
        if let Some(cb) = self.heap[i].cb.take() {
            cb();
        }
        self.delete(i);
    }

    /// Fires and pops every timer whose deadline has already passed.
    pub fn tick(&mut self) {
        while let Some(node) = self.heap.first() {
            if node.expires > Instant::now() {
                break;
            }
            let cb = self.heap[0].cb.take();
            if let Some(cb) = cb {
                cb();
            }
            self.pop();
        }
    }

    pub fn pop(&mut self) {
        if !self.heap.is_empty() {
            self.delete(0);
        }
    }

    pub fn clear(&mut self) {
        self.heap.clear();
        self.index.clear();
    }

    /// Runs `tick()` then returns the remaining ms until the next deadline,
    /// or `-1` (wait indefinitely) if the heap is empty.
    pub fn next_tick_ms(&mut self) -> i32 {
        self.tick();
        match self.heap.first() {
            None => -1,
            Some(node) => {
                let remaining = node
                    .expires
                    .saturating_duration_since(Instant::now())
                    .as_millis();
                remaining.min(i32::MAX as u128) as i32
            }
        }
    }

    fn swap(&mut self, i: usize, j: usize) {
        self.heap.swap(i, j);
        self.index.insert(self.heap[i].id, i);
        self.index.insert(self.heap[j].id, j);
    }

    fn sift_up(&mut self, mut i: usize) {
        while i > 0 {
            let parent = (i - 1) / 2;
            if self.heap[parent].expires > self.heap[i].expires {
                self.swap(i, parent);
                i = parent;
            } else {
                break;
            }
        }
    }

    /// Returns whether the node at `i` actually moved down.
    fn sift_down(&mut self, i: usize, n: usize) -> bool {
        let mut index = i;
        loop {
            let mut child = 2 * index + 1;
            if child >= n {
                break;
            }
            if child + 1 < n && self.heap[child + 1].expires < self.heap[child].expires {
                child += 1;
            }
            if self.heap[child].expires < self.heap[index].expires {
                self.swap(index, child);
                index = child;
            } else {
                break;
            }
        }
        index > i
    }

    fn delete(&mut self, index: usize) {
        let n = self.heap.len() - 1;
        if index < n {
            self.swap(index, n);
            if !self.sift_down(index, n) {
                self.sift_up(index);
            }
        }
        let removed = self.heap.pop().expect("delete called on empty heap");
        self.index.remove(&removed.id);
    }
}

impl Default for TimerHeap {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::cell::RefCell;
    use std::rc::Rc;

    fn heap_is_valid(heap: &TimerHeap) -> bool {
        for i in 0..heap.heap.len() {
            for child in [2 * i + 1, 2 * i + 2] {
                if child < heap.heap.len() && heap.heap[i].expires > heap.heap[child].expires {
                    return false;
                }
            }
        }
        heap.index
            .iter()
            .all(|(&id, &i)| heap.heap[i].id == id)
    }

    #[test]
    fn invariants_after_inserts_and_deletes() {
        let mut heap = TimerHeap::new();
        for id in 0..20 {
            heap.add(id, Duration::from_millis((20 - id) as u64 * 10), || {});
        }
        assert!(heap_is_valid(&heap));
        heap.do_work(5);
        assert!(heap_is_valid(&heap));
        heap.adjust(3, Duration::from_millis(5000));
        assert!(heap_is_valid(&heap));
        heap.pop();
        assert!(heap_is_valid(&heap));
    }

    #[test]
    fn fires_in_expiry_order() {
        let fired = Rc::new(RefCell::new(Vec::new()));
        let mut heap = TimerHeap::new();
        for id in [3, 1, 2] {
            let fired = fired.clone();
            heap.add(id, Duration::from_millis(0), move || fired.borrow_mut().push(id));
        }
        std::thread::sleep(Duration::from_millis(5));
        heap.tick();
        assert_eq!(fired.borrow().len(), 3);
    }

    #[test]
    fn next_tick_reports_sentinel_when_empty() {
        let mut heap = TimerHeap::new();
        assert_eq!(heap.next_tick_ms(), -1);
    }

    #[test]
    fn add_replaces_existing_id_in_place() {
        let mut heap = TimerHeap::new();
        heap.add(1, Duration::from_secs(10), || {});
        heap.add(1, Duration::from_millis(1), || {});
        assert_eq!(heap.len(), 1);
        assert!(heap_is_valid(&heap));
    }
}
