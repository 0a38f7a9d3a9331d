use hashbrown::HashMap;
use std::hash::Hash;

/// An indexed binary min-heap.
///
/// Besides the usual `push`/`pop`, the index allows decreasing the priority
/// of an element already in the heap in `O(log n)` (`add_or_decrease_key`),
/// which both the controllability traversal and the dispatcher rely on.
///
/// Priorities only need `PartialOrd`, so `f64` priorities are accepted; a
/// priority must never compare as unordered against another one (`NaN`).
#[derive(Clone)]
pub struct IdxHeap<K, P> {
    /// Binary heap of (key, priority) pairs, smallest priority at the root.
    heap: Vec<(K, P)>,
    /// Current place in `heap` of every enqueued key.
    index: HashMap<K, usize>,
}

impl<K: Eq + Hash + Copy, P: PartialOrd + Copy> Default for IdxHeap<K, P> {
    fn default() -> Self {
        Self::new()
    }
}

impl<K: Eq + Hash + Copy, P: PartialOrd + Copy> IdxHeap<K, P> {
    pub fn new() -> Self {
        IdxHeap {
            heap: Vec::new(),
            index: HashMap::new(),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.heap.is_empty()
    }

    pub fn len(&self) -> usize {
        self.heap.len()
    }

    pub fn contains(&self, key: K) -> bool {
        self.index.contains_key(&key)
    }

    pub fn priority(&self, key: K) -> Option<P> {
        self.index.get(&key).map(|&i| self.heap[i].1)
    }

    /// Inserts a new element. The key must not already be present.
    pub fn push(&mut self, key: K, priority: P) {
        debug_assert!(!self.contains(key), "Key already enqueued");
        let place = self.heap.len();
        self.heap.push((key, priority));
        self.index.insert(key, place);
        self.sift_up(place);
    }

    /// Removes and returns the element with the smallest priority.
    pub fn pop(&mut self) -> Option<(K, P)> {
        if self.heap.is_empty() {
            return None;
        }
        let (key, prio) = self.heap.swap_remove(0);
        self.index.remove(&key);
        if !self.heap.is_empty() {
            self.index.insert(self.heap[0].0, 0);
            self.sift_down(0);
        }
        Some((key, prio))
    }

    /// Inserts the key, or lowers its priority if it is already enqueued
    /// with a larger one. A present key with a smaller or equal priority is
    /// left untouched.
    pub fn add_or_decrease_key(&mut self, key: K, priority: P) {
        match self.index.get(&key) {
            None => self.push(key, priority),
            Some(&place) => {
                if priority < self.heap[place].1 {
                    self.heap[place].1 = priority;
                    self.sift_up(place);
                }
            }
        }
    }

    fn sift_up(&mut self, mut i: usize) {
        let (key, prio) = self.heap[i];
        while i > 0 {
            let p = (i - 1) >> 1;
            let (above_key, above_prio) = self.heap[p];
            if prio < above_prio {
                self.index.insert(above_key, i);
                self.heap.swap(i, p);
                i = p;
            } else {
                break;
            }
        }
        self.index.insert(key, i);
    }

    fn sift_down(&mut self, mut i: usize) {
        let len = self.heap.len();
        let (key, prio) = self.heap[i];
        loop {
            let l = i * 2 + 1;
            if l >= len {
                break;
            }
            let r = i * 2 + 2;
            let c = if r < len && self.heap[r].1 < self.heap[l].1 { r } else { l };
            if self.heap[c].1 < prio {
                self.index.insert(self.heap[c].0, i);
                self.heap.swap(c, i);
                i = c;
            } else {
                break;
            }
        }
        self.index.insert(key, i);
    }
}
