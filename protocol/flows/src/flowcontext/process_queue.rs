use std::{
    collections::{HashSet, VecDeque},
    hash::Hash,
};

/// A FIFO queue which ignores items already queued
pub struct ProcessQueue<T: Copy + Eq + Hash> {
    deque: VecDeque<T>,
    queued: HashSet<T>,
}

impl<T: Copy + Eq + Hash> ProcessQueue<T> {
    pub fn new() -> Self {
        Self { deque: VecDeque::new(), queued: HashSet::new() }
    }

    pub fn len(&self) -> usize {
        self.deque.len()
    }

    pub fn is_empty(&self) -> bool {
        self.deque.is_empty()
    }

    pub fn enqueue(&mut self, item: T) -> bool {
        let is_new = self.queued.insert(item);
        if is_new {
            self.deque.push_back(item);
        }
        is_new
    }

    pub fn enqueue_chunk<I: IntoIterator<Item = T>>(&mut self, items: I) {
        for item in items {
            self.enqueue(item);
        }
    }

    pub fn dequeue(&mut self) -> Option<T> {
        let item = self.deque.pop_front()?;
        self.queued.remove(&item);
        Some(item)
    }

    /// Removes and returns up to `max_chunk_size` items from the front of the queue
    pub fn dequeue_chunk(&mut self, max_chunk_size: usize) -> Vec<T> {
        let chunk: Vec<T> = self.deque.drain(..max_chunk_size.min(self.deque.len())).collect();
        for item in chunk.iter() {
            self.queued.remove(item);
        }
        chunk
    }
}

impl<T: Copy + Eq + Hash> Default for ProcessQueue<T> {
    fn default() -> Self {
        Self::new()
    }
}

impl<T: Copy + Eq + Hash> FromIterator<T> for ProcessQueue<T> {
    fn from_iter<I: IntoIterator<Item = T>>(iter: I) -> Self {
        let mut queue = Self::new();
        queue.enqueue_chunk(iter);
        queue
    }
}

impl<T: Copy + Eq + Hash> IntoIterator for ProcessQueue<T> {
    type Item = T;
    type IntoIter = std::collections::vec_deque::IntoIter<T>;

    fn into_iter(self) -> Self::IntoIter {
        self.deque.into_iter()
    }
}

#[cfg(test)]
mod tests {
    use super::ProcessQueue;
    use itertools::Itertools;

    #[test]
    fn test_process_queue() {
        let mut q: ProcessQueue<u32> = [3, 1, 3, 2].into_iter().collect();
        assert_eq!(q.len(), 3);
        assert!(!q.enqueue(1));
        assert_eq!(q.dequeue(), Some(3));
        // A dequeued item may be queued again
        assert!(q.enqueue(3));
        assert_eq!(q.dequeue_chunk(2), vec![1, 2]);
        q.enqueue_chunk([4, 4, 5]);
        assert_eq!(q.dequeue_chunk(10), vec![3, 4, 5]);
        assert!(q.is_empty());
        q.enqueue_chunk([7, 8, 7]);
        assert_eq!(q.into_iter().collect_vec(), vec![7, 8]);
    }
}
