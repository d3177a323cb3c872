use std::collections::BinaryHeap;

/// Keeps the `capacity` smallest items offered to it.
///
/// Backed by a max-heap so the worst kept item is always on top and can be
/// evicted when something better arrives.
#[derive(Debug, Clone)]
pub struct BoundedHeap<T: Ord> {
    heap: BinaryHeap<T>,
    capacity: usize,
}

impl<T: Ord> BoundedHeap<T> {
    pub fn with_capacity(capacity: usize) -> BoundedHeap<T> {
        BoundedHeap {
            heap: BinaryHeap::with_capacity(capacity),
            capacity,
        }
    }

    /// Insert `item` if there is room or it is strictly better than the
    /// current worst. Returns whether it was kept.
    pub fn offer(&mut self, item: T) -> bool {
        if self.heap.len() < self.capacity {
            self.heap.push(item);
            return true;
        }
        match self.heap.peek() {
            Some(worst) if item < *worst => {
                self.heap.pop();
                self.heap.push(item);
                true
            }
            _ => false,
        }
    }

    /// The worst item currently kept.
    pub fn peek(&self) -> Option<&T> {
        self.heap.peek()
    }

    pub fn len(&self) -> usize {
        self.heap.len()
    }

    pub fn is_empty(&self) -> bool {
        self.heap.is_empty()
    }

    /// Drain in heap order, worst first.
    pub fn drain(&mut self) -> impl Iterator<Item = T> + '_ {
        std::iter::from_fn(move || self.heap.pop())
    }

    /// Best first.
    pub fn into_sorted_vec(self) -> Vec<T> {
        self.heap.into_sorted_vec()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_keeps_smallest() {
        let mut heap = BoundedHeap::with_capacity(3);
        for v in &[9, 4, 7, 1, 8, 3, 6] {
            heap.offer(*v);
        }
        assert_eq!(heap.len(), 3);
        assert_eq!(heap.peek(), Some(&4));
        assert_eq!(heap.into_sorted_vec(), vec![1, 3, 4]);
    }

    #[test]
    fn test_ties_do_not_evict() {
        let mut heap = BoundedHeap::with_capacity(2);
        assert!(heap.offer(1));
        assert!(heap.offer(5));
        assert!(!heap.offer(5));
        assert!(heap.offer(2));
        assert_eq!(heap.drain().collect::<Vec<_>>(), vec![2, 1]);
        assert!(heap.is_empty());
    }

    #[test]
    fn test_zero_capacity_keeps_nothing() {
        let mut heap = BoundedHeap::with_capacity(0);
        assert!(!heap.offer(1));
        assert!(heap.peek().is_none());
    }

    #[test]
    fn test_fewer_items_than_capacity() {
        let mut heap = BoundedHeap::with_capacity(10);
        heap.offer(3);
        heap.offer(2);
        assert_eq!(heap.into_sorted_vec(), vec![2, 3]);
    }
}
