use std::collections::VecDeque;

use crate::error::{NetworkError, Result};

/// Fixed-capacity FIFO with an overwrite policy.
///
/// Invariants: `len() <= capacity`; FIFO order is preserved for every element
/// that is never evicted; eviction happens only on a push into a full buffer
/// with `overwriting = true`, and evicts exactly the oldest element.
#[derive(Debug)]
pub struct RingBuffer<T> {
    cells: VecDeque<T>,
    capacity: usize,
    overwriting: bool,
}

impl<T> RingBuffer<T> {
    pub fn new(capacity: usize, overwriting: bool) -> RingBuffer<T> {
        RingBuffer {
            cells: VecDeque::with_capacity(capacity),
            capacity,
            overwriting,
        }
    }

    /// Append an element. Returns the evicted oldest element if the buffer was
    /// full and overwriting, `BufferFull` (buffer unchanged) if it was full and
    /// not overwriting.
    pub fn push_back(&mut self, value: T) -> Result<Option<T>> {
        if self.cells.len() == self.capacity {
            if !self.overwriting {
                return Err(NetworkError::BufferFull);
            }
            let evicted = self.cells.pop_front();
            self.cells.push_back(value);
            Ok(evicted)
        }
        else {
            self.cells.push_back(value);
            Ok(None)
        }
    }

    pub fn pop_front(&mut self) -> Option<T> {
        self.cells.pop_front()
    }

    pub fn front(&self) -> Option<&T> {
        self.cells.front()
    }

    pub fn drain(&mut self) -> impl Iterator<Item = T> + '_ {
        self.cells.drain(..)
    }

    pub fn len(&self) -> usize {
        self.cells.len()
    }

    pub fn is_empty(&self) -> bool {
        self.cells.is_empty()
    }

    pub fn is_full(&self) -> bool {
        self.cells.len() == self.capacity
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rstest::*;

    #[rstest]
    #[case::empty(vec![], 3, vec![])]
    #[case::partial(vec![1, 2], 3, vec![1, 2])]
    #[case::full(vec![1, 2, 3], 3, vec![1, 2, 3])]
    fn test_fifo_order(#[case] values: Vec<u32>, #[case] capacity: usize, #[case] expected: Vec<u32>) {
        let mut ring = RingBuffer::new(capacity, false);
        for v in values {
            ring.push_back(v).unwrap();
        }

        let mut popped = Vec::new();
        while let Some(v) = ring.pop_front() {
            popped.push(v);
        }
        assert_eq!(popped, expected);
        assert!(ring.is_empty());
    }

    #[test]
    fn test_full_without_overwriting_rejects() {
        let mut ring = RingBuffer::new(2, false);
        ring.push_back(1).unwrap();
        ring.push_back(2).unwrap();
        assert!(ring.is_full());

        assert!(matches!(ring.push_back(3), Err(NetworkError::BufferFull)));

        // queue unchanged
        assert_eq!(ring.len(), 2);
        assert_eq!(ring.pop_front(), Some(1));
        assert_eq!(ring.pop_front(), Some(2));
    }

    #[test]
    fn test_full_with_overwriting_evicts_oldest() {
        let mut ring = RingBuffer::new(2, true);
        ring.push_back(1).unwrap();
        ring.push_back(2).unwrap();

        let evicted = ring.push_back(3).unwrap();
        assert_eq!(evicted, Some(1));

        assert_eq!(ring.pop_front(), Some(2));
        assert_eq!(ring.pop_front(), Some(3));
        assert_eq!(ring.pop_front(), None);
    }

    #[test]
    fn test_interleaved_push_pop() {
        let mut ring = RingBuffer::new(2, false);
        ring.push_back(1).unwrap();
        assert_eq!(ring.pop_front(), Some(1));
        ring.push_back(2).unwrap();
        ring.push_back(3).unwrap();
        assert_eq!(ring.pop_front(), Some(2));
        ring.push_back(4).unwrap();
        assert_eq!(ring.pop_front(), Some(3));
        assert_eq!(ring.pop_front(), Some(4));
    }
}
