use std::cell::Cell;

/// Bump allocator over an abstract byte range.
///
/// It hands out offsets only; the caller owns whatever memory the offsets
/// index into. Reset between frames.
pub struct LinearAllocator {
    capacity: usize,
    head: Cell<usize>,
}

impl LinearAllocator {
    pub fn new(capacity: usize) -> Self {
        Self {
            capacity,
            head: Cell::new(0),
        }
    }

    #[inline]
    pub fn capacity(&self) -> usize {
        self.capacity
    }

    #[inline]
    pub fn allocated(&self) -> usize {
        self.head.get()
    }

    pub fn allocate(&self, size: usize, alignment: usize) -> Option<usize> {
        assert!(alignment.is_power_of_two());

        let offset = (self.head.get() + alignment - 1) & !(alignment - 1);
        if offset + size > self.capacity {
            return None;
        }

        self.head.set(offset + size);
        Some(offset)
    }

    pub fn reset(&self) {
        self.head.set(0);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn bump_and_reset() {
        let allocator = LinearAllocator::new(256);

        assert_eq!(allocator.allocate(10, 1), Some(0));
        assert_eq!(allocator.allocate(10, 16), Some(16));
        assert_eq!(allocator.allocated(), 26);

        allocator.reset();
        assert_eq!(allocator.allocate(256, 1), Some(0));
        assert_eq!(allocator.allocate(1, 1), None);
    }
}
