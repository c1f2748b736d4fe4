/// First-fit offset allocator with coalescing deallocation.
///
/// Backs the transient resource heaps: allocations are byte ranges inside one
/// big device memory block, and ranges freed in the same frame are merged back
/// so later resources can alias them.
pub struct FreeListAllocator {
    capacity: usize,
    /// Free ranges as `(offset, size)`, sorted by offset, never adjacent.
    free_ranges: Vec<(usize, usize)>,
}

impl FreeListAllocator {
    pub fn new(capacity: usize) -> Self {
        Self {
            capacity,
            free_ranges: vec![(0, capacity)],
        }
    }

    #[inline]
    pub fn capacity(&self) -> usize {
        self.capacity
    }

    pub fn is_pristine(&self) -> bool {
        self.free_ranges == [(0, self.capacity)]
    }

    /// Allocate `size` bytes at the first offset satisfying `alignment`.
    /// Returns `None` when no free range can hold the request.
    pub fn allocate(&mut self, size: usize, alignment: usize) -> Option<usize> {
        assert!(size > 0);
        assert!(alignment.is_power_of_two());

        for range_idx in 0..self.free_ranges.len() {
            let (range_offset, range_size) = self.free_ranges[range_idx];

            let aligned = (range_offset + alignment - 1) & !(alignment - 1);
            let padding = aligned - range_offset;
            if padding + size > range_size {
                continue;
            }

            // carve [aligned, aligned + size) out of the range
            self.free_ranges.remove(range_idx);
            if padding > 0 {
                self.free_ranges.insert(range_idx, (range_offset, padding));
            }
            let tail_offset = aligned + size;
            let tail_size = range_size - padding - size;
            if tail_size > 0 {
                let insert_at = if padding > 0 { range_idx + 1 } else { range_idx };
                self.free_ranges.insert(insert_at, (tail_offset, tail_size));
            }

            return Some(aligned);
        }

        None
    }

    /// Return a range to the allocator, merging with free neighbors.
    pub fn deallocate(&mut self, offset: usize, size: usize) {
        assert!(offset + size <= self.capacity);

        let insert_at = self.free_ranges
            .partition_point(|&(range_offset, _)| range_offset < offset);

        // ranges must not double-free or overlap live allocations
        if insert_at > 0 {
            let (prev_offset, prev_size) = self.free_ranges[insert_at - 1];
            assert!(prev_offset + prev_size <= offset, "Overlapping deallocation!");
        }
        if insert_at < self.free_ranges.len() {
            assert!(offset + size <= self.free_ranges[insert_at].0, "Overlapping deallocation!");
        }

        self.free_ranges.insert(insert_at, (offset, size));

        // coalesce with the right neighbor
        if insert_at + 1 < self.free_ranges.len() {
            let (next_offset, next_size) = self.free_ranges[insert_at + 1];
            if offset + size == next_offset {
                self.free_ranges[insert_at].1 += next_size;
                self.free_ranges.remove(insert_at + 1);
            }
        }
        // coalesce with the left neighbor
        if insert_at > 0 {
            let (prev_offset, prev_size) = self.free_ranges[insert_at - 1];
            if prev_offset + prev_size == offset {
                self.free_ranges[insert_at - 1].1 += self.free_ranges[insert_at].1;
                self.free_ranges.remove(insert_at);
            }
        }
    }

    /// Drop all allocations and return to a pristine state.
    pub fn reset(&mut self) {
        self.free_ranges.clear();
        self.free_ranges.push((0, self.capacity));
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn first_fit_with_alignment() {
        let mut allocator = FreeListAllocator::new(1024);

        assert_eq!(allocator.allocate(100, 1), Some(0));
        assert_eq!(allocator.allocate(100, 256), Some(256));
        // the hole at [100, 256) is reused by a small allocation
        assert_eq!(allocator.allocate(64, 4), Some(100));
    }

    #[test]
    fn coalesce_restores_pristine_state() {
        let mut allocator = FreeListAllocator::new(512);

        let a = allocator.allocate(128, 1).unwrap();
        let b = allocator.allocate(128, 1).unwrap();
        let c = allocator.allocate(128, 1).unwrap();

        allocator.deallocate(b, 128);
        allocator.deallocate(a, 128);
        allocator.deallocate(c, 128);

        assert!(allocator.is_pristine());
        assert_eq!(allocator.allocate(512, 1), Some(0));
    }

    #[test]
    fn aliasing_across_disjoint_lifetimes() {
        let mut allocator = FreeListAllocator::new(256);

        let first = allocator.allocate(200, 16).unwrap();
        allocator.deallocate(first, 200);

        // a second resource with a disjoint lifetime lands on the same offset
        let second = allocator.allocate(200, 16).unwrap();
        assert_eq!(first, second);
    }

    #[test]
    fn out_of_memory_returns_none() {
        let mut allocator = FreeListAllocator::new(64);

        assert_eq!(allocator.allocate(64, 1), Some(0));
        assert_eq!(allocator.allocate(1, 1), None);
    }
}
