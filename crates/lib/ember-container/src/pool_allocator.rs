use parking_lot::Mutex;

/// Fixed-slot object pool.
///
/// Values live at stable indices until released, so subsystems can hold on to
/// a pool index across threads without keeping a borrow alive. Grows by whole
/// chunks, never moves existing slots.
pub struct Pool<T> {
    inner: Mutex<PoolInner<T>>,
}

struct PoolInner<T> {
    chunks: Vec<Vec<Option<T>>>,
    free_slots: Vec<usize>,
    chunk_size: usize,
    live_count: usize,
}

impl<T> Pool<T> {
    pub fn new(chunk_size: usize) -> Self {
        assert!(chunk_size > 0);

        Self {
            inner: Mutex::new(PoolInner {
                chunks: Vec::new(),
                free_slots: Vec::new(),
                chunk_size,
                live_count: 0,
            }),
        }
    }

    pub fn insert(&self, value: T) -> usize {
        let mut inner = self.inner.lock();

        let slot = match inner.free_slots.pop() {
            Some(slot) => slot,
            None => {
                let chunk_size = inner.chunk_size;
                let base = inner.chunks.len() * chunk_size;

                let mut chunk = Vec::with_capacity(chunk_size);
                chunk.resize_with(chunk_size, || None);
                inner.chunks.push(chunk);

                // newly grown slots go on the free list, keep the first
                for idx in (base + 1..base + chunk_size).rev() {
                    inner.free_slots.push(idx);
                }
                base
            }
        };

        let chunk_size = inner.chunk_size;
        inner.chunks[slot / chunk_size][slot % chunk_size] = Some(value);
        inner.live_count += 1;
        slot
    }

    pub fn remove(&self, slot: usize) -> T {
        let mut inner = self.inner.lock();

        let chunk_size = inner.chunk_size;
        let value = inner.chunks[slot / chunk_size][slot % chunk_size]
            .take()
            .expect("Pool slot was already released!");

        inner.free_slots.push(slot);
        inner.live_count -= 1;
        value
    }

    pub fn with<R>(&self, slot: usize, func: impl FnOnce(&mut T) -> R) -> R {
        let mut inner = self.inner.lock();

        let chunk_size = inner.chunk_size;
        let value = inner.chunks[slot / chunk_size][slot % chunk_size]
            .as_mut()
            .expect("Pool slot was already released!");

        func(value)
    }

    pub fn live_count(&self) -> usize {
        self.inner.lock().live_count
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn slots_are_recycled() {
        let pool = Pool::new(4);

        let a = pool.insert(10_u32);
        let b = pool.insert(20);
        assert_eq!(pool.remove(a), 10);

        let c = pool.insert(30);
        // the freed slot is reused before a new chunk is grown
        assert_eq!(c, a);

        assert_eq!(pool.remove(b), 20);
        assert_eq!(pool.remove(c), 30);
        assert_eq!(pool.live_count(), 0);
    }

    #[test]
    fn grows_by_chunks() {
        let pool = Pool::new(2);

        let slots = (0..5_u32).map(|i| pool.insert(i)).collect::<Vec<_>>();
        assert_eq!(pool.live_count(), 5);

        for (i, slot) in slots.into_iter().enumerate() {
            assert_eq!(pool.remove(slot), i as u32);
        }
    }
}
