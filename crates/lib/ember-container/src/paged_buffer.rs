const PAGE_SIZE: usize = 4 * 1024;

/// Append-only byte buffer built from fixed-size pages.
///
/// Pages are never reallocated, so byte ranges written earlier keep stable
/// addresses while the buffer keeps growing. Used to serialize command
/// streams that are replayed later on another thread.
pub struct PagedByteBuffer {
    pages: Vec<Box<[u8; PAGE_SIZE]>>,
    /// Write head inside the last page.
    head: usize,
}

impl Default for PagedByteBuffer {
    fn default() -> Self {
        Self::new()
    }
}

impl PagedByteBuffer {
    pub fn new() -> Self {
        Self {
            pages: Vec::new(),
            head: PAGE_SIZE,
        }
    }

    pub fn len(&self) -> usize {
        if self.pages.is_empty() {
            0
        } else {
            (self.pages.len() - 1) * PAGE_SIZE + self.head
        }
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn write(&mut self, mut bytes: &[u8]) {
        while !bytes.is_empty() {
            if self.head == PAGE_SIZE {
                self.pages.push(Box::new([0; PAGE_SIZE]));
                self.head = 0;
            }

            let page = self.pages.last_mut().unwrap();
            let writable = (PAGE_SIZE - self.head).min(bytes.len());

            page[self.head..self.head + writable].copy_from_slice(&bytes[..writable]);
            self.head += writable;
            bytes = &bytes[writable..];
        }
    }

    pub fn reader(&self) -> PagedByteReader {
        PagedByteReader {
            buffer: self,
            cursor: 0,
        }
    }
}

/// Sequential reader over a [`PagedByteBuffer`].
pub struct PagedByteReader<'a> {
    buffer: &'a PagedByteBuffer,
    cursor: usize,
}

impl<'a> PagedByteReader<'a> {
    pub fn remaining(&self) -> usize {
        self.buffer.len() - self.cursor
    }

    pub fn read(&mut self, out: &mut [u8]) {
        assert!(out.len() <= self.remaining(), "Read past the end of the buffer!");

        let mut read = 0;
        while read < out.len() {
            let page = &self.buffer.pages[self.cursor / PAGE_SIZE];
            let in_page = self.cursor % PAGE_SIZE;
            let readable = (PAGE_SIZE - in_page).min(out.len() - read);

            out[read..read + readable].copy_from_slice(&page[in_page..in_page + readable]);
            read += readable;
            self.cursor += readable;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn round_trip_across_page_boundaries() {
        let mut buffer = PagedByteBuffer::new();

        let payload = (0..10_000_usize).map(|i| (i % 251) as u8).collect::<Vec<_>>();
        buffer.write(&payload[..3000]);
        buffer.write(&payload[3000..]);

        assert_eq!(buffer.len(), payload.len());

        let mut reader = buffer.reader();
        let mut out = vec![0_u8; payload.len()];
        reader.read(&mut out[..5000]);
        reader.read(&mut out[5000..]);

        assert_eq!(out, payload);
        assert_eq!(reader.remaining(), 0);
    }
}
