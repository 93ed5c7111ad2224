// ABOUTME: Byte ring buffer with free-running read and write indices
// ABOUTME: Writers never block; overruns are detected by the reader

/// Fixed-size byte ring
///
/// Indices only ever grow; the position in storage is `index % capacity`.
/// `write - read` is the fill level and may exceed the capacity after the
/// writer has lapped the reader, or go negative after the reader was moved
/// past the writer.
#[derive(Debug)]
pub struct RingBuffer {
    data: Box<[u8]>,
    read: u64,
    write: u64,
}

impl RingBuffer {
    /// Allocate a zeroed ring of `capacity` bytes
    pub fn new(capacity: usize) -> Self {
        Self {
            data: vec![0u8; capacity.max(1)].into_boxed_slice(),
            read: 0,
            write: 0,
        }
    }

    /// Storage size in bytes
    pub fn capacity(&self) -> usize {
        self.data.len()
    }

    /// Next byte to read
    pub fn read_index(&self) -> u64 {
        self.read
    }

    /// Next byte to write
    pub fn write_index(&self) -> u64 {
        self.write
    }

    /// `write - read`
    pub fn available(&self) -> i64 {
        self.write.wrapping_sub(self.read) as i64
    }

    /// Move the read cursor
    pub fn set_read_index(&mut self, index: u64) {
        self.read = index;
    }

    /// Move the write cursor
    pub fn set_write_index(&mut self, index: u64) {
        self.write = index;
    }

    /// Both cursors back to zero
    pub fn reset(&mut self) {
        self.read = 0;
        self.write = 0;
    }

    /// Copy `src` into storage starting at `index`, wrapping as needed
    ///
    /// Only the last `capacity` bytes of an oversized `src` are kept.
    pub fn write_at(&mut self, index: u64, src: &[u8]) {
        let cap = self.data.len();
        let (index, src) = if src.len() > cap {
            let skip = src.len() - cap;
            (index + skip as u64, &src[skip..])
        } else {
            (index, src)
        };
        let start = (index % cap as u64) as usize;
        let first = src.len().min(cap - start);
        self.data[start..start + first].copy_from_slice(&src[..first]);
        self.data[..src.len() - first].copy_from_slice(&src[first..]);
    }

    /// Copy from storage starting at `index` into `dst`, wrapping as needed
    pub fn read_at(&self, index: u64, dst: &mut [u8]) {
        let cap = self.data.len();
        let len = dst.len().min(cap);
        let start = (index % cap as u64) as usize;
        let first = len.min(cap - start);
        dst[..first].copy_from_slice(&self.data[start..start + first]);
        dst[first..len].copy_from_slice(&self.data[..len - first]);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_write_then_read() {
        let mut ring = RingBuffer::new(8);
        ring.write_at(0, &[1, 2, 3]);
        ring.set_write_index(3);
        assert_eq!(ring.available(), 3);

        let mut out = [0u8; 3];
        ring.read_at(0, &mut out);
        assert_eq!(out, [1, 2, 3]);
    }

    #[test]
    fn test_wraparound() {
        let mut ring = RingBuffer::new(8);
        ring.write_at(6, &[1, 2, 3, 4]);
        let mut out = [0u8; 4];
        ring.read_at(6, &mut out);
        assert_eq!(out, [1, 2, 3, 4]);
        ring.read_at(8, &mut out[..2]);
        assert_eq!(&out[..2], &[3, 4]);
    }

    #[test]
    fn test_oversized_write_keeps_tail() {
        let mut ring = RingBuffer::new(4);
        ring.write_at(0, &[1, 2, 3, 4, 5, 6]);
        let mut out = [0u8; 4];
        ring.read_at(2, &mut out);
        assert_eq!(out, [3, 4, 5, 6]);
    }

    #[test]
    fn test_negative_available() {
        let mut ring = RingBuffer::new(4);
        ring.set_write_index(2);
        ring.set_read_index(5);
        assert_eq!(ring.available(), -3);
        ring.reset();
        assert_eq!(ring.available(), 0);
    }
}
